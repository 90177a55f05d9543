//! Outbound write coalescing
//!
//! Local signals arrive far faster than the room should be written
//! (progress fires several times per second). Changes are merged into one
//! pending delta and flushed on a fixed window that later changes do not
//! extend, so a steady stream still produces a bounded number of writes.

use std::time::Duration;

use tokio::time::Instant;

use super::protocol::PlaybackDelta;
use crate::config::{DEFAULT_DEBOUNCE_WINDOW, DEFAULT_MIN_WRITE_INTERVAL};

/// Pending outbound changes and the write-rate clocks
#[derive(Debug, Clone)]
pub struct WriteCoalescer {
    pending: Option<PlaybackDelta>,
    /// Pending delta carries a user action, not just progress
    has_intent: bool,
    /// Pending delta must skip the debounce window (source change)
    priority: bool,
    last_write_at: Option<Instant>,
    debounce_window: Duration,
    min_write_interval: Duration,
}

impl WriteCoalescer {
    pub fn new(debounce_window: Duration, min_write_interval: Duration) -> Self {
        Self {
            pending: None,
            has_intent: false,
            priority: false,
            last_write_at: None,
            debounce_window,
            min_write_interval,
        }
    }

    /// Merge a change into the pending delta
    ///
    /// `intent` marks user actions (play, pause, seek) as opposed to progress reports.
    pub fn push(&mut self, delta: PlaybackDelta, intent: bool) {
        match &mut self.pending {
            Some(pending) => pending.merge(delta),
            None => self.pending = Some(delta),
        }
        self.has_intent |= intent;
    }

    /// Merge a change that bypasses the debounce window
    pub fn push_priority(&mut self, delta: PlaybackDelta) {
        self.push(delta, true);
        self.priority = true;
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn has_intent(&self) -> bool {
        self.has_intent
    }

    pub fn is_priority(&self) -> bool {
        self.priority
    }

    /// When the pending delta may be flushed if a window opens at `now`
    ///
    /// Never earlier than `min_write_interval` after the previous accepted write.
    pub fn flush_deadline(&self, now: Instant) -> Instant {
        let window_end = if self.priority {
            now
        } else {
            now + self.debounce_window
        };
        match self.last_write_at {
            Some(last) => window_end.max(last + self.min_write_interval),
            None => window_end,
        }
    }

    /// Take the pending delta for flushing
    pub fn take(&mut self) -> Option<PlaybackDelta> {
        self.has_intent = false;
        self.priority = false;
        self.pending.take()
    }

    /// Drop pending progress that a newer remote state supersedes.
    /// Returns true if something was dropped.
    pub fn discard_progress(&mut self) -> bool {
        if self.pending.is_some() && !self.has_intent {
            self.pending = None;
            self.priority = false;
            return true;
        }
        false
    }

    /// Start the rate-limit clock after a write was sent
    pub fn record_write(&mut self, now: Instant) {
        self.last_write_at = Some(now);
    }
}

impl Default for WriteCoalescer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_WINDOW, DEFAULT_MIN_WRITE_INTERVAL)
    }
}
