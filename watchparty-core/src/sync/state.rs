//! Synchronizer state machine

use tokio::time::Instant;

use super::coalescer::WriteCoalescer;
use super::protocol::RoomPlaybackState;
use crate::config::SyncConfig;

/// Progress of our own write
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WriteStage {
    /// Re-read and write are running
    InFlight,
    /// The store accepted `revision`; waiting for it to come back on the subscription
    AwaitingEcho { revision: u64, deadline: Instant },
}

/// Where a synchronizer is in its write cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncPhase {
    /// No pending changes, not writing
    Idle,
    /// Accumulating local changes until `flush_at`
    Coalescing { flush_at: Instant },
    /// Our write is in flight; inbound pushes are held back
    Writing(WriteStage),
}

impl SyncPhase {
    pub fn is_self_updating(&self) -> bool {
        matches!(self, SyncPhase::Writing(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Coalescing { .. } => "coalescing",
            SyncPhase::Writing(WriteStage::InFlight) => "writing",
            SyncPhase::Writing(WriteStage::AwaitingEcho { .. }) => "awaiting-echo",
        }
    }
}

impl Default for SyncPhase {
    fn default() -> Self {
        SyncPhase::Idle
    }
}

/// Per client-room bookkeeping, never shared or persisted
#[derive(Debug, Clone)]
pub struct LocalSyncContext {
    pub phase: SyncPhase,
    /// Pending outbound changes and the write-rate clocks
    pub outbound: WriteCoalescer,
    /// `updated_at` of the newest remote state applied (or written by us)
    pub last_applied_remote: Option<u64>,
    pub last_remote_apply_at: Option<Instant>,
    /// Newest push held back while writing or rate limited
    pub deferred_remote: Option<RoomPlaybackState>,
    /// Highest `updated_at` seen on the subscription
    pub max_seen_revision: u64,
    /// Last remote state we know of
    pub remote: Option<RoomPlaybackState>,
}

impl LocalSyncContext {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            phase: SyncPhase::Idle,
            outbound: WriteCoalescer::new(config.debounce_window, config.min_write_interval),
            last_applied_remote: None,
            last_remote_apply_at: None,
            deferred_remote: None,
            max_seen_revision: 0,
            remote: None,
        }
    }

    pub fn is_self_updating(&self) -> bool {
        self.phase.is_self_updating()
    }

    /// Inbound states may be applied: not writing, and no pending user action
    /// that our next write would put on top of them anyway
    pub fn can_reconcile(&self) -> bool {
        !self.is_self_updating() && !self.outbound.has_intent()
    }

    /// Not newer than what we already applied
    pub fn is_stale(&self, state: &RoomPlaybackState) -> bool {
        self.last_applied_remote
            .is_some_and(|applied| state.updated_at <= applied)
    }

    pub fn observe_revision(&mut self, revision: u64) {
        self.max_seen_revision = self.max_seen_revision.max(revision);
    }

    /// Keep the newest of the held-back pushes
    pub fn defer(&mut self, state: RoomPlaybackState) {
        let newer = self
            .deferred_remote
            .as_ref()
            .map_or(true, |held| state.updated_at > held.updated_at);
        if newer {
            self.deferred_remote = Some(state);
        }
    }

    /// Record a remote state as applied (or our own accepted write as known)
    pub fn mark_applied(&mut self, state: &RoomPlaybackState) {
        let applied = self.last_applied_remote.unwrap_or(0).max(state.updated_at);
        self.last_applied_remote = Some(applied);
        if self.remote.as_ref().map_or(true, |r| state.updated_at >= r.updated_at) {
            self.remote = Some(state.clone());
        }
        if self
            .deferred_remote
            .as_ref()
            .is_some_and(|held| held.updated_at <= applied)
        {
            self.deferred_remote = None;
        }
    }

    /// When the next inbound reconciliation is allowed
    pub fn remote_ready_at(&self, config: &SyncConfig) -> Option<Instant> {
        self.last_remote_apply_at
            .map(|last| last + config.remote_apply_interval)
    }

    /// Leave `Writing` (or settle after any outbound step): coalesce again if
    /// changes piled up meanwhile, otherwise go idle.
    pub fn settle(&mut self, now: Instant) {
        self.phase = if self.outbound.has_pending() {
            SyncPhase::Coalescing {
                flush_at: self.outbound.flush_deadline(now),
            }
        } else {
            SyncPhase::Idle
        };
    }

    /// The next instant a timer must fire, if any
    pub fn next_deadline(&self, config: &SyncConfig) -> Option<Instant> {
        let phase_deadline = match self.phase {
            SyncPhase::Coalescing { flush_at } => Some(flush_at),
            SyncPhase::Writing(WriteStage::AwaitingEcho { deadline, .. }) => Some(deadline),
            _ => None,
        };

        // A held-back push waits for the rate limit, and for our own write to settle
        let deferred_deadline = match &self.deferred_remote {
            Some(_) if self.can_reconcile() => Some(
                self.remote_ready_at(config)
                    .unwrap_or_else(Instant::now),
            ),
            _ => None,
        };

        match (phase_deadline, deferred_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}
