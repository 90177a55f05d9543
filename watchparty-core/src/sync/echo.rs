//! Local echo tracking
//!
//! Every command the synchronizer sends to the media element comes back as a
//! media event a moment later. Those events describe what the room already
//! decided and must not be written back as if the user had acted.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::config::{DEFAULT_LOCAL_ECHO_WINDOW, DEFAULT_SEEK_ECHO_SLACK_SECS};
use crate::player::LocalSignal;

/// Kind of command issued to the element
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EchoKind {
    Play,
    Pause,
    Seek { to: f64 },
}

impl EchoKind {
    fn matches(&self, signal: &LocalSignal, seek_slack: f64) -> bool {
        match (self, signal) {
            (EchoKind::Play, LocalSignal::Play { .. }) => true,
            (EchoKind::Pause, LocalSignal::Pause { .. }) => true,
            (EchoKind::Seek { to }, LocalSignal::Seeked { at, .. }) => {
                (to - at).abs() <= seek_slack
            }
            _ => false,
        }
    }
}

/// A command awaiting its event
#[derive(Debug, Clone)]
struct ExpectedEcho {
    kind: EchoKind,
    issued_at: Instant,
}

/// Commands issued to the element whose events have not come back yet
#[derive(Debug, Clone)]
pub struct LocalEchoes {
    expected: Vec<ExpectedEcho>,
    window: Duration,
    /// How far a seek echo may land from the requested position (seconds)
    seek_slack: f64,
}

impl LocalEchoes {
    pub fn new(window: Duration, seek_slack: f64) -> Self {
        Self {
            expected: Vec::new(),
            window,
            seek_slack,
        }
    }

    /// Record a command just sent to the element
    pub fn expect(&mut self, kind: EchoKind, now: Instant) {
        self.prune(now);
        self.expected.push(ExpectedEcho {
            kind,
            issued_at: now,
        });
    }

    /// Returns true if `signal` is the echo of a recent command; the
    /// expectation is used up.
    pub fn consume(&mut self, signal: &LocalSignal, now: Instant) -> bool {
        self.prune(now);
        let seek_slack = self.seek_slack;
        match self
            .expected
            .iter()
            .position(|e| e.kind.matches(signal, seek_slack))
        {
            Some(idx) => {
                let echo = self.expected.remove(idx);
                debug!(
                    "Suppressed echo of {:?} after {}ms",
                    echo.kind,
                    now.duration_since(echo.issued_at).as_millis()
                );
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.expected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expected.is_empty()
    }

    fn prune(&mut self, now: Instant) {
        let window = self.window;
        self.expected
            .retain(|e| now.duration_since(e.issued_at) < window);
    }
}

impl Default for LocalEchoes {
    fn default() -> Self {
        Self::new(DEFAULT_LOCAL_ECHO_WINDOW, DEFAULT_SEEK_ECHO_SLACK_SECS)
    }
}
