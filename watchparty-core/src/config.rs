//! Synchronizer tuning
//!
//! All timing and tolerance knobs live here so that every client in a room
//! can be run with the same policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sync::SyncError;

/// Drift left uncorrected while the play/pause state already agrees (seconds)
pub const DEFAULT_DRIFT_TOLERANCE_SECS: f64 = 1.0;

/// Window from the first pending local change until it is flushed
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(250);

/// Minimum gap between two accepted writes from one client
pub const DEFAULT_MIN_WRITE_INTERVAL: Duration = Duration::from_millis(100);

/// Minimum gap between two inbound reconciliations
pub const DEFAULT_REMOTE_APPLY_INTERVAL: Duration = Duration::from_millis(100);

/// How long we wait for the store to echo our own write before giving up
pub const DEFAULT_ECHO_FALLBACK: Duration = Duration::from_millis(1000);

/// How long a command sent to the media element may come back as a local event
pub const DEFAULT_LOCAL_ECHO_WINDOW: Duration = Duration::from_millis(1500);

/// How far a seek event may land from the position we asked for and still
/// count as the echo of our own seek (seconds)
pub const DEFAULT_SEEK_ECHO_SLACK_SECS: f64 = 0.5;

/// Minimum gap between two progress signals
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// Synchronizer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum playback offset difference (seconds) tolerated without a seek
    pub drift_tolerance: f64,
    #[serde(with = "millis")]
    pub debounce_window: Duration,
    #[serde(with = "millis")]
    pub min_write_interval: Duration,
    #[serde(with = "millis")]
    pub remote_apply_interval: Duration,
    #[serde(with = "millis")]
    pub echo_fallback: Duration,
    #[serde(with = "millis")]
    pub local_echo_window: Duration,
    /// Seconds; a user seek closer than this to a recent synchronizer seek is taken as its echo
    pub seek_echo_slack: f64,
    #[serde(with = "millis")]
    pub progress_interval: Duration,
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_drift_tolerance(mut self, secs: f64) -> Self {
        self.drift_tolerance = secs;
        self
    }

    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = window;
        self
    }

    pub fn with_min_write_interval(mut self, interval: Duration) -> Self {
        self.min_write_interval = interval;
        self
    }

    pub fn with_remote_apply_interval(mut self, interval: Duration) -> Self {
        self.remote_apply_interval = interval;
        self
    }

    pub fn with_echo_fallback(mut self, fallback: Duration) -> Self {
        self.echo_fallback = fallback;
        self
    }

    pub fn with_local_echo_window(mut self, window: Duration) -> Self {
        self.local_echo_window = window;
        self
    }

    pub fn with_seek_echo_slack(mut self, secs: f64) -> Self {
        self.seek_echo_slack = secs;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Reject settings that would disable coalescing or drift handling
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.debounce_window.is_zero() {
            return Err(SyncError::InvalidConfig(
                "debounce window must be non-zero".to_string(),
            ));
        }
        if !self.drift_tolerance.is_finite() || self.drift_tolerance <= 0.0 {
            return Err(SyncError::InvalidConfig(format!(
                "drift tolerance must be a positive number of seconds, got {}",
                self.drift_tolerance
            )));
        }
        if !self.seek_echo_slack.is_finite() || self.seek_echo_slack < 0.0 {
            return Err(SyncError::InvalidConfig(format!(
                "seek echo slack must be zero or more seconds, got {}",
                self.seek_echo_slack
            )));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            drift_tolerance: DEFAULT_DRIFT_TOLERANCE_SECS,
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
            min_write_interval: DEFAULT_MIN_WRITE_INTERVAL,
            remote_apply_interval: DEFAULT_REMOTE_APPLY_INTERVAL,
            echo_fallback: DEFAULT_ECHO_FALLBACK,
            local_echo_window: DEFAULT_LOCAL_ECHO_WINDOW,
            seek_echo_slack: DEFAULT_SEEK_ECHO_SLACK_SECS,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

/// Durations are written as whole milliseconds in config files
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
