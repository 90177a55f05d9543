//! Media element events, normalized signals and playback errors

use thiserror::Error;

use crate::sync::PlaybackDelta;

/// A raw event from the media element, carrying its position in seconds
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    Play { position: f64 },
    Pause { position: f64 },
    /// A jump started; progress reports are stale until `Seeked`
    Seeking { position: f64 },
    Seeked { position: f64 },
    TimeUpdate { position: f64 },
    Error { message: String },
}

/// Normalized signal produced by the observer
#[derive(Debug, Clone, PartialEq)]
pub enum LocalSignal {
    /// Playback started (user or programmatic)
    Play { at: f64 },
    /// Playback stopped
    Pause { at: f64 },
    /// A discrete jump completed
    Seeked { at: f64, playing: bool },
    /// Periodic position report while playing
    Progress { at: f64 },
    /// The element failed (decode error, source unavailable)
    Failed(String),
}

impl LocalSignal {
    /// The room update this signal asks for, if any
    pub fn to_delta(&self) -> Option<PlaybackDelta> {
        match self {
            LocalSignal::Play { at } => Some(PlaybackDelta::playing(*at)),
            LocalSignal::Pause { at } => Some(PlaybackDelta::paused(*at)),
            LocalSignal::Seeked { at, playing } => Some(PlaybackDelta::position(*at, *playing)),
            LocalSignal::Progress { at } => Some(PlaybackDelta::playing(*at)),
            LocalSignal::Failed(_) => None,
        }
    }
}

/// What the local element is doing right now
#[derive(Debug, Clone, PartialEq)]
pub struct LocalPlayback {
    pub current_time: f64,
    pub is_playing: bool,
    pub source: String,
}

/// Errors a playback command can report
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlaybackError {
    /// The platform refused to start playback (autoplay policy)
    #[error("Playback blocked: {0}")]
    Blocked(String),

    /// A play request superseded by a pause before it took effect
    #[error("Play request was interrupted")]
    Interrupted,

    #[error("Media error: {0}")]
    Decode(String),

    #[error("No media loaded")]
    Unavailable,
}

impl PlaybackError {
    /// Interrupted play requests are routine and never shown to the user
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, PlaybackError::Interrupted)
    }
}
