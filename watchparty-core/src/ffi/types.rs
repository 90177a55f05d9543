//! FFI types exposed via uniffi

use crate::player::{MediaEvent, PlaybackError};
use crate::store::StoreError;
use crate::sync::{RoomPlaybackState, SyncError};

/// Error types exposed via FFI
#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum CoreError {
    #[error("Room store is not reachable")]
    StoreNotReachable,

    #[error("Room store error: {0}")]
    StoreError(String),

    #[error("Room {0} not found")]
    RoomNotFound(String),

    #[error("Invalid room code: {0}")]
    InvalidRoomCode(String),

    #[error("Not in a room")]
    NotInRoom,

    #[error("Already in a room")]
    AlreadyInRoom,

    #[error("Sync error: {0}")]
    SyncError(String),

    #[error("Runtime error: {0}")]
    RuntimeError(String),
}

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotReachable => CoreError::StoreNotReachable,
            StoreError::RoomNotFound(room) => CoreError::RoomNotFound(room),
            other => CoreError::StoreError(other.to_string()),
        }
    }
}

impl From<SyncError> for CoreError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::RoomNotFound(room) => CoreError::RoomNotFound(room),
            SyncError::Disposed => CoreError::NotInRoom,
            other => CoreError::SyncError(other.to_string()),
        }
    }
}

/// Why the native player could not do what was asked
#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum PlayerError {
    #[error("Playback blocked: {message}")]
    Blocked { message: String },

    #[error("Play request was interrupted")]
    Interrupted,

    #[error("Media error: {message}")]
    Media { message: String },

    #[error("No media loaded")]
    NoMedia,
}

impl From<uniffi::UnexpectedUniFFICallbackError> for PlayerError {
    fn from(e: uniffi::UnexpectedUniFFICallbackError) -> Self {
        PlayerError::Media { message: e.reason }
    }
}

impl From<PlayerError> for PlaybackError {
    fn from(e: PlayerError) -> Self {
        match e {
            PlayerError::Blocked { message } => PlaybackError::Blocked(message),
            PlayerError::Interrupted => PlaybackError::Interrupted,
            PlayerError::Media { message } => PlaybackError::Decode(message),
            PlayerError::NoMedia => PlaybackError::Unavailable,
        }
    }
}

/// Shared room playback state exposed via FFI
#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct RoomPlayback {
    pub video_url: String,
    pub is_playing: bool,
    /// Seconds
    pub current_time: f64,
    pub updated_at: u64,
}

impl From<&RoomPlaybackState> for RoomPlayback {
    fn from(s: &RoomPlaybackState) -> Self {
        Self {
            video_url: s.video_url.clone(),
            is_playing: s.is_playing,
            current_time: s.current_time,
            updated_at: s.updated_at,
        }
    }
}

/// Raw event from the native media element, positions in seconds
#[derive(Debug, Clone, PartialEq, uniffi::Enum)]
pub enum PlayerEvent {
    Play { position: f64 },
    Pause { position: f64 },
    Seeking { position: f64 },
    Seeked { position: f64 },
    TimeUpdate { position: f64 },
    Error { message: String },
}

impl From<PlayerEvent> for MediaEvent {
    fn from(e: PlayerEvent) -> Self {
        match e {
            PlayerEvent::Play { position } => MediaEvent::Play { position },
            PlayerEvent::Pause { position } => MediaEvent::Pause { position },
            PlayerEvent::Seeking { position } => MediaEvent::Seeking { position },
            PlayerEvent::Seeked { position } => MediaEvent::Seeked { position },
            PlayerEvent::TimeUpdate { position } => MediaEvent::TimeUpdate { position },
            PlayerEvent::Error { message } => MediaEvent::Error { message },
        }
    }
}

/// The native media element, driven by the synchronizer
///
/// Commands must return without waiting for the element; what actually
/// happens is reported back through `WatchSession::media_event`.
#[uniffi::export(callback_interface)]
pub trait MediaController: Send + Sync {
    fn play(&self) -> Result<(), PlayerError>;
    fn pause(&self);
    fn seek(&self, position: f64);
    fn load(&self, url: String);
    fn position(&self) -> f64;
    fn is_paused(&self) -> bool;
    fn source(&self) -> String;
}

/// Callback interface for session events
#[uniffi::export(callback_interface)]
pub trait SessionCallback: Send + Sync {
    /// `fatal` errors end the room session
    fn on_sync_error(&self, message: String, fatal: bool);
    /// A remote change was applied to the local player
    fn on_playback_changed(&self, playback: RoomPlayback);
    fn on_room_ended(&self, reason: String);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_to_core_errors() {
        assert!(matches!(
            CoreError::from(StoreError::NotReachable),
            CoreError::StoreNotReachable
        ));
        assert!(matches!(
            CoreError::from(StoreError::RoomNotFound("ABCD".into())),
            CoreError::RoomNotFound(room) if room == "ABCD"
        ));
        assert!(matches!(
            CoreError::from(SyncError::Disposed),
            CoreError::NotInRoom
        ));
    }

    #[test]
    fn test_player_errors_keep_their_kind() {
        assert_eq!(
            PlaybackError::from(PlayerError::Blocked { message: "autoplay".into() }),
            PlaybackError::Blocked("autoplay".into())
        );
        assert_eq!(
            PlaybackError::from(PlayerError::Interrupted),
            PlaybackError::Interrupted
        );
    }

    #[test]
    fn test_events_convert() {
        assert_eq!(
            MediaEvent::from(PlayerEvent::Seeked { position: 4.5 }),
            MediaEvent::Seeked { position: 4.5 }
        );
    }
}
