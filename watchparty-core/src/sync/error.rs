//! Errors surfaced by the synchronizer

use thiserror::Error;

use crate::player::PlaybackError;
use crate::store::StoreError;

/// Everything the synchronizer reports through `SyncListener::on_sync_error`
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    /// A store read, write or subscription failed. Not retried.
    #[error("Sync failed: {0}")]
    Transport(String),

    /// The local element could not do what the room asked
    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Room {0} not found")]
    RoomNotFound(String),

    #[error("Room updates stopped")]
    SubscriptionClosed,

    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    #[error("Synchronizer was disposed")]
    Disposed,
}

impl SyncError {
    /// Fatal errors end the session; there is no retry loop
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::RoomNotFound(_)
                | SyncError::SubscriptionClosed
                | SyncError::InvalidConfig(_)
                | SyncError::Disposed
        )
    }

    pub fn is_user_visible(&self) -> bool {
        match self {
            SyncError::Playback(e) => e.is_user_visible(),
            _ => true,
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::RoomNotFound(room) => SyncError::RoomNotFound(room),
            other => SyncError::Transport(other.to_string()),
        }
    }
}
