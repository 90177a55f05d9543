//! Shared Room State Store
//!
//! The synchronizer only needs point reads, merge-writes and a push
//! subscription per room. Any realtime document store or long-poll channel
//! can sit behind this contract.

mod http;
mod memory;

pub use http::*;
pub use memory::*;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::sync::{PlaybackDelta, RoomPlaybackState};

/// Errors that can occur when talking to the room store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Room store is not reachable")]
    NotReachable,

    #[error("Invalid API token")]
    Unauthorized,

    #[error("Room {0} not found")]
    RoomNotFound(String),

    #[error("Room {0} already exists")]
    AlreadyExists(String),

    #[error("Store error: {0}")]
    Api(String),

    #[error("Subscription closed")]
    Closed,
}

impl StoreError {
    pub fn is_room_not_found(&self) -> bool {
        matches!(self, StoreError::RoomNotFound(_))
    }
}

/// Per-room document operations
#[async_trait]
pub trait RoomStore: Send + Sync + 'static {
    /// Create a room with the default (empty, paused) playback state
    async fn create(&self, room: &str) -> Result<RoomPlaybackState, StoreError>;

    /// Point read, eventually consistent
    async fn read(&self, room: &str) -> Result<RoomPlaybackState, StoreError>;

    /// Merge-write the set fields of `delta`. Returns the accepted state
    /// with its new `updated_at`.
    async fn write(
        &self,
        room: &str,
        delta: &PlaybackDelta,
    ) -> Result<RoomPlaybackState, StoreError>;

    /// Push the full state on every accepted write, the subscriber's own included
    async fn subscribe(&self, room: &str) -> Result<StoreSubscription, StoreError>;
}

/// One item of a subscription: a pushed state, or a failure of the feed
///
/// A failure does not end the subscription; the feed keeps trying until it
/// is closed. Feeds report the first failure of a run, not every retry.
pub type StoreUpdate = Result<RoomPlaybackState, StoreError>;

/// Stream of room states; dropping it unsubscribes
#[derive(Debug)]
pub struct StoreSubscription {
    updates: mpsc::UnboundedReceiver<StoreUpdate>,
    /// Stops a background feeder (polling task) when dropped
    _cancel: Option<oneshot::Sender<()>>,
}

impl StoreSubscription {
    pub fn new(updates: mpsc::UnboundedReceiver<StoreUpdate>) -> Self {
        Self {
            updates,
            _cancel: None,
        }
    }

    pub fn with_cancel(
        updates: mpsc::UnboundedReceiver<StoreUpdate>,
        cancel: oneshot::Sender<()>,
    ) -> Self {
        Self {
            updates,
            _cancel: Some(cancel),
        }
    }

    /// Next pushed state or feed failure, `None` once the store side has gone away
    pub async fn recv(&mut self) -> Option<StoreUpdate> {
        self.updates.recv().await
    }
}
