//! Watch Party - Core Library
//!
//! Keeps the playback of every viewer in a room in step: one shared playback
//! record per room in a store, and one synchronizer per viewer reconciling
//! its media element with that record.

pub mod config;
pub mod ffi;
pub mod player;
pub mod room_code;
pub mod store;
pub mod sync;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use config::SyncConfig;
pub use player::{MediaElement, MediaEvent, PlaybackObserver};
pub use room_code::RoomCode;
pub use store::{HttpRoomStore, MemoryRoomStore, RoomStore};
pub use sync::{RoomPlaybackState, SyncError, SyncListener, Synchronizer};

// Setup uniffi scaffolding
uniffi::setup_scaffolding!();
