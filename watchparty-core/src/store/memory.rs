//! In-process room store
//!
//! Keeps every room in memory and fans accepted writes out to subscribers.
//! Useful for embedding hosts that run all viewers in one process, and for tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::{RoomStore, StoreError, StoreSubscription, StoreUpdate};
use crate::sync::{current_time_ms, PlaybackDelta, RoomPlaybackState};

struct RoomEntry {
    state: RoomPlaybackState,
    subscribers: Vec<mpsc::UnboundedSender<StoreUpdate>>,
    writes: usize,
}

impl RoomEntry {
    fn new(state: RoomPlaybackState) -> Self {
        Self {
            state,
            subscribers: Vec::new(),
            writes: 0,
        }
    }

    /// Push to live subscribers, forgetting the ones that went away
    fn publish(&mut self) {
        let state = self.state.clone();
        self.subscribers.retain(|tx| tx.send(Ok(state.clone())).is_ok());
    }
}

#[derive(Default)]
struct Inner {
    rooms: HashMap<String, RoomEntry>,
    failing_writes: u32,
}

/// Room store backed by a process-local map
#[derive(Clone, Default)]
pub struct MemoryRoomStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or overwrite a room, stamping a fresh `updated_at` and notifying subscribers
    pub fn seed(&self, room: &str, mut state: RoomPlaybackState) -> RoomPlaybackState {
        let mut inner = self.inner.lock();
        let entry = inner
            .rooms
            .entry(room.to_string())
            .or_insert_with(|| RoomEntry::new(RoomPlaybackState::default()));
        state.updated_at = next_timestamp(entry.state.updated_at);
        entry.state = state;
        entry.publish();
        entry.state.clone()
    }

    /// Accepted writes for a room so far
    pub fn write_count(&self, room: &str) -> usize {
        self.inner
            .lock()
            .rooms
            .get(room)
            .map(|entry| entry.writes)
            .unwrap_or(0)
    }

    /// Current state without going through the async contract
    pub fn snapshot(&self, room: &str) -> Option<RoomPlaybackState> {
        self.inner.lock().rooms.get(room).map(|entry| entry.state.clone())
    }

    /// Make the next `count` writes fail
    pub fn fail_next_writes(&self, count: u32) {
        self.inner.lock().failing_writes = count;
    }

    /// Push `state` to subscribers as-is, without storing it (late or reordered delivery)
    #[cfg(test)]
    pub(crate) fn replay(&self, room: &str, state: RoomPlaybackState) {
        if let Some(entry) = self.inner.lock().rooms.get_mut(room) {
            entry.subscribers.retain(|tx| tx.send(Ok(state.clone())).is_ok());
        }
    }

    /// Report a feed failure to subscribers without closing their subscriptions
    #[cfg(test)]
    pub(crate) fn push_error(&self, room: &str, make: impl Fn() -> StoreError) {
        if let Some(entry) = self.inner.lock().rooms.get_mut(room) {
            entry.subscribers.retain(|tx| tx.send(Err(make())).is_ok());
        }
    }

    /// Drop every subscription of a room, as if the feed went away
    #[cfg(test)]
    pub(crate) fn close_subscriptions(&self, room: &str) {
        if let Some(entry) = self.inner.lock().rooms.get_mut(room) {
            entry.subscribers.clear();
        }
    }
}

/// Timestamps are wall-clock milliseconds, bumped when the clock has not advanced
fn next_timestamp(previous: u64) -> u64 {
    current_time_ms().max(previous + 1)
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    async fn create(&self, room: &str) -> Result<RoomPlaybackState, StoreError> {
        let mut inner = self.inner.lock();
        if inner.rooms.contains_key(room) {
            return Err(StoreError::AlreadyExists(room.to_string()));
        }
        let state = RoomPlaybackState {
            updated_at: next_timestamp(0),
            ..Default::default()
        };
        inner.rooms.insert(room.to_string(), RoomEntry::new(state.clone()));
        debug!("Created room {}", room);
        Ok(state)
    }

    async fn read(&self, room: &str) -> Result<RoomPlaybackState, StoreError> {
        self.snapshot(room)
            .ok_or_else(|| StoreError::RoomNotFound(room.to_string()))
    }

    async fn write(
        &self,
        room: &str,
        delta: &PlaybackDelta,
    ) -> Result<RoomPlaybackState, StoreError> {
        let mut inner = self.inner.lock();
        if inner.failing_writes > 0 {
            inner.failing_writes -= 1;
            return Err(StoreError::Api("write rejected".to_string()));
        }

        let entry = inner
            .rooms
            .get_mut(room)
            .ok_or_else(|| StoreError::RoomNotFound(room.to_string()))?;
        delta.apply_to(&mut entry.state);
        entry.state.updated_at = next_timestamp(entry.state.updated_at);
        entry.writes += 1;
        entry.publish();

        debug!("Room {} accepted write {:?} at {}", room, delta, entry.state.updated_at);
        Ok(entry.state.clone())
    }

    async fn subscribe(&self, room: &str) -> Result<StoreSubscription, StoreError> {
        let mut inner = self.inner.lock();
        let entry = inner
            .rooms
            .get_mut(room)
            .ok_or_else(|| StoreError::RoomNotFound(room.to_string()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        entry.subscribers.push(tx);
        Ok(StoreSubscription::new(rx))
    }
}
