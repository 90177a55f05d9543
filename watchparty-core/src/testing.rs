//! Test doubles shared by the sync and ffi tests

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::player::{MediaElement, MediaEvent, PlaybackError};
use crate::store::{MemoryRoomStore, RoomStore, StoreError, StoreSubscription, StoreUpdate};
use crate::sync::{MediaEventSender, PlaybackDelta, RoomPlaybackState, SyncError, SyncListener};

struct FakeState {
    source: String,
    paused: bool,
    /// Position at `anchor_at`; advances with the (tokio) clock while playing
    anchor_pos: f64,
    anchor_at: Instant,
    blocked: bool,
    plays: u32,
    pauses: u32,
    seeks: Vec<f64>,
}

impl FakeState {
    fn position(&self) -> f64 {
        if self.paused {
            self.anchor_pos
        } else {
            self.anchor_pos + self.anchor_at.elapsed().as_secs_f64()
        }
    }

    fn rebase(&mut self) {
        self.anchor_pos = self.position();
        self.anchor_at = Instant::now();
    }
}

/// A media element that behaves like a browser video: commands change its
/// state and come back as events. Clones share the same element.
#[derive(Clone)]
pub struct FakeElement {
    state: Arc<Mutex<FakeState>>,
    events: MediaEventSender,
}

impl FakeElement {
    pub fn new(events: MediaEventSender) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                source: String::new(),
                paused: true,
                anchor_pos: 0.0,
                anchor_at: Instant::now(),
                blocked: false,
                plays: 0,
                pauses: 0,
                seeks: Vec::new(),
            })),
            events,
        }
    }

    // The element may outlive its synchronizer
    fn emit(&self, event: MediaEvent) {
        let _ = self.events.send(event);
    }

    fn do_play(&self) {
        let position = {
            let mut state = self.state.lock();
            if !state.paused {
                return;
            }
            state.rebase();
            state.paused = false;
            state.plays += 1;
            state.anchor_pos
        };
        self.emit(MediaEvent::Play { position });
    }

    fn do_pause(&self) {
        let position = {
            let mut state = self.state.lock();
            if state.paused {
                return;
            }
            state.rebase();
            state.paused = true;
            state.pauses += 1;
            state.anchor_pos
        };
        self.emit(MediaEvent::Pause { position });
    }

    fn do_seek(&self, secs: f64) {
        {
            let mut state = self.state.lock();
            state.anchor_pos = secs;
            state.anchor_at = Instant::now();
            state.seeks.push(secs);
        }
        self.emit(MediaEvent::Seeking { position: secs });
        self.emit(MediaEvent::Seeked { position: secs });
    }

    /// Refuse play requests, like an autoplay policy would
    pub fn block_playback(&self, blocked: bool) {
        self.state.lock().blocked = blocked;
    }

    pub fn user_play(&self) {
        self.do_play();
    }

    pub fn user_pause(&self) {
        self.do_pause();
    }

    pub fn user_seek(&self, secs: f64) {
        self.do_seek(secs);
    }

    /// Emit a timeupdate if playing
    pub fn tick(&self) {
        let position = {
            let state = self.state.lock();
            if state.paused {
                return;
            }
            state.position()
        };
        self.emit(MediaEvent::TimeUpdate { position });
    }

    pub fn fail(&self, message: &str) {
        self.emit(MediaEvent::Error {
            message: message.to_string(),
        });
    }

    pub fn position(&self) -> f64 {
        self.state.lock().position()
    }

    pub fn is_playing(&self) -> bool {
        !self.state.lock().paused
    }

    pub fn source(&self) -> String {
        self.state.lock().source.clone()
    }

    pub fn plays(&self) -> u32 {
        self.state.lock().plays
    }

    pub fn pauses(&self) -> u32 {
        self.state.lock().pauses
    }

    /// Every seek, issued by the synchronizer or the user
    pub fn seeks(&self) -> Vec<f64> {
        self.state.lock().seeks.clone()
    }
}

impl MediaElement for FakeElement {
    fn play(&mut self) -> Result<(), PlaybackError> {
        {
            let state = self.state.lock();
            if state.source.is_empty() {
                return Err(PlaybackError::Unavailable);
            }
            if state.blocked {
                return Err(PlaybackError::Blocked("autoplay".to_string()));
            }
        }
        self.do_play();
        Ok(())
    }

    fn pause(&mut self) {
        self.do_pause();
    }

    fn seek_to(&mut self, secs: f64) {
        self.do_seek(secs);
    }

    fn load(&mut self, url: &str) {
        let mut state = self.state.lock();
        state.source = url.to_string();
        state.paused = true;
        state.anchor_pos = 0.0;
        state.anchor_at = Instant::now();
    }

    fn current_time(&self) -> f64 {
        self.position()
    }

    fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    fn source(&self) -> String {
        FakeElement::source(self)
    }
}

/// Collects everything a synchronizer reports
#[derive(Default)]
pub struct RecordingListener {
    errors: Mutex<Vec<SyncError>>,
    applied: Mutex<Vec<RoomPlaybackState>>,
}

impl RecordingListener {
    pub fn errors(&self) -> Vec<SyncError> {
        self.errors.lock().clone()
    }

    pub fn applied(&self) -> Vec<RoomPlaybackState> {
        self.applied.lock().clone()
    }
}

impl SyncListener for RecordingListener {
    fn on_sync_error(&self, error: &SyncError) {
        self.errors.lock().push(error.clone());
    }

    fn on_state_applied(&self, state: &RoomPlaybackState) {
        self.applied.lock().push(state.clone());
    }
}

/// A store whose subscriptions stay open but never deliver, like a push
/// channel that silently lost its connection
#[derive(Clone, Default)]
pub struct SilentStore {
    pub rooms: MemoryRoomStore,
    feeds: Arc<Mutex<Vec<mpsc::UnboundedSender<StoreUpdate>>>>,
}

#[async_trait]
impl RoomStore for SilentStore {
    async fn create(&self, room: &str) -> Result<RoomPlaybackState, StoreError> {
        self.rooms.create(room).await
    }

    async fn read(&self, room: &str) -> Result<RoomPlaybackState, StoreError> {
        self.rooms.read(room).await
    }

    async fn write(
        &self,
        room: &str,
        delta: &PlaybackDelta,
    ) -> Result<RoomPlaybackState, StoreError> {
        self.rooms.write(room, delta).await
    }

    async fn subscribe(&self, room: &str) -> Result<StoreSubscription, StoreError> {
        self.rooms.read(room).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds.lock().push(tx);
        Ok(StoreSubscription::new(rx))
    }
}
