//! Bridges between the synchronizer and the native callbacks

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::player::{MediaElement, PlaybackError};
use crate::sync::{RoomPlaybackState, SyncError, SyncListener};

use super::types::{MediaController, RoomPlayback, SessionCallback};

pub(super) type SharedCallback = Arc<RwLock<Option<Arc<dyn SessionCallback>>>>;

/// `MediaElement` backed by the native player
pub(super) struct ControllerElement {
    controller: Arc<dyn MediaController>,
}

impl ControllerElement {
    pub(super) fn new(controller: Arc<dyn MediaController>) -> Self {
        Self { controller }
    }
}

impl MediaElement for ControllerElement {
    fn play(&mut self) -> Result<(), PlaybackError> {
        self.controller.play().map_err(PlaybackError::from)
    }

    fn pause(&mut self) {
        self.controller.pause();
    }

    fn seek_to(&mut self, secs: f64) {
        self.controller.seek(secs);
    }

    fn load(&mut self, url: &str) {
        self.controller.load(url.to_string());
    }

    fn current_time(&self) -> f64 {
        self.controller.position()
    }

    fn is_paused(&self) -> bool {
        self.controller.is_paused()
    }

    fn source(&self) -> String {
        self.controller.source()
    }
}

/// Forwards synchronizer reports to whatever callback is currently set
pub(super) struct CallbackListener {
    room_code: String,
    callback: SharedCallback,
}

impl CallbackListener {
    pub(super) fn new(room_code: String, callback: SharedCallback) -> Self {
        Self {
            room_code,
            callback,
        }
    }
}

impl SyncListener for CallbackListener {
    fn on_sync_error(&self, error: &SyncError) {
        let Some(cb) = self.callback.read().clone() else {
            debug!("No callback for error in room {}: {}", self.room_code, error);
            return;
        };
        cb.on_sync_error(error.to_string(), error.is_fatal());
        if error.is_fatal() {
            cb.on_room_ended(error.to_string());
        }
    }

    fn on_state_applied(&self, state: &RoomPlaybackState) {
        if let Some(cb) = self.callback.read().clone() {
            cb.on_playback_changed(RoomPlayback::from(state));
        }
    }
}
