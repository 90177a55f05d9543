//! Room playback document and partial updates to it

use serde::{Deserialize, Serialize};

/// The shared playback record of a room, as held by the store
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPlaybackState {
    /// Current media source; empty means nothing loaded
    #[serde(default)]
    pub video_url: String,
    /// Intended play/pause state
    #[serde(default)]
    pub is_playing: bool,
    /// Last known playback offset in seconds
    #[serde(default)]
    pub current_time: f64,
    /// Stamped by the store on every accepted write, strictly increasing per room
    #[serde(default)]
    pub updated_at: u64,
}

impl RoomPlaybackState {
    pub fn has_media(&self) -> bool {
        !self.video_url.is_empty()
    }
}

/// A merge-write: only the fields that are set are changed
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_playing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_time: Option<f64>,
}

impl PlaybackDelta {
    pub fn playing(at: f64) -> Self {
        Self {
            is_playing: Some(true),
            current_time: Some(at),
            ..Default::default()
        }
    }

    pub fn paused(at: f64) -> Self {
        Self {
            is_playing: Some(false),
            current_time: Some(at),
            ..Default::default()
        }
    }

    pub fn position(at: f64, playing: bool) -> Self {
        Self {
            is_playing: Some(playing),
            current_time: Some(at),
            ..Default::default()
        }
    }

    /// A new source restarts from the beginning and autoplays; clearing it stops playback
    pub fn source(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            is_playing: Some(!url.is_empty()),
            video_url: Some(url),
            current_time: Some(0.0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.video_url.is_none() && self.is_playing.is_none() && self.current_time.is_none()
    }

    /// Fold a newer delta into this one, last writer wins per field
    pub fn merge(&mut self, newer: PlaybackDelta) {
        if newer.video_url.is_some() {
            self.video_url = newer.video_url;
        }
        if newer.is_playing.is_some() {
            self.is_playing = newer.is_playing;
        }
        if newer.current_time.is_some() {
            self.current_time = newer.current_time;
        }
    }

    /// Apply the set fields to a full state (does not touch `updated_at`)
    pub fn apply_to(&self, state: &mut RoomPlaybackState) {
        if let Some(url) = &self.video_url {
            state.video_url = url.clone();
        }
        if let Some(playing) = self.is_playing {
            state.is_playing = playing;
        }
        if let Some(time) = self.current_time {
            state.current_time = time;
        }
    }

    /// Whether writing this delta would change nothing perceptible
    ///
    /// The source and play state must match exactly, the offset within `tolerance` seconds.
    pub fn matches(&self, state: &RoomPlaybackState, tolerance: f64) -> bool {
        let url_matches = self
            .video_url
            .as_ref()
            .map_or(true, |url| *url == state.video_url);
        let playing_matches = self.is_playing.map_or(true, |p| p == state.is_playing);
        let time_matches = self
            .current_time
            .map_or(true, |t| (t - state.current_time).abs() <= tolerance);

        url_matches && playing_matches && time_matches
    }
}

/// Get current time in milliseconds since UNIX epoch
pub fn current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
