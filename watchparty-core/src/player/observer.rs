//! Media element contract and event normalization

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::types::{LocalPlayback, LocalSignal, MediaEvent, PlaybackError};
use crate::config::DEFAULT_PROGRESS_INTERVAL;

/// The underlying media element of one client
///
/// Commands return immediately; the element reports what actually happened
/// through its own `MediaEvent`s.
pub trait MediaElement: Send + 'static {
    /// Request playback start. An error means the element did not start playing.
    fn play(&mut self) -> Result<(), PlaybackError>;
    fn pause(&mut self);
    fn seek_to(&mut self, secs: f64);
    /// Replace the current source
    fn load(&mut self, url: &str);
    fn current_time(&self) -> f64;
    fn is_paused(&self) -> bool;
    fn source(&self) -> String;
}

/// Owns a media element and turns its raw events into `LocalSignal`s
#[derive(Debug)]
pub struct PlaybackObserver<M> {
    element: M,
    /// Between `Seeking` and `Seeked`
    seeking: bool,
    last_progress_at: Option<Instant>,
    progress_interval: Duration,
}

impl<M: MediaElement> PlaybackObserver<M> {
    pub fn new(element: M) -> Self {
        Self {
            element,
            seeking: false,
            last_progress_at: None,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn element(&self) -> &M {
        &self.element
    }

    pub fn is_seeking(&self) -> bool {
        self.seeking
    }

    pub fn normalize(&mut self, event: MediaEvent) -> Option<LocalSignal> {
        self.normalize_at(event, Instant::now())
    }

    pub fn normalize_at(&mut self, event: MediaEvent, now: Instant) -> Option<LocalSignal> {
        match event {
            MediaEvent::Play { position } => Some(LocalSignal::Play { at: position }),
            MediaEvent::Pause { position } => Some(LocalSignal::Pause { at: position }),
            MediaEvent::Seeking { .. } => {
                self.seeking = true;
                None
            }
            MediaEvent::Seeked { position } => {
                self.seeking = false;
                self.last_progress_at = Some(now);
                Some(LocalSignal::Seeked {
                    at: position,
                    playing: !self.element.is_paused(),
                })
            }
            MediaEvent::TimeUpdate { position } => {
                if self.seeking || self.element.is_paused() {
                    return None;
                }
                let throttled = self
                    .last_progress_at
                    .is_some_and(|last| now.duration_since(last) < self.progress_interval);
                if throttled {
                    return None;
                }
                self.last_progress_at = Some(now);
                Some(LocalSignal::Progress { at: position })
            }
            MediaEvent::Error { message } => Some(LocalSignal::Failed(message)),
        }
    }

    pub fn play(&mut self) -> Result<(), PlaybackError> {
        self.element.play()
    }

    /// Idempotent: pausing a paused element does nothing
    pub fn pause(&mut self) {
        if !self.element.is_paused() {
            self.element.pause();
        }
    }

    pub fn seek_to(&mut self, secs: f64) {
        debug!("Seeking element to {:.2}s", secs);
        self.element.seek_to(secs.max(0.0));
    }

    pub fn load(&mut self, url: &str) {
        self.seeking = false;
        self.last_progress_at = None;
        self.element.load(url);
    }

    pub fn snapshot(&self) -> LocalPlayback {
        LocalPlayback {
            current_time: self.element.current_time(),
            is_playing: !self.element.is_paused(),
            source: self.element.source(),
        }
    }
}
