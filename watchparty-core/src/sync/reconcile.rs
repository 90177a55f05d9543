//! Inbound reconciliation policy
//!
//! Decides what to do to the local element when a remote state arrives.
//! Small drift is left alone while the play/pause state already agrees;
//! constant micro-seeking is more visible than half a second of offset.

use crate::player::LocalPlayback;
use crate::sync::RoomPlaybackState;

/// Commands to issue to the local element, in order: load, seek, play/pause
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    /// New source to load (the only field without tolerance)
    pub load: Option<String>,
    pub seek: Option<f64>,
    /// `Some(true)` to play, `Some(false)` to pause
    pub play: Option<bool>,
}

impl ReconcilePlan {
    pub fn is_noop(&self) -> bool {
        self.load.is_none() && self.seek.is_none() && self.play.is_none()
    }
}

pub fn plan(local: &LocalPlayback, remote: &RoomPlaybackState, tolerance: f64) -> ReconcilePlan {
    let mut plan = ReconcilePlan::default();

    let source_changed = local.source != remote.video_url;
    if source_changed {
        plan.load = Some(remote.video_url.clone());
    }

    if !remote.has_media() {
        return plan;
    }

    // A freshly loaded source starts paused at the beginning
    let (local_time, local_playing) = if source_changed {
        (0.0, false)
    } else {
        (local.current_time, local.is_playing)
    };

    let time_diff = (local_time - remote.current_time).abs();
    let play_state_differs = local_playing != remote.is_playing;

    if time_diff > tolerance || play_state_differs {
        plan.seek = Some(remote.current_time);
    }
    if play_state_differs {
        plan.play = Some(remote.is_playing);
    }

    plan
}
