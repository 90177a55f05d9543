//! Local Playback Observer
//!
//! Wraps one client's media element: normalizes its native events into a
//! small signal set and forwards playback commands to it. Holds no sync policy.

mod observer;
mod source;
mod types;

pub use observer::*;
pub use source::*;
pub use types::*;
