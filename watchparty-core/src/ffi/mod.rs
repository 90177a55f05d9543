//! FFI bindings for native UI integration
//!
//! This module provides the interface exposed via uniffi to Swift/Kotlin.
//! The native shell owns the media element; it implements `MediaController`
//! and forwards the element's events through `WatchSession::media_event`.

mod handlers;
mod session;
mod types;

pub use session::*;
pub use types::*;
