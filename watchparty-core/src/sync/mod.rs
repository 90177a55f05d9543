//! Sync Engine
//!
//! Reconciles one client's media element with the shared room state:
//! local changes are coalesced into debounced writes, store pushes are
//! reconciled against local playback, and both directions suppress the
//! echoes of their own actions.

mod coalescer;
mod echo;
mod engine;
mod error;
mod protocol;
pub mod reconcile;
mod state;

pub use coalescer::*;
pub use echo::*;
pub use engine::*;
pub use error::*;
pub use protocol::*;
pub use state::*;
