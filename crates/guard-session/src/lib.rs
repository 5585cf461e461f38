//! Session activity tracking with idle timeout and forced re-authentication.
//!
//! The monitor is driven from two directions: activity events move the
//! last-activity stamp forward, and a periodic `check()` compares idle time
//! against the configured timeout. Expiry clears the stored credential,
//! permission set and session id, then hands control to `SessionHooks`.

mod activity;
mod id;
mod monitor;

pub use activity::{ActivityKind, ActivitySink};
pub use id::SessionId;
pub use monitor::{NoopHooks, SessionHooks, SessionMonitor, SessionState, SessionStores};
