//! Outbound call interception for the console request-security layer.
//!
//! Every call goes through `SecureClient`, whatever transport carries it:
//!
//! ```text
//! session gate -> token + credential -> rate limit -> permission -> activity -> dispatch (timeout)
//! ```
//!
//! Both a future-based `Transport` and a callback-based `CallbackTransport`
//! are accepted; the latter is bridged onto the same pipeline by
//! `CallbackAdapter`.

mod client;
mod message;
mod sources;
mod transport;

pub use client::{ClientGuards, ClientSettings, SecureClient};
pub use message::{CanonicalTarget, InboundResponse, OutboundRequest};
pub use sources::{BeaconSink, TransportPermissionSource};
pub use transport::{CallbackAdapter, CallbackTransport, Completion, Transport, TransportError};
