//! Core abstractions for the console request-security layer.
//!
//! This crate provides the fundamental types shared by every component:
//! - `Clock` - Millisecond time source (`SystemClock`, `ManualClock`)
//! - `KeyValueStore` - Durable and volatile browser-style storage
//! - `PageMeta` - Page-level metadata channel readable by the backend
//! - `GuardConfig` - Layer configuration loaded from TOML or JSON
//! - `GuardError` - Rejection taxonomy surfaced to callers
//!
//! # Example
//!
//! ```ignore
//! use guard_core::{GuardConfig, MemoryStore, SystemClock};
//!
//! let config = GuardConfig::load("guard.toml")?;
//! let durable = MemoryStore::new();
//! let clock = SystemClock;
//! ```

mod clock;
mod config;
mod error;
mod meta;
mod store;

pub use clock::*;
pub use config::*;
pub use error::*;
pub use meta::*;
pub use store::*;
