//! Composition root of the admin console request-security layer.
//!
//! This crate provides:
//! - `SecurityLayer` - Builds and wires every component from a `GuardConfig`
//! - `RenderGuard` - Scans markup before it reaches the document
//! - `FormGuard` - Validates forms and injects the anti-forgery token
//! - `PageGate` / `FeatureGate` - Page access and capability-driven visibility
//! - `IntegrityChecker` - Periodic self-check with targeted remediation
//! - `BackgroundTasks` - Interval tasks stopped on drop
//! - `SecurityReport` - Status snapshot for the console
//!
//! # Example
//!
//! ```ignore
//! use guard_console::SecurityLayer;
//!
//! let layer = SecurityLayer::builder(GuardConfig::load("guard.toml")?)
//!     .transport(Arc::new(FetchTransport::new()))
//!     .build()?;
//! let _tasks = layer.spawn_background();
//!
//! let users: Vec<User> = layer.client().get_json("/api/admin/users").await?;
//! layer.render_guard().set_inner_html(&mut table, &markup)?;
//! ```

mod forms;
mod integrity;
mod layer;
mod pages;
mod render;
mod report;
mod scheduler;

pub use forms::{Form, FormField, FormGuard, FormRejection};
pub use integrity::{CheckKind, CheckOutcome, IntegrityChecker, IntegrityReport, Remediation};
pub use layer::{BuildError, SecurityLayer, SecurityLayerBuilder};
pub use pages::{FeatureGate, GatedElement, PageAccess, PageGate};
pub use render::{InsertPosition, MarkupBuffer, MarkupTarget, RenderGuard};
pub use report::{
    AuthenticationStatus, CsrfStatus, EventStatus, PermissionStatus, RateLimitStatus,
    SecurityReport, XssStatus,
};
pub use scheduler::BackgroundTasks;
