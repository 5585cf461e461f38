//! Security event reporting for the console request-security layer.
//!
//! This crate provides:
//! - `SecurityEvent` - Typed anomaly record with JSON context
//! - `SecurityEventReporter` - Bounded display buffer plus non-blocking delivery queue
//! - `ReportSink` - Delivery target for queued events
//! - `ClickBurstDetector` / `InspectionDetector` - Anomaly heuristics

mod detectors;
mod event;
mod reporter;

pub use detectors::*;
pub use event::*;
pub use reporter::*;
