//! Anomaly heuristics feeding the reporter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use guard_core::{Clock, MonitoringConfig, Severity};

use crate::event::{kinds, SecurityEvent};
use crate::reporter::SecurityEventReporter;

#[derive(Debug, Default)]
struct Burst {
    count: u32,
    last_click_ms: Option<u64>,
}

/// Reports click bursts above a threshold.
///
/// A burst is a run of clicks with no gap of `window_ms` or more. It is
/// evaluated once it closes: on the first click after the quiet period,
/// or on `poll()`.
pub struct ClickBurstDetector {
    threshold: u32,
    window_ms: u64,
    burst: Mutex<Burst>,
    clock: Arc<dyn Clock>,
    reporter: Arc<SecurityEventReporter>,
}

impl ClickBurstDetector {
    pub fn new(
        config: &MonitoringConfig,
        clock: Arc<dyn Clock>,
        reporter: Arc<SecurityEventReporter>,
    ) -> Self {
        Self {
            threshold: config.click_burst_threshold,
            window_ms: config.click_window_ms,
            burst: Mutex::new(Burst::default()),
            clock,
            reporter,
        }
    }

    /// Record a click. Returns the size of a reported burst it closed.
    pub fn record_click(&self) -> Option<u32> {
        let now = self.clock.now_ms();
        let mut burst = self.burst.lock().unwrap_or_else(PoisonError::into_inner);
        let closed = self.close_if_quiet(&mut burst, now);
        burst.count += 1;
        burst.last_click_ms = Some(now);
        drop(burst);
        closed.and_then(|count| self.evaluate(count))
    }

    /// Close the current burst if it has gone quiet.
    pub fn poll(&self) -> Option<u32> {
        let now = self.clock.now_ms();
        let mut burst = self.burst.lock().unwrap_or_else(PoisonError::into_inner);
        let closed = self.close_if_quiet(&mut burst, now);
        drop(burst);
        closed.and_then(|count| self.evaluate(count))
    }

    fn close_if_quiet(&self, burst: &mut Burst, now: u64) -> Option<u32> {
        let last = burst.last_click_ms?;
        if now.saturating_sub(last) < self.window_ms {
            return None;
        }
        let count = burst.count;
        *burst = Burst::default();
        Some(count)
    }

    fn evaluate(&self, count: u32) -> Option<u32> {
        if count <= self.threshold {
            return None;
        }
        tracing::warn!(count, "abnormal click activity");
        self.reporter.report(
            SecurityEvent::new(kinds::ABNORMAL_CLICKING, Severity::Medium).with_field("count", count),
        );
        Some(count)
    }
}

/// Window geometry in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Flags a docked inspection panel from the outer/inner size delta.
///
/// Edge-triggered: reports once per opening.
pub struct InspectionDetector {
    threshold_px: u32,
    open: AtomicBool,
    reporter: Arc<SecurityEventReporter>,
}

impl InspectionDetector {
    pub fn new(config: &MonitoringConfig, reporter: Arc<SecurityEventReporter>) -> Self {
        Self {
            threshold_px: config.inspection_threshold_px,
            open: AtomicBool::new(false),
            reporter,
        }
    }

    /// Sample the window. Returns true when an opening was reported.
    pub fn observe(&self, outer: Viewport, inner: Viewport) -> bool {
        let docked = outer.height.saturating_sub(inner.height) > self.threshold_px
            || outer.width.saturating_sub(inner.width) > self.threshold_px;

        if !docked {
            self.open.store(false, Ordering::Relaxed);
            return false;
        }
        if self.open.swap(true, Ordering::Relaxed) {
            return false;
        }
        tracing::warn!("inspection tools detected");
        self.reporter
            .report(SecurityEvent::new(kinds::DEVTOOLS_OPENED, Severity::Low));
        true
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }
}
