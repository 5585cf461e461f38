//! Best-effort security event delivery.
//!
//! `report()` never blocks and never fails: events go into a bounded
//! display buffer and are offered to a bounded queue. A dispatcher task
//! drains the queue into a `ReportSink`. When the queue is full the event
//! is still kept for display but not delivered.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use guard_core::{GuardError, ReporterConfig, Severity};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::event::SecurityEvent;

/// Errors delivering an event.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("failed to encode event: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Collection sink receiving queued events.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn deliver(&self, event: &SecurityEvent) -> Result<(), ReportError>;
}

/// Sink that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl ReportSink for LogSink {
    async fn deliver(&self, event: &SecurityEvent) -> Result<(), ReportError> {
        tracing::info!(kind = %event.kind, event = %event.to_json(), "security event");
        Ok(())
    }
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReporterStats {
    pub reported: u64,
    /// Not queued because the queue was full or closed.
    pub dropped: u64,
    pub delivered: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    reported: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Aggregates anomalies and forwards them to a sink.
pub struct SecurityEventReporter {
    buffer: Mutex<VecDeque<SecurityEvent>>,
    buffer_capacity: usize,
    queue: mpsc::Sender<SecurityEvent>,
    pending: Mutex<Option<mpsc::Receiver<SecurityEvent>>>,
    counters: Arc<Counters>,
}

impl SecurityEventReporter {
    pub fn new(config: &ReporterConfig) -> Self {
        let (queue, pending) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(config.buffer_capacity)),
            buffer_capacity: config.buffer_capacity.max(1),
            queue,
            pending: Mutex::new(Some(pending)),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Record an event and offer it for delivery.
    pub fn report(&self, event: SecurityEvent) {
        match event.severity {
            Severity::High | Severity::Critical => {
                tracing::warn!(kind = %event.kind, severity = %event.severity, "security event")
            }
            _ => tracing::info!(kind = %event.kind, severity = %event.severity, "security event"),
        }
        self.counters.reported.fetch_add(1, Ordering::Relaxed);

        {
            let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            if buffer.len() == self.buffer_capacity {
                buffer.pop_front();
            }
            buffer.push_back(event.clone());
        }

        if let Err(e) = self.queue.try_send(event) {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(error = %e, "security event not queued");
        }
    }

    /// Record a surfaced rejection.
    pub fn report_error(&self, error: &GuardError) {
        self.report(SecurityEvent::from_error(error));
    }

    /// Start delivering queued events to `sink`.
    ///
    /// Must be called from within a tokio runtime. Returns `None` if a
    /// dispatcher was already started.
    pub fn spawn_dispatcher(&self, sink: Arc<dyn ReportSink>) -> Option<JoinHandle<()>> {
        let mut receiver = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        let counters = self.counters.clone();

        Some(tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                match sink.deliver(&event).await {
                    Ok(()) => {
                        counters.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(kind = %event.kind, error = %e, "security event delivery failed");
                    }
                }
            }
            tracing::debug!("security event dispatcher stopped");
        }))
    }

    /// Buffered events, oldest first.
    pub fn recent(&self) -> Vec<SecurityEvent> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Buffered events of one kind.
    pub fn recent_of(&self, kind: &str) -> Vec<SecurityEvent> {
        self.recent().into_iter().filter(|e| e.kind == kind).collect()
    }

    pub fn stats(&self) -> ReporterStats {
        ReporterStats {
            reported: self.counters.reported.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for SecurityEventReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityEventReporter")
            .field("buffer_capacity", &self.buffer_capacity)
            .field("stats", &self.stats())
            .finish()
    }
}
