//! Transport mechanisms available to the host.

use async_trait::async_trait;
use futures::channel::oneshot;

use crate::message::{InboundResponse, OutboundRequest};

/// Errors from the underlying transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    /// The callback was dropped without completing.
    #[error("request aborted")]
    Aborted,

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("body encoding error: {0}")]
    Body(#[from] serde_json::Error),
}

/// Future-based transport (fetch style).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<InboundResponse, TransportError>;
}

/// Completion callback for `CallbackTransport`.
pub type Completion = Box<dyn FnOnce(Result<InboundResponse, TransportError>) + Send>;

/// Callback-based transport (XHR style).
pub trait CallbackTransport: Send + Sync {
    /// Start the call; `done` is invoked exactly once when it completes.
    fn send_with_callback(&self, request: OutboundRequest, done: Completion);
}

/// Presents a `CallbackTransport` as a `Transport`.
#[derive(Debug, Clone)]
pub struct CallbackAdapter<T> {
    inner: T,
}

impl<T: CallbackTransport> CallbackAdapter<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: CallbackTransport> Transport for CallbackAdapter<T> {
    async fn send(&self, request: OutboundRequest) -> Result<InboundResponse, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.inner.send_with_callback(
            request,
            Box::new(move |result| {
                // receiver gone means the caller timed out
                let _ = tx.send(result);
            }),
        );
        rx.await.map_err(|_| TransportError::Aborted)?
    }
}
