//! Collaborators reached through the raw transport.
//!
//! These bypass `SecureClient` so that a permission refresh or an event
//! report is never itself rate limited, gated or reported. They still
//! resolve targets and attach headers the way the client does.

use std::sync::Arc;

use async_trait::async_trait;
use guard_observability::{ReportError, ReportSink, SecurityEvent};
use guard_security::{CredentialStore, PermissionError, PermissionSource, TokenAuthority};
use http::{HeaderValue, Method};

use crate::client::ClientSettings;
use crate::message::OutboundRequest;
use crate::transport::Transport;

/// Fetches the capability list from the permissions endpoint.
pub struct TransportPermissionSource {
    transport: Arc<dyn Transport>,
    endpoint: String,
    settings: ClientSettings,
    credentials: CredentialStore,
}

impl TransportPermissionSource {
    pub fn new(
        transport: Arc<dyn Transport>,
        endpoint: impl Into<String>,
        settings: ClientSettings,
        credentials: CredentialStore,
    ) -> Self {
        Self {
            transport,
            endpoint: endpoint.into(),
            settings,
            credentials,
        }
    }
}

#[async_trait]
impl PermissionSource for TransportPermissionSource {
    async fn fetch(&self) -> Result<Vec<String>, PermissionError> {
        let target = self.settings.resolve(self.endpoint.clone());
        let mut request = OutboundRequest::new(Method::GET, target);
        self.settings
            .attach_credential(&mut request.headers, &self.credentials)
            .map_err(|e| PermissionError::Source(e.to_string()))?;

        let response = tokio::time::timeout(self.settings.timeout, self.transport.send(request))
            .await
            .map_err(|_| PermissionError::Source(format!("timed out after {:?}", self.settings.timeout)))?
            .map_err(|e| PermissionError::Source(e.to_string()))?;

        if !response.is_success() {
            return Err(PermissionError::Source(format!(
                "{} answered {}",
                self.endpoint, response.status
            )));
        }
        response
            .json::<Vec<String>>()
            .map_err(|e| PermissionError::Malformed(e.to_string()))
    }
}

impl std::fmt::Debug for TransportPermissionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportPermissionSource")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Posts security events to the collection endpoint.
///
/// Each post carries the anti-forgery token current at delivery time.
pub struct BeaconSink {
    transport: Arc<dyn Transport>,
    endpoint: String,
    settings: ClientSettings,
    tokens: Arc<TokenAuthority>,
}

impl BeaconSink {
    pub fn new(
        transport: Arc<dyn Transport>,
        endpoint: impl Into<String>,
        settings: ClientSettings,
        tokens: Arc<TokenAuthority>,
    ) -> Self {
        Self {
            transport,
            endpoint: endpoint.into(),
            settings,
            tokens,
        }
    }
}

#[async_trait]
impl ReportSink for BeaconSink {
    async fn deliver(&self, event: &SecurityEvent) -> Result<(), ReportError> {
        let token = self.tokens.current_token();
        let value = HeaderValue::from_str(token.as_str())
            .map_err(|_| ReportError::Delivery("token is not a valid header value".into()))?;
        let target = self.settings.resolve(self.endpoint.clone());
        let request = OutboundRequest::new(Method::POST, target)
            .with_header(self.settings.csrf_header.clone(), value)
            .with_json(event)
            .map_err(|e| ReportError::Delivery(e.to_string()))?;
        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| ReportError::Delivery(e.to_string()))?;
        if response.is_success() {
            Ok(())
        } else {
            Err(ReportError::Delivery(format!(
                "{} answered {}",
                self.endpoint, response.status
            )))
        }
    }
}

impl std::fmt::Debug for BeaconSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeaconSink")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}
