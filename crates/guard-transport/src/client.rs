//! The transport interceptor.

use std::sync::Arc;
use std::time::Duration;

use guard_core::{ConfigError, GuardConfig, GuardError, GuardResult};
use guard_observability::{SecurityEvent, SecurityEventReporter};
use guard_security::{CredentialStore, PermissionCache, RateDecision, RateLimiter, TokenAuthority};
use guard_session::{ActivityKind, ActivitySink, SessionMonitor};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};

use crate::message::{InboundResponse, OutboundRequest};
use crate::transport::{CallbackAdapter, CallbackTransport, Transport};

/// Header and routing settings of the interceptor.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub csrf_header: HeaderName,
    pub auth_header: HeaderName,
    pub auth_scheme: String,
    /// Prepended to targets starting with `/`.
    pub base_url: Option<String>,
    pub timeout: Duration,
    /// Paths reachable without an active session.
    pub public_paths: Vec<String>,
}

impl ClientSettings {
    pub fn from_config(config: &GuardConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            csrf_header: header_name("csrf.header_name", &config.csrf.header_name)?,
            auth_header: header_name("auth.header_name", &config.auth.header_name)?,
            auth_scheme: config.auth.scheme.clone(),
            base_url: config.transport.base_url.clone(),
            timeout: config.transport.timeout(),
            public_paths: config.transport.public_paths.clone(),
        })
    }

    /// Check if `path` bypasses the session gate.
    ///
    /// A public path matches itself and anything below it, never a sibling
    /// sharing its prefix.
    pub fn is_public(&self, path: &str) -> bool {
        self.public_paths.iter().any(|public| {
            let public = public.trim_end_matches('/');
            path.strip_prefix(public)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        })
    }

    /// Prefix `base_url` to origin-relative targets.
    pub fn resolve(&self, target: String) -> String {
        match &self.base_url {
            Some(base) if target.starts_with('/') => {
                format!("{}{}", base.trim_end_matches('/'), target)
            }
            _ => target,
        }
    }

    /// Attach the stored credential, if any.
    pub(crate) fn attach_credential(
        &self,
        headers: &mut HeaderMap,
        credentials: &CredentialStore,
    ) -> GuardResult<bool> {
        let Some(credential) = credentials.load()? else {
            return Ok(false);
        };
        let mut value = HeaderValue::from_str(&credential.header_value(&self.auth_scheme))
            .map_err(|_| GuardError::Transport("credential is not a valid header value".into()))?;
        value.set_sensitive(true);
        headers.insert(self.auth_header.clone(), value);
        Ok(true)
    }
}

fn header_name(field: &'static str, value: &str) -> Result<HeaderName, ConfigError> {
    HeaderName::from_bytes(value.as_bytes()).map_err(|e| ConfigError::InvalidValue {
        field,
        reason: e.to_string(),
    })
}

/// Components consulted on every call.
#[derive(Clone)]
pub struct ClientGuards {
    pub tokens: Arc<TokenAuthority>,
    pub credentials: CredentialStore,
    pub limiter: Arc<RateLimiter>,
    pub permissions: Arc<PermissionCache>,
    pub session: Arc<SessionMonitor>,
    pub reporter: Arc<SecurityEventReporter>,
}

/// Single entry point for outbound calls.
///
/// A call is rejected before dispatch if the session expired, the quota
/// for its path is exhausted, or a restricted path lacks the required
/// capability after one permission refresh. Every failure is reported.
#[derive(Clone)]
pub struct SecureClient {
    transport: Arc<dyn Transport>,
    settings: ClientSettings,
    guards: ClientGuards,
}

impl SecureClient {
    pub fn new(transport: Arc<dyn Transport>, settings: ClientSettings, guards: ClientGuards) -> Self {
        Self {
            transport,
            settings,
            guards,
        }
    }

    /// Create a client over a callback-based transport.
    pub fn with_callback<T>(transport: T, settings: ClientSettings, guards: ClientGuards) -> Self
    where
        T: CallbackTransport + 'static,
    {
        Self::new(Arc::new(CallbackAdapter::new(transport)), settings, guards)
    }

    /// Same guards over another transport.
    pub fn with_transport(&self, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            settings: self.settings.clone(),
            guards: self.guards.clone(),
        }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Run a call through the full pipeline.
    ///
    /// The target is normalized first; every check and the dispatch use the
    /// normalized form.
    pub async fn send(&self, mut request: OutboundRequest) -> GuardResult<InboundResponse> {
        let method = request.method.clone();
        let canonical = match request.canonical() {
            Ok(canonical) => canonical,
            Err(e) => {
                let error = GuardError::Transport(e.to_string());
                tracing::warn!(%method, target = %request.target, "call target rejected");
                self.guards.reporter.report(
                    SecurityEvent::from_error(&error)
                        .with_field("method", method.as_str())
                        .with_field("target", request.target.as_str()),
                );
                return Err(error);
            }
        };
        let path = canonical.path;
        request.target = canonical.target;

        let result = self.intercept(&path, request).await;
        if let Err(e) = &result {
            tracing::debug!(%method, path = %path, error = %e, "call rejected");
            self.guards.reporter.report(
                SecurityEvent::from_error(e)
                    .with_field("method", method.as_str())
                    .with_field("path", path.as_str()),
            );
        }
        result
    }

    async fn intercept(&self, path: &str, mut request: OutboundRequest) -> GuardResult<InboundResponse> {
        let method = request.method.clone();
        let public = self.settings.is_public(path);
        if !public {
            self.guards.session.ensure_active()?;
        }

        if request.is_mutating() {
            let token = self.guards.tokens.current_token();
            let value = HeaderValue::from_str(token.as_str())
                .map_err(|_| GuardError::Transport("token is not a valid header value".into()))?;
            request.headers.insert(self.settings.csrf_header.clone(), value);
        }
        self.settings
            .attach_credential(&mut request.headers, &self.guards.credentials)?;

        if let RateDecision::Limited { .. } = self.guards.limiter.check(path) {
            return Err(GuardError::RateLimited {
                key: path.to_string(),
            });
        }

        let capability = self.required_capability(&method, path);
        if let Some(capability) = &capability {
            self.authorize(capability).await?;
        }

        self.guards.session.record_activity(ActivityKind::Dispatch);
        request.target = self.settings.resolve(request.target);

        let timeout = self.settings.timeout;
        let response = match tokio::time::timeout(timeout, self.transport.send(request)).await {
            Err(_) => return Err(GuardError::TransportTimeout(timeout)),
            Ok(Err(e)) => return Err(GuardError::Transport(e.to_string())),
            Ok(Ok(response)) => response,
        };

        match response.status {
            StatusCode::UNAUTHORIZED if !public => {
                self.guards.session.expire();
                Err(GuardError::SessionExpired)
            }
            StatusCode::FORBIDDEN => {
                if let Err(e) = self.guards.permissions.refresh().await {
                    tracing::warn!(error = %e, "permission refresh after 403 failed");
                }
                Err(GuardError::PermissionDenied {
                    capability: capability.unwrap_or_else(|| {
                        self.guards.permissions.required_capability(&method, path)
                    }),
                })
            }
            _ => Ok(response),
        }
    }

    fn required_capability(&self, method: &Method, path: &str) -> Option<String> {
        let permissions = &self.guards.permissions;
        permissions
            .is_restricted(path)
            .then(|| permissions.required_capability(method, path))
    }

    /// Check a capability, refreshing once before denying.
    async fn authorize(&self, capability: &str) -> GuardResult<()> {
        let permissions = &self.guards.permissions;
        if permissions.has(capability) {
            return Ok(());
        }
        tracing::debug!(capability, "capability missing, refreshing permissions");
        if let Err(e) = permissions.refresh().await {
            tracing::warn!(error = %e, "permission refresh failed");
        }
        if permissions.has(capability) {
            Ok(())
        } else {
            Err(GuardError::PermissionDenied {
                capability: capability.to_string(),
            })
        }
    }

    pub async fn get(&self, target: &str) -> GuardResult<InboundResponse> {
        self.send(OutboundRequest::new(Method::GET, target)).await
    }

    pub async fn delete(&self, target: &str) -> GuardResult<InboundResponse> {
        self.send(OutboundRequest::new(Method::DELETE, target)).await
    }

    pub async fn post<B: Serialize + ?Sized>(&self, target: &str, body: &B) -> GuardResult<InboundResponse> {
        self.send(json_request(Method::POST, target, body)?).await
    }

    pub async fn put<B: Serialize + ?Sized>(&self, target: &str, body: &B) -> GuardResult<InboundResponse> {
        self.send(json_request(Method::PUT, target, body)?).await
    }

    pub async fn patch<B: Serialize + ?Sized>(&self, target: &str, body: &B) -> GuardResult<InboundResponse> {
        self.send(json_request(Method::PATCH, target, body)?).await
    }

    /// GET and decode a JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, target: &str) -> GuardResult<T> {
        decode(self.get(target).await?)
    }

    /// POST a JSON body and decode the JSON reply.
    pub async fn post_json<B, T>(&self, target: &str, body: &B) -> GuardResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        decode(self.post(target, body).await?)
    }
}

impl std::fmt::Debug for SecureClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureClient")
            .field("settings", &self.settings)
            .finish()
    }
}

fn json_request<B: Serialize + ?Sized>(
    method: Method,
    target: &str,
    body: &B,
) -> GuardResult<OutboundRequest> {
    OutboundRequest::new(method, target)
        .with_json(body)
        .map_err(|e| GuardError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(response: InboundResponse) -> GuardResult<T> {
    response
        .json()
        .map_err(|e| GuardError::Serialization(e.to_string()))
}
