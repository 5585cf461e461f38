//! Rejection taxonomy.

use std::time::Duration;

use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::store::StoreError;

/// Result type for guarded operations.
pub type GuardResult<T> = Result<T, GuardError>;

/// Severity shared by scan rules and security events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Get severity as string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced to callers of the security layer.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    /// Call quota exhausted for the current window. No call was made.
    #[error("rate limited: {key}")]
    RateLimited { key: String },

    /// Required capability absent after one refresh. No call was made.
    #[error("permission denied: {capability}")]
    PermissionDenied { capability: String },

    /// Markup matched an unsafe pattern. The mutation was dropped.
    #[error("unsafe content rejected: matched {pattern}")]
    UnsafeContentRejected { pattern: String },

    /// Session idle past its timeout, re-authentication required.
    #[error("session expired")]
    SessionExpired,

    /// A periodic self-check failed.
    #[error("integrity check failed: {0}")]
    IntegrityCheckFailed(String),

    /// The counterpart did not answer in time.
    #[error("transport timeout after {0:?}")]
    TransportTimeout(Duration),

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// Storage failure.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Body (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl GuardError {
    /// Stable identifier used as the security event type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::UnsafeContentRejected { .. } => "unsafe_content_rejected",
            Self::SessionExpired => "session_expired",
            Self::IntegrityCheckFailed(_) => "integrity_check_failed",
            Self::TransportTimeout(_) => "transport_timeout",
            Self::Transport(_) => "transport_error",
            Self::Storage(_) => "storage_error",
            Self::Config(_) => "config_error",
            Self::Serialization(_) => "serialization_error",
        }
    }

    /// HTTP-equivalent status for the rejection.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::PermissionDenied { .. } => StatusCode::FORBIDDEN,
            Self::UnsafeContentRejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::SessionExpired => StatusCode::UNAUTHORIZED,
            Self::TransportTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Transport(_) => StatusCode::BAD_GATEWAY,
            Self::IntegrityCheckFailed(_)
            | Self::Storage(_)
            | Self::Config(_)
            | Self::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Severity used when the failure is reported.
    pub fn severity(&self) -> Severity {
        match self {
            Self::UnsafeContentRejected { .. } => Severity::High,
            Self::SessionExpired | Self::IntegrityCheckFailed(_) => Severity::High,
            Self::PermissionDenied { .. } | Self::RateLimited { .. } => Severity::Medium,
            _ => Severity::Low,
        }
    }

    /// Check if this failure forces re-authentication.
    pub fn requires_reauthentication(&self) -> bool {
        matches!(self, Self::SessionExpired)
    }

    /// Check if the caller may retry later without user intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::TransportTimeout(_) | Self::Transport(_)
        )
    }
}
