//! Security event model.

use chrono::{DateTime, Utc};
use guard_core::{GuardError, Severity};
use serde::{Deserialize, Serialize};

/// Well-known event kinds.
pub mod kinds {
    pub const ABNORMAL_CLICKING: &str = "abnormal_clicking";
    pub const DEVTOOLS_OPENED: &str = "devtools_opened";
    pub const INTEGRITY_CHECK_FAILED: &str = "integrity_check_failed";
    pub const SESSION_EXPIRED: &str = "session_expired";
}

/// One anomaly observed by the layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    /// Free-form details.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub context: serde_json::Value,
}

impl SecurityEvent {
    /// Create an event stamped now.
    pub fn new(kind: impl Into<String>, severity: Severity) -> Self {
        Self {
            kind: kind.into(),
            severity,
            timestamp: Utc::now(),
            context: serde_json::Value::Null,
        }
    }

    /// Event describing a surfaced rejection.
    pub fn from_error(error: &GuardError) -> Self {
        Self::new(error.kind(), error.severity()).with_field("message", error.to_string())
    }

    /// Override the timestamp.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Add a context field.
    pub fn with_field(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        if !self.context.is_object() {
            self.context = serde_json::Value::Object(serde_json::Map::new());
        }
        if let serde_json::Value::Object(map) = &mut self.context {
            map.insert(key.to_string(), value.into());
        }
        self
    }

    /// Get a context field.
    pub fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.context.get(key)
    }

    /// Format as JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.kind.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_fields() {
        let event = SecurityEvent::new(kinds::ABNORMAL_CLICKING, Severity::Medium)
            .with_field("count", 25)
            .with_field("page", "/wallet.html");
        assert_eq!(event.field("count"), Some(&serde_json::json!(25)));
        assert_eq!(event.field("page").and_then(|v| v.as_str()), Some("/wallet.html"));
    }

    #[test]
    fn test_json_shape() {
        let event = SecurityEvent::new(kinds::DEVTOOLS_OPENED, Severity::Low);
        let value: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(value["type"], "devtools_opened");
        assert_eq!(value["severity"], "low");
        assert!(value.get("context").is_none());
    }

    #[test]
    fn test_from_error() {
        let event = SecurityEvent::from_error(&GuardError::RateLimited {
            key: "/api/login".into(),
        });
        assert_eq!(event.kind, "rate_limited");
        assert_eq!(event.severity, Severity::Medium);
        assert!(event.field("message").is_some());
    }
}
