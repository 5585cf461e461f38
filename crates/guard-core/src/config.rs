//! Layer configuration.

use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Errors in layer configuration.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("invalid rate policy '{pattern}': {reason}")]
    InvalidRatePolicy { pattern: String, reason: String },

    #[error("invalid scan rule '{name}': {reason}")]
    InvalidScanRule { name: String, reason: String },
}

/// Full configuration of the security layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Anti-forgery token settings.
    pub csrf: CsrfConfig,
    /// Credential and storage settings.
    pub auth: AuthConfig,
    /// Per-endpoint quotas.
    pub rate_limit: RateLimitConfig,
    /// Idle timeout settings.
    pub session: SessionConfig,
    /// Authorization settings.
    pub permissions: PermissionConfig,
    /// Periodic self-check settings.
    pub integrity: IntegrityConfig,
    /// Content scanner catalog settings.
    pub scanner: ScannerConfig,
    /// Security event reporting settings.
    pub reporter: ReporterConfig,
    /// Outbound call settings.
    pub transport: TransportConfig,
    /// Anomaly detector thresholds.
    pub monitoring: MonitoringConfig,
    /// Page access settings.
    pub pages: PageConfig,
}

impl GuardConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load config from a file (JSON if the extension is `.json`, TOML otherwise).
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Self = if path.ends_with(".json") {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path))?
        } else {
            Self::from_toml(&content)
                .with_context(|| format!("Failed to parse TOML config: {}", path))?
        };

        config
            .validate()
            .with_context(|| format!("Invalid config: {}", path))?;
        Ok(config)
    }

    /// Parse from a TOML string without validating.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Save config to a file.
    pub fn save(&self, path: &str) -> anyhow::Result<()> {
        let content = if path.ends_with(".json") {
            serde_json::to_string_pretty(self)?
        } else {
            toml::to_string_pretty(self)?
        };

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.csrf.header_name.trim().is_empty() {
            return Err(invalid("csrf.header_name", "cannot be empty"));
        }
        if self.session.timeout_secs == 0 {
            return Err(invalid("session.timeout_secs", "must be greater than 0"));
        }
        if self.session.check_interval_secs == 0 {
            return Err(invalid("session.check_interval_secs", "must be greater than 0"));
        }
        if let Some(warning) = self.session.warning_secs {
            if warning == 0 || warning >= self.session.timeout_secs {
                return Err(invalid(
                    "session.warning_secs",
                    "must be between 0 and session.timeout_secs (exclusive)",
                ));
            }
        }
        for policy in &self.rate_limit.policies {
            policy.validate()?;
        }
        for rule in &self.scanner.extra_rules {
            if rule.pattern.is_empty() {
                return Err(ConfigError::InvalidScanRule {
                    name: rule.name.clone(),
                    reason: "pattern cannot be empty".into(),
                });
            }
        }
        if self.permissions.wildcard.is_empty() {
            return Err(invalid("permissions.wildcard", "cannot be empty"));
        }
        if self.integrity.interval_secs == 0 {
            return Err(invalid("integrity.interval_secs", "must be greater than 0"));
        }
        if self.reporter.buffer_capacity == 0 {
            return Err(invalid("reporter.buffer_capacity", "must be greater than 0"));
        }
        if self.reporter.queue_capacity == 0 {
            return Err(invalid("reporter.queue_capacity", "must be greater than 0"));
        }
        if self.transport.timeout_ms == 0 {
            return Err(invalid("transport.timeout_ms", "must be greater than 0"));
        }
        if self.monitoring.click_window_ms == 0 {
            return Err(invalid("monitoring.click_window_ms", "must be greater than 0"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}

/// Anti-forgery token settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CsrfConfig {
    /// Header attached to state-mutating calls.
    pub header_name: String,
    /// Hidden form field injected into submitted forms.
    pub form_field: String,
    /// Page metadata entry mirroring the token.
    pub meta_name: String,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            header_name: "X-CSRF-TOKEN".to_string(),
            form_field: "_token".to_string(),
            meta_name: "csrf-token".to_string(),
        }
    }
}

/// Credential and storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Header carrying the credential.
    pub header_name: String,
    /// Scheme prefix for the credential header.
    pub scheme: String,
    /// Storage key of the credential.
    pub token_key: String,
    /// Durable storage key of the permission set.
    pub permissions_key: String,
    /// Volatile storage key of the session id.
    pub session_id_key: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            header_name: "Authorization".to_string(),
            scheme: "Bearer".to_string(),
            token_key: "auth_token".to_string(),
            permissions_key: "user_permissions".to_string(),
            session_id_key: "session_id".to_string(),
        }
    }
}

/// Quota policy for one endpoint pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatePolicyConfig {
    /// Substring matched against the call key.
    pub pattern: String,
    /// Calls allowed per window.
    pub max_count: u32,
    /// Window size in milliseconds.
    pub window_ms: u64,
}

impl RatePolicyConfig {
    /// Create a new policy.
    pub fn new(pattern: impl Into<String>, max_count: u32, window: Duration) -> Self {
        Self {
            pattern: pattern.into(),
            max_count,
            window_ms: window.as_millis() as u64,
        }
    }

    /// Validate the policy.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let reason = if self.pattern.is_empty() {
            "pattern cannot be empty"
        } else if self.max_count == 0 {
            "max_count must be greater than 0"
        } else if self.window_ms == 0 {
            "window_ms must be greater than 0"
        } else {
            return Ok(());
        };
        Err(ConfigError::InvalidRatePolicy {
            pattern: self.pattern.clone(),
            reason: reason.to_string(),
        })
    }
}

/// Per-endpoint quotas, evaluated in order (first match wins).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub policies: Vec<RatePolicyConfig>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let minute = Duration::from_secs(60);
        Self {
            policies: vec![
                RatePolicyConfig::new("/api/login", 5, minute),
                RatePolicyConfig::new("/api/register", 3, minute),
                RatePolicyConfig::new("/api/", 100, minute),
            ],
        }
    }
}

/// Idle timeout settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle time after which the session expires.
    pub timeout_secs: u64,
    /// Interval of the periodic idle check.
    pub check_interval_secs: u64,
    /// Lead time before expiry at which the idle warning fires (disabled if unset).
    pub warning_secs: Option<u64>,
}

impl SessionConfig {
    /// Idle timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Periodic check interval.
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30 * 60,
            check_interval_secs: 60,
            warning_secs: None,
        }
    }
}

/// Named capability required for a path prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRule {
    pub prefix: String,
    pub capability: String,
}

/// Authorization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionConfig {
    /// Universal capability marker.
    pub wildcard: String,
    /// Path prefixes whose calls need a capability.
    pub restricted_prefixes: Vec<String>,
    /// Prefix → capability overrides (otherwise `METHOD:path`).
    pub rules: Vec<CapabilityRule>,
    /// Endpoint returning the principal's capability list.
    pub source_endpoint: String,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            wildcard: "*".to_string(),
            restricted_prefixes: vec!["/api/admin/".to_string()],
            rules: Vec::new(),
            source_endpoint: "/api/user/permissions".to_string(),
        }
    }
}

/// Periodic self-check settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrityConfig {
    pub interval_secs: u64,
}

impl IntegrityConfig {
    /// Check interval.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self { interval_secs: 5 * 60 }
    }
}

/// Additional scan rule loaded from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRuleConfig {
    pub name: String,
    pub pattern: String,
    #[serde(default)]
    pub severity: crate::Severity,
}

/// Content scanner catalog settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Whether to start from the built-in catalog.
    pub include_builtin: bool,
    /// Rules appended after the built-in catalog.
    pub extra_rules: Vec<ScanRuleConfig>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            include_builtin: true,
            extra_rules: Vec::new(),
        }
    }
}

/// Security event reporting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReporterConfig {
    /// Collection sink endpoint.
    pub endpoint: String,
    /// Events kept for local display.
    pub buffer_capacity: usize,
    /// Events waiting for delivery before new ones are dropped.
    pub queue_capacity: usize,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            endpoint: "/api/security/events".to_string(),
            buffer_capacity: 100,
            queue_capacity: 256,
        }
    }
}

/// Outbound call settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Base URL prepended to relative targets.
    pub base_url: Option<String>,
    /// Bounded time for a single call.
    pub timeout_ms: u64,
    /// Paths reachable without an active session.
    pub public_paths: Vec<String>,
}

impl TransportConfig {
    /// Call timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: 10_000,
            public_paths: vec!["/api/login".to_string(), "/api/register".to_string()],
        }
    }
}

/// Anomaly detector thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Clicks in one burst above which an event is raised.
    pub click_burst_threshold: u32,
    /// Quiet period closing a click burst.
    pub click_window_ms: u64,
    /// Viewport delta suggesting docked inspection tools.
    pub inspection_threshold_px: u32,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            click_burst_threshold: 20,
            click_window_ms: 1000,
            inspection_threshold_px: 200,
        }
    }
}

/// Page access settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PageConfig {
    /// Pages that need a valid credential.
    pub protected: Vec<String>,
    /// Authentication entry point.
    pub login_page: String,
    /// Install CSP and security meta entries at startup.
    pub install_security_meta: bool,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            protected: vec![
                "/admin.html".to_string(),
                "/wallet.html".to_string(),
                "/tasks.html".to_string(),
            ],
            login_page: "/login.html".to_string(),
            install_security_meta: true,
        }
    }
}
