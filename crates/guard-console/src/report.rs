//! Security status report.

use guard_observability::ReporterStats;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CsrfStatus {
    pub enabled: bool,
    pub header: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct XssStatus {
    pub protection: bool,
    pub csp: bool,
    pub scan_rules: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticationStatus {
    pub logged_in: bool,
    pub session_timeout_minutes: u64,
    pub session_state: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionStatus {
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub rules: usize,
    pub active_windows: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventStatus {
    pub reported: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub failed: u64,
}

impl From<ReporterStats> for EventStatus {
    fn from(stats: ReporterStats) -> Self {
        Self {
            reported: stats.reported,
            dropped: stats.dropped,
            delivered: stats.delivered,
            failed: stats.failed,
        }
    }
}

/// Snapshot of the layer's state, shown on the console status page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityReport {
    pub csrf: CsrfStatus,
    pub xss: XssStatus,
    pub authentication: AuthenticationStatus,
    pub permissions: PermissionStatus,
    pub rate_limit: RateLimitStatus,
    pub events: EventStatus,
}

impl SecurityReport {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Check the baseline protections are in place.
    pub fn is_hardened(&self) -> bool {
        self.csrf.enabled && self.xss.protection && self.xss.csp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SecurityReport {
        SecurityReport {
            csrf: CsrfStatus {
                enabled: true,
                header: "X-CSRF-TOKEN".into(),
            },
            xss: XssStatus {
                protection: true,
                csp: false,
                scan_rules: 11,
            },
            authentication: AuthenticationStatus {
                logged_in: false,
                session_timeout_minutes: 30,
                session_state: "active",
            },
            permissions: PermissionStatus { count: 0 },
            rate_limit: RateLimitStatus {
                rules: 3,
                active_windows: 1,
            },
            events: ReporterStats::default().into(),
        }
    }

    #[test]
    fn test_report_json_shape() {
        let json: serde_json::Value = serde_json::from_str(&sample().to_json().unwrap()).unwrap();
        assert_eq!(json["authentication"]["session_timeout_minutes"], 30);
        assert_eq!(json["rate_limit"]["rules"], 3);
        assert_eq!(json["xss"]["csp"], false);
    }

    #[test]
    fn test_hardened_needs_csp() {
        let mut report = sample();
        assert!(!report.is_hardened());
        report.xss.csp = true;
        assert!(report.is_hardened());
    }
}
