//! Periodic integrity check.
//!
//! Three checks run together. Each failure gets its own remediation:
//! credential and session failures expire the session, a corrupted
//! permission set is re-fetched. Every failure is reported.

use std::sync::Arc;

use guard_core::{Clock, GuardError, Severity};
use guard_observability::{kinds, SecurityEvent, SecurityEventReporter};
use guard_security::{CredentialStatus, CredentialStore, PermissionCache};
use guard_session::SessionMonitor;
use serde::Serialize;

/// One of the periodic checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    /// Stored credential is well-formed and unexpired.
    TokenExpiry,
    /// Persisted permission set is a list of capabilities.
    PermissionIntegrity,
    /// An authenticated principal has a session id.
    SessionIntegrity,
}

impl CheckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TokenExpiry => "token_expiry",
            Self::PermissionIntegrity => "permission_integrity",
            Self::SessionIntegrity => "session_integrity",
        }
    }
}

/// Result of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckOutcome {
    pub check: CheckKind,
    pub passed: bool,
    pub message: String,
}

impl CheckOutcome {
    fn pass(check: CheckKind, message: &str) -> Self {
        Self {
            check,
            passed: true,
            message: message.to_string(),
        }
    }

    fn fail(check: CheckKind, message: impl Into<String>) -> Self {
        Self {
            check,
            passed: false,
            message: message.into(),
        }
    }
}

/// Remediation applied after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Remediation {
    ExpireSession,
    RefreshPermissions,
}

/// Outcome of a full run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IntegrityReport {
    pub outcomes: Vec<CheckOutcome>,
    pub remediations: Vec<Remediation>,
}

impl IntegrityReport {
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(|outcome| outcome.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.passed)
    }

    pub fn outcome(&self, check: CheckKind) -> Option<&CheckOutcome> {
        self.outcomes.iter().find(|outcome| outcome.check == check)
    }
}

pub struct IntegrityChecker {
    credentials: CredentialStore,
    permissions: Arc<PermissionCache>,
    session: Arc<SessionMonitor>,
    reporter: Arc<SecurityEventReporter>,
    clock: Arc<dyn Clock>,
}

impl IntegrityChecker {
    pub fn new(
        credentials: CredentialStore,
        permissions: Arc<PermissionCache>,
        session: Arc<SessionMonitor>,
        reporter: Arc<SecurityEventReporter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            credentials,
            permissions,
            session,
            reporter,
            clock,
        }
    }

    /// Run every check without remediating.
    pub fn evaluate(&self) -> Vec<CheckOutcome> {
        vec![
            self.check_token_expiry(),
            self.check_permission_integrity(),
            self.check_session_integrity(),
        ]
    }

    /// Run every check, report failures and remediate.
    pub async fn run(&self) -> IntegrityReport {
        let outcomes = self.evaluate();
        let mut remediations = Vec::new();

        for failed in outcomes.iter().filter(|outcome| !outcome.passed) {
            tracing::warn!(check = failed.check.as_str(), message = %failed.message, "integrity check failed");
            let error = GuardError::IntegrityCheckFailed(failed.message.clone());
            self.reporter.report(
                SecurityEvent::new(kinds::INTEGRITY_CHECK_FAILED, Severity::High)
                    .with_field("check", failed.check.as_str())
                    .with_field("message", error.to_string()),
            );

            let remediation = match failed.check {
                CheckKind::TokenExpiry | CheckKind::SessionIntegrity => Remediation::ExpireSession,
                CheckKind::PermissionIntegrity => Remediation::RefreshPermissions,
            };
            if !remediations.contains(&remediation) {
                remediations.push(remediation);
            }
        }

        for remediation in &remediations {
            match remediation {
                Remediation::ExpireSession => {
                    self.session.expire();
                }
                Remediation::RefreshPermissions => {
                    if let Err(e) = self.permissions.refresh().await {
                        tracing::error!(error = %e, "permission remediation failed");
                    }
                }
            }
        }

        if remediations.is_empty() {
            tracing::debug!("integrity check passed");
        }
        IntegrityReport {
            outcomes,
            remediations,
        }
    }

    fn check_token_expiry(&self) -> CheckOutcome {
        let check = CheckKind::TokenExpiry;
        let credential = match self.credentials.load() {
            Ok(Some(credential)) => credential,
            Ok(None) => return CheckOutcome::pass(check, "no credential stored"),
            Err(e) => return CheckOutcome::fail(check, format!("credential unreadable: {e}")),
        };
        match credential.status(self.clock.now_secs()) {
            CredentialStatus::Valid => CheckOutcome::pass(check, "credential valid"),
            CredentialStatus::Expired => CheckOutcome::fail(check, "credential expired"),
            CredentialStatus::Malformed => CheckOutcome::fail(check, "credential malformed"),
        }
    }

    fn check_permission_integrity(&self) -> CheckOutcome {
        let check = CheckKind::PermissionIntegrity;
        if self.permissions.persisted_well_formed() {
            CheckOutcome::pass(check, "permission set intact")
        } else {
            CheckOutcome::fail(check, "permission set corrupted")
        }
    }

    fn check_session_integrity(&self) -> CheckOutcome {
        let check = CheckKind::SessionIntegrity;
        let authenticated = match self.credentials.load() {
            Ok(credential) => credential.is_some(),
            Err(e) => return CheckOutcome::fail(check, format!("credential unreadable: {e}")),
        };
        match self.session.session_id() {
            Ok(Some(_)) => CheckOutcome::pass(check, "session id present"),
            Ok(None) if !authenticated => CheckOutcome::pass(check, "no session"),
            Ok(None) => CheckOutcome::fail(check, "session id missing"),
            Err(e) => CheckOutcome::fail(check, format!("session id unreadable: {e}")),
        }
    }
}

impl std::fmt::Debug for IntegrityChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrityChecker").finish_non_exhaustive()
    }
}
