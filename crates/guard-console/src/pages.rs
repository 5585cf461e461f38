//! Page access and feature visibility.

use std::sync::Arc;

use guard_core::{Clock, PageConfig, StoreError};
use guard_security::{CredentialStore, PermissionCache};

/// Outcome of a page access check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageAccess {
    Allowed,
    /// Send the user to this location instead.
    Redirect(String),
}

impl PageAccess {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Guards protected pages behind a valid credential.
pub struct PageGate {
    protected: Vec<String>,
    login_page: String,
    credentials: CredentialStore,
    clock: Arc<dyn Clock>,
}

impl PageGate {
    pub fn new(config: &PageConfig, credentials: CredentialStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            protected: config.protected.clone(),
            login_page: config.login_page.clone(),
            credentials,
            clock,
        }
    }

    /// Check if `path` names a protected page.
    pub fn is_protected(&self, path: &str) -> bool {
        self.protected.iter().any(|page| path.ends_with(page.as_str()))
    }

    /// Decide whether `path` may be shown.
    pub fn check(&self, path: &str) -> Result<PageAccess, StoreError> {
        if !self.is_protected(path) {
            return Ok(PageAccess::Allowed);
        }
        let now = self.clock.now_secs();
        let authenticated = self
            .credentials
            .load()?
            .is_some_and(|credential| credential.is_valid_at(now));
        if authenticated {
            Ok(PageAccess::Allowed)
        } else {
            tracing::info!(page = path, redirect = %self.login_page, "unauthenticated page access");
            Ok(PageAccess::Redirect(self.login_page.clone()))
        }
    }

    pub fn login_page(&self) -> &str {
        &self.login_page
    }
}

impl std::fmt::Debug for PageGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGate")
            .field("protected", &self.protected)
            .field("login_page", &self.login_page)
            .finish()
    }
}

/// A UI element shown only with a capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatedElement {
    pub id: String,
    pub capability: String,
}

impl GatedElement {
    pub fn new(id: impl Into<String>, capability: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capability: capability.into(),
        }
    }
}

/// Capability-driven element visibility.
#[derive(Clone)]
pub struct FeatureGate {
    permissions: Arc<PermissionCache>,
}

impl FeatureGate {
    pub fn new(permissions: Arc<PermissionCache>) -> Self {
        Self { permissions }
    }

    pub fn is_visible(&self, capability: &str) -> bool {
        self.permissions.has(capability)
    }

    /// Ids of the elements that must be hidden.
    pub fn hidden<'a>(&self, elements: &'a [GatedElement]) -> Vec<&'a str> {
        elements
            .iter()
            .filter(|element| !self.is_visible(&element.capability))
            .map(|element| element.id.as_str())
            .collect()
    }
}
