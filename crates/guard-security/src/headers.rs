//! Content-Security-Policy and companion security headers.

use guard_core::{MetaKind, PageMeta};
use http::header::{HeaderMap, HeaderName, HeaderValue, InvalidHeaderName, InvalidHeaderValue};

pub const CSP_HEADER: &str = "Content-Security-Policy";

/// Policy installed when the page does not declare one.
pub const DEFAULT_CSP: &str = "default-src 'self'; \
     script-src 'self' 'unsafe-inline' https://cdn.jsdelivr.net https://www.googletagmanager.com; \
     style-src 'self' 'unsafe-inline' https://fonts.googleapis.com; \
     font-src 'self' https://fonts.gstatic.com; \
     img-src 'self' data: https:; \
     connect-src 'self' ws: wss:;";

/// Errors converting entries into HTTP headers.
#[derive(Debug, thiserror::Error)]
pub enum HeaderError {
    #[error("invalid header name: {0}")]
    InvalidName(#[from] InvalidHeaderName),

    #[error("invalid header value: {0}")]
    InvalidValue(#[from] InvalidHeaderValue),
}

/// Security header set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityHeaders {
    entries: Vec<(String, String)>,
}

impl Default for SecurityHeaders {
    fn default() -> Self {
        Self {
            entries: vec![
                (CSP_HEADER.to_string(), DEFAULT_CSP.to_string()),
                ("X-Content-Type-Options".to_string(), "nosniff".to_string()),
                ("X-Frame-Options".to_string(), "DENY".to_string()),
                ("X-XSS-Protection".to_string(), "1; mode=block".to_string()),
                (
                    "Referrer-Policy".to_string(),
                    "strict-origin-when-cross-origin".to_string(),
                ),
            ],
        }
    }
}

impl SecurityHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the Content-Security-Policy.
    pub fn with_csp(mut self, policy: impl Into<String>) -> Self {
        self.set(CSP_HEADER, policy);
        self
    }

    /// Add or replace an entry.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    /// Install entries as `http-equiv` metadata, keeping any the page
    /// already declares. Returns the number installed.
    pub fn install(&self, meta: &PageMeta) -> usize {
        let installed = self
            .entries
            .iter()
            .filter(|(name, value)| meta.set_if_absent(MetaKind::HttpEquiv, name.clone(), value.clone()))
            .count();
        tracing::debug!(installed, "security meta installed");
        installed
    }

    /// Insert entries into a header map, keeping existing values.
    pub fn apply(&self, headers: &mut HeaderMap) -> Result<usize, HeaderError> {
        let mut applied = 0;
        for (name, value) in &self.entries {
            let name = HeaderName::from_bytes(name.as_bytes())?;
            if headers.contains_key(&name) {
                continue;
            }
            headers.insert(name, HeaderValue::from_str(value)?);
            applied += 1;
        }
        Ok(applied)
    }
}

/// Check whether the page declares a Content-Security-Policy.
pub fn has_csp(meta: &PageMeta) -> bool {
    meta.contains(MetaKind::HttpEquiv, CSP_HEADER)
}
