//! Stored bearer credential.

use std::sync::Arc;

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use guard_core::{KeyValueStore, StoreError};
use serde::Deserialize;

/// Errors inspecting a credential.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("credential is not a three-part token")]
    NotJwt,

    #[error("credential payload is not base64: {0}")]
    Encoding(String),

    #[error("credential payload is not valid claims: {0}")]
    Claims(String),
}

/// Claims read from the credential payload. The signature is not verified.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CredentialClaims {
    /// Expiry in seconds since the Unix epoch.
    pub exp: f64,
    #[serde(default)]
    pub sub: Option<String>,
}

/// Expiry state of a credential at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStatus {
    Valid,
    Expired,
    Malformed,
}

/// JWT-shaped bearer credential issued by the backend.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthCredential(String);

impl AuthCredential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Header value, e.g. `Bearer <token>`.
    pub fn header_value(&self, scheme: &str) -> String {
        if scheme.is_empty() {
            self.0.clone()
        } else {
            format!("{} {}", scheme, self.0)
        }
    }

    /// Decode the payload claims.
    pub fn claims(&self) -> Result<CredentialClaims, CredentialError> {
        let mut parts = self.0.split('.');
        let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(_), Some(payload), Some(_), None) => payload.trim_end_matches('='),
            _ => return Err(CredentialError::NotJwt),
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .or_else(|_| STANDARD_NO_PAD.decode(payload))
            .map_err(|e| CredentialError::Encoding(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| CredentialError::Claims(e.to_string()))
    }

    /// Expiry state at `now_secs`.
    pub fn status(&self, now_secs: u64) -> CredentialStatus {
        match self.claims() {
            Ok(claims) if claims.exp > now_secs as f64 => CredentialStatus::Valid,
            Ok(_) => CredentialStatus::Expired,
            Err(_) => CredentialStatus::Malformed,
        }
    }

    /// Check the credential is well-formed and unexpired at `now_secs`.
    pub fn is_valid_at(&self, now_secs: u64) -> bool {
        self.status(now_secs) == CredentialStatus::Valid
    }
}

impl std::fmt::Debug for AuthCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthCredential(<redacted>)")
    }
}

/// Reads and writes the credential across the durable and volatile stores.
#[derive(Clone)]
pub struct CredentialStore {
    durable: Arc<dyn KeyValueStore>,
    volatile: Arc<dyn KeyValueStore>,
    key: String,
}

impl CredentialStore {
    pub fn new(
        durable: Arc<dyn KeyValueStore>,
        volatile: Arc<dyn KeyValueStore>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            durable,
            volatile,
            key: key.into(),
        }
    }

    /// Current credential, durable store first.
    pub fn load(&self) -> Result<Option<AuthCredential>, StoreError> {
        if let Some(value) = self.durable.get(&self.key)? {
            return Ok(Some(AuthCredential(value)));
        }
        Ok(self.volatile.get(&self.key)?.map(AuthCredential))
    }

    /// Store a credential. `remember` selects the durable store.
    pub fn save(&self, credential: &AuthCredential, remember: bool) -> Result<(), StoreError> {
        let (target, other) = if remember {
            (&self.durable, &self.volatile)
        } else {
            (&self.volatile, &self.durable)
        };
        other.remove(&self.key)?;
        target.set(&self.key, credential.as_str())
    }

    /// Remove the credential from both stores.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.durable.remove(&self.key)?;
        self.volatile.remove(&self.key)
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore").field("key", &self.key).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guard_core::MemoryStore;

    fn jwt(payload: &str) -> AuthCredential {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload);
        AuthCredential::new(format!("{}.{}.signature", header, body))
    }

    #[test]
    fn test_expiry_status() {
        let credential = jwt(r#"{"exp":2000,"sub":"admin"}"#);
        assert_eq!(credential.status(1999), CredentialStatus::Valid);
        assert_eq!(credential.status(2000), CredentialStatus::Expired);
        assert_eq!(credential.claims().unwrap().sub.as_deref(), Some("admin"));
    }

    #[test]
    fn test_malformed_credentials() {
        assert_eq!(AuthCredential::new("opaque").status(0), CredentialStatus::Malformed);
        assert_eq!(AuthCredential::new("a.!!!.c").status(0), CredentialStatus::Malformed);
        assert_eq!(jwt(r#"{"sub":"admin"}"#).status(0), CredentialStatus::Malformed);
        assert_eq!(
            AuthCredential::new("a.b.c.d").claims(),
            Err(CredentialError::NotJwt)
        );
    }

    #[test]
    fn test_header_value_and_redaction() {
        let credential = AuthCredential::new("abc.def.ghi");
        assert_eq!(credential.header_value("Bearer"), "Bearer abc.def.ghi");
        assert!(!format!("{:?}", credential).contains("abc"));
    }

    #[test]
    fn test_store_prefers_durable() {
        let durable = Arc::new(MemoryStore::new());
        let volatile = Arc::new(MemoryStore::new());
        let store = CredentialStore::new(durable.clone(), volatile.clone(), "auth_token");
        assert!(store.load().unwrap().is_none());

        volatile.set("auth_token", "from-tab").unwrap();
        assert_eq!(store.load().unwrap().unwrap().as_str(), "from-tab");

        durable.set("auth_token", "from-disk").unwrap();
        assert_eq!(store.load().unwrap().unwrap().as_str(), "from-disk");

        store.clear().unwrap();
        assert!(durable.is_empty());
        assert!(volatile.is_empty());
    }

    #[test]
    fn test_save_moves_between_stores() {
        let durable = Arc::new(MemoryStore::new());
        let volatile = Arc::new(MemoryStore::new());
        let store = CredentialStore::new(durable.clone(), volatile.clone(), "auth_token");

        store.save(&AuthCredential::new("t1"), true).unwrap();
        assert!(durable.contains("auth_token").unwrap());

        store.save(&AuthCredential::new("t2"), false).unwrap();
        assert!(!durable.contains("auth_token").unwrap());
        assert_eq!(volatile.get("auth_token").unwrap().as_deref(), Some("t2"));
    }
}
