//! Anti-forgery token lifecycle.

use std::sync::{Arc, PoisonError, RwLock};

use guard_core::{MetaKind, PageMeta};

/// Random bytes per token (256 bits of entropy).
pub const TOKEN_BYTES: usize = 32;

/// Opaque anti-forgery token.
///
/// The value is validated by the trusted backend, never locally.
#[derive(Clone, PartialEq, Eq)]
pub struct AntiForgeryToken(String);

impl AntiForgeryToken {
    /// Generate a new token from the thread-local CSPRNG.
    pub fn generate() -> Self {
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
        use rand::Rng;

        let bytes: [u8; TOKEN_BYTES] = rand::thread_rng().gen();
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Get the token value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AntiForgeryToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AntiForgeryToken(<{} chars>)", self.0.len())
    }
}

/// Out-of-band channel the backend reads the current token from.
pub trait TokenMirror: Send + Sync {
    /// Publish the current token.
    fn publish(&self, token: &AntiForgeryToken);
}

/// Mirrors the token into a `<meta name="...">` page entry.
#[derive(Debug, Clone)]
pub struct MetaTokenMirror {
    meta: Arc<PageMeta>,
    name: String,
}

impl MetaTokenMirror {
    /// Create a mirror writing to the given metadata entry.
    pub fn new(meta: Arc<PageMeta>, name: impl Into<String>) -> Self {
        Self {
            meta,
            name: name.into(),
        }
    }
}

impl TokenMirror for MetaTokenMirror {
    fn publish(&self, token: &AntiForgeryToken) {
        self.meta.set(MetaKind::Name, self.name.clone(), token.as_str());
    }
}

/// Issues and rotates the process-wide anti-forgery token.
pub struct TokenAuthority {
    current: RwLock<AntiForgeryToken>,
    mirror: Option<Arc<dyn TokenMirror>>,
}

impl TokenAuthority {
    /// Create an authority with a freshly generated token.
    pub fn new(mirror: Option<Arc<dyn TokenMirror>>) -> Self {
        let token = AntiForgeryToken::generate();
        if let Some(mirror) = &mirror {
            mirror.publish(&token);
        }
        tracing::debug!("anti-forgery token generated");
        Self {
            current: RwLock::new(token),
            mirror,
        }
    }

    /// Create an authority mirroring into page metadata.
    pub fn with_meta(meta: Arc<PageMeta>, name: impl Into<String>) -> Self {
        Self::new(Some(Arc::new(MetaTokenMirror::new(meta, name))))
    }

    /// Current token value at call time.
    pub fn current_token(&self) -> AntiForgeryToken {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the token. Called once per privilege elevation.
    ///
    /// The returned token always differs from the previous one.
    pub fn rotate(&self) -> AntiForgeryToken {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = AntiForgeryToken::generate();
        while next == *current {
            next = AntiForgeryToken::generate();
        }
        *current = next.clone();
        drop(current);

        if let Some(mirror) = &self.mirror {
            mirror.publish(&next);
        }
        tracing::info!("anti-forgery token rotated");
        next
    }
}

impl std::fmt::Debug for TokenAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthority")
            .field("mirrored", &self.mirror.is_some())
            .finish()
    }
}

/// Check if a method has create/update/delete semantics.
pub fn is_mutating(method: &http::Method) -> bool {
    matches!(
        *method,
        http::Method::POST | http::Method::PUT | http::Method::PATCH | http::Method::DELETE
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_entropy() {
        let token = AntiForgeryToken::generate();
        // 32 bytes base64 encoded without padding
        assert_eq!(token.as_str().len(), 43);
        assert!(token
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_rotate_always_changes_token() {
        let authority = TokenAuthority::new(None);
        let mut previous = authority.current_token();
        for _ in 0..50 {
            let next = authority.rotate();
            assert_ne!(next, previous);
            assert_eq!(authority.current_token(), next);
            previous = next;
        }
    }

    #[test]
    fn test_token_mirrored_into_meta() {
        let meta = Arc::new(PageMeta::new());
        let authority = TokenAuthority::with_meta(meta.clone(), "csrf-token");
        let first = authority.current_token();
        assert_eq!(
            meta.get(MetaKind::Name, "csrf-token").as_deref(),
            Some(first.as_str())
        );

        let second = authority.rotate();
        assert_eq!(
            meta.get(MetaKind::Name, "csrf-token").as_deref(),
            Some(second.as_str())
        );
    }

    #[test]
    fn test_debug_redacts_value() {
        let token = AntiForgeryToken::generate();
        assert!(!format!("{:?}", token).contains(token.as_str()));
    }

    #[test]
    fn test_mutating_methods() {
        assert!(is_mutating(&http::Method::POST));
        assert!(is_mutating(&http::Method::PUT));
        assert!(is_mutating(&http::Method::PATCH));
        assert!(is_mutating(&http::Method::DELETE));
        assert!(!is_mutating(&http::Method::GET));
        assert!(!is_mutating(&http::Method::HEAD));
    }
}
