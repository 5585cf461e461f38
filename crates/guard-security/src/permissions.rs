//! Capability cache for the authenticated principal.
//!
//! Membership is the only authority for protected calls and UI elements;
//! anything not granted is denied.

use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use guard_core::{KeyValueStore, KeyValueStoreExt, PermissionConfig, StoreError};

/// Errors loading or refreshing capabilities.
#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
    /// The trusted source could not be reached or answered with an error.
    #[error("permission source failed: {0}")]
    Source(String),

    /// The source or the stored copy is not a list of capability strings.
    #[error("malformed permission set: {0}")]
    Malformed(String),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Immutable set of capability strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet {
    capabilities: BTreeSet<String>,
}

impl PermissionSet {
    /// Create an empty set (denies everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Check literal membership.
    pub fn contains(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.capabilities.iter().map(String::as_str)
    }

    /// Capabilities as a sorted list.
    pub fn to_vec(&self) -> Vec<String> {
        self.capabilities.iter().cloned().collect()
    }
}

impl<S: Into<String>> FromIterator<S> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            capabilities: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Trusted source of the principal's capabilities.
#[async_trait]
pub trait PermissionSource: Send + Sync {
    /// Fetch the complete capability list.
    async fn fetch(&self) -> Result<Vec<String>, PermissionError>;
}

/// Cached capability set, replaced atomically on refresh.
pub struct PermissionCache {
    current: RwLock<Arc<PermissionSet>>,
    source: Arc<dyn PermissionSource>,
    durable: Arc<dyn KeyValueStore>,
    storage_key: String,
    config: PermissionConfig,
}

impl PermissionCache {
    /// Create an empty cache.
    ///
    /// `storage_key` is the durable store entry the set is persisted under.
    pub fn new(
        config: PermissionConfig,
        storage_key: impl Into<String>,
        source: Arc<dyn PermissionSource>,
        durable: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            current: RwLock::new(Arc::new(PermissionSet::new())),
            source,
            durable,
            storage_key: storage_key.into(),
            config,
        }
    }

    /// Check a capability. The wildcard grants everything.
    pub fn has(&self, capability: &str) -> bool {
        let set = self.snapshot();
        set.contains(capability) || set.contains(&self.config.wildcard)
    }

    /// Current set.
    pub fn snapshot(&self) -> Arc<PermissionSet> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of cached capabilities.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Re-fetch from the trusted source and replace the cache.
    ///
    /// On failure the previous set stays in place.
    pub async fn refresh(&self) -> Result<Arc<PermissionSet>, PermissionError> {
        let fetched = match self.source.fetch().await {
            Ok(fetched) => fetched,
            Err(e) => {
                tracing::error!(error = %e, "permission refresh failed");
                return Err(e);
            }
        };
        let set = self.install(fetched.into_iter().collect());
        tracing::info!(count = set.len(), "permissions refreshed");
        Ok(set)
    }

    /// Replace the cache with a known set and persist it.
    pub fn install(&self, set: PermissionSet) -> Arc<PermissionSet> {
        let set = Arc::new(set);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = set.clone();

        if let Err(e) = self.durable.set_json(&self.storage_key, &set.to_vec()) {
            tracing::warn!(error = %e, "failed to persist permissions");
        }
        set
    }

    /// Load the set persisted by a previous page. Returns false if none was stored.
    pub fn load_persisted(&self) -> Result<bool, PermissionError> {
        let stored: Option<Vec<String>> = self
            .durable
            .get_json(&self.storage_key)
            .map_err(|e| match e {
                StoreError::Serialize(e) => PermissionError::Malformed(e.to_string()),
                other => PermissionError::Storage(other),
            })?;
        match stored {
            Some(capabilities) => {
                *self.current.write().unwrap_or_else(PoisonError::into_inner) =
                    Arc::new(capabilities.into_iter().collect());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Check that the persisted copy, if any, is a list of strings.
    pub fn persisted_well_formed(&self) -> bool {
        match self.durable.get(&self.storage_key) {
            Ok(None) => true,
            Ok(Some(raw)) => serde_json::from_str::<Vec<String>>(&raw).is_ok(),
            Err(_) => false,
        }
    }

    /// Drop the in-memory set. The persisted copy is left to the caller.
    pub fn clear(&self) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) =
            Arc::new(PermissionSet::new());
    }

    /// Check if calls to `path` need a capability.
    pub fn is_restricted(&self, path: &str) -> bool {
        self.config
            .restricted_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Capability required for `method` on `path`.
    ///
    /// A configured prefix rule names it, otherwise it is `METHOD:path`.
    pub fn required_capability(&self, method: &http::Method, path: &str) -> String {
        self.config
            .rules
            .iter()
            .find(|rule| path.starts_with(rule.prefix.as_str()))
            .map(|rule| rule.capability.clone())
            .unwrap_or_else(|| format!("{}:{}", method.as_str().to_uppercase(), path))
    }

    /// Universal capability marker.
    pub fn wildcard(&self) -> &str {
        &self.config.wildcard
    }
}

impl std::fmt::Debug for PermissionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionCache")
            .field("capabilities", &self.len())
            .field("storage_key", &self.storage_key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guard_core::{CapabilityRule, MemoryStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FixedSource {
        capabilities: Mutex<Vec<String>>,
        fail: std::sync::atomic::AtomicBool,
        calls: AtomicUsize,
    }

    impl FixedSource {
        fn with(capabilities: &[&str]) -> Arc<Self> {
            let source = Self::default();
            *source.capabilities.lock().unwrap() =
                capabilities.iter().map(|c| c.to_string()).collect();
            Arc::new(source)
        }
    }

    #[async_trait]
    impl PermissionSource for FixedSource {
        async fn fetch(&self) -> Result<Vec<String>, PermissionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(PermissionError::Source("unreachable".into()));
            }
            Ok(self.capabilities.lock().unwrap().clone())
        }
    }

    fn cache(source: Arc<FixedSource>, store: Arc<MemoryStore>) -> PermissionCache {
        PermissionCache::new(PermissionConfig::default(), "user_permissions", source, store)
    }

    #[test]
    fn test_deny_by_default() {
        let cache = cache(FixedSource::with(&[]), Arc::new(MemoryStore::new()));
        assert!(!cache.has("GET:/api/admin/users"));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_replaces_and_persists() {
        let store = Arc::new(MemoryStore::new());
        let source = FixedSource::with(&["GET:/api/admin/users"]);
        let cache = cache(source.clone(), store.clone());

        cache.refresh().await.unwrap();
        assert!(cache.has("GET:/api/admin/users"));
        assert!(!cache.has("DELETE:/api/admin/users"));

        let persisted: Vec<String> = store.get_json("user_permissions").unwrap().unwrap();
        assert_eq!(persisted, vec!["GET:/api/admin/users"]);

        // replaced, not merged
        *source.capabilities.lock().unwrap() = vec!["POST:/api/admin/users".into()];
        cache.refresh().await.unwrap();
        assert!(!cache.has("GET:/api/admin/users"));
        assert!(cache.has("POST:/api/admin/users"));
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent() {
        let source = FixedSource::with(&["b", "a", "c"]);
        let cache = cache(source.clone(), Arc::new(MemoryStore::new()));
        let first = cache.refresh().await.unwrap();
        let second = cache.refresh().await.unwrap();
        assert_eq!(*first, *second);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_set() {
        let source = FixedSource::with(&["GET:/api/admin/users"]);
        let cache = cache(source.clone(), Arc::new(MemoryStore::new()));
        cache.refresh().await.unwrap();

        source.fail.store(true, Ordering::SeqCst);
        assert!(cache.refresh().await.is_err());
        assert!(cache.has("GET:/api/admin/users"));
    }

    #[test]
    fn test_wildcard_grants_everything() {
        let cache = cache(FixedSource::with(&[]), Arc::new(MemoryStore::new()));
        cache.install(["*"].into_iter().collect());
        assert!(cache.has("DELETE:/api/admin/tasks/7"));
    }

    #[test]
    fn test_load_persisted() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache(FixedSource::with(&[]), store.clone());
        assert!(!cache.load_persisted().unwrap());

        store.set("user_permissions", r#"["GET:/api/admin/users"]"#).unwrap();
        assert!(cache.load_persisted().unwrap());
        assert!(cache.has("GET:/api/admin/users"));
    }

    #[test]
    fn test_corrupted_store_detected() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache(FixedSource::with(&[]), store.clone());
        assert!(cache.persisted_well_formed());

        store.set("user_permissions", r#"{"admin": true}"#).unwrap();
        assert!(!cache.persisted_well_formed());
        assert!(matches!(cache.load_persisted(), Err(PermissionError::Malformed(_))));
    }

    #[test]
    fn test_clear_keeps_store() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache(FixedSource::with(&[]), store.clone());
        cache.install(["a"].into_iter().collect());
        cache.clear();
        assert!(!cache.has("a"));
        assert!(store.contains("user_permissions").unwrap());
    }

    #[test]
    fn test_required_capability() {
        let mut config = PermissionConfig::default();
        config.rules.push(CapabilityRule {
            prefix: "/api/admin/wallet".into(),
            capability: "wallet:manage".into(),
        });
        let cache = PermissionCache::new(
            config,
            "user_permissions",
            FixedSource::with(&[]),
            Arc::new(MemoryStore::new()),
        );

        assert!(cache.is_restricted("/api/admin/users"));
        assert!(!cache.is_restricted("/api/tasks"));
        assert_eq!(
            cache.required_capability(&http::Method::DELETE, "/api/admin/users/3"),
            "DELETE:/api/admin/users/3"
        );
        assert_eq!(
            cache.required_capability(&http::Method::POST, "/api/admin/wallet/adjust"),
            "wallet:manage"
        );
    }
}
