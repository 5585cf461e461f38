use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use guard_core::{AuthConfig, Clock, GuardError, GuardResult, KeyValueStore, SessionConfig, StoreError};

use crate::activity::{ActivityKind, ActivitySink};
use crate::id::SessionId;

/// Notice shown when the session times out.
const EXPIRED_NOTICE: &str = "Session expired, please sign in again";

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    /// Idle past the warning lead time but not yet expired.
    IdleWarning,
    /// Re-authentication required.
    Expired,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::IdleWarning => "idle_warning",
            Self::Expired => "expired",
        }
    }
}

/// Host integration points for session transitions.
pub trait SessionHooks: Send + Sync {
    /// Show a user-visible notice.
    fn notify(&self, message: &str);

    /// Navigate to `location`.
    fn redirect(&self, location: &str);

    /// Called once per idle period when the warning state is entered.
    fn idle_warning(&self, _remaining: Duration) {}

    /// Called after stored state was cleared, before `notify`.
    fn expired(&self) {}
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl SessionHooks for NoopHooks {
    fn notify(&self, _message: &str) {}
    fn redirect(&self, _location: &str) {}
}

/// The two browser-style stores touched on expiry.
#[derive(Clone)]
pub struct SessionStores {
    /// Page-lifetime store (credential, permissions).
    pub durable: Arc<dyn KeyValueStore>,
    /// Tab-lifetime store (credential, session id).
    pub volatile: Arc<dyn KeyValueStore>,
}

#[derive(Debug)]
struct Inner {
    state: SessionState,
    last_activity_ms: u64,
}

/// Tracks activity and enforces the idle timeout.
pub struct SessionMonitor {
    inner: Mutex<Inner>,
    timeout_ms: u64,
    warning_lead_ms: Option<u64>,
    auth: AuthConfig,
    login_page: String,
    stores: SessionStores,
    clock: Arc<dyn Clock>,
    hooks: Arc<dyn SessionHooks>,
}

impl SessionMonitor {
    /// Create an active monitor with activity stamped now.
    pub fn new(
        config: &SessionConfig,
        auth: AuthConfig,
        login_page: impl Into<String>,
        stores: SessionStores,
        clock: Arc<dyn Clock>,
        hooks: Arc<dyn SessionHooks>,
    ) -> Self {
        let now = clock.now_ms();
        Self {
            inner: Mutex::new(Inner {
                state: SessionState::Active,
                last_activity_ms: now,
            }),
            timeout_ms: config.timeout_secs.saturating_mul(1000),
            warning_lead_ms: config.warning_secs.map(|secs| secs.saturating_mul(1000)),
            auth,
            login_page: login_page.into(),
            stores,
            clock,
            hooks,
        }
    }

    /// State as of the last transition, without evaluating idle time.
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Time since the last recorded activity.
    pub fn idle_for(&self) -> Duration {
        let last = self.lock().last_activity_ms;
        Duration::from_millis(self.clock.now_ms().saturating_sub(last))
    }

    /// Record activity. Ignored once expired; returns whether it counted.
    pub fn touch(&self, kind: ActivityKind) -> bool {
        let now = self.clock.now_ms();
        let mut inner = self.lock();
        if inner.state == SessionState::Expired {
            tracing::debug!(kind = kind.as_str(), "activity ignored on expired session");
            return false;
        }
        inner.last_activity_ms = inner.last_activity_ms.max(now);
        inner.state = SessionState::Active;
        true
    }

    /// Evaluate idle time and transition if needed.
    pub fn check(&self) -> SessionState {
        let now = self.clock.now_ms();
        let (state, idle_ms) = {
            let inner = self.lock();
            (inner.state, now.saturating_sub(inner.last_activity_ms))
        };

        match state {
            SessionState::Expired => SessionState::Expired,
            _ if idle_ms > self.timeout_ms => {
                tracing::warn!(idle_ms, timeout_ms = self.timeout_ms, "session idle timeout");
                self.expire();
                SessionState::Expired
            }
            SessionState::Active => match self.warning_lead_ms {
                Some(lead) if idle_ms > self.timeout_ms.saturating_sub(lead) => {
                    self.enter_warning(idle_ms)
                }
                _ => SessionState::Active,
            },
            SessionState::IdleWarning => SessionState::IdleWarning,
        }
    }

    /// Fail with `SessionExpired` unless the session is usable now.
    pub fn ensure_active(&self) -> GuardResult<()> {
        match self.check() {
            SessionState::Expired => Err(GuardError::SessionExpired),
            _ => Ok(()),
        }
    }

    /// Force the expired transition. Returns false if already expired.
    pub fn expire(&self) -> bool {
        {
            let mut inner = self.lock();
            if inner.state == SessionState::Expired {
                return false;
            }
            inner.state = SessionState::Expired;
        }

        if let Err(e) = self.clear_stored_state() {
            tracing::error!(error = %e, "failed to clear session state");
        }
        self.hooks.expired();
        self.hooks.notify(EXPIRED_NOTICE);
        self.hooks.redirect(&self.login_page);
        tracing::info!(redirect = %self.login_page, "session expired");
        true
    }

    /// Start a session after successful authentication.
    ///
    /// Rotates the session id before returning, so protected calls issued
    /// afterwards always run under the new id.
    pub fn begin(&self) -> Result<SessionId, StoreError> {
        let id = self.rotate_session_id()?;
        let now = self.clock.now_ms();
        let mut inner = self.lock();
        inner.state = SessionState::Active;
        inner.last_activity_ms = inner.last_activity_ms.max(now);
        Ok(id)
    }

    /// Replace the stored session id.
    pub fn rotate_session_id(&self) -> Result<SessionId, StoreError> {
        let id = SessionId::generate();
        self.stores.volatile.set(&self.auth.session_id_key, id.as_str())?;
        tracing::info!("session id rotated");
        Ok(id)
    }

    /// Current stored session id.
    pub fn session_id(&self) -> Result<Option<SessionId>, StoreError> {
        Ok(self
            .stores
            .volatile
            .get(&self.auth.session_id_key)?
            .map(SessionId::from))
    }

    fn enter_warning(&self, idle_ms: u64) -> SessionState {
        {
            let mut inner = self.lock();
            if inner.state != SessionState::Active {
                return inner.state;
            }
            inner.state = SessionState::IdleWarning;
        }
        let remaining = Duration::from_millis(self.timeout_ms.saturating_sub(idle_ms));
        tracing::info!(remaining_ms = remaining.as_millis() as u64, "session idle warning");
        self.hooks.idle_warning(remaining);
        SessionState::IdleWarning
    }

    fn clear_stored_state(&self) -> Result<(), StoreError> {
        let SessionStores { durable, volatile } = &self.stores;
        durable.remove(&self.auth.token_key)?;
        volatile.remove(&self.auth.token_key)?;
        durable.remove(&self.auth.permissions_key)?;
        volatile.remove(&self.auth.session_id_key)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ActivitySink for SessionMonitor {
    fn record_activity(&self, kind: ActivityKind) {
        self.touch(kind);
    }
}

impl std::fmt::Debug for SessionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionMonitor")
            .field("state", &self.state())
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}
