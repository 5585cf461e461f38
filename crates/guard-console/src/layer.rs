//! Composition root.
//!
//! `SecurityLayer` builds every component once from a `GuardConfig` and
//! wires them together. Pages and widgets receive the layer (or pieces of
//! it) instead of reaching for process-wide state.

use std::sync::Arc;
use std::time::Duration;

use guard_core::{
    Clock, ConfigError, GuardConfig, GuardResult, KeyValueStore, MemoryStore, PageMeta, Severity,
    StoreError, SystemClock,
};
use guard_observability::{
    kinds, ClickBurstDetector, InspectionDetector, SecurityEvent, SecurityEventReporter, Viewport,
};
use guard_security::{
    has_csp, AuthCredential, ContentScanner, CredentialStore, FileUploadPolicy, InputValidator,
    PermissionCache, RateLimiter, ScanRuleError, SecurityHeaders, TokenAuthority,
};
use guard_session::{
    ActivityKind, NoopHooks, SessionHooks, SessionId, SessionMonitor, SessionState, SessionStores,
};
use guard_transport::{
    BeaconSink, CallbackAdapter, CallbackTransport, ClientGuards, ClientSettings, SecureClient,
    Transport, TransportPermissionSource,
};

use crate::forms::FormGuard;
use crate::integrity::{IntegrityChecker, IntegrityReport};
use crate::pages::{FeatureGate, GatedElement, PageAccess, PageGate};
use crate::render::RenderGuard;
use crate::report::{
    AuthenticationStatus, CsrfStatus, PermissionStatus, RateLimitStatus, SecurityReport, XssStatus,
};
use crate::scheduler::BackgroundTasks;

/// Errors assembling the layer.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    ScanRule(#[from] ScanRuleError),

    #[error("validator patterns failed to compile: {0}")]
    Validator(#[from] regex::Error),

    #[error("no transport configured")]
    MissingTransport,
}

/// Session hooks installed by the layer around the host's hooks.
struct LayerHooks {
    host: Arc<dyn SessionHooks>,
    permissions: Arc<PermissionCache>,
    reporter: Arc<SecurityEventReporter>,
}

impl SessionHooks for LayerHooks {
    fn notify(&self, message: &str) {
        self.host.notify(message);
    }

    fn redirect(&self, location: &str) {
        self.host.redirect(location);
    }

    fn idle_warning(&self, remaining: Duration) {
        self.host.idle_warning(remaining);
    }

    fn expired(&self) {
        self.permissions.clear();
        self.reporter
            .report(SecurityEvent::new(kinds::SESSION_EXPIRED, Severity::High));
        self.host.expired();
    }
}

/// Assembles a `SecurityLayer`.
pub struct SecurityLayerBuilder {
    config: GuardConfig,
    clock: Option<Arc<dyn Clock>>,
    durable: Option<Arc<dyn KeyValueStore>>,
    volatile: Option<Arc<dyn KeyValueStore>>,
    meta: Option<Arc<PageMeta>>,
    hooks: Option<Arc<dyn SessionHooks>>,
    transport: Option<Arc<dyn Transport>>,
    headers: SecurityHeaders,
}

impl SecurityLayerBuilder {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            config,
            clock: None,
            durable: None,
            volatile: None,
            meta: None,
            hooks: None,
            transport: None,
            headers: SecurityHeaders::default(),
        }
    }

    /// Start from a configuration file.
    pub fn from_config_file(path: &str) -> anyhow::Result<Self> {
        Ok(Self::new(GuardConfig::load(path)?))
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Page-lifetime and tab-lifetime stores.
    pub fn stores(mut self, durable: Arc<dyn KeyValueStore>, volatile: Arc<dyn KeyValueStore>) -> Self {
        self.durable = Some(durable);
        self.volatile = Some(volatile);
        self
    }

    pub fn meta(mut self, meta: Arc<PageMeta>) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn SessionHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn headers(mut self, headers: SecurityHeaders) -> Self {
        self.headers = headers;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a callback-based transport.
    pub fn callback_transport<T: CallbackTransport + 'static>(self, transport: T) -> Self {
        self.transport(Arc::new(CallbackAdapter::new(transport)))
    }

    pub fn build(self) -> Result<SecurityLayer, BuildError> {
        let config = self.config;
        config.validate()?;
        let transport = self.transport.ok_or(BuildError::MissingTransport)?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let durable = self.durable.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let volatile = self.volatile.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let meta = self.meta.unwrap_or_default();
        let host_hooks = self.hooks.unwrap_or_else(|| Arc::new(NoopHooks));

        if config.pages.install_security_meta {
            let installed = self.headers.install(&meta);
            tracing::debug!(installed, "security meta entries installed");
        }

        let tokens = Arc::new(TokenAuthority::with_meta(meta.clone(), config.csrf.meta_name.clone()));
        let reporter = Arc::new(SecurityEventReporter::new(&config.reporter));
        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit, clock.clone()));
        let credentials = CredentialStore::new(
            durable.clone(),
            volatile.clone(),
            config.auth.token_key.clone(),
        );
        let settings = ClientSettings::from_config(&config)?;

        let source = Arc::new(TransportPermissionSource::new(
            transport.clone(),
            config.permissions.source_endpoint.clone(),
            settings.clone(),
            credentials.clone(),
        ));
        let permissions = Arc::new(PermissionCache::new(
            config.permissions.clone(),
            config.auth.permissions_key.clone(),
            source,
            durable.clone(),
        ));
        match permissions.load_persisted() {
            Ok(true) => tracing::debug!(count = permissions.len(), "persisted permissions loaded"),
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "persisted permissions ignored"),
        }

        let hooks = Arc::new(LayerHooks {
            host: host_hooks,
            permissions: permissions.clone(),
            reporter: reporter.clone(),
        });
        let stores = SessionStores {
            durable: durable.clone(),
            volatile,
        };
        let session = Arc::new(SessionMonitor::new(
            &config.session,
            config.auth.clone(),
            config.pages.login_page.clone(),
            stores,
            clock.clone(),
            hooks,
        ));

        let client = SecureClient::new(
            transport.clone(),
            settings,
            ClientGuards {
                tokens: tokens.clone(),
                credentials: credentials.clone(),
                limiter: limiter.clone(),
                permissions: permissions.clone(),
                session: session.clone(),
                reporter: reporter.clone(),
            },
        );

        let scanner = Arc::new(ContentScanner::from_config(&config.scanner)?);
        let render = RenderGuard::new(scanner.clone(), reporter.clone());
        let forms = FormGuard::new(
            InputValidator::new()?,
            FileUploadPolicy::default(),
            tokens.clone(),
            config.csrf.form_field.clone(),
        );
        let pages = PageGate::new(&config.pages, credentials.clone(), clock.clone());
        let features = FeatureGate::new(permissions.clone());
        let clicks = Arc::new(ClickBurstDetector::new(
            &config.monitoring,
            clock.clone(),
            reporter.clone(),
        ));
        let inspection = InspectionDetector::new(&config.monitoring, reporter.clone());
        let integrity = Arc::new(IntegrityChecker::new(
            credentials.clone(),
            permissions.clone(),
            session.clone(),
            reporter.clone(),
            clock.clone(),
        ));

        tracing::info!(
            scan_rules = scanner.rule_count(),
            rate_rules = limiter.policies().len(),
            permissions = permissions.len(),
            "security layer ready"
        );

        Ok(SecurityLayer {
            config,
            clock,
            meta,
            transport,
            tokens,
            reporter,
            limiter,
            credentials,
            permissions,
            session,
            scanner,
            client,
            render,
            forms,
            pages,
            features,
            clicks,
            inspection,
            integrity,
        })
    }
}

/// The assembled request-security layer.
pub struct SecurityLayer {
    config: GuardConfig,
    clock: Arc<dyn Clock>,
    meta: Arc<PageMeta>,
    transport: Arc<dyn Transport>,
    tokens: Arc<TokenAuthority>,
    reporter: Arc<SecurityEventReporter>,
    limiter: Arc<RateLimiter>,
    credentials: CredentialStore,
    permissions: Arc<PermissionCache>,
    session: Arc<SessionMonitor>,
    scanner: Arc<ContentScanner>,
    client: SecureClient,
    render: RenderGuard,
    forms: FormGuard,
    pages: PageGate,
    features: FeatureGate,
    clicks: Arc<ClickBurstDetector>,
    inspection: InspectionDetector,
    integrity: Arc<IntegrityChecker>,
}

impl SecurityLayer {
    pub fn builder(config: GuardConfig) -> SecurityLayerBuilder {
        SecurityLayerBuilder::new(config)
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// The client every page issues calls through.
    pub fn client(&self) -> &SecureClient {
        &self.client
    }

    /// Same pipeline over a callback-based transport.
    pub fn client_for_callback<T: CallbackTransport + 'static>(&self, transport: T) -> SecureClient {
        self.client
            .with_transport(Arc::new(CallbackAdapter::new(transport)))
    }

    pub fn tokens(&self) -> &TokenAuthority {
        &self.tokens
    }

    pub fn session(&self) -> &SessionMonitor {
        &self.session
    }

    pub fn permissions(&self) -> &PermissionCache {
        &self.permissions
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn scanner(&self) -> &ContentScanner {
        &self.scanner
    }

    pub fn reporter(&self) -> &SecurityEventReporter {
        &self.reporter
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn meta(&self) -> &PageMeta {
        &self.meta
    }

    pub fn render_guard(&self) -> &RenderGuard {
        &self.render
    }

    pub fn form_guard(&self) -> &FormGuard {
        &self.forms
    }

    pub fn page_gate(&self) -> &PageGate {
        &self.pages
    }

    pub fn feature_gate(&self) -> &FeatureGate {
        &self.features
    }

    /// Record user activity.
    pub fn record_activity(&self, kind: ActivityKind) -> bool {
        self.session.touch(kind)
    }

    /// Feed a DOM event by name. Clicks also feed the burst detector.
    pub fn on_dom_event(&self, name: &str) -> bool {
        if name == "click" {
            self.clicks.record_click();
        }
        match ActivityKind::from_event(name) {
            Some(kind) => self.session.touch(kind),
            None => false,
        }
    }

    /// Feed the window geometry to the inspection heuristic.
    pub fn observe_viewport(&self, outer: Viewport, inner: Viewport) -> bool {
        self.inspection.observe(outer, inner)
    }

    /// Check page access for `path`.
    pub fn check_page(&self, path: &str) -> Result<PageAccess, StoreError> {
        self.pages.check(path)
    }

    /// Ids of elements to hide for the current principal.
    pub fn hidden_elements<'a>(&self, elements: &'a [GatedElement]) -> Vec<&'a str> {
        self.features.hidden(elements)
    }

    /// Install a credential after successful authentication.
    ///
    /// Starts a fresh session with a new id, rotates the anti-forgery token
    /// and refreshes permissions. A failed refresh keeps the cached set.
    pub async fn login(&self, credential: AuthCredential, remember: bool) -> GuardResult<SessionId> {
        self.credentials.save(&credential, remember)?;
        let id = self.session.begin()?;
        self.tokens.rotate();
        if let Err(e) = self.permissions.refresh().await {
            tracing::warn!(error = %e, "permission refresh after login failed");
        }
        tracing::info!(remember, "login completed");
        Ok(id)
    }

    /// End the session. Returns false if it had already ended.
    pub fn logout(&self) -> bool {
        self.session.expire()
    }

    /// Check a valid credential is stored.
    pub fn is_authenticated(&self) -> bool {
        match self.credentials.load() {
            Ok(Some(credential)) => credential.is_valid_at(self.clock.now_secs()),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(error = %e, "credential unreadable");
                false
            }
        }
    }

    pub async fn run_integrity_check(&self) -> IntegrityReport {
        self.integrity.run().await
    }

    pub fn security_report(&self) -> SecurityReport {
        SecurityReport {
            csrf: CsrfStatus {
                enabled: !self.tokens.current_token().as_str().is_empty(),
                header: self.config.csrf.header_name.clone(),
            },
            xss: XssStatus {
                protection: self.scanner.rule_count() > 0,
                csp: has_csp(&self.meta),
                scan_rules: self.scanner.rule_count(),
            },
            authentication: AuthenticationStatus {
                logged_in: self.is_authenticated(),
                session_timeout_minutes: self.config.session.timeout_secs / 60,
                session_state: self.session.state().as_str(),
            },
            permissions: PermissionStatus {
                count: self.permissions.len(),
            },
            rate_limit: RateLimitStatus {
                rules: self.limiter.policies().len(),
                active_windows: self.limiter.active_windows(),
            },
            events: self.reporter.stats().into(),
        }
    }

    /// Start the periodic checks and event delivery.
    ///
    /// Must be called from within a tokio runtime. Dropping the returned
    /// handle stops everything.
    pub fn spawn_background(&self) -> BackgroundTasks {
        let mut tasks = BackgroundTasks::new();

        let session = self.session.clone();
        tasks.spawn_interval("session_check", self.config.session.check_interval(), move || {
            let session = session.clone();
            async move {
                if session.check() == SessionState::Expired {
                    tracing::debug!("session check found expired session");
                }
            }
        });

        let integrity = self.integrity.clone();
        tasks.spawn_interval("integrity_check", self.config.integrity.interval(), move || {
            let integrity = integrity.clone();
            async move {
                integrity.run().await;
            }
        });

        let clicks = self.clicks.clone();
        let window = Duration::from_millis(self.config.monitoring.click_window_ms);
        tasks.spawn_interval("click_poll", window, move || {
            let clicks = clicks.clone();
            async move {
                clicks.poll();
            }
        });

        let sink = Arc::new(BeaconSink::new(
            self.transport.clone(),
            self.config.reporter.endpoint.clone(),
            self.client.settings().clone(),
            self.tokens.clone(),
        ));
        match self.reporter.spawn_dispatcher(sink) {
            Some(handle) => tasks.adopt("event_dispatch", handle),
            None => tracing::warn!("event dispatcher already running"),
        }
        tasks
    }
}

impl std::fmt::Debug for SecurityLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityLayer")
            .field("session", &self.session.state())
            .field("permissions", &self.permissions.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use guard_core::{MetaKind, ManualClock};
    use guard_transport::{InboundResponse, OutboundRequest, TransportError};

    struct Ok200;

    #[async_trait]
    impl Transport for Ok200 {
        async fn send(&self, _request: OutboundRequest) -> Result<InboundResponse, TransportError> {
            Ok(InboundResponse::ok().with_body("[]"))
        }
    }

    #[test]
    fn test_build_requires_transport() {
        let result = SecurityLayer::builder(GuardConfig::default()).build();
        assert!(matches!(result, Err(BuildError::MissingTransport)));
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut config = GuardConfig::default();
        config.session.timeout_secs = 0;
        let result = SecurityLayer::builder(config)
            .transport(Arc::new(Ok200))
            .build();
        assert!(matches!(result, Err(BuildError::Config(_))));
    }

    #[test]
    fn test_build_installs_meta_and_mirrors_token() {
        let meta = Arc::new(PageMeta::new());
        let layer = SecurityLayer::builder(GuardConfig::default())
            .clock(Arc::new(ManualClock::new(0)))
            .meta(meta.clone())
            .transport(Arc::new(Ok200))
            .build()
            .unwrap();

        assert!(has_csp(&meta));
        assert_eq!(
            meta.get(MetaKind::Name, "csrf-token").as_deref(),
            Some(layer.tokens().current_token().as_str())
        );

        let report = layer.security_report();
        assert!(report.is_hardened());
        assert!(!report.authentication.logged_in);
        assert_eq!(report.authentication.session_timeout_minutes, 30);
        assert_eq!(report.rate_limit.rules, 3);
    }

    #[test]
    fn test_meta_install_can_be_disabled() {
        let mut config = GuardConfig::default();
        config.pages.install_security_meta = false;
        let meta = Arc::new(PageMeta::new());
        let layer = SecurityLayer::builder(config)
            .meta(meta.clone())
            .transport(Arc::new(Ok200))
            .build()
            .unwrap();
        assert!(!layer.security_report().xss.csp);
    }
}
