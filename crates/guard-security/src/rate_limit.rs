//! Fixed-window call quotas.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use guard_core::{Clock, RateLimitConfig, RatePolicyConfig};

/// Quota for keys containing `pattern`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatePolicy {
    pub pattern: String,
    pub max_count: u32,
    pub window_ms: u64,
}

impl RatePolicy {
    /// Create a policy.
    pub fn new(pattern: impl Into<String>, max_count: u32, window: Duration) -> Self {
        Self {
            pattern: pattern.into(),
            max_count,
            window_ms: window.as_millis() as u64,
        }
    }

    fn matches(&self, key: &str) -> bool {
        key.contains(self.pattern.as_str())
    }
}

impl From<&RatePolicyConfig> for RatePolicy {
    fn from(config: &RatePolicyConfig) -> Self {
        Self {
            pattern: config.pattern.clone(),
            max_count: config.max_count,
            window_ms: config.window_ms,
        }
    }
}

/// Result of a quota check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    /// Counted against `policy`; `remaining` calls left in this window.
    Allowed { policy: String, remaining: u32 },
    /// Quota exhausted until the window ends.
    Limited { policy: String, retry_after: Duration },
    /// No policy matched the key.
    Unclassified,
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Self::Limited { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowCount {
    count: u32,
    ends_at_ms: u64,
}

/// Fixed-window counter keyed by `(key, floor(now / window))`.
///
/// Keys matching no policy are always allowed. Counts are taken when the
/// call is admitted and never rolled back.
pub struct RateLimiter {
    policies: Vec<RatePolicy>,
    windows: Mutex<HashMap<(String, u64), WindowCount>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a limiter. Policies are evaluated in order, first match wins.
    ///
    /// Policies with a window shorter than a millisecond are skipped.
    pub fn new(policies: Vec<RatePolicy>, clock: Arc<dyn Clock>) -> Self {
        let policies = policies
            .into_iter()
            .filter(|policy| {
                if policy.window_ms == 0 {
                    tracing::warn!(pattern = %policy.pattern, "rate policy with empty window skipped");
                }
                policy.window_ms > 0
            })
            .collect();
        Self {
            policies,
            windows: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Create a limiter from configuration.
    pub fn from_config(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(config.policies.iter().map(RatePolicy::from).collect(), clock)
    }

    /// Count a call for `key`. Returns false once the quota is exhausted.
    pub fn allow(&self, key: &str) -> bool {
        self.check(key).is_allowed()
    }

    /// Count a call for `key` and describe the outcome.
    pub fn check(&self, key: &str) -> RateDecision {
        let Some(policy) = self.policy_for(key) else {
            return RateDecision::Unclassified;
        };
        let now = self.clock.now_ms();
        let index = now / policy.window_ms;
        let ends_at_ms = (index + 1).saturating_mul(policy.window_ms);

        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let window = windows
            .entry((key.to_string(), index))
            .or_insert(WindowCount {
                count: 0,
                ends_at_ms,
            });

        let decision = if window.count >= policy.max_count {
            RateDecision::Limited {
                policy: policy.pattern.clone(),
                retry_after: Duration::from_millis(ends_at_ms.saturating_sub(now)),
            }
        } else {
            window.count += 1;
            RateDecision::Allowed {
                policy: policy.pattern.clone(),
                remaining: policy.max_count - window.count,
            }
        };

        windows.retain(|_, window| window.ends_at_ms > now);
        drop(windows);

        if let RateDecision::Limited { retry_after, .. } = &decision {
            tracing::warn!(
                key,
                policy = %policy.pattern,
                retry_after_ms = retry_after.as_millis() as u64,
                "rate limit exceeded"
            );
        }
        decision
    }

    /// First policy matching `key`.
    pub fn policy_for(&self, key: &str) -> Option<&RatePolicy> {
        self.policies.iter().find(|policy| policy.matches(key))
    }

    /// Configured policies in evaluation order.
    pub fn policies(&self) -> &[RatePolicy] {
        &self.policies
    }

    /// Windows currently held in memory.
    pub fn active_windows(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("policies", &self.policies)
            .field("active_windows", &self.active_windows())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guard_core::ManualClock;
    use proptest::prelude::*;

    fn limiter(clock: &ManualClock) -> RateLimiter {
        RateLimiter::from_config(&RateLimitConfig::default(), Arc::new(clock.clone()))
    }

    #[test]
    fn test_login_quota_and_window_reset() {
        let clock = ManualClock::new(0);
        let limiter = RateLimiter::new(
            vec![RatePolicy::new("login", 5, Duration::from_secs(60))],
            Arc::new(clock.clone()),
        );

        for _ in 0..5 {
            assert!(limiter.allow("login"));
        }
        assert!(!limiter.allow("login"));

        clock.advance(Duration::from_secs(61));
        assert!(limiter.allow("login"));
    }

    #[test]
    fn test_empty_window_policy_skipped() {
        let clock = ManualClock::new(1_000);
        let limiter = RateLimiter::new(
            vec![
                RatePolicy::new("/api/export", 5, Duration::ZERO),
                RatePolicy::new("/api/", 2, Duration::from_secs(60)),
            ],
            Arc::new(clock.clone()),
        );
        assert_eq!(limiter.policies().len(), 1);

        assert!(limiter.allow("/api/export"));
        assert!(limiter.allow("/api/export"));
        assert!(!limiter.allow("/api/export"));
    }

    #[test]
    fn test_first_matching_policy_wins() {
        let clock = ManualClock::new(0);
        let limiter = limiter(&clock);
        assert_eq!(limiter.policy_for("/api/login").unwrap().max_count, 5);
        assert_eq!(limiter.policy_for("/api/register").unwrap().max_count, 3);
        assert_eq!(limiter.policy_for("/api/users").unwrap().max_count, 100);
        assert!(limiter.policy_for("/static/app.js").is_none());
    }

    #[test]
    fn test_unclassified_key_fails_open() {
        let clock = ManualClock::new(0);
        let limiter = limiter(&clock);
        for _ in 0..1000 {
            assert_eq!(limiter.check("/health"), RateDecision::Unclassified);
        }
        assert_eq!(limiter.active_windows(), 0);
    }

    #[test]
    fn test_rejected_calls_are_not_counted() {
        let clock = ManualClock::new(0);
        let limiter = limiter(&clock);
        for _ in 0..3 {
            assert!(limiter.allow("/api/register"));
        }
        for _ in 0..10 {
            assert!(!limiter.allow("/api/register"));
        }
        let windows = limiter.windows.lock().unwrap();
        assert_eq!(windows.get(&("/api/register".to_string(), 0)).unwrap().count, 3);
    }

    #[test]
    fn test_retry_after_points_at_window_end() {
        let clock = ManualClock::new(10_000);
        let limiter = limiter(&clock);
        for _ in 0..3 {
            limiter.allow("/api/register");
        }
        match limiter.check("/api/register") {
            RateDecision::Limited { policy, retry_after } => {
                assert_eq!(policy, "/api/register");
                assert_eq!(retry_after, Duration::from_secs(50));
            }
            other => panic!("expected limited, got {:?}", other),
        }
    }

    #[test]
    fn test_remaining_counts_down() {
        let clock = ManualClock::new(0);
        let limiter = limiter(&clock);
        assert_eq!(
            limiter.check("/api/login"),
            RateDecision::Allowed { policy: "/api/login".into(), remaining: 4 }
        );
    }

    #[test]
    fn test_elapsed_windows_are_cleaned_up() {
        let clock = ManualClock::new(0);
        let limiter = limiter(&clock);
        limiter.allow("/api/a");
        limiter.allow("/api/b");
        limiter.allow("/api/c");
        assert_eq!(limiter.active_windows(), 3);

        // window [0, 60s) ends exactly at 60s
        clock.set(60_000);
        limiter.allow("/api/a");
        assert_eq!(limiter.active_windows(), 1);
    }

    #[test]
    fn test_keys_have_independent_windows() {
        let clock = ManualClock::new(0);
        let limiter = limiter(&clock);
        for _ in 0..5 {
            assert!(limiter.allow("/api/login"));
        }
        assert!(!limiter.allow("/api/login"));
        assert!(limiter.allow("/api/login/sms"));
    }

    proptest! {
        #[test]
        fn prop_quota_then_reject_then_reset(
            max in 1u32..50,
            window_ms in 1u64..120_000,
            start in 0u64..1_000_000_000,
        ) {
            let clock = ManualClock::new(start);
            let limiter = RateLimiter::new(
                vec![RatePolicy { pattern: "k".into(), max_count: max, window_ms }],
                Arc::new(clock.clone()),
            );
            // start of the current window, so every call shares it
            clock.set(start - start % window_ms);

            for _ in 0..max {
                prop_assert!(limiter.allow("k"));
            }
            prop_assert!(!limiter.allow("k"));

            clock.advance_ms(window_ms);
            prop_assert!(limiter.allow("k"));
        }
    }
}
