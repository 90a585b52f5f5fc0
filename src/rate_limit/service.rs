use super::redis::RedisCounterStore;
use super::store::{unix_nanos, CounterStore};
use super::types::{window_key, FailurePolicy, WindowDecision, WindowSpec};
use crate::config::RedisSettings;
use crate::error::Result;
use crate::metrics;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Cluster-wide sliding window limiter
///
/// Every gate instance pointed at the same store shares one window per
/// resource key. Store failures never reach the caller: the configured
/// [`FailurePolicy`] decides instead.
pub struct SlidingWindowLimiter {
    /// Shared counter store
    store: Arc<dyn CounterStore>,
    /// Attempts allowed per window
    capacity: u64,
    /// Window length and key TTL
    spec: WindowSpec,
    /// Prefix for every window key
    key_prefix: String,
    /// Decision used when the store fails
    failure_policy: FailurePolicy,
}

impl SlidingWindowLimiter {
    /// Connect to Redis and build the limiter
    ///
    /// Connection failure is fatal and returned to the caller.
    pub async fn connect(settings: &RedisSettings, capacity: u64) -> Result<Self> {
        info!(
            url = %settings.url,
            capacity = capacity,
            window_ms = settings.window_ms,
            failure_policy = ?settings.failure_policy,
            "Initializing shared sliding window limiter"
        );

        let store = RedisCounterStore::connect(&settings.url, settings.strategy).await?;

        Ok(Self::with_store(
            Arc::new(store),
            capacity,
            settings.window_spec(),
            settings.key_prefix.clone(),
            settings.failure_policy,
        ))
    }

    /// Build the limiter on top of an existing store
    pub fn with_store(
        store: Arc<dyn CounterStore>,
        capacity: u64,
        spec: WindowSpec,
        key_prefix: impl Into<String>,
        failure_policy: FailurePolicy,
    ) -> Self {
        Self {
            store,
            capacity,
            spec,
            key_prefix: key_prefix.into(),
            failure_policy,
        }
    }

    /// Check and record one attempt for `resource`
    pub async fn check(&self, resource: &str) -> WindowDecision {
        let key = window_key(&self.key_prefix, resource);

        match self.store.record_attempt(&key, unix_nanos(), &self.spec).await {
            Ok(count) if count < self.capacity => {
                debug!(key = %key, count = count, capacity = self.capacity, "Shared window check passed");
                WindowDecision::Allowed { count }
            }
            Ok(count) => {
                warn!(key = %key, count = count, capacity = self.capacity, "Shared window exhausted");
                WindowDecision::Denied { count }
            }
            Err(e) => {
                let allowed = self.failure_policy.decision();
                error!(
                    key = %key,
                    error = %e,
                    allowed = allowed,
                    "Counter store error during shared window check"
                );
                metrics::record_counter_store_error();
                WindowDecision::Fallback { allowed }
            }
        }
    }

    /// Whether one more request for `resource` is admitted cluster-wide
    pub async fn allow(&self, resource: &str) -> bool {
        self.check(resource).await.is_allowed()
    }

    /// Release the store connection. Safe to call more than once.
    pub fn close(&self) {
        self.store.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GateError;
    use crate::rate_limit::store::InMemoryCounterStore;
    use crate::rate_limit::types::WindowStrategy;
    use async_trait::async_trait;
    use std::time::Duration;

    struct FailingStore;

    #[async_trait]
    impl CounterStore for FailingStore {
        async fn record_attempt(&self, _key: &str, _now: u64, _spec: &WindowSpec) -> Result<u64> {
            Err(GateError::CounterStore("connection refused".to_string()))
        }

        async fn ping(&self) -> Result<()> {
            Err(GateError::CounterStore("connection refused".to_string()))
        }

        fn close(&self) {}
    }

    fn limiter_with(store: Arc<dyn CounterStore>, capacity: u64, policy: FailurePolicy) -> SlidingWindowLimiter {
        SlidingWindowLimiter::with_store(store, capacity, WindowSpec::default(), "test:", policy)
    }

    #[tokio::test]
    async fn test_denies_after_capacity() {
        let store = Arc::new(InMemoryCounterStore::new(WindowStrategy::Script));
        let limiter = limiter_with(store, 10, FailurePolicy::Open);

        for i in 0..10 {
            assert!(limiter.allow("https://api.example.com").await, "Request {} should be allowed", i);
        }
        assert!(!limiter.allow("https://api.example.com").await);
    }

    #[tokio::test]
    async fn test_allows_again_after_window() {
        let store = Arc::new(InMemoryCounterStore::new(WindowStrategy::Script));
        let spec = WindowSpec::new(Duration::from_millis(100), Duration::from_secs(60));
        let limiter = SlidingWindowLimiter::with_store(store, 2, spec, "test:", FailurePolicy::Open);

        assert!(limiter.allow("api").await);
        assert!(limiter.allow("api").await);
        assert!(!limiter.allow("api").await);

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(limiter.allow("api").await);
    }

    #[tokio::test]
    async fn test_resources_have_separate_windows() {
        let store = Arc::new(InMemoryCounterStore::new(WindowStrategy::Script));
        let limiter = limiter_with(store, 1, FailurePolicy::Open);

        assert!(limiter.allow("a").await);
        assert!(!limiter.allow("a").await);
        assert!(limiter.allow("b").await);
    }

    #[tokio::test]
    async fn test_store_error_fails_open() {
        let limiter = limiter_with(Arc::new(FailingStore), 10, FailurePolicy::Open);

        let decision = limiter.check("api").await;
        assert_eq!(decision, WindowDecision::Fallback { allowed: true });
        assert!(limiter.allow("api").await);
    }

    #[tokio::test]
    async fn test_store_error_fails_closed() {
        let limiter = limiter_with(Arc::new(FailingStore), 10, FailurePolicy::Closed);

        assert!(!limiter.allow("api").await);
    }

    #[tokio::test]
    async fn test_close_twice_then_policy_applies() {
        let store = Arc::new(InMemoryCounterStore::new(WindowStrategy::Script));
        let limiter = limiter_with(store, 10, FailurePolicy::Closed);

        limiter.close();
        limiter.close();

        assert_eq!(limiter.check("api").await, WindowDecision::Fallback { allowed: false });
    }

    #[tokio::test]
    async fn test_pipeline_race_can_overshoot() {
        // Every caller reads the count before any of them records an attempt
        let store = Arc::new(InMemoryCounterStore::new(WindowStrategy::Pipeline));
        let limiter = limiter_with(store, 10, FailurePolicy::Open);

        let results = futures::future::join_all((0..15).map(|_| limiter.allow("api"))).await;
        let admitted = results.iter().filter(|allowed| **allowed).count();
        assert!(admitted > 10, "pipeline admitted {}", admitted);
    }

    #[tokio::test]
    async fn test_script_is_exact_under_concurrency() {
        let store = Arc::new(InMemoryCounterStore::new(WindowStrategy::Script));
        let limiter = limiter_with(store, 10, FailurePolicy::Open);

        let results = futures::future::join_all((0..15).map(|_| limiter.allow("api"))).await;
        let admitted = results.iter().filter(|allowed| **allowed).count();
        assert_eq!(admitted, 10);
    }
}
