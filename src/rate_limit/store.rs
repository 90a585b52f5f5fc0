use super::types::{WindowSpec, WindowStrategy};
use crate::error::{GateError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Remote counter backing the shared sliding window
///
/// One call prunes entries that have left the window, counts what remains,
/// records the current attempt and refreshes the key expiry. Whether those
/// steps are atomic depends on the implementation and its [`WindowStrategy`].
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Record an attempt for `key` at `now_nanos` and return the number of
    /// attempts already in the window before it
    async fn record_attempt(&self, key: &str, now_nanos: u64, spec: &WindowSpec) -> Result<u64>;

    /// Check that the store is reachable
    async fn ping(&self) -> Result<()>;

    /// Release the connection. Calling it again is a no-op.
    fn close(&self);
}

/// Current wall clock in nanoseconds since the UNIX epoch
pub fn unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

pub(crate) fn nanos(duration: Duration) -> u64 {
    duration.as_nanos() as u64
}

#[derive(Debug, Default)]
struct WindowEntries {
    /// Expiry score of every recorded attempt
    scores: Vec<u64>,
    /// When the whole key expires
    key_expires_at: u64,
}

impl WindowEntries {
    fn prune(&mut self, now: u64) {
        if self.key_expires_at != 0 && self.key_expires_at <= now {
            self.scores.clear();
        }
        self.scores.retain(|&score| score > now);
    }

    fn add(&mut self, now: u64, spec: &WindowSpec) {
        self.scores.push(now + nanos(spec.window));
        self.key_expires_at = now + nanos(spec.key_ttl);
    }
}

/// In-process counter store with the same window semantics as Redis
///
/// Only shared by callers within one process. The `Pipeline` strategy
/// reproduces the race of a non-transactional pipeline: the count is read,
/// the task yields, and only then is the attempt recorded.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    windows: DashMap<String, WindowEntries>,
    strategy: WindowStrategy,
    closed: AtomicBool,
}

impl InMemoryCounterStore {
    pub fn new(strategy: WindowStrategy) -> Self {
        Self {
            windows: DashMap::new(),
            strategy,
            closed: AtomicBool::new(false),
        }
    }

    /// Number of live keys (for testing/monitoring)
    pub fn key_count(&self) -> usize {
        self.windows.len()
    }

    /// Drop keys whose TTL has lapsed, as Redis expires them
    fn evict_expired(&self, now: u64) {
        self.windows
            .retain(|_, entries| entries.key_expires_at == 0 || entries.key_expires_at > now);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(GateError::StoreClosed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn record_attempt(&self, key: &str, now_nanos: u64, spec: &WindowSpec) -> Result<u64> {
        self.ensure_open()?;
        self.evict_expired(now_nanos);

        match self.strategy {
            WindowStrategy::Script => {
                let mut entries = self.windows.entry(key.to_string()).or_default();
                entries.prune(now_nanos);
                let count = entries.scores.len() as u64;
                entries.add(now_nanos, spec);
                Ok(count)
            }
            WindowStrategy::Pipeline => {
                let count = {
                    let mut entries = self.windows.entry(key.to_string()).or_default();
                    entries.prune(now_nanos);
                    entries.scores.len() as u64
                };

                tokio::task::yield_now().await;

                self.windows
                    .entry(key.to_string())
                    .or_default()
                    .add(now_nanos, spec);
                Ok(count)
            }
        }
    }

    async fn ping(&self) -> Result<()> {
        self.ensure_open()
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("In-memory counter store closed");
            self.windows.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: u64 = 1_000_000_000;

    #[tokio::test]
    async fn test_counts_attempts_in_window() {
        let store = InMemoryCounterStore::new(WindowStrategy::Script);
        let spec = WindowSpec::default();
        let now = 100 * SECOND;

        for expected in 0..5 {
            let count = store.record_attempt("k", now, &spec).await.unwrap();
            assert_eq!(count, expected);
        }
    }

    #[tokio::test]
    async fn test_entries_leave_window() {
        let store = InMemoryCounterStore::new(WindowStrategy::Script);
        let spec = WindowSpec::default();
        let now = 100 * SECOND;

        for _ in 0..3 {
            store.record_attempt("k", now, &spec).await.unwrap();
        }
        // Still inside the window just before it ends
        let count = store
            .record_attempt("k", now + SECOND - 1, &spec)
            .await
            .unwrap();
        assert_eq!(count, 3);

        // The first three have expired; only the last one remains
        let count = store.record_attempt("k", now + SECOND, &spec).await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_key_ttl_drops_everything() {
        let store = InMemoryCounterStore::new(WindowStrategy::Script);
        let spec = WindowSpec::new(Duration::from_secs(120), Duration::from_secs(60));
        let now = 100 * SECOND;

        store.record_attempt("k", now, &spec).await.unwrap();
        let count = store
            .record_attempt("k", now + 61 * SECOND, &spec)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let store = InMemoryCounterStore::new(WindowStrategy::Script);
        let spec = WindowSpec::default();

        store.record_attempt("a", SECOND, &spec).await.unwrap();
        store.record_attempt("a", SECOND, &spec).await.unwrap();
        assert_eq!(store.record_attempt("b", SECOND, &spec).await.unwrap(), 0);
        assert_eq!(store.key_count(), 2);
    }

    #[tokio::test]
    async fn test_expired_keys_are_evicted() {
        let store = InMemoryCounterStore::new(WindowStrategy::Pipeline);
        let spec = WindowSpec::default();
        let now = 100 * SECOND;

        store.record_attempt("a", now, &spec).await.unwrap();
        store.record_attempt("b", now, &spec).await.unwrap();
        assert_eq!(store.key_count(), 2);

        // Within the TTL both keys survive even though their windows are empty
        store.record_attempt("b", now + 30 * SECOND, &spec).await.unwrap();
        assert_eq!(store.key_count(), 2);

        // "a" was last touched 60s ago; "b" only 30s ago
        store.record_attempt("c", now + 60 * SECOND, &spec).await.unwrap();
        assert_eq!(store.key_count(), 2);
        assert_eq!(store.record_attempt("a", now + 60 * SECOND, &spec).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let store = InMemoryCounterStore::new(WindowStrategy::Script);
        assert!(store.ping().await.is_ok());

        store.close();
        store.close();

        assert!(matches!(store.ping().await, Err(GateError::StoreClosed)));
        assert!(store
            .record_attempt("k", SECOND, &WindowSpec::default())
            .await
            .is_err());
    }

    #[test]
    fn test_unix_nanos_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(unix_nanos() > 1_577_836_800 * SECOND);
    }
}
