use super::lua_scripts::SLIDING_WINDOW_SCRIPT;
use super::store::{nanos, CounterStore};
use super::types::{WindowSpec, WindowStrategy};
use crate::error::{GateError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use redis::{aio::ConnectionManager, Script};
use tracing::{debug, info};
use uuid::Uuid;

/// Connection attempts after the first one; the gate does not start without Redis
const CONNECT_RETRIES: usize = 0;

/// Redis-backed counter store shared by every gate instance
pub struct RedisCounterStore {
    /// Redis connection manager, `None` once closed
    connection: RwLock<Option<ConnectionManager>>,
    /// How the window steps are sent
    strategy: WindowStrategy,
    /// Atomic prune/count/add script
    script: Script,
}

impl RedisCounterStore {
    /// Connect to Redis and verify the connection with a PING
    ///
    /// The connection is attempted once (`CONNECT_RETRIES` is zero) and a
    /// failure is returned to the caller.
    pub async fn connect(redis_url: &str, strategy: WindowStrategy) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let connection =
            ConnectionManager::new_with_backoff(client, 2, 100, CONNECT_RETRIES).await?;

        let store = Self {
            connection: RwLock::new(Some(connection)),
            strategy,
            script: Script::new(SLIDING_WINDOW_SCRIPT),
        };
        store.ping().await?;

        info!(strategy = ?strategy, "Connected to Redis counter store");
        Ok(store)
    }

    fn connection(&self) -> Result<ConnectionManager> {
        self.connection.read().clone().ok_or(GateError::StoreClosed)
    }

    async fn record_with_script(
        &self,
        connection: &mut ConnectionManager,
        key: &str,
        now_nanos: u64,
        expires_at: u64,
        ttl_ms: u64,
        member: &str,
    ) -> Result<u64> {
        let count = self
            .script
            .key(key)
            .arg(now_nanos)
            .arg(expires_at)
            .arg(ttl_ms)
            .arg(member)
            .invoke_async::<_, u64>(connection)
            .await?;
        Ok(count)
    }

    async fn record_with_pipeline(
        &self,
        connection: &mut ConnectionManager,
        key: &str,
        now_nanos: u64,
        expires_at: u64,
        ttl_ms: u64,
        member: &str,
    ) -> Result<u64> {
        // Not transactional: other gates may run their steps between ours
        let (count,): (u64,) = redis::pipe()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(now_nanos)
            .ignore()
            .cmd("ZCARD")
            .arg(key)
            .cmd("ZADD")
            .arg(key)
            .arg(expires_at)
            .arg(member)
            .ignore()
            .cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_ms)
            .ignore()
            .query_async(connection)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn record_attempt(&self, key: &str, now_nanos: u64, spec: &WindowSpec) -> Result<u64> {
        let mut connection = self.connection()?;

        let expires_at = now_nanos + nanos(spec.window);
        let ttl_ms = spec.key_ttl.as_millis() as u64;
        let member = format!("{}-{}", now_nanos, Uuid::new_v4());

        let count = match self.strategy {
            WindowStrategy::Script => {
                self.record_with_script(&mut connection, key, now_nanos, expires_at, ttl_ms, &member)
                    .await?
            }
            WindowStrategy::Pipeline => {
                self.record_with_pipeline(&mut connection, key, now_nanos, expires_at, ttl_ms, &member)
                    .await?
            }
        };

        debug!(key = %key, count = count, "Recorded window attempt");
        Ok(count)
    }

    async fn ping(&self) -> Result<()> {
        let mut connection = self.connection()?;
        redis::cmd("PING")
            .query_async::<_, ()>(&mut connection)
            .await?;
        Ok(())
    }

    fn close(&self) {
        if self.connection.write().take().is_some() {
            info!("Redis counter store closed");
        }
    }
}
