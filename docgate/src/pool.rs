//! Store connection pool
//!
//! Connections are created through a [`StoreConnector`], checked with a ping
//! before reuse, and returned to the pool when the checked-out [`PooledStore`]
//! is dropped.

use deadpool::managed::{self, Metrics, Object, PoolError, RecycleError, RecycleResult};
use deadpool::Runtime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::StoreConfig;
use crate::error::{Error, Result, StoreError, StoreErrorKind, StoreOperation, StoreResult};
use crate::store::{DocumentStore, StoreConnector};

/// deadpool manager producing store connections
pub struct StoreManager<C: StoreConnector> {
    connector: C,
    config: Arc<StoreConfig>,
}

impl<C: StoreConnector> StoreManager<C> {
    pub fn new(connector: C, config: Arc<StoreConfig>) -> Self {
        Self { connector, config }
    }
}

impl<C: StoreConnector> fmt::Debug for StoreManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreManager")
            .field("uri", &self.config.redacted_uri())
            .finish_non_exhaustive()
    }
}

impl<C: StoreConnector> managed::Manager for StoreManager<C> {
    type Type = C::Store;
    type Error = StoreError;

    async fn create(&self) -> StoreResult<C::Store> {
        self.connector.connect(&self.config).await
    }

    async fn recycle(&self, store: &mut C::Store, _metrics: &Metrics) -> RecycleResult<StoreError> {
        store.ping().await.map_err(RecycleError::Backend)
    }
}

/// Pool of store connections
pub type StorePool<C> = managed::Pool<StoreManager<C>>;

/// A connection checked out of the pool; returned on drop
pub type PooledStore<C> = Object<StoreManager<C>>;

/// Build a pool without opening any connection
pub fn build_pool<C: StoreConnector>(connector: C, config: Arc<StoreConfig>) -> Result<StorePool<C>> {
    let max_size = config.max_connections.max(1);
    let acquire_timeout = config.acquire_timeout();
    let connect_timeout = config.connect_timeout();

    managed::Pool::builder(StoreManager::new(connector, config))
        .max_size(max_size)
        .wait_timeout(Some(acquire_timeout))
        .create_timeout(Some(connect_timeout))
        .recycle_timeout(Some(connect_timeout))
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| Error::Pool(format!("Failed to build store pool: {}", e)))
}

/// Create the store pool
///
/// With `lazy_init` the pool is returned immediately and connections open on
/// first use. Otherwise one connection is opened up front, retrying with
/// exponential backoff up to `max_retries` times.
pub async fn create_pool<C: StoreConnector>(connector: C, config: Arc<StoreConfig>) -> Result<StorePool<C>> {
    let pool = build_pool(connector, config.clone())?;

    if config.lazy_init {
        tracing::info!(
            uri = %config.redacted_uri(),
            max_connections = config.max_connections,
            "Store pool created (lazy)"
        );
        return Ok(pool);
    }

    create_pool_with_retries(pool, &config, config.max_retries).await
}

/// Verify the pool can open a connection, retrying with exponential backoff
async fn create_pool_with_retries<C: StoreConnector>(
    pool: StorePool<C>,
    config: &StoreConfig,
    max_retries: u32,
) -> Result<StorePool<C>> {
    let mut attempt = 0;
    let base_delay = Duration::from_secs(config.retry_delay_secs);

    loop {
        match checkout(&pool).await {
            Ok(conn) => {
                drop(conn);
                if attempt > 0 {
                    tracing::info!(
                        "Store connection established after {} attempt(s)",
                        attempt + 1
                    );
                } else {
                    tracing::info!(
                        "Store connection pool created: max_connections={}",
                        config.max_connections
                    );
                }
                return Ok(pool);
            }
            Err(e) => {
                attempt += 1;

                if attempt > max_retries || !e.is_retriable() {
                    tracing::error!(
                        "Failed to connect to store at {} after {} attempt(s): {}",
                        config.redacted_uri(),
                        attempt,
                        e
                    );
                    return Err(e.into());
                }

                let delay = retry_delay(base_delay, attempt);

                tracing::warn!(
                    "Store connection attempt {} failed: {}. Retrying in {:?}...",
                    attempt,
                    e,
                    delay
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Longest wait between two connection attempts
const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

/// Backoff before retry `attempt` (1-based): `base * 2^(attempt - 1)`, capped
fn retry_delay(base: Duration, attempt: u32) -> Duration {
    2_u32
        .checked_pow(attempt.saturating_sub(1))
        .and_then(|multiplier| base.checked_mul(multiplier))
        .unwrap_or(MAX_RETRY_DELAY)
        .min(MAX_RETRY_DELAY)
}

/// Check a connection out of the pool
pub async fn checkout<C: StoreConnector>(pool: &StorePool<C>) -> StoreResult<PooledStore<C>> {
    pool.get().await.map_err(map_pool_error)
}

fn map_pool_error(err: PoolError<StoreError>) -> StoreError {
    match err {
        PoolError::Backend(e) => e,
        PoolError::Timeout(kind) => StoreError::pool_exhausted(format!(
            "Timed out waiting for a store connection ({:?})",
            kind
        )),
        PoolError::Closed => StoreError::new(
            StoreOperation::PoolAcquire,
            StoreErrorKind::ConnectionFailed,
            "Store pool is closed",
        ),
        other => StoreError::new(
            StoreOperation::PoolAcquire,
            StoreErrorKind::ConnectionFailed,
            other.to_string(),
        ),
    }
}

/// Store pool health metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorePoolHealth {
    /// Connections currently open
    pub size: usize,

    /// Idle connections ready for checkout
    pub available: usize,

    /// Requests waiting for a connection
    pub waiting: usize,

    /// Maximum pool size configured
    pub max_size: usize,

    /// Whether the pool can still hand out connections
    pub healthy: bool,

    /// Pool utilization percentage (0-100)
    pub utilization_percent: f32,
}

impl StorePoolHealth {
    /// Create health metrics from a store pool
    pub fn from_pool<C: StoreConnector>(pool: &StorePool<C>) -> Self {
        let status = pool.status();
        let in_use = status.size.saturating_sub(status.available);

        let utilization_percent = if status.max_size > 0 {
            ((in_use as f32 / status.max_size as f32) * 100.0).min(100.0)
        } else {
            0.0
        };

        // Pool is healthy while it is open and not saturated with waiters
        let healthy = !pool.is_closed() && (in_use < status.max_size || status.waiting == 0);

        Self {
            size: status.size,
            available: status.available,
            waiting: status.waiting,
            max_size: status.max_size,
            healthy,
            utilization_percent,
        }
    }
}
