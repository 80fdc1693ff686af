// Copyright 2025 Conveyor Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Redis list queue.
//!
//! Producers append encoded records to a Redis list with `RPUSH`. The
//! pipeline drains the list with one `MULTI`/`EXEC` transaction:
//!
//! ```text
//! MULTI
//! LRANGE {queue} 0 -1
//! LTRIM  {queue} 1 0
//! EXEC
//! ```
//!
//! Both commands run atomically, so a record pushed concurrently is either
//! part of this drain or left for the next one, never lost.
//!
//! # Features
//!
//! - **Connection Pooling**: Uses `deadpool-redis`; each operation borrows a
//!   connection and returns it when done
//! - **Retry Logic**: Producer operations and `LLEN` retry transient failures
//!   with exponential backoff. Drains are never retried, since the trim may
//!   already have happened.
//!
//! # Example
//!
//! ```rust,no_run
//! use conveyor_core::queue::RecordQueue;
//! use conveyor_stores::redis::{RedisQueue, RedisQueueConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RedisQueueConfig::builder()
//!     .url("redis://localhost/8")
//!     .queue("items")
//!     .pool_size(4)
//!     .build()?;
//!
//! let queue = RedisQueue::new(config).await?;
//! let payloads = queue.drain_all().await?;
//! println!("drained {} records", payloads.len());
//!
//! queue.close().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use conveyor_core::error::{ConfigError, QueueError};
use conveyor_core::queue::RecordQueue;
use conveyor_core::record::Record;
use deadpool_redis::{Config as PoolConfig, Connection, Pool, Runtime};
use redis::{AsyncCommands, RedisError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Default Redis URL, database 8 of a local server.
pub const DEFAULT_URL: &str = "redis://localhost/8";

/// Default name of the list holding queued records.
pub const DEFAULT_QUEUE: &str = "items";

/// Default connection pool size.
const DEFAULT_POOL_SIZE: usize = 10;

/// Maximum number of retry attempts for transient Redis errors.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (milliseconds).
const BASE_RETRY_DELAY_MS: u64 = 100;

/// Configuration for [`RedisQueue`].
///
/// Use [`RedisQueueConfigBuilder`] to construct this configuration with
/// validation.
///
/// # Example
///
/// ```rust
/// use conveyor_stores::redis::RedisQueueConfig;
/// use std::time::Duration;
///
/// let config = RedisQueueConfig::builder()
///     .url("redis://:secret@queue.internal:6379/2")
///     .queue("perceval")
///     .connection_timeout(Duration::from_secs(2))
///     .build()
///     .expect("valid config");
///
/// assert_eq!(config.queue, "perceval");
/// ```
#[derive(Debug, Clone)]
pub struct RedisQueueConfig {
    /// Redis connection URL (default: `redis://localhost/8`)
    pub url: String,

    /// Name of the Redis list (default: `items`)
    pub queue: String,

    /// Connection pool size (default: 10)
    ///
    /// The pipeline holds at most one connection at a time; extra
    /// connections serve producers sharing the handle.
    pub pool_size: usize,

    /// Connection timeout (default: 5 seconds)
    pub connection_timeout: Duration,

    /// Maximum number of retries for transient errors (default: 3)
    pub max_retries: u32,
}

impl Default for RedisQueueConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            queue: DEFAULT_QUEUE.to_string(),
            pool_size: DEFAULT_POOL_SIZE,
            connection_timeout: Duration::from_secs(5),
            max_retries: MAX_RETRIES,
        }
    }
}

impl RedisQueueConfig {
    /// Creates a new builder for `RedisQueueConfig`.
    #[must_use]
    pub fn builder() -> RedisQueueConfigBuilder {
        RedisQueueConfigBuilder::new()
    }
}

/// Builder for [`RedisQueueConfig`] with validation.
#[derive(Debug, Default)]
pub struct RedisQueueConfigBuilder {
    url: Option<String>,
    queue: Option<String>,
    pool_size: Option<usize>,
    connection_timeout: Option<Duration>,
    max_retries: Option<u32>,
}

impl RedisQueueConfigBuilder {
    /// Creates a new `RedisQueueConfigBuilder`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the Redis connection URL.
    ///
    /// # Formats
    ///
    /// - Standalone: `redis://localhost:6379`
    /// - With auth: `redis://:password@localhost:6379`
    /// - With database: `redis://localhost:6379/8`
    /// - TLS: `rediss://localhost:6380`
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the name of the Redis list.
    #[must_use]
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Sets the connection pool size.
    #[must_use]
    pub const fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = Some(size);
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub const fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Sets the maximum number of retries for transient errors.
    #[must_use]
    pub const fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Builds the `RedisQueueConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if:
    /// - The URL is empty or not a `redis://`, `rediss://` or `unix://` URL
    /// - The queue name is empty
    /// - Pool size is 0
    pub fn build(self) -> Result<RedisQueueConfig, ConfigError> {
        let defaults = RedisQueueConfig::default();

        let url = self.url.unwrap_or(defaults.url);
        if !["redis://", "rediss://", "unix://"]
            .iter()
            .any(|scheme| url.starts_with(scheme))
        {
            return Err(ConfigError::new(
                "url",
                format!("'{url}' is not a redis://, rediss:// or unix:// URL"),
            ));
        }

        let queue = self.queue.unwrap_or(defaults.queue);
        if queue.is_empty() {
            return Err(ConfigError::new("queue", "queue name must not be empty"));
        }

        let pool_size = self.pool_size.unwrap_or(defaults.pool_size);
        if pool_size == 0 {
            return Err(ConfigError::new(
                "pool_size",
                "pool size must be greater than 0",
            ));
        }

        Ok(RedisQueueConfig {
            url,
            queue,
            pool_size,
            connection_timeout: self
                .connection_timeout
                .unwrap_or(defaults.connection_timeout),
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
        })
    }
}

/// A Redis list used as the record queue.
///
/// `RedisQueue` is `Send + Sync` and cheap to clone; clones share the
/// connection pool, so one handle can serve the pipeline and any number of
/// producers.
#[derive(Clone)]
pub struct RedisQueue {
    pool: Pool,
    config: RedisQueueConfig,
    closed: Arc<AtomicBool>,
}

impl RedisQueue {
    /// Connects to Redis and verifies the connection with `PING`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Connection`] if the pool cannot be created or
    /// the server does not answer.
    pub async fn new(config: RedisQueueConfig) -> Result<Self, QueueError> {
        debug!(queue = %config.queue, "Initializing Redis queue");

        let mut pool_config = PoolConfig::from_url(&config.url);
        if let Some(pool) = pool_config.pool.as_mut() {
            pool.max_size = config.pool_size;
            pool.timeouts.wait = Some(config.connection_timeout);
            pool.timeouts.create = Some(config.connection_timeout);
            pool.timeouts.recycle = Some(config.connection_timeout);
        }

        let pool = pool_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| {
                error!("Failed to create Redis connection pool: {}", e);
                QueueError::Connection {
                    message: format!("failed to create pool: {e}"),
                }
            })?;

        let mut conn = pool.get().await.map_err(|e| {
            error!("Failed to get connection from pool: {}", e);
            QueueError::Connection {
                message: format!("failed to connect to Redis: {e}"),
            }
        })?;

        redis::cmd("PING")
            .query_async::<()>(&mut *conn)
            .await
            .map_err(|e| {
                error!("Redis PING failed: {}", e);
                QueueError::Connection {
                    message: format!("Redis connection test failed: {e}"),
                }
            })?;

        debug!(queue = %config.queue, "Redis queue initialized");

        Ok(Self {
            pool,
            config,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &RedisQueueConfig {
        &self.config
    }

    /// Appends one record to the queue and returns the new queue length.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Serialization`] if the record cannot be encoded,
    /// or [`QueueError::Connection`] once retries are exhausted.
    pub async fn push(&self, record: &Record) -> Result<usize, QueueError> {
        self.push_records(std::slice::from_ref(record)).await
    }

    /// Appends records to the queue in one `RPUSH` and returns the new queue
    /// length. An empty slice is a no-op returning the current length.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Serialization`] if a record cannot be encoded,
    /// or [`QueueError::Connection`] once retries are exhausted.
    pub async fn push_records(&self, records: &[Record]) -> Result<usize, QueueError> {
        let payloads = records
            .iter()
            .map(|record| {
                record.to_vec().map_err(|e| QueueError::Serialization {
                    message: format!("failed to encode record: {e}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.push_payloads(payloads).await
    }

    /// Appends already encoded payloads to the queue.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Connection`] once retries are exhausted.
    pub async fn push_payloads(&self, payloads: Vec<Vec<u8>>) -> Result<usize, QueueError> {
        self.ensure_open()?;
        if payloads.is_empty() {
            return self.len().await;
        }

        let pool = self.pool.clone();
        let key = self.config.queue.as_str();
        let count = payloads.len();

        let length: usize = self
            .with_retry(|| async {
                let mut conn = Self::connection(&pool).await?;
                conn.rpush(key, &payloads).await
            })
            .await?;

        debug!(queue = key, pushed = count, length, "Records pushed");
        Ok(length)
    }

    async fn connection(pool: &Pool) -> Result<Connection, RedisError> {
        pool.get().await.map_err(|e| {
            RedisError::from((
                redis::ErrorKind::IoError,
                "Failed to get connection from pool",
                e.to_string(),
            ))
        })
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::Acquire) {
            Err(QueueError::Closed)
        } else {
            Ok(())
        }
    }

    /// Executes a Redis operation with retry logic for transient errors.
    async fn with_retry<F, T, Fut>(&self, operation: F) -> Result<T, QueueError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, RedisError>>,
    {
        let mut retries = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if Self::is_retryable(&e) && retries < self.config.max_retries => {
                    retries += 1;
                    let delay =
                        Duration::from_millis(BASE_RETRY_DELAY_MS * 2_u64.pow(retries - 1));
                    warn!(
                        "Redis operation failed (attempt {}/{}), retrying in {:?}: {}",
                        retries, self.config.max_retries, delay, e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!("Redis operation failed after {} retries: {}", retries, e);
                    return Err(QueueError::Connection {
                        message: format!("Redis operation failed: {e}"),
                    });
                }
            }
        }
    }

    /// Determines if a Redis error is retryable.
    fn is_retryable(error: &RedisError) -> bool {
        error.is_connection_dropped()
            || error.is_timeout()
            || matches!(
                error.kind(),
                redis::ErrorKind::IoError | redis::ErrorKind::TryAgain
            )
    }

    /// Whether a failed `EXEC` may have trimmed the list without the reply
    /// reaching us.
    fn may_have_trimmed(error: &RedisError) -> bool {
        error.is_io_error() || error.is_timeout() || error.is_connection_dropped()
    }
}

impl std::fmt::Debug for RedisQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisQueue")
            .field("config", &self.config)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RecordQueue for RedisQueue {
    async fn drain_all(&self) -> Result<Vec<Vec<u8>>, QueueError> {
        self.ensure_open()?;
        let key = self.config.queue.as_str();

        let mut conn = self.pool.get().await.map_err(|e| QueueError::Connection {
            message: format!("failed to get connection from pool: {e}"),
        })?;

        // only used to quantify a lost reply
        let queued: Option<usize> = conn.llen(key).await.ok();

        let drained: Result<(Vec<Vec<u8>>,), RedisError> = redis::pipe()
            .atomic()
            .lrange(key, 0, -1)
            .ltrim(key, 1, 0)
            .ignore()
            .query_async(&mut *conn)
            .await;

        match drained {
            Ok((payloads,)) => {
                if !payloads.is_empty() {
                    debug!(queue = key, records = payloads.len(), "Queue drained");
                }
                Ok(payloads)
            }
            Err(e) => {
                let records_at_risk = if Self::may_have_trimmed(&e) {
                    queued
                } else {
                    None
                };
                error!(queue = key, error = %e, ?records_at_risk, "Queue drain failed");
                Err(QueueError::Transaction {
                    message: e.to_string(),
                    records_at_risk,
                })
            }
        }
    }

    async fn len(&self) -> Result<usize, QueueError> {
        self.ensure_open()?;
        let pool = self.pool.clone();
        let key = self.config.queue.as_str();

        self.with_retry(|| async {
            let mut conn = Self::connection(&pool).await?;
            conn.llen(key).await
        })
        .await
    }

    async fn close(&self) -> Result<(), QueueError> {
        debug!(queue = %self.config.queue, "Closing Redis queue");
        self.closed.store(true, Ordering::Release);
        self.pool.close();
        Ok(())
    }
}
