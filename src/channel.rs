//! Bounded FIFO channel over a shared list key.
//!
//! `push` inserts at the head of the list (`LPUSH`) and `pop` removes from
//! the tail (`RPOP`), so values come out in the order they went in.  Every
//! mutation runs under the channel's [`DistributedLock`], which is what keeps
//! the length check and the insert of one push from interleaving with
//! another writer.  `len` skips the lock and is advisory only.

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{ChannelConfig, Config};
use crate::coordination::locks::DistributedLock;
use crate::coordination::redis::RedisStore;
use crate::coordination::ListStore;
use crate::error::{ChannelError, ChannelResult, ConnectError};
use crate::metrics::Metrics;

#[derive(Clone)]
pub struct Channel {
    store: Arc<dyn ListStore>,
    lock: DistributedLock,
    config: Arc<ChannelConfig>,
    metrics: Option<Arc<Metrics>>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Channel {
    /// Build a channel on top of an existing store.
    pub fn new(store: Arc<dyn ListStore>, config: ChannelConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let lock = DistributedLock::new(
            Arc::clone(&store),
            config.lock_key.clone(),
            config.lock_ttl(),
            config.lock_retry_interval(),
            config.lock_fencing,
        );
        Ok(Self {
            store,
            lock,
            config: Arc::new(config),
            metrics: None,
        })
    }

    /// Connect to the store named in `config` and build a channel on it.
    ///
    /// Blocks until the store answers `PING`; see [`RedisStore::connect`]
    /// for the retry and cancellation rules.
    pub async fn connect(config: &Config, cancel: &CancellationToken) -> Result<Self, ConnectError> {
        config.channel.validate().map_err(ConnectError::Config)?;
        let store = RedisStore::connect(&config.store, &config.connect, cancel).await?;
        Self::new(Arc::new(store), config.channel.clone()).map_err(ConnectError::Config)
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.lock = self.lock.with_metrics(Arc::clone(&metrics));
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Serialize `value` as JSON and push it.  See [`push_raw`](Self::push_raw).
    pub async fn push<T>(&self, value: &T) -> ChannelResult<u64>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_string(value)?;
        self.push_raw(payload).await
    }

    /// Append `payload` to the channel and return the new length.
    ///
    /// Fails with [`ChannelError::Full`] when a maximum length is configured
    /// and already reached; nothing is retried.  The length check and the
    /// insert share one timeout window.
    pub async fn push_raw(&self, payload: impl AsRef<str>) -> ChannelResult<u64> {
        let payload = payload.as_ref();
        let key = self.config.channel_key.as_str();
        let max_len = self.config.max_len;

        let result = self
            .with_lock(self.bounded(async {
                let len = self.store.llen(key).await?;
                if max_len > 0 && len >= max_len {
                    return Err(ChannelError::Full { len, max_len });
                }
                Ok::<_, ChannelError>(self.store.lpush(key, payload).await?)
            }))
            .await;

        match &result {
            Ok(len) => {
                debug!(%key, len, "pushed");
                self.record(|m| {
                    m.push_total.inc();
                });
            }
            Err(ChannelError::Full { len, max_len }) => {
                debug!(%key, len, max_len, "push rejected, channel full");
                self.record(|m| {
                    m.push_rejected.inc();
                });
            }
            Err(_) => {}
        }
        result
    }

    /// Pop the oldest value and decode it from JSON.
    pub async fn pop<T: DeserializeOwned>(&self) -> ChannelResult<Option<T>> {
        match self.pop_raw().await? {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    /// Remove and return the oldest value, or `None` if the channel is empty.
    ///
    /// Whenever no value comes back (empty channel or failed call) this
    /// sleeps `empty_pop_delay` after releasing the lock, which throttles
    /// callers polling in a tight loop.
    pub async fn pop_raw(&self) -> ChannelResult<Option<String>> {
        let key = self.config.channel_key.as_str();
        let result = self
            .with_lock(self.bounded(async {
                Ok::<_, ChannelError>(self.store.rpop(key).await?)
            }))
            .await;

        match &result {
            Ok(Some(_)) => {
                debug!(%key, "popped");
                self.record(|m| {
                    m.pop_total.inc();
                });
            }
            Ok(None) => {
                self.record(|m| {
                    m.pop_empty.inc();
                });
            }
            Err(_) => {}
        }
        if !matches!(result, Ok(Some(_))) {
            tokio::time::sleep(self.config.empty_pop_delay()).await;
        }
        result
    }

    /// Current length of the channel.
    ///
    /// Does not take the lock, so the answer may already be stale when it
    /// arrives.  Use it for monitoring, not for decisions.
    pub async fn len(&self) -> ChannelResult<u64> {
        let key = self.config.channel_key.as_str();
        self.bounded(async { Ok::<_, ChannelError>(self.store.llen(key).await?) })
            .await
    }

    /// Delete the whole channel.  Returns the number of keys removed (0 or 1).
    pub async fn clear(&self) -> ChannelResult<u64> {
        let key = self.config.channel_key.as_str();
        let removed = self
            .with_lock(self.bounded(async {
                Ok::<_, ChannelError>(self.store.del(key).await?)
            }))
            .await?;
        debug!(%key, removed, "cleared");
        Ok(removed)
    }

    /// Round-trip a `PING` to the store under the per-operation timeout.
    pub async fn ping(&self) -> ChannelResult<()> {
        self.bounded(async { Ok::<_, ChannelError>(self.store.ping().await?) })
            .await
    }

    /// Run `op` while holding the channel lock.
    ///
    /// A failed release is logged and never replaces the result of `op`.
    /// Dropping the returned future mid-operation leaves the lock to expire.
    async fn with_lock<T, F>(&self, op: F) -> ChannelResult<T>
    where
        F: Future<Output = ChannelResult<T>>,
    {
        let guard = self.lock.acquire().await;
        let result = op.await;
        if let Err(e) = self.lock.release(&guard).await {
            warn!(key = %guard.key, error = %format!("{e:#}"), "failed to release channel lock");
        }
        result
    }

    /// Apply the per-operation timeout to `op`.
    async fn bounded<T, F>(&self, op: F) -> ChannelResult<T>
    where
        F: Future<Output = ChannelResult<T>>,
    {
        let timeout = self.config.timeout();
        match tokio::time::timeout(timeout, op).await {
            Ok(result) => result,
            Err(_) => {
                warn!(key = %self.config.channel_key, ?timeout, "channel operation timed out");
                self.record(|m| {
                    m.timeouts.inc();
                });
                Err(ChannelError::Timeout(timeout))
            }
        }
    }

    fn record(&self, f: impl FnOnce(&Metrics)) {
        if let Some(metrics) = &self.metrics {
            f(metrics);
        }
    }
}
