use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::ListStore;
use crate::config::LockFencing;
use crate::metrics::Metrics;

/// Value stored under the lock key when fencing is disabled.
const SENTINEL: &str = "1";

/// Proof of a successful [`DistributedLock::acquire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockGuard {
    pub key: String,
    /// The value written to the lock key.
    pub token: String,
}

/// A mutex shared by every process talking to the same store, scoped to one
/// key.
///
/// The lock is not reentrant: acquiring it again while holding it spins
/// until the key expires.
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn ListStore>,
    key: String,
    ttl: Duration,
    retry_interval: Duration,
    fencing: LockFencing,
    holder_id: String,
    metrics: Option<Arc<Metrics>>,
}

impl DistributedLock {
    pub fn new(
        store: Arc<dyn ListStore>,
        key: impl Into<String>,
        ttl: Duration,
        retry_interval: Duration,
        fencing: LockFencing,
    ) -> Self {
        Self {
            store,
            key: key.into(),
            ttl,
            retry_interval,
            fencing,
            holder_id: holder_id(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Block until the lock is ours.
    ///
    /// Attempts `SET key value NX EX ttl`; when the key is held (or the store
    /// errors) sleeps `retry_interval` and tries again, forever.  There is no
    /// timeout and no way to cancel a waiting caller.
    pub async fn acquire(&self) -> LockGuard {
        let token = self.next_token();
        loop {
            match self.store.set_nx_ex(&self.key, &token, self.ttl).await {
                Ok(true) => {
                    debug!(key = %self.key, %token, "lock acquired");
                    if let Some(metrics) = &self.metrics {
                        metrics.lock_acquisitions.inc();
                    }
                    return LockGuard {
                        key: self.key.clone(),
                        token,
                    };
                }
                Ok(false) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.lock_waits.inc();
                    }
                }
                Err(e) => {
                    warn!(key = %self.key, error = %e, "lock attempt failed, retrying");
                }
            }
            tokio::time::sleep(self.retry_interval).await;
        }
    }

    /// Single non-blocking attempt.  Returns `None` if the lock is held.
    pub async fn try_acquire(&self) -> Result<Option<LockGuard>> {
        let token = self.next_token();
        let acquired = self
            .store
            .set_nx_ex(&self.key, &token, self.ttl)
            .await
            .context("lock SET NX")?;
        debug!(key = %self.key, acquired, "try_acquire");
        Ok(acquired.then(|| LockGuard {
            key: self.key.clone(),
            token,
        }))
    }

    /// Release a lock obtained from [`acquire`](Self::acquire).
    ///
    /// Without fencing this is a plain `DEL`: if our lock already expired and
    /// someone else took it, their lock is the one deleted.  With
    /// [`LockFencing::Token`] the key is removed only while it still holds
    /// our token.
    pub async fn release(&self, guard: &LockGuard) -> Result<()> {
        match self.fencing {
            LockFencing::None => {
                let removed = self.store.del(&guard.key).await.context("lock DEL")?;
                if removed == 0 {
                    warn!(key = %guard.key, "lock release: key already gone (expired?)");
                } else {
                    debug!(key = %guard.key, "lock released");
                }
            }
            LockFencing::Token => {
                let released = self
                    .store
                    .del_if_eq(&guard.key, &guard.token)
                    .await
                    .context("lock compare-and-delete")?;
                if released {
                    debug!(key = %guard.key, token = %guard.token, "lock released");
                } else {
                    warn!(
                        key = %guard.key,
                        token = %guard.token,
                        "lock release: key missing or owned by another holder"
                    );
                }
            }
        }
        Ok(())
    }

    fn next_token(&self) -> String {
        match self.fencing {
            LockFencing::None => SENTINEL.to_string(),
            LockFencing::Token => format!("{}:{}", self.holder_id, uuid::Uuid::new_v4()),
        }
    }
}

/// Identify this process in fencing tokens: `<hostname>-<pid>`.
pub fn holder_id() -> String {
    let hostname = gethostname::gethostname().to_string_lossy().into_owned();
    format!("{hostname}-{}", std::process::id())
}
