//! KeyDB / Redis client pool creation and the `fred`-backed [`ListStore`].
//!
//! Builds a [`fred::clients::Pool`] for the target described by
//! [`crate::config::StoreTarget`] (single node or cluster), optionally
//! enabling TLS via `rustls`, and keeps retrying until the store answers
//! `PING`.

use std::time::Duration;

use anyhow::{Context, Result};
use fred::clients::Pool;
use fred::interfaces::{ClientLike, KeysInterface, ListInterface, LuaInterface};
use fred::types::config::{Config as FredConfig, ReconnectPolicy, ServerConfig, TlsConnector};
use fred::types::{Builder, Expiration, SetOptions};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::ListStore;
use crate::config::{ConnectConfig, StoreTarget};
use crate::error::ConnectError;

const POOL_SIZE: usize = 4;

/// Upper bound on one connect-and-PING attempt.
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Deletes `KEYS[1]` only while it still holds `ARGV[1]`.
const COMPARE_AND_DELETE: &str = r#"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    end
    return 0
"#;

/// [`ListStore`] over a `fred` connection pool.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    /// Wrap an already initialised pool.
    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Connect to `target`, retrying every `retry.retry_interval()` until a
    /// `PING` succeeds.
    ///
    /// With `retry.max_attempts` unset this only returns once the store is
    /// reachable or `cancel` fires.
    pub async fn connect(
        target: &StoreTarget,
        retry: &ConnectConfig,
        cancel: &CancellationToken,
    ) -> Result<Self, ConnectError> {
        target.validate().map_err(ConnectError::Config)?;
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let attempt = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ConnectError::Cancelled),
                res = connect_once(target) => res,
            };
            let err = match attempt {
                Ok(pool) => return Ok(Self { pool }),
                Err(e) => e,
            };
            if retry.max_attempts.is_some_and(|max| attempts >= max) {
                return Err(ConnectError::Exhausted {
                    attempts,
                    last: err,
                });
            }
            warn!(
                error = %format!("{err:#}"),
                attempts,
                retry_in = ?retry.retry_interval(),
                "KeyDB connection failed, retrying"
            );
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ConnectError::Cancelled),
                () = tokio::time::sleep(retry.retry_interval()) => {}
            }
        }
    }
}

/// Build a pool for `target`, connect it, and verify with a `PING`.
async fn connect_once(target: &StoreTarget) -> Result<Pool> {
    let mut fred_config = FredConfig {
        server: server_config(target)?,
        ..FredConfig::default()
    };

    if let StoreTarget::Single { db, .. } = target {
        if *db != 0 {
            fred_config.database = Some(*db);
        }
    }

    if target.tls() {
        fred_config.tls = Some(TlsConnector::default_rustls()?.into());
    }

    if let Some(password) = target.password() {
        fred_config.password = Some(password);
    }

    let mut builder = Builder::from_config(fred_config);
    // Exponential reconnect: initial 0ms, base 100ms, max 30s, factor 2.
    builder.set_policy(ReconnectPolicy::new_exponential(0, 100, 30_000, 2));

    let pool = builder
        .build_pool(POOL_SIZE)
        .context("failed to build KeyDB connection pool")?;

    let verified = match tokio::time::timeout(ATTEMPT_TIMEOUT, verify(&pool)).await {
        Ok(res) => res,
        Err(_) => Err(anyhow::anyhow!("KeyDB connect timed out after {ATTEMPT_TIMEOUT:?}")),
    };
    if let Err(e) = verified {
        let _ = pool.quit().await;
        return Err(e);
    }

    info!(
        tls = target.tls(),
        pool_size = POOL_SIZE,
        "KeyDB pool created and verified"
    );
    Ok(pool)
}

async fn verify(pool: &Pool) -> Result<()> {
    pool.init().await.context("failed to connect to KeyDB")?;
    let pong: String = pool.ping(None).await.context("KeyDB PING failed")?;
    anyhow::ensure!(
        pong.eq_ignore_ascii_case("pong"),
        "unexpected PING reply: {pong}"
    );
    Ok(())
}

fn server_config(target: &StoreTarget) -> Result<ServerConfig> {
    match target {
        StoreTarget::Single { endpoint, .. } => {
            let (host, port) = parse_host_port(bare_endpoint(endpoint))?;
            Ok(ServerConfig::new_centralized(host, port))
        }
        StoreTarget::Cluster { endpoints, .. } => {
            let hosts = endpoints
                .iter()
                .map(|e| parse_host_port(bare_endpoint(e)))
                .collect::<Result<Vec<_>>>()?;
            Ok(ServerConfig::new_clustered(hosts))
        }
    }
}

/// Drop a `redis://`/`rediss://` scheme and any `/db` suffix.
fn bare_endpoint(endpoint: &str) -> &str {
    let rest = endpoint
        .strip_prefix("rediss://")
        .or_else(|| endpoint.strip_prefix("redis://"))
        .unwrap_or(endpoint);
    rest.split_once('/').map_or(rest, |(authority, _)| authority)
}

/// Split `host[:port]`; the port defaults to 6379.
pub fn parse_host_port(authority: &str) -> Result<(&str, u16)> {
    match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .with_context(|| format!("invalid port in store endpoint {authority:?}"))?;
            Ok((host, port))
        }
        None => Ok((authority, 6379)),
    }
}

#[async_trait::async_trait]
impl ListStore for RedisStore {
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let ttl_secs = i64::try_from(ttl.as_secs().max(1))
            .with_context(|| format!("lock ttl {ttl:?} out of range"))?;
        // SET … NX returns "OK" when the key was set, nil otherwise.
        let result: Option<String> = self
            .pool
            .set(
                key,
                value,
                Some(Expiration::EX(ttl_secs)),
                Some(SetOptions::NX),
                false,
            )
            .await
            .context("SET NX EX")?;
        Ok(result.is_some())
    }

    async fn del(&self, key: &str) -> Result<u64> {
        let removed: u64 = self.pool.del(key).await.context("DEL")?;
        Ok(removed)
    }

    async fn del_if_eq(&self, key: &str, expected: &str) -> Result<bool> {
        let removed: i64 = self
            .pool
            .eval(
                COMPARE_AND_DELETE,
                vec![key.to_string()],
                vec![expected.to_string()],
            )
            .await
            .context("compare-and-delete script failed")?;
        Ok(removed == 1)
    }

    async fn llen(&self, key: &str) -> Result<u64> {
        let len: u64 = self.pool.llen(key).await.context("LLEN")?;
        Ok(len)
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<u64> {
        let len: u64 = self.pool.lpush(key, value).await.context("LPUSH")?;
        Ok(len)
    }

    async fn rpop(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = self.pool.rpop(key, None).await.context("RPOP")?;
        Ok(value)
    }

    async fn ping(&self) -> Result<()> {
        let _: String = self.pool.ping(None).await.context("PING")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_forms() {
        let cases = [
            ("keydb.local", ("keydb.local", 6379)),
            ("keydb.local:6380", ("keydb.local", 6380)),
            ("redis://10.0.0.5", ("10.0.0.5", 6379)),
            ("rediss://cache.internal:6390/2", ("cache.internal", 6390)),
        ];
        for (endpoint, expected) in cases {
            assert_eq!(
                parse_host_port(bare_endpoint(endpoint)).unwrap(),
                expected,
                "{endpoint}"
            );
        }
    }

    #[test]
    fn test_endpoint_with_bad_port_rejected() {
        assert!(parse_host_port(bare_endpoint("redis://keydb.local:notaport")).is_err());
        assert!(parse_host_port("keydb.local:70000").is_err());
    }

    #[test]
    fn test_server_config_rejects_bad_cluster_member() {
        let target = StoreTarget::cluster(["10.0.0.1:7000", "10.0.0.2:x"]);
        assert!(server_config(&target).is_err());
    }

    #[tokio::test]
    async fn test_connect_cancelled_before_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = RedisStore::connect(
            &StoreTarget::single("127.0.0.1:1"),
            &ConnectConfig::default(),
            &cancel,
        )
        .await;
        assert!(matches!(result, Err(ConnectError::Cancelled)));
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_target() {
        let cancel = CancellationToken::new();
        let result = RedisStore::connect(
            &StoreTarget::cluster(Vec::<String>::new()),
            &ConnectConfig::default(),
            &cancel,
        )
        .await;
        assert!(matches!(result, Err(ConnectError::Config(_))));
    }

    #[tokio::test]
    async fn test_connect_gives_up_after_max_attempts() {
        let retry = ConnectConfig {
            retry_interval_secs: 0,
            max_attempts: Some(2),
        };
        let result = RedisStore::connect(
            &StoreTarget::single("127.0.0.1:1"),
            &retry,
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(
            result,
            Err(ConnectError::Exhausted { attempts: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_connect_cancelled_while_waiting_to_retry() {
        let cancel = CancellationToken::new();
        tokio::spawn({
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                cancel.cancel();
            }
        });

        let start = std::time::Instant::now();
        let result = RedisStore::connect(
            &StoreTarget::single("127.0.0.1:1"),
            &ConnectConfig::default(),
            &cancel,
        )
        .await;
        assert!(matches!(result, Err(ConnectError::Cancelled)));
        // Well short of the 5s retry interval.
        assert!(start.elapsed() < Duration::from_secs(3));
    }
}
