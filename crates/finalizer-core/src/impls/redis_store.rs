//! RedisSessionStore - 本番用の共有 store
//!
//! # 実装詳細
//! - 接続は ConnectionManager（切断時は自動で再接続）を呼び出しごとに clone
//! - KeepExisting は `SET ... KEEPTTL`（Redis 6.0 以降）
//! - 全コマンドに応答タイムアウト（止まった Redis で lease 内の処理が固まらない）
//! - replace_if_unchanged / extend / release は Lua script で原子的に比較してから書く
//! - scan は `SCAN cursor MATCH prefix* COUNT n`
//!
//! 起動時の接続失敗（PING が通らない）だけは StoreUnavailable として返し、
//! 呼び出し側はプロセスを止める。

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{Client, Script};
use tracing::info;

use crate::config::StoreConfig;
use crate::domain::{FinalizerError, LeaseToken, Result};
use crate::ports::{KeyPattern, LeaseBackend, ScanPage, SessionStore, TtlPolicy};

const KEEP_TTL: &str = "keep";

/// KEYS[1] = key, ARGV[1] = expected, ARGV[2] = new value, ARGV[3] = px ms or "keep"
const REPLACE_IF_UNCHANGED: &str = r#"
local current = redis.call('GET', KEYS[1])
if current ~= ARGV[1] then
  return 0
end
if ARGV[3] == 'keep' then
  redis.call('SET', KEYS[1], ARGV[2], 'KEEPTTL')
else
  redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
end
return 1
"#;

/// KEYS[1] = lock key, ARGV[1] = token, ARGV[2] = px ms
const EXTEND_IF_OWNED: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

/// KEYS[1] = lock key, ARGV[1] = token
const RELEASE_IF_OWNED: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

#[derive(Clone)]
pub struct RedisSessionStore {
    conn: ConnectionManager,
    replace_script: Script,
    extend_script: Script,
    release_script: Script,
}

impl RedisSessionStore {
    /// Connect and verify the store answers `PING` within the connect timeout.
    ///
    /// Every later command fails with a store error once `op_timeout` passes
    /// without a reply.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let url = config.connection_url()?;
        let client = Client::open(url.as_str())
            .map_err(|e| FinalizerError::StoreUnavailable(e.to_string()))?;
        let manager_config = ConnectionManagerConfig::new()
            .set_connection_timeout(config.connect_timeout())
            .set_response_timeout(config.op_timeout());

        let connect_timeout = config.connect_timeout();
        let conn = tokio::time::timeout(
            connect_timeout,
            ConnectionManager::new_with_config(client, manager_config),
        )
        .await
        .map_err(|_| {
            FinalizerError::StoreUnavailable(format!(
                "no connection within {} ms",
                connect_timeout.as_millis()
            ))
        })?
        .map_err(|e| FinalizerError::StoreUnavailable(e.to_string()))?;

        let store = Self {
            conn,
            replace_script: Script::new(REPLACE_IF_UNCHANGED),
            extend_script: Script::new(EXTEND_IF_OWNED),
            release_script: Script::new(RELEASE_IF_OWNED),
        };
        store
            .ping()
            .await
            .map_err(|e| FinalizerError::StoreUnavailable(e.to_string()))?;

        info!(
            host = url.host_str().unwrap_or_default(),
            port = url.port().unwrap_or_default(),
            "connected to session store"
        );
        Ok(store)
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// `PTTL` replies -2 for a missing key and -1 for one without expiry.
fn pttl_to_duration(pttl: i64) -> Option<Duration> {
    u64::try_from(pttl).ok().map(Duration::from_millis)
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| FinalizerError::store("get", e))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: TtlPolicy) -> Result<()> {
        let mut conn = self.conn();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        match ttl {
            TtlPolicy::ExpireIn(ttl) => cmd.arg("PX").arg(millis(ttl)),
            TtlPolicy::KeepExisting => cmd.arg("KEEPTTL"),
        };
        let _: () = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| FinalizerError::store("set", e))?;
        Ok(())
    }

    async fn replace_if_unchanged(
        &self,
        key: &str,
        expected: &str,
        value: &str,
        ttl: TtlPolicy,
    ) -> Result<bool> {
        let mut conn = self.conn();
        let ttl_arg = match ttl {
            TtlPolicy::ExpireIn(ttl) => millis(ttl).to_string(),
            TtlPolicy::KeepExisting => KEEP_TTL.to_string(),
        };
        let replaced: i64 = self
            .replace_script
            .key(key)
            .arg(expected)
            .arg(value)
            .arg(ttl_arg)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| FinalizerError::store("replace_if_unchanged", e))?;
        Ok(replaced == 1)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn();
        let removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| FinalizerError::store("delete", e))?;
        Ok(removed > 0)
    }

    async fn scan(&self, pattern: &KeyPattern, cursor: u64, count: usize) -> Result<ScanPage> {
        let mut conn = self.conn();
        let (cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern.as_glob())
            .arg("COUNT")
            .arg(count.max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| FinalizerError::store("scan", e))?;
        Ok(ScanPage { cursor, keys })
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.conn();
        let pttl: i64 = redis::cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| FinalizerError::store("ttl", e))?;
        Ok(pttl_to_duration(pttl))
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| FinalizerError::store("ping", e))?;
        Ok(())
    }
}

#[async_trait]
impl LeaseBackend for RedisSessionStore {
    async fn try_claim(&self, key: &str, token: LeaseToken, lease: Duration) -> Result<bool> {
        let mut conn = self.conn();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token.to_string())
            .arg("NX")
            .arg("PX")
            .arg(millis(lease))
            .query_async(&mut conn)
            .await
            .map_err(|e| FinalizerError::store("try_claim", e))?;
        Ok(reply.is_some())
    }

    async fn extend(&self, key: &str, token: LeaseToken, lease: Duration) -> Result<bool> {
        let mut conn = self.conn();
        let extended: i64 = self
            .extend_script
            .key(key)
            .arg(token.to_string())
            .arg(millis(lease))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| FinalizerError::store("extend", e))?;
        Ok(extended == 1)
    }

    async fn release(&self, key: &str, token: LeaseToken) -> Result<bool> {
        let mut conn = self.conn();
        let removed: i64 = self
            .release_script
            .key(key)
            .arg(token.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| FinalizerError::store("release", e))?;
        Ok(removed > 0)
    }
}
