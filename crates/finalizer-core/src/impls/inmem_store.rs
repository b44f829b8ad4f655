//! InMemorySessionStore - 開発用・テスト用の store
//!
//! # 実装詳細
//! - HashMap<String, Entry> を tokio Mutex で保護
//! - 有効期限は Clock で判定し、読み出し時に遅延削除
//! - scan はソート済みキーのオフセットをカーソルとして使う
//!
//! 同一プロセス内の複数 worker は同じインスタンスを共有することで、
//! Redis と同じ「共有 store」の振る舞いを再現できる。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{LeaseToken, Result};
use crate::ports::{Clock, KeyPattern, LeaseBackend, ScanPage, SessionStore, TtlPolicy};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

pub struct InMemorySessionStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    clock: Arc<dyn Clock>,
}

impl InMemorySessionStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    fn expiry(&self, now: DateTime<Utc>, ttl: Duration) -> Option<DateTime<Utc>> {
        chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
    }

    /// Number of live keys (for testing and diagnostics).
    pub async fn len(&self) -> usize {
        let now = self.clock.now();
        let entries = self.entries.lock().await;
        entries.values().filter(|entry| entry.is_live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop a key if it has expired, so the map does not grow with dead entries.
    fn evict_if_expired(entries: &mut HashMap<String, Entry>, key: &str, now: DateTime<Utc>) {
        if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
            entries.remove(key);
        }
    }

    fn write(
        &self,
        entries: &mut HashMap<String, Entry>,
        key: &str,
        value: &str,
        ttl: TtlPolicy,
        now: DateTime<Utc>,
    ) {
        let expires_at = match ttl {
            TtlPolicy::ExpireIn(ttl) => self.expiry(now, ttl),
            TtlPolicy::KeepExisting => entries.get(key).and_then(|entry| entry.expires_at),
        };
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        Self::evict_if_expired(&mut entries, key, now);
        Ok(entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: TtlPolicy) -> Result<()> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        Self::evict_if_expired(&mut entries, key, now);
        self.write(&mut entries, key, value, ttl, now);
        Ok(())
    }

    async fn replace_if_unchanged(
        &self,
        key: &str,
        expected: &str,
        value: &str,
        ttl: TtlPolicy,
    ) -> Result<bool> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        Self::evict_if_expired(&mut entries, key, now);
        if entries.get(key).map(|entry| entry.value.as_str()) != Some(expected) {
            return Ok(false);
        }
        self.write(&mut entries, key, value, ttl, now);
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        Self::evict_if_expired(&mut entries, key, now);
        Ok(entries.remove(key).is_some())
    }

    async fn scan(&self, pattern: &KeyPattern, cursor: u64, count: usize) -> Result<ScanPage> {
        let now = self.clock.now();
        let entries = self.entries.lock().await;
        let mut keys: Vec<&String> = entries
            .iter()
            .filter(|(key, entry)| pattern.matches(key) && entry.is_live(now))
            .map(|(key, _)| key)
            .collect();
        keys.sort();

        let start = usize::try_from(cursor).unwrap_or(usize::MAX).min(keys.len());
        let end = start.saturating_add(count.max(1)).min(keys.len());
        let page = keys[start..end].iter().map(|key| (*key).clone()).collect();
        let next = if end >= keys.len() { 0 } else { end as u64 };

        Ok(ScanPage {
            cursor: next,
            keys: page,
        })
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let now = self.clock.now();
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .and_then(|entry| entry.expires_at)
            .and_then(|at| (at - now).to_std().ok()))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl LeaseBackend for InMemorySessionStore {
    async fn try_claim(&self, key: &str, token: LeaseToken, lease: Duration) -> Result<bool> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        Self::evict_if_expired(&mut entries, key, now);
        if entries.contains_key(key) {
            return Ok(false);
        }
        self.write(
            &mut entries,
            key,
            &token.to_string(),
            TtlPolicy::ExpireIn(lease),
            now,
        );
        Ok(true)
    }

    async fn extend(&self, key: &str, token: LeaseToken, lease: Duration) -> Result<bool> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        Self::evict_if_expired(&mut entries, key, now);
        let expires_at = self.expiry(now, lease);
        match entries.get_mut(key) {
            Some(entry) if entry.value == token.to_string() => {
                entry.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, key: &str, token: LeaseToken) -> Result<bool> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        Self::evict_if_expired(&mut entries, key, now);
        let owned = entries
            .get(key)
            .is_some_and(|entry| entry.value == token.to_string());
        if owned {
            entries.remove(key);
        }
        Ok(owned)
    }
}
