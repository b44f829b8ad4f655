//! SessionStore port - 共有 key/value store（Redis または InMemory）
//!
//! Session record・ユーザー索引・ロックエントリはすべて同じ store に置かれ、
//! serving layer と全 worker プロセスから共有されます。
//!
//! # 設計原則
//! - 値は生の JSON 文字列のまま扱う（decode は呼び出し側）
//! - scan はカーソルでページングする（全件走査で store を止めない）
//! - 接続断などの失敗はこの層で握りつぶさずに返す

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{FinalizerError, Result, SessionId, SessionRecord, UserId};

/// Expiry handling for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlPolicy {
    /// Set the expiry to this duration from now.
    ExpireIn(Duration),
    /// Leave whatever expiry the key already has.
    KeepExisting,
}

/// One page of a cursor scan. A returned cursor of `0` ends the walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    pub cursor: u64,
    pub keys: Vec<String>,
}

impl ScanPage {
    pub fn is_last(&self) -> bool {
        self.cursor == 0
    }
}

/// Keys sharing a literal prefix, e.g. every `slot_ptr_*` session record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPattern {
    prefix: String,
}

impl KeyPattern {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn as_prefix(&self) -> &str {
        &self.prefix
    }

    /// Redis `MATCH` glob with the prefix's special characters escaped.
    pub fn as_glob(&self) -> String {
        let mut glob = String::with_capacity(self.prefix.len() + 1);
        for c in self.prefix.chars() {
            if matches!(c, '*' | '?' | '[' | ']' | '\\') {
                glob.push('\\');
            }
            glob.push(c);
        }
        glob.push('*');
        glob
    }

    pub fn matches(&self, key: &str) -> bool {
        key.starts_with(&self.prefix)
    }

    pub fn key_for(&self, id: &SessionId) -> String {
        format!("{}{}", self.prefix, id)
    }

    pub fn session_id(&self, key: &str) -> Option<SessionId> {
        key.strip_prefix(&self.prefix).map(SessionId::new)
    }
}

/// SessionStore は期限付き key/value store
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: TtlPolicy) -> Result<()>;

    /// Write `value` only if the key currently holds exactly `expected`.
    /// Returns whether the write happened.
    async fn replace_if_unchanged(
        &self,
        key: &str,
        expected: &str,
        value: &str,
        ttl: TtlPolicy,
    ) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<bool>;

    /// One page of keys matching `pattern`, starting at `cursor` (0 to begin).
    /// `count` is a batch-size hint.
    async fn scan(&self, pattern: &KeyPattern, cursor: u64, count: usize) -> Result<ScanPage>;

    /// Remaining time to live, `None` when absent or persistent.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    async fn ping(&self) -> Result<()>;
}

/// A decoded record together with the exact value it was decoded from.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedSession {
    pub raw: String,
    pub record: SessionRecord,
}

/// Read and decode one session record.
///
/// `Ok(None)` when the key is gone; `MalformedRecord` when it does not decode.
pub async fn load_session(store: &dyn SessionStore, key: &str) -> Result<Option<LoadedSession>> {
    let Some(raw) = store.get(key).await? else {
        return Ok(None);
    };
    let record = SessionRecord::from_json(&raw).map_err(|source| FinalizerError::MalformedRecord {
        key: key.to_string(),
        source,
    })?;
    Ok(Some(LoadedSession { raw, record }))
}

/// Write a session record with a fresh expiry, as the serving layer does when
/// a session starts.
pub async fn save_session(
    store: &dyn SessionStore,
    sessions: &KeyPattern,
    record: &SessionRecord,
    ttl: Duration,
) -> Result<()> {
    let key = sessions.key_for(&record.session_id);
    let raw = record.to_json().map_err(|source| FinalizerError::MalformedRecord {
        key: key.clone(),
        source,
    })?;
    store.set(&key, &raw, TtlPolicy::ExpireIn(ttl)).await
}

/// Resolve a player's current session through the `userId → sessionId` index.
pub async fn lookup_user_session(
    store: &dyn SessionStore,
    user_sessions: &KeyPattern,
    user_id: &UserId,
) -> Result<Option<SessionId>> {
    let key = format!("{}{}", user_sessions.as_prefix(), user_id);
    Ok(store.get(&key).await?.map(SessionId::new))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemorySessionStore;
    use crate::testing::fixed_clock;

    #[test]
    fn glob_escapes_special_characters() {
        assert_eq!(KeyPattern::prefix("slot_ptr_").as_glob(), "slot_ptr_*");
        assert_eq!(KeyPattern::prefix("a*b?[c]").as_glob(), "a\\*b\\?\\[c\\]*");
    }

    #[test]
    fn keys_map_to_session_ids() {
        let sessions = KeyPattern::prefix("slot_ptr_");
        let id = SessionId::from("s1");

        let key = sessions.key_for(&id);
        assert_eq!(key, "slot_ptr_s1");
        assert!(sessions.matches(&key));
        assert_eq!(sessions.session_id(&key), Some(id));
        assert_eq!(sessions.session_id("user_session:u1"), None);
    }

    #[test]
    fn zero_cursor_ends_the_walk() {
        assert!(ScanPage::default().is_last());
        assert!(
            !ScanPage {
                cursor: 17,
                keys: vec![]
            }
            .is_last()
        );
    }

    #[tokio::test]
    async fn session_helpers_round_trip_through_the_store() {
        let store = InMemorySessionStore::new(fixed_clock());
        let sessions = KeyPattern::prefix("slot_ptr_");
        let user_sessions = KeyPattern::prefix("user_session:");
        let mut record = SessionRecord::new(SessionId::from("s1"), UserId::from("u1"), 123.45);
        record.last_activity_time = Some(1_700_000_000_000);

        save_session(&store, &sessions, &record, Duration::from_secs(86_400))
            .await
            .unwrap();
        store
            .set("user_session:u1", "s1", TtlPolicy::KeepExisting)
            .await
            .unwrap();

        let loaded = load_session(&store, "slot_ptr_s1").await.unwrap().unwrap();
        assert_eq!(loaded.record, record);
        assert_eq!(SessionRecord::from_json(&loaded.raw).unwrap(), record);
        assert_eq!(
            store.ttl("slot_ptr_s1").await.unwrap(),
            Some(Duration::from_secs(86_400))
        );

        let found = lookup_user_session(&store, &user_sessions, &UserId::from("u1"))
            .await
            .unwrap();
        assert_eq!(found, Some(SessionId::from("s1")));
        let unknown = lookup_user_session(&store, &user_sessions, &UserId::from(9u64))
            .await
            .unwrap();
        assert_eq!(unknown, None);
    }

    #[tokio::test]
    async fn load_session_separates_missing_from_malformed() {
        let store = InMemorySessionStore::new(fixed_clock());
        assert!(load_session(&store, "slot_ptr_gone").await.unwrap().is_none());

        store
            .set("slot_ptr_bad", "[1, 2]", TtlPolicy::KeepExisting)
            .await
            .unwrap();
        let err = load_session(&store, "slot_ptr_bad").await.unwrap_err();
        assert!(matches!(
            err,
            FinalizerError::MalformedRecord { ref key, .. } if key == "slot_ptr_bad"
        ));
    }
}
