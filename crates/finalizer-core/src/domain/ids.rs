//! Domain identifiers (strongly-typed IDs).
//!
//! - `SessionId`: serving layer が発行する不透明な文字列
//! - `UserId`: プレイヤー識別子。JSON 上は文字列でも数値でもありうるので、
//!   受け取った表現のまま書き戻す
//! - `LeaseToken`: ロック取得 1 回ごとに発行する ULID（所有者の証明）

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Identifier of a session record (the part of the key after the prefix).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Owning player of a session.
///
/// Untagged so `"42"` and `42` both decode and serialize back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserId {
    Text(String),
    Numeric(u64),
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserId::Text(value) => f.write_str(value),
            UserId::Numeric(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        UserId::Text(value.to_string())
    }
}

impl From<u64> for UserId {
    fn from(value: u64) -> Self {
        UserId::Numeric(value)
    }
}

/// Proof of ownership for one lock acquisition.
///
/// Stored as the lock entry's value; release only deletes the entry when the
/// stored value still equals this token.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeaseToken(Ulid);

impl LeaseToken {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for LeaseToken {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lease-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_keeps_its_json_shape() {
        let text: UserId = serde_json::from_str("\"u1\"").unwrap();
        let numeric: UserId = serde_json::from_str("42").unwrap();

        assert_eq!(text, UserId::from("u1"));
        assert_eq!(numeric, UserId::from(42u64));
        assert_eq!(serde_json::to_string(&text).unwrap(), "\"u1\"");
        assert_eq!(serde_json::to_string(&numeric).unwrap(), "42");
        assert_eq!(numeric.to_string(), "42");
    }

    #[test]
    fn lease_tokens_display_with_prefix() {
        let ulid = Ulid::new();
        let token = LeaseToken::from(ulid);
        assert_eq!(token.as_ulid(), ulid);
        assert_eq!(token.to_string(), format!("lease-{ulid}"));
    }

    #[test]
    fn session_id_is_transparent_in_json() {
        let id = SessionId::from("s1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"s1\"");
        assert_eq!(id.as_str(), "s1");
    }
}
