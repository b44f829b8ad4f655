//! Session record: the per-session state shared with the game engine.
//!
//! The engine owns `credits`, `lastActivityTime` and everything in the
//! payload. The finalizer only ever flips `isSynced` to `true`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{SessionId, UserId};

/// Engine-owned fields carried through untouched.
///
/// Flattened into the record's JSON object, so the stored document keeps the
/// exact shape the engine wrote.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnginePayload(serde_json::Map<String, serde_json::Value>);

impl EnginePayload {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.0.get(field)
    }
}

/// Persisted state of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub credits: f64,

    /// Epoch milliseconds of the latest round. Absent until the first play.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity_time: Option<i64>,

    #[serde(default)]
    pub is_synced: bool,

    #[serde(flatten)]
    pub engine: EnginePayload,
}

/// Result of checking a record against the inactivity policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// Idle past the threshold and not yet reported.
    Eligible,
    /// Already reported for the current inactivity window.
    AlreadySynced,
    /// Played within the threshold.
    Active,
    /// No activity timestamp recorded yet.
    NeverPlayed,
}

impl SessionRecord {
    pub fn new(session_id: SessionId, user_id: UserId, credits: f64) -> Self {
        Self {
            session_id,
            user_id,
            credits,
            last_activity_time: None,
            is_synced: false,
            engine: EnginePayload::default(),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Time since the last round, or `None` if the record was never played or
    /// the timestamp lies in the future.
    pub fn idle_for(&self, now: DateTime<Utc>) -> Option<Duration> {
        let last = self.last_activity_time?;
        let idle_ms = now.timestamp_millis().checked_sub(last)?;
        u64::try_from(idle_ms).ok().map(Duration::from_millis)
    }

    /// `!isSynced && (now - lastActivityTime) > threshold`, strictly greater.
    pub fn evaluate(&self, now: DateTime<Utc>, threshold: Duration) -> Eligibility {
        if self.is_synced {
            return Eligibility::AlreadySynced;
        }
        if self.last_activity_time.is_none() {
            return Eligibility::NeverPlayed;
        }
        match self.idle_for(now) {
            Some(idle) if idle > threshold => Eligibility::Eligible,
            _ => Eligibility::Active,
        }
    }

    /// Record a successful reconciliation.
    pub fn mark_synced(&mut self) {
        self.is_synced = true;
    }
}
