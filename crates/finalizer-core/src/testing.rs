//! Test doubles shared by the scanner and scheduler tests.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::{Notify, Semaphore};

use crate::domain::{FinalizerError, ReconcileFailure, Result, SessionId, SessionRecord, UserId};
use crate::impls::InMemorySessionStore;
use crate::ports::{
    BalanceReconciler, FixedClock, KeyPattern, ReconcileAck, ScanPage, SessionStore, TtlPolicy,
};

pub(crate) fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

/// A record last played `idle` before `now`.
pub(crate) fn idle_record(
    session_id: &str,
    user_id: &str,
    credits: f64,
    now: DateTime<Utc>,
    idle: Duration,
) -> SessionRecord {
    let mut record = SessionRecord::new(SessionId::from(session_id), UserId::from(user_id), credits);
    record.last_activity_time = Some(now.timestamp_millis() - idle.as_millis() as i64);
    record
}

/// Ledger double that records every call.
#[derive(Default)]
pub(crate) struct RecordingReconciler {
    calls: Mutex<Vec<(UserId, f64)>>,
    failures: AtomicUsize,
    /// When set, each call waits for a permit before answering.
    gate: Option<Arc<Semaphore>>,
    entered: Arc<Notify>,
}

impl RecordingReconciler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` calls with a 500.
    pub(crate) fn failing(n: usize) -> Self {
        Self {
            failures: AtomicUsize::new(n),
            ..Self::default()
        }
    }

    /// Block every call until the returned semaphore gets a permit.
    pub(crate) fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let reconciler = Self {
            gate: Some(gate.clone()),
            ..Self::default()
        };
        (reconciler, gate)
    }

    /// Resolves once a call has started.
    pub(crate) fn entered(&self) -> Arc<Notify> {
        self.entered.clone()
    }

    pub(crate) fn calls(&self) -> Vec<(UserId, f64)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BalanceReconciler for RecordingReconciler {
    async fn reconcile(&self, user_id: &UserId, balance: f64) -> Result<ReconcileAck> {
        self.calls.lock().unwrap().push((user_id.clone(), balance));
        self.entered.notify_one();
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.unwrap();
        }

        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(FinalizerError::Reconcile {
                user_id: user_id.to_string(),
                reason: ReconcileFailure::Status {
                    status: 500,
                    body: "internal error".to_string(),
                },
            });
        }
        Ok(ReconcileAck::default())
    }
}

/// In-memory store whose operations can be made to fail.
pub(crate) struct FlakyStore {
    inner: Arc<InMemorySessionStore>,
    pub(crate) fail_scan: AtomicBool,
    pub(crate) fail_get: AtomicBool,
    pub(crate) fail_replace: AtomicBool,
    pub(crate) replace_calls: AtomicUsize,
}

impl FlakyStore {
    pub(crate) fn new(inner: Arc<InMemorySessionStore>) -> Self {
        Self {
            inner,
            fail_scan: AtomicBool::new(false),
            fail_get: AtomicBool::new(false),
            fail_replace: AtomicBool::new(false),
            replace_calls: AtomicUsize::new(0),
        }
    }

    fn check(flag: &AtomicBool, op: &'static str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(FinalizerError::store(op, "connection reset by peer"));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Self::check(&self.fail_get, "get")?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: TtlPolicy) -> Result<()> {
        self.inner.set(key, value, ttl).await
    }

    async fn replace_if_unchanged(
        &self,
        key: &str,
        expected: &str,
        value: &str,
        ttl: TtlPolicy,
    ) -> Result<bool> {
        self.replace_calls.fetch_add(1, Ordering::SeqCst);
        Self::check(&self.fail_replace, "replace_if_unchanged")?;
        self.inner.replace_if_unchanged(key, expected, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(key).await
    }

    async fn scan(&self, pattern: &KeyPattern, cursor: u64, count: usize) -> Result<ScanPage> {
        Self::check(&self.fail_scan, "scan")?;
        self.inner.scan(pattern, cursor, count).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.inner.ttl(key).await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }
}

pub(crate) fn fixed_clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(start_time()))
}
