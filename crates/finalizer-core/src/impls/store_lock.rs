//! StoreLeaseLock - 共有 store 上のリースで実装した DistributedLock
//!
//! # フロー
//! 1. LeaseTokenGenerator で今回の取得専用トークンを発行
//! 2. LeaseBackend::try_claim（set-if-absent + 有効期限）
//! 3. 取れなければ即座に Contended（待たない）
//! 4. 取れたらクロージャを実行（panic も捕捉）
//!    - 実行中は lease の 1/3 ごとに LeaseBackend::extend で期限を延ばす
//! 5. LeaseBackend::release（自分のトークンのときだけ削除）
//! 6. panic していたら解放後に再送出

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::domain::{LeaseToken, Result};
use crate::ports::{DistributedLock, LeaseBackend, LeaseTokenGenerator, LockOutcome};

/// Cross-process try-lock backed by a [`LeaseBackend`].
///
/// The lease is renewed while the critical section runs, so it only lapses
/// when the holder stops making progress (crash, stalled store).
pub struct StoreLeaseLock {
    backend: Arc<dyn LeaseBackend>,
    tokens: Arc<dyn LeaseTokenGenerator>,
    key_prefix: String,
    lease: Duration,
}

impl StoreLeaseLock {
    pub fn new(
        backend: Arc<dyn LeaseBackend>,
        tokens: Arc<dyn LeaseTokenGenerator>,
        key_prefix: impl Into<String>,
        lease: Duration,
    ) -> Self {
        Self {
            backend,
            tokens,
            key_prefix: key_prefix.into(),
            lease,
        }
    }

    fn lock_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn renew_every(&self) -> Duration {
        (self.lease / 3).max(Duration::from_millis(1))
    }

    async fn renew(&self, lock_key: &str, token: LeaseToken) {
        match self.backend.extend(lock_key, token, self.lease).await {
            Ok(true) => debug!(lock_key = %lock_key, "lease renewed"),
            Ok(false) => warn!(lock_key = %lock_key, "lease lost while still running"),
            Err(e) => warn!(lock_key = %lock_key, error = %e, "lease renewal failed"),
        }
    }
}

#[async_trait]
impl DistributedLock for StoreLeaseLock {
    async fn try_acquire_and_run<F, Fut, T>(&self, key: &str, f: F) -> Result<LockOutcome<T>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = T> + Send,
        T: Send,
    {
        let lock_key = self.lock_key(key);
        let token = self.tokens.generate();

        if !self.backend.try_claim(&lock_key, token, self.lease).await? {
            debug!(lock_key = %lock_key, "lock contended");
            return Ok(LockOutcome::Contended);
        }
        debug!(lock_key = %lock_key, token = %token, "lock acquired");

        let work = AssertUnwindSafe(f()).catch_unwind();
        tokio::pin!(work);
        let period = self.renew_every();
        let mut renewals = tokio::time::interval_at(Instant::now() + period, period);
        renewals.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let result = loop {
            tokio::select! {
                result = &mut work => break result,
                _ = renewals.tick() => self.renew(&lock_key, token).await,
            }
        };

        match self.backend.release(&lock_key, token).await {
            Ok(true) => debug!(lock_key = %lock_key, "lock released"),
            Ok(false) => warn!(
                lock_key = %lock_key,
                lease_ms = self.lease.as_millis() as u64,
                "lease expired before release"
            ),
            Err(e) => warn!(lock_key = %lock_key, error = %e, "lock release failed"),
        }

        match result {
            Ok(value) => Ok(LockOutcome::Acquired(value)),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}
