//! InactivityScanner - 1 サイクル分の走査と精算
//!
//! # フロー（session ごと）
//! 1. store を prefix でカーソル走査（ページ単位）
//! 2. session ごとにロックを try-acquire（取れなければスキップ）
//! 3. ロック内で record を読み直し、対象かどうか判定
//! 4. 対象なら ledger に残高を報告
//! 5. 成功したら isSynced=true を書き戻す（読んだ値から変わっていない場合のみ、TTL は維持）
//!
//! # 設計原則
//! - ledger が成功を返すまで isSynced は立てない
//! - 1 つの session の失敗はサイクル全体を止めない
//! - ページ内の session は並行に処理する（上限あり）

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::domain::{
    CycleReport, Eligibility, FinalizerError, ScanState, SessionOutcome, SessionRecord,
};
use crate::impls::StoreLeaseLock;
use crate::ports::{
    BalanceReconciler, Clock, DistributedLock, KeyPattern, LoadedSession, LockOutcome,
    SessionStore, TtlPolicy, load_session,
};

/// Tuning knobs for one scanner.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub sessions: KeyPattern,
    pub inactivity_threshold: Duration,
    pub batch_size: usize,
    pub max_concurrency: usize,
}

pub struct InactivityScanner<L: DistributedLock = StoreLeaseLock> {
    store: Arc<dyn SessionStore>,
    session_lock: L,
    reconciler: Arc<dyn BalanceReconciler>,
    clock: Arc<dyn Clock>,
    settings: ScanSettings,
}

impl<L: DistributedLock> InactivityScanner<L> {
    pub fn new(
        store: Arc<dyn SessionStore>,
        session_lock: L,
        reconciler: Arc<dyn BalanceReconciler>,
        clock: Arc<dyn Clock>,
        settings: ScanSettings,
    ) -> Self {
        Self {
            store,
            session_lock,
            reconciler,
            clock,
            settings,
        }
    }

    /// Walk every session key once and finalize the idle ones.
    ///
    /// A failed scan page ends the cycle early; whatever was already
    /// processed stays processed and the rest waits for the next cycle.
    pub async fn scan_once(&self) -> CycleReport {
        let mut report = CycleReport::default();
        let mut seen = HashSet::new();
        let mut cursor = 0u64;

        loop {
            debug!(state = %ScanState::Scanning, cursor, "scanning session keys");
            let page = match self
                .store
                .scan(&self.settings.sessions, cursor, self.settings.batch_size)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    warn!(error = %e, cursor, "session scan failed, ending cycle early");
                    report.record_scan_failure();
                    break;
                }
            };

            // SCAN may repeat a key across pages
            let keys: Vec<String> = page
                .keys
                .into_iter()
                .filter(|key| seen.insert(key.clone()))
                .collect();

            let outcomes: Vec<SessionOutcome> = stream::iter(keys)
                .map(|key| self.process_key(key))
                .buffer_unordered(self.settings.max_concurrency.max(1))
                .collect()
                .await;
            for outcome in outcomes {
                report.record(outcome);
            }

            if page.cursor == 0 {
                break;
            }
            cursor = page.cursor;
        }

        debug!(state = %ScanState::Idle, scanned = report.scanned, "scan finished");
        report
    }

    async fn process_key(&self, key: String) -> SessionOutcome {
        debug!(state = %ScanState::PerSessionLocking, key = %key);
        match self
            .session_lock
            .try_acquire_and_run(&key, || self.finalize(&key))
            .await
        {
            Ok(LockOutcome::Acquired(outcome)) => outcome,
            Ok(LockOutcome::Contended) => {
                debug!(key = %key, "session held by another worker, skipping");
                SessionOutcome::Contended
            }
            Err(e) => {
                warn!(key = %key, error = %e, kind = ?e.kind(), "could not take session lock");
                SessionOutcome::StoreError
            }
        }
    }

    /// Runs under the session lock.
    async fn finalize(&self, key: &str) -> SessionOutcome {
        debug!(state = %ScanState::Evaluating, key);
        let LoadedSession { raw, mut record } = match load_session(self.store.as_ref(), key).await
        {
            Ok(Some(loaded)) => loaded,
            Ok(None) => {
                debug!(key, "session vanished before it was read");
                return SessionOutcome::Missing;
            }
            Err(e @ FinalizerError::MalformedRecord { .. }) => {
                warn!(key, error = %e, "skipping malformed session record");
                return SessionOutcome::Malformed;
            }
            Err(e) => {
                warn!(key, error = %e, kind = ?e.kind(), "could not read session record");
                return SessionOutcome::StoreError;
            }
        };

        match record.evaluate(self.clock.now(), self.settings.inactivity_threshold) {
            Eligibility::Eligible => {}
            Eligibility::AlreadySynced => return SessionOutcome::AlreadySynced,
            Eligibility::Active | Eligibility::NeverPlayed => return SessionOutcome::Active,
        }

        debug!(
            state = %ScanState::Reconciling,
            session_id = %record.session_id,
            user_id = %record.user_id,
            balance = record.credits
        );
        if let Err(e) = self
            .reconciler
            .reconcile(&record.user_id, record.credits)
            .await
        {
            warn!(
                session_id = %record.session_id,
                user_id = %record.user_id,
                error = %e,
                kind = ?e.kind(),
                "ledger rejected balance, will retry next cycle"
            );
            return SessionOutcome::ReconcileFailed;
        }

        debug!(state = %ScanState::Persisting, session_id = %record.session_id);
        self.persist_synced(key, &raw, &mut record).await
    }

    async fn persist_synced(
        &self,
        key: &str,
        raw: &str,
        record: &mut SessionRecord,
    ) -> SessionOutcome {
        record.mark_synced();
        let updated = match record.to_json() {
            Ok(updated) => updated,
            Err(e) => {
                warn!(key, error = %e, "could not encode synced record");
                return SessionOutcome::StoreError;
            }
        };

        match self
            .store
            .replace_if_unchanged(key, raw, &updated, TtlPolicy::KeepExisting)
            .await
        {
            Ok(true) => {
                info!(
                    session_id = %record.session_id,
                    user_id = %record.user_id,
                    balance = record.credits,
                    "session balance finalized"
                );
                SessionOutcome::Synced
            }
            Ok(false) => {
                warn!(
                    session_id = %record.session_id,
                    user_id = %record.user_id,
                    "record changed during reconciliation, leaving it for the next cycle"
                );
                SessionOutcome::Superseded
            }
            Err(e) => {
                warn!(
                    session_id = %record.session_id,
                    user_id = %record.user_id,
                    error = %e,
                    "ledger accepted balance but marking the record failed"
                );
                SessionOutcome::StoreError
            }
        }
    }
}
