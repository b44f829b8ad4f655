//! Scheduler - ポーリング間隔ごとにスキャンサイクルを起動
//!
//! # フロー
//! 1. interval の tick ごとにサイクルを別タスクで起動（tick は待たせない）
//! 2. サイクルは cycle lock の中で InactivityScanner::scan_once を実行
//! 3. 前のサイクル（他プロセス含む）がまだ走っていれば、その tick はスキップ
//! 4. shutdown 要求で新しい tick を止め、走行中のサイクルは最後まで待つ

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::app::scanner::InactivityScanner;
use crate::domain::{CycleReport, Result};
use crate::impls::StoreLeaseLock;
use crate::ports::{DistributedLock, LockOutcome};

/// Lock key that serializes whole scan cycles across all workers.
pub const CYCLE_LOCK_KEY: &str = "scan-cycle";

/// A scanner paired with the lock that keeps its cycles from overlapping.
pub struct Finalizer<L: DistributedLock = StoreLeaseLock> {
    scanner: InactivityScanner<L>,
    cycle_lock: L,
}

impl<L: DistributedLock> Finalizer<L> {
    pub fn new(scanner: InactivityScanner<L>, cycle_lock: L) -> Self {
        Self {
            scanner,
            cycle_lock,
        }
    }

    /// Run one scan cycle unless another one is already in progress.
    pub async fn run_cycle(&self) -> Result<LockOutcome<CycleReport>> {
        let started = Instant::now();
        let outcome = self
            .cycle_lock
            .try_acquire_and_run(CYCLE_LOCK_KEY, || self.scanner.scan_once())
            .await?;

        match &outcome {
            LockOutcome::Acquired(report) => info!(
                scanned = report.scanned,
                synced = report.synced,
                active = report.active,
                already_synced = report.already_synced,
                contended = report.contended,
                malformed = report.malformed,
                missing = report.missing,
                reconcile_failed = report.reconcile_failed,
                superseded = report.superseded,
                store_errors = report.store_errors,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "scan cycle finished"
            ),
            LockOutcome::Contended => info!("previous scan cycle still running, skipping tick"),
        }
        Ok(outcome)
    }
}

/// Drives [`Finalizer::run_cycle`] on a fixed period.
pub struct Scheduler<L: DistributedLock = StoreLeaseLock> {
    finalizer: Arc<Finalizer<L>>,
    period: Duration,
}

impl<L: DistributedLock + 'static> Scheduler<L> {
    pub fn new(finalizer: Arc<Finalizer<L>>, period: Duration) -> Self {
        Self { finalizer, period }
    }

    /// Start ticking. The first cycle runs one period after this call.
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(tick_loop(self.finalizer, self.period, shutdown_rx));
        SchedulerHandle { shutdown_tx, join }
    }
}

/// Handle to a running scheduler.
/// - `request_shutdown()` で新しいサイクルの起動を止める
/// - `shutdown_and_join()` で走行中のサイクルの終了まで待つ
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn request_shutdown(&self) {
        // receiver is gone once the loop has exited
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(e) = self.join.await {
            error!(error = %e, "scheduler task ended abnormally");
        }
    }
}

async fn tick_loop<L: DistributedLock + 'static>(
    finalizer: Arc<Finalizer<L>>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut cycles = JoinSet::new();
    info!(period_ms = period.as_millis() as u64, "scheduler started");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            Some(joined) = cycles.join_next() => {
                log_cycle_exit(joined);
                continue;
            }
            _ = ticker.tick() => {}
        }

        let finalizer = Arc::clone(&finalizer);
        cycles.spawn(async move {
            if let Err(e) = finalizer.run_cycle().await {
                warn!(error = %e, "scan cycle could not start");
            }
        });
    }

    info!(in_flight = cycles.len(), "scheduler stopping, waiting for running cycles");
    while let Some(joined) = cycles.join_next().await {
        log_cycle_exit(joined);
    }
    info!("scheduler stopped");
}

fn log_cycle_exit(joined: std::result::Result<(), JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "scan cycle task panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ScanSettings;
    use crate::domain::UserId;
    use crate::impls::InMemorySessionStore;
    use crate::ports::{
        BalanceReconciler, Clock, FixedClock, KeyPattern, SessionStore, UlidTokenGenerator,
        save_session,
    };
    use crate::testing::{RecordingReconciler, fixed_clock, idle_record};

    struct Fixture {
        clock: Arc<FixedClock>,
        store: Arc<InMemorySessionStore>,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = fixed_clock();
            let store = Arc::new(InMemorySessionStore::new(clock.clone()));
            Self { clock, store }
        }

        fn lock(&self, lease: Duration) -> StoreLeaseLock {
            StoreLeaseLock::new(
                self.store.clone(),
                Arc::new(UlidTokenGenerator::new(self.clock.clone())),
                "finalizer_lock:",
                lease,
            )
        }

        fn finalizer(&self, reconciler: Arc<dyn BalanceReconciler>) -> Finalizer {
            let scanner = InactivityScanner::new(
                self.store.clone(),
                self.lock(Duration::from_secs(60)),
                reconciler,
                self.clock.clone(),
                ScanSettings {
                    sessions: KeyPattern::prefix("slot_ptr_"),
                    inactivity_threshold: Duration::from_secs(30),
                    batch_size: 100,
                    max_concurrency: 8,
                },
            );
            Finalizer::new(scanner, self.lock(Duration::from_secs(300)))
        }

        async fn put_idle(&self, session_id: &str, user_id: &str) {
            let record = idle_record(
                session_id,
                user_id,
                42.0,
                self.clock.now(),
                Duration::from_secs(120),
            );
            save_session(
                self.store.as_ref(),
                &KeyPattern::prefix("slot_ptr_"),
                &record,
                Duration::from_secs(86_400),
            )
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn run_cycle_reports_the_scan() {
        let fx = Fixture::new();
        fx.put_idle("s1", "u1").await;
        let reconciler = Arc::new(RecordingReconciler::new());

        let outcome = fx.finalizer(reconciler.clone()).run_cycle().await.unwrap();

        let report = outcome.acquired().unwrap();
        assert_eq!(report.synced, 1);
        assert_eq!(reconciler.calls(), vec![(UserId::from("u1"), 42.0)]);
        assert_eq!(
            fx.store.get("finalizer_lock:scan-cycle").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn overlapping_cycles_are_skipped() {
        let fx = Fixture::new();
        fx.put_idle("s1", "u1").await;
        let (reconciler, gate) = RecordingReconciler::gated();
        let reconciler = Arc::new(reconciler);
        let entered = reconciler.entered();
        let first = Arc::new(fx.finalizer(reconciler.clone()));
        // a second process sharing the store
        let second = fx.finalizer(reconciler.clone());

        let running = tokio::spawn({
            let first = first.clone();
            async move { first.run_cycle().await }
        });
        entered.notified().await;

        assert!(second.run_cycle().await.unwrap().is_contended());
        assert!(first.run_cycle().await.unwrap().is_contended());

        gate.add_permits(1);
        let report = running.await.unwrap().unwrap().acquired().unwrap();
        assert_eq!(report.synced, 1);
        assert_eq!(reconciler.calls().len(), 1);

        // the lock is free again
        let next = second.run_cycle().await.unwrap().acquired().unwrap();
        assert_eq!(next.already_synced, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn a_long_cycle_keeps_its_locks_past_the_lease() {
        let fx = Fixture::new();
        fx.put_idle("s1", "u1").await;
        let (reconciler, gate) = RecordingReconciler::gated();
        let reconciler = Arc::new(reconciler);
        let entered = reconciler.entered();
        let first = Arc::new(fx.finalizer(reconciler.clone()));
        let second = fx.finalizer(reconciler.clone());

        let running = tokio::spawn({
            let first = first.clone();
            async move { first.run_cycle().await }
        });
        entered.notified().await;

        // past the 300s cycle lease while the ledger call is still parked
        for _ in 0..31 {
            fx.clock.advance(Duration::from_secs(10));
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
        assert!(second.run_cycle().await.unwrap().is_contended());
        assert!(
            fx.store
                .get("finalizer_lock:slot_ptr_s1")
                .await
                .unwrap()
                .is_some()
        );

        gate.add_permits(1);
        let report = running.await.unwrap().unwrap().acquired().unwrap();
        assert_eq!(report.synced, 1);
        assert_eq!(reconciler.calls(), vec![(UserId::from("u1"), 42.0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_ticks_until_shutdown() {
        let fx = Fixture::new();
        fx.put_idle("s1", "u1").await;
        let reconciler = Arc::new(RecordingReconciler::new());
        let finalizer = Arc::new(fx.finalizer(reconciler.clone()));
        let period = Duration::from_secs(30);

        let handle = Scheduler::new(finalizer, period).spawn();

        // nothing before the first period elapses
        tokio::time::sleep(period / 2).await;
        assert!(reconciler.calls().is_empty());

        tokio::time::sleep(period).await;
        assert_eq!(reconciler.calls().len(), 1);

        fx.put_idle("s2", "u2").await;
        tokio::time::sleep(period).await;
        assert_eq!(reconciler.calls().len(), 2);

        handle.shutdown_and_join().await;
        fx.put_idle("s3", "u3").await;
        tokio::time::sleep(period * 3).await;
        assert_eq!(reconciler.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_the_running_cycle() {
        let fx = Fixture::new();
        fx.put_idle("s1", "u1").await;
        let (reconciler, gate) = RecordingReconciler::gated();
        let reconciler = Arc::new(reconciler);
        let entered = reconciler.entered();
        let period = Duration::from_secs(10);

        let handle = Scheduler::new(Arc::new(fx.finalizer(reconciler.clone())), period).spawn();
        entered.notified().await;

        let stopping = tokio::spawn(handle.shutdown_and_join());
        tokio::time::sleep(period * 3).await;
        assert!(!stopping.is_finished());

        gate.add_permits(1);
        stopping.await.unwrap();
        assert_eq!(reconciler.calls().len(), 1);
        let stored = fx.store.get("slot_ptr_s1").await.unwrap().unwrap();
        assert!(stored.contains("\"isSynced\":true"));
    }
}
