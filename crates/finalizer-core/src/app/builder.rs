//! FinalizerBuilder - 部品のワイヤリング
//!
//! # 学習ポイント
//! - 起動時検証（Fail-fast 設計）：足りない部品・不正な設定は build() で弾く
//! - 同じ store をセッション record とロックの両方に使うのが標準構成

use std::sync::Arc;

use crate::app::scanner::{InactivityScanner, ScanSettings};
use crate::app::scheduler::{Finalizer, Scheduler};
use crate::config::FinalizerConfig;
use crate::domain::FinalizerError;
use crate::impls::StoreLeaseLock;
use crate::ports::{
    BalanceReconciler, Clock, LeaseBackend, LeaseTokenGenerator, SessionStore, SystemClock,
    UlidTokenGenerator,
};

/// FinalizerBuilder は Finalizer を構築
///
/// # 使用例
/// ```ignore
/// let store = Arc::new(RedisSessionStore::connect(&config.store, timeout).await?);
/// let finalizer = FinalizerBuilder::new(config)
///     .store_with_leases(store)
///     .reconciler(Arc::new(HttpLedgerClient::new(&config.ledger)?))
///     .build()?;
/// ```
pub struct FinalizerBuilder {
    config: FinalizerConfig,
    store: Option<Arc<dyn SessionStore>>,
    leases: Option<Arc<dyn LeaseBackend>>,
    reconciler: Option<Arc<dyn BalanceReconciler>>,
    clock: Arc<dyn Clock>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing components: {0:?}")]
    MissingComponents(Vec<&'static str>),

    #[error(transparent)]
    Config(#[from] FinalizerError),
}

impl FinalizerBuilder {
    pub fn new(config: FinalizerConfig) -> Self {
        Self {
            config,
            store: None,
            leases: None,
            reconciler: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn leases(mut self, leases: Arc<dyn LeaseBackend>) -> Self {
        self.leases = Some(leases);
        self
    }

    /// Use one store for both session records and lock entries.
    pub fn store_with_leases<S>(self, store: Arc<S>) -> Self
    where
        S: SessionStore + LeaseBackend + 'static,
    {
        self.store(store.clone()).leases(store)
    }

    pub fn reconciler(mut self, reconciler: Arc<dyn BalanceReconciler>) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<Finalizer, BuildError> {
        let mut missing = Vec::new();
        if self.store.is_none() {
            missing.push("store");
        }
        if self.leases.is_none() {
            missing.push("leases");
        }
        if self.reconciler.is_none() {
            missing.push("reconciler");
        }
        let (Some(store), Some(leases), Some(reconciler)) =
            (self.store, self.leases, self.reconciler)
        else {
            return Err(BuildError::MissingComponents(missing));
        };
        self.config.validate_worker()?;

        let tokens: Arc<dyn LeaseTokenGenerator> =
            Arc::new(UlidTokenGenerator::new(self.clock.clone()));
        let lock = |lease| {
            StoreLeaseLock::new(
                leases.clone(),
                tokens.clone(),
                self.config.lock_key_prefix.clone(),
                lease,
            )
        };

        let scanner = InactivityScanner::new(
            store,
            lock(self.config.session_lease()),
            reconciler,
            self.clock.clone(),
            ScanSettings {
                sessions: self.config.sessions(),
                inactivity_threshold: self.config.inactivity_threshold(),
                batch_size: self.config.scan_batch_size,
                max_concurrency: self.config.max_concurrency,
            },
        );
        Ok(Finalizer::new(scanner, lock(self.config.cycle_lease())))
    }

    /// Build and wrap in a [`Scheduler`] ticking at the configured poll interval.
    pub fn build_scheduler(self) -> Result<Scheduler, BuildError> {
        let period = self.config.poll_interval();
        let finalizer = self.build()?;
        Ok(Scheduler::new(Arc::new(finalizer), period))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemorySessionStore;
    use crate::ports::{KeyPattern, save_session};
    use crate::testing::{RecordingReconciler, fixed_clock, idle_record};
    use std::time::Duration;

    #[test]
    fn build_reports_every_missing_component() {
        let err = FinalizerBuilder::new(FinalizerConfig::default())
            .reconciler(Arc::new(RecordingReconciler::new()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(
            err,
            BuildError::MissingComponents(missing) if missing == vec!["store", "leases"]
        ));
    }

    #[test]
    fn build_rejects_invalid_config() {
        let clock = fixed_clock();
        let store = Arc::new(InMemorySessionStore::new(clock));
        let config = FinalizerConfig {
            max_concurrency: 0,
            ..FinalizerConfig::default()
        };

        let err = FinalizerBuilder::new(config)
            .store_with_leases(store)
            .reconciler(Arc::new(RecordingReconciler::new()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, BuildError::Config(FinalizerError::Config(_))));
    }

    #[tokio::test]
    async fn built_finalizer_uses_the_configured_prefixes() {
        let clock = fixed_clock();
        let store = Arc::new(InMemorySessionStore::new(clock.clone()));
        let config = FinalizerConfig {
            session_key_prefix: "game:".to_string(),
            ..FinalizerConfig::default()
        };
        let record = idle_record("s1", "u1", 5.0, clock.now(), Duration::from_secs(60));
        save_session(
            store.as_ref(),
            &KeyPattern::prefix("game:"),
            &record,
            Duration::from_secs(600),
        )
        .await
        .unwrap();
        // not a session under this prefix
        store
            .set("slot_ptr_s9", "{}", crate::ports::TtlPolicy::KeepExisting)
            .await
            .unwrap();

        let reconciler = Arc::new(RecordingReconciler::new());
        let finalizer = FinalizerBuilder::new(config)
            .store_with_leases(store.clone())
            .reconciler(reconciler.clone())
            .clock(clock)
            .build()
            .unwrap();

        let report = finalizer.run_cycle().await.unwrap().acquired().unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.synced, 1);
        assert_eq!(reconciler.calls().len(), 1);
    }
}
