//! finalizer-core
//!
//! Core building blocks for the session finalizer: the worker that reports an
//! idle player's session balance back to the ledger exactly once per period of
//! inactivity.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, session, errors, retry, outcome, state）
//! - **ports**: 抽象化レイヤー（SessionStore, LeaseBackend, DistributedLock, BalanceReconciler, Clock）
//! - **impls**: 実装（InMemorySessionStore, RedisSessionStore, StoreLeaseLock, HttpLedgerClient）
//! - **app**: アプリケーションロジック（scanner, scheduler, builder）
//! - **config**: 設定（しきい値、ポーリング間隔、キー接頭辞、接続先）

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

#[cfg(test)]
pub(crate) mod testing;

pub use app::{Finalizer, FinalizerBuilder, InactivityScanner, Scheduler, SchedulerHandle};
pub use config::FinalizerConfig;
pub use domain::{CycleReport, FinalizerError, SessionOutcome, SessionRecord};
