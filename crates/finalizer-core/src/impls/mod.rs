//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemorySessionStore**: 開発用・テスト用の共有 store（リースも提供）
//! - **RedisSessionStore**: 本番用の共有 store（リースも提供）
//! - **StoreLeaseLock**: LeaseBackend 上の DistributedLock
//! - **HttpLedgerClient**: ledger API への BalanceReconciler

pub mod http_reconciler;
pub mod inmem_store;
pub mod redis_store;
pub mod store_lock;

pub use self::http_reconciler::{HttpLedgerClient, LedgerAccount};
pub use self::inmem_store::InMemorySessionStore;
pub use self::redis_store::RedisSessionStore;
pub use self::store_lock::StoreLeaseLock;
