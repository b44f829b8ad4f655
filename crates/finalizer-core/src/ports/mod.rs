//! Ports - 抽象化レイヤー
//!
//! 各 trait は外部システム（Redis, ledger API, 時計）へのインターフェースを提供し、
//! 実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - 共有 store が source of truth（正本）。プロセス内のシングルトンは持たない
//! - ロックは store 上のリース（プロセスをまたいで排他）
//! - ledger は 1 回の呼び出し契約だけを知っている

pub mod clock;
pub mod id_generator;
pub mod lease;
pub mod lock;
pub mod reconciler;
pub mod session_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{LeaseTokenGenerator, UlidTokenGenerator};
pub use self::lease::LeaseBackend;
pub use self::lock::{DistributedLock, LockOutcome};
pub use self::reconciler::{BalanceReconciler, ReconcileAck};
pub use self::session_store::{
    KeyPattern, LoadedSession, ScanPage, SessionStore, TtlPolicy, load_session,
    lookup_user_session, save_session,
};
