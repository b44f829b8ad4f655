//! App - アプリケーション層
//!
//! ports を組み合わせて worker の振る舞いを実装します。
//!
//! # 主要コンポーネント
//! - **InactivityScanner**: 1 サイクル分の走査（scan→lock→evaluate→reconcile→persist）
//! - **Finalizer**: cycle lock 付きのサイクル実行
//! - **Scheduler**: ポーリング間隔ごとのサイクル起動と graceful shutdown
//! - **FinalizerBuilder**: 部品のワイヤリングと起動時検証

pub mod builder;
pub mod scanner;
pub mod scheduler;

pub use self::builder::{BuildError, FinalizerBuilder};
pub use self::scanner::{InactivityScanner, ScanSettings};
pub use self::scheduler::{CYCLE_LOCK_KEY, Finalizer, Scheduler, SchedulerHandle};
