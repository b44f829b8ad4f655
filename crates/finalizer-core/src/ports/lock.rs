//! DistributedLock port - try-lock してクリティカルセクションを実行
//!
//! # 使用例
//! ```ignore
//! match lock.try_acquire_and_run("s1", || async { work().await }).await? {
//!     LockOutcome::Acquired(result) => result,
//!     LockOutcome::Contended => skip(),
//! }
//! ```

use std::future::Future;

use async_trait::async_trait;

use crate::domain::Result;

/// Result of a non-blocking lock attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome<T> {
    /// We held the lock and ran the closure.
    Acquired(T),
    /// Someone else holds it; nothing ran.
    Contended,
}

impl<T> LockOutcome<T> {
    pub fn is_contended(&self) -> bool {
        matches!(self, LockOutcome::Contended)
    }

    pub fn acquired(self) -> Option<T> {
        match self {
            LockOutcome::Acquired(value) => Some(value),
            LockOutcome::Contended => None,
        }
    }
}

/// DistributedLock はプロセスをまたいだ排他を提供
///
/// # 契約
/// - 取得できなければ待たずに `Contended` を返す（キューに並ばない）
/// - 取得できたら `f` を実行し、成功・失敗・panic のいずれでも解放する
/// - `Err` はロック自体の取得に失敗した場合（store 障害）のみ
#[async_trait]
pub trait DistributedLock: Send + Sync {
    async fn try_acquire_and_run<F, Fut, T>(&self, key: &str, f: F) -> Result<LockOutcome<T>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = T> + Send,
        T: Send;
}
