//! BalanceReconciler port - ledger への残高報告
//!
//! 1 回の呼び出しで 1 回だけ ledger に報告する。成功以外（transport エラー含む）は
//! すべて失敗として返し、呼び出し側は synced にしてはならない。

use async_trait::async_trait;

use crate::domain::{Result, UserId};

/// Acknowledgement returned by the ledger on success.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileAck {
    /// Decoded JSON body, if the ledger sent one.
    pub body: Option<serde_json::Value>,
}

#[async_trait]
pub trait BalanceReconciler: Send + Sync {
    async fn reconcile(&self, user_id: &UserId, balance: f64) -> Result<ReconcileAck>;
}
