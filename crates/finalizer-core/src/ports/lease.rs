//! LeaseBackend port - 共有 store 上のリース操作
//!
//! DistributedLock の土台。プロセス内 mutex ではなく、全 worker が見ている
//! store への条件付き書き込みで排他を実現する。

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{LeaseToken, Result};

/// LeaseBackend は「無ければ書く」と「自分の値なら消す」を原子的に行う
///
/// # 設計原則
/// - try_claim: set-if-absent + 有効期限（Redis: `SET key token NX PX ms`）
/// - extend: 自分のトークンのときだけ有効期限を延ばす（Redis: Lua script）
/// - release: compare-and-delete（Redis: Lua script）
/// - 有効期限があるので、保持者が落ちてもリースは自然に解放される
#[async_trait]
pub trait LeaseBackend: Send + Sync {
    /// Claim `key` for `lease` if nobody holds it. Returns whether we got it.
    async fn try_claim(&self, key: &str, token: LeaseToken, lease: Duration) -> Result<bool>;

    /// Reset the expiry of `key` to `lease` if it is still held by `token`.
    /// Returns whether it was ours.
    async fn extend(&self, key: &str, token: LeaseToken, lease: Duration) -> Result<bool>;

    /// Drop `key` if it is still held by `token`. Returns whether it was ours.
    async fn release(&self, key: &str, token: LeaseToken) -> Result<bool>;
}
