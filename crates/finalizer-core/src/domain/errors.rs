//! Errors - エラー型と分類
//!
//! 失敗はすべて運用ログで観測されるもので、ユーザー向けの表面はない。
//! 初期化時の store 接続失敗だけがプロセスを止める。

use thiserror::Error;

/// ErrorKind は実行エラーの分類
///
/// - Transient: 一時的なエラー（次のサイクルで再試行される）
/// - Permanent: 恒久的なエラー（再試行しても変わらない）
/// - Infrastructure: インフラエラー（store の障害）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// Why a ledger call did not count as a success.
#[derive(Debug, Error)]
pub enum ReconcileFailure {
    #[error("ledger responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

#[derive(Debug, Error)]
pub enum FinalizerError {
    /// The shared store cannot be reached at startup.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A get/set/scan failed mid-cycle.
    #[error("store operation `{op}` failed: {message}")]
    Store { op: &'static str, message: String },

    #[error("malformed session record at key={key}: {source}")]
    MalformedRecord {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("reconciliation failed for user_id={user_id}: {reason}")]
    Reconcile {
        user_id: String,
        reason: ReconcileFailure,
    },

    /// A ledger lookup made for the serving layer failed.
    #[error("ledger call `{call}` failed for user_id={user_id}: {reason}")]
    Ledger {
        call: &'static str,
        user_id: String,
        reason: ReconcileFailure,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl FinalizerError {
    pub fn store(op: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Store {
            op,
            message: err.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FinalizerError::StoreUnavailable(_) | FinalizerError::Store { .. } => {
                ErrorKind::Infrastructure
            }
            FinalizerError::Reconcile { .. } | FinalizerError::Ledger { .. } => {
                ErrorKind::Transient
            }
            FinalizerError::MalformedRecord { .. } | FinalizerError::Config(_) => {
                ErrorKind::Permanent
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, FinalizerError>;
