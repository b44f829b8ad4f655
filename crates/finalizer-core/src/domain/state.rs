//! ScanState - スキャンサイクルの状態
//!
//! # 状態遷移
//! Idle → Scanning → PerSessionLocking → Evaluating → Reconciling → Persisting → Idle
//!
//! Evaluating で対象外と判定された場合や、ロック競合・ledger 失敗の場合は
//! その session の処理を終えて Idle に戻る。

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanState {
    Idle,
    Scanning,
    PerSessionLocking,
    Evaluating,
    Reconciling,
    Persisting,
}

impl ScanState {
    pub fn as_str(self) -> &'static str {
        match self {
            ScanState::Idle => "idle",
            ScanState::Scanning => "scanning",
            ScanState::PerSessionLocking => "per_session_locking",
            ScanState::Evaluating => "evaluating",
            ScanState::Reconciling => "reconciling",
            ScanState::Persisting => "persisting",
        }
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
