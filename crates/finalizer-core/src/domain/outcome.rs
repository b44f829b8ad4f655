//! Outcome model: what happened to each session during one scan cycle.

use serde::{Deserialize, Serialize};

/// Terminal result for one session key within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    /// Ledger accepted the balance and the record was marked synced.
    Synced,
    /// Played within the inactivity threshold (or never played).
    Active,
    /// Already reported for this inactivity window.
    AlreadySynced,
    /// Key vanished between the scan listing and the read.
    Missing,
    /// Record could not be decoded; left in place.
    Malformed,
    /// Another worker holds the session lock.
    Contended,
    /// Ledger call failed; the record stays unsynced for the next cycle.
    ReconcileFailed,
    /// Ledger accepted, but the engine rewrote the record before we could mark it.
    Superseded,
    /// A store read or write failed for this session.
    StoreError,
}

/// Per-cycle counters, logged once at the end of every cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub scanned: usize,
    pub synced: usize,
    pub active: usize,
    pub already_synced: usize,
    pub missing: usize,
    pub malformed: usize,
    pub contended: usize,
    pub reconcile_failed: usize,
    pub superseded: usize,
    pub store_errors: usize,
}

impl CycleReport {
    pub fn record(&mut self, outcome: SessionOutcome) {
        self.scanned += 1;
        match outcome {
            SessionOutcome::Synced => self.synced += 1,
            SessionOutcome::Active => self.active += 1,
            SessionOutcome::AlreadySynced => self.already_synced += 1,
            SessionOutcome::Missing => self.missing += 1,
            SessionOutcome::Malformed => self.malformed += 1,
            SessionOutcome::Contended => self.contended += 1,
            SessionOutcome::ReconcileFailed => self.reconcile_failed += 1,
            SessionOutcome::Superseded => self.superseded += 1,
            SessionOutcome::StoreError => self.store_errors += 1,
        }
    }

    /// A scan page failed; no key was attributed to it.
    pub fn record_scan_failure(&mut self) {
        self.store_errors += 1;
    }
}
