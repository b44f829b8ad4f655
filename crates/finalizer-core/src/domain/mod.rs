//! Domain model (ids, session records, errors, outcomes, ...).
//!
//! ここには I/O を一切含めない。store や ledger への依存は ports 側に置く。

pub mod errors;
pub mod ids;
pub mod outcome;
pub mod retry;
pub mod session;
pub mod state;

pub use self::errors::{ErrorKind, FinalizerError, ReconcileFailure, Result};
pub use self::ids::{LeaseToken, SessionId, UserId};
pub use self::outcome::{CycleReport, SessionOutcome};
pub use self::retry::RetryPolicy;
pub use self::session::{Eligibility, EnginePayload, SessionRecord};
pub use self::state::ScanState;
