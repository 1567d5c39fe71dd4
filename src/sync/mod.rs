//! Reconciliation: the engine that ties store, outbox and cursor to a remote
//! gateway, and the background worker that drives it.

pub mod cursor;
pub mod engine;
pub mod reconciler;
pub mod report;

pub use cursor::SyncCursor;
pub use engine::{EngineState, EngineStatus, SyncEngine};
pub use reconciler::{ReconcilerHandle, spawn_reconciler};
pub use report::{PullReport, TickOutcome, TickReport};
