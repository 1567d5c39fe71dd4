// ============================================================================
// MonthFinance sync engine
// ============================================================================

pub mod config;
pub mod core;
pub mod gateway;
pub mod ingest;
pub mod merge;
pub mod outbox;
pub mod prelude;
pub mod storage;
pub mod store;
pub mod sync;

// Re-export main types for convenience
pub use config::{RemoteConfig, SyncConfig};
pub use crate::core::{
    Clock, Expense, ExpenseCategory, ExpenseSource, GatewayError, ManualClock, MonthData,
    NewExpense, Provenance, ReceiptProvider, Result, SyncError, SystemClock,
};
pub use gateway::{MemoryGateway, RemoteExpenseRow, RemoteGateway, RestGateway};
pub use ingest::{CandidateStatus, ReceiptCandidate};
pub use merge::{MergeDecision, merge};
pub use outbox::{BackoffPolicy, BackoffStrategy, DrainReport, Outbox, OutboxOp, OutboxPayload};
pub use storage::{FileAdapter, MemoryAdapter, PersistenceAdapter, SnapshotCodec};
pub use store::RecordStore;
pub use sync::{
    PullReport, ReconcilerHandle, SyncCursor, SyncEngine, TickOutcome, TickReport,
    spawn_reconciler,
};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Installs the global `tracing` subscriber for host binaries.
///
/// `RUST_LOG` wins over the default filter.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("monthfinance=info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
