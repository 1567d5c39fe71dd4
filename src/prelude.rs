//! Everything a host needs to wire up an engine.
//!
//! ```no_run
//! use monthfinance::prelude::*;
//! use std::sync::Arc;
//!
//! # fn main() -> monthfinance::Result<()> {
//! let clock: Arc<dyn Clock> = Arc::new(SystemClock);
//! let engine = SyncEngine::open(
//!     Arc::new(MemoryAdapter::new()),
//!     Arc::new(MemoryGateway::new(clock.clone())),
//!     clock,
//!     SyncConfig::default(),
//! )?;
//! assert!(engine.months()?.is_empty());
//! # Ok(())
//! # }
//! ```

pub use crate::config::{RemoteConfig, SyncConfig};
pub use crate::core::{
    Clock, Expense, ExpenseCategory, NewExpense, Result, SyncError, SystemClock,
};
pub use crate::gateway::{MemoryGateway, RemoteGateway, RestGateway};
pub use crate::ingest::ReceiptCandidate;
pub use crate::outbox::BackoffPolicy;
pub use crate::storage::{FileAdapter, MemoryAdapter, PersistenceAdapter, SnapshotCodec};
pub use crate::sync::{ReconcilerHandle, SyncEngine, TickOutcome, spawn_reconciler};
