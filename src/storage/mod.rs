pub mod adapter;
pub mod codec;
pub mod memory;
pub mod persistence;

pub use adapter::{PersistSlot, PersistenceAdapter};
pub use codec::SnapshotCodec;
pub use memory::MemoryAdapter;
pub use persistence::FileAdapter;

/// Storage keys used by the engine.
pub mod keys {
    pub const RECORD_STORE: &str = "monthfinance.appState";
    pub const OUTBOX: &str = "monthfinance.outbox";
    pub const SYNC_CURSOR: &str = "monthfinance.lastPullAt";
}
