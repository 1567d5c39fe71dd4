//! Remote store abstraction.

pub mod memory;
pub mod rest;
pub mod row;

pub use memory::MemoryGateway;
pub use rest::RestGateway;
pub use row::{RemoteExpenseRow, format_timestamp, parse_timestamp};

use crate::core::GatewayError;
use crate::outbox::OutboxOp;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Upsert/query capability of the shared remote store.
///
/// Implementations report every failure as a [`GatewayError`]; they may be
/// unreachable at any moment.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Transmits one outbox operation. Must be idempotent per record id: the same
    /// operation can be delivered more than once.
    async fn send(&self, op: &OutboxOp) -> Result<(), GatewayError>;

    /// Returns at most `limit` rows with `updated_at` strictly after `cursor`
    /// (everything when `cursor` is `None`), ascending by `updated_at`.
    async fn pull_since(
        &self,
        cursor: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<RemoteExpenseRow>, GatewayError>;
}
