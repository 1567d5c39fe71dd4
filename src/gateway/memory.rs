use super::{RemoteExpenseRow, RemoteGateway, format_timestamp};
use crate::core::{Clock, Expense, GatewayError};
use crate::outbox::{OutboxOp, OutboxPayload};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// In-process stand-in for the remote `expenses` table.
///
/// Behaves like the hosted table: upserts overwrite by id, a delete marker flags
/// the row deleted and stamps `updated_at` with the gateway's own clock. The
/// connection can be switched off and individual records made to fail.
pub struct MemoryGateway {
    rows: Mutex<BTreeMap<String, RemoteExpenseRow>>,
    online: AtomicBool,
    failing_records: Mutex<HashSet<String>>,
    delivered_ops: Mutex<Vec<String>>,
    clock: Arc<dyn Clock>,
    pulls: AtomicU64,
    anonymous_rows: AtomicU64,
}

impl MemoryGateway {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            rows: Mutex::new(BTreeMap::new()),
            online: AtomicBool::new(true),
            failing_records: Mutex::new(HashSet::new()),
            delivered_ops: Mutex::new(Vec::new()),
            clock,
            pulls: AtomicU64::new(0),
            anonymous_rows: AtomicU64::new(0),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Rejects every operation that touches `record_id` until healed.
    pub fn fail_record(&self, record_id: impl Into<String>) {
        lock(&self.failing_records).insert(record_id.into());
    }

    pub fn heal_record(&self, record_id: &str) {
        lock(&self.failing_records).remove(record_id);
    }

    /// Writes a record as if another device had synced it.
    pub fn put_expense(&self, expense: &Expense) {
        self.put_row(RemoteExpenseRow::from_expense(expense));
    }

    /// Stores a raw row; rows without an id get a synthetic key.
    pub fn put_row(&self, row: RemoteExpenseRow) {
        let key = match row.id.clone() {
            Some(id) => id,
            None => format!(
                "__anonymous-{}",
                self.anonymous_rows.fetch_add(1, Ordering::SeqCst)
            ),
        };
        lock(&self.rows).insert(key, row);
    }

    pub fn row(&self, id: &str) -> Option<RemoteExpenseRow> {
        lock(&self.rows).get(id).cloned()
    }

    pub fn expense(&self, id: &str) -> Option<Expense> {
        self.row(id).and_then(|row| row.into_expense().ok())
    }

    pub fn len(&self) -> usize {
        lock(&self.rows).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Operation ids accepted so far, in delivery order.
    pub fn delivered_op_ids(&self) -> Vec<String> {
        lock(&self.delivered_ops).clone()
    }

    pub fn pull_count(&self) -> u64 {
        self.pulls.load(Ordering::SeqCst)
    }

    fn check_reachable(&self, record_id: &str) -> Result<(), GatewayError> {
        if !self.is_online() {
            return Err(GatewayError::Offline);
        }
        if lock(&self.failing_records).contains(record_id) {
            return Err(GatewayError::Rejected(format!(
                "record {} rejected by remote",
                record_id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteGateway for MemoryGateway {
    async fn send(&self, op: &OutboxOp) -> Result<(), GatewayError> {
        self.check_reachable(op.record_id())?;

        match &op.payload {
            OutboxPayload::UpsertExpense { expense } => {
                self.put_expense(expense);
            }
            OutboxPayload::DeleteExpense { expense_id, .. } => {
                let now = format_timestamp(self.clock.now());
                let mut rows = lock(&self.rows);
                if let Some(row) = rows.get_mut(expense_id) {
                    row.deleted = Some(true);
                    row.updated_at = Some(now);
                }
            }
        }

        lock(&self.delivered_ops).push(op.op_id.clone());
        Ok(())
    }

    async fn pull_since(
        &self,
        cursor: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<RemoteExpenseRow>, GatewayError> {
        if !self.is_online() {
            return Err(GatewayError::Offline);
        }
        self.pulls.fetch_add(1, Ordering::SeqCst);

        let mut rows = lock(&self.rows)
            .values()
            .filter(|row| match (cursor, row.updated_at()) {
                (None, _) => true,
                (Some(cursor), Some(updated_at)) => updated_at > cursor,
                (Some(_), None) => false,
            })
            .cloned()
            .collect::<Vec<_>>();
        rows.sort_by_key(|row| row.updated_at());
        rows.truncate(limit);
        Ok(rows)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
