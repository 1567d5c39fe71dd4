//! Durable log of local mutations not yet acknowledged by the remote store.
//!
//! Operations are kept in enqueue order. Each one is delivered independently: a
//! failure leaves that operation in place, in its original relative order, for the
//! next drain and never holds back the others.

pub mod backoff;

pub use backoff::{BackoffPolicy, BackoffStrategy};

use crate::core::{Expense, Result, SyncError, new_record_id};
use crate::gateway::RemoteGateway;
use crate::storage::{PersistSlot, PersistenceAdapter, SnapshotCodec, keys};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};

const OUTBOX_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpKind {
    Upsert,
    Delete,
}

/// What an operation asks the remote store to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboxPayload {
    UpsertExpense {
        expense: Expense,
    },
    #[serde(rename_all = "camelCase")]
    DeleteExpense {
        expense_id: String,
        month_key: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxOp {
    pub op_id: String,
    pub enqueued_at: DateTime<Utc>,
    pub payload: OutboxPayload,
    /// Failed delivery attempts so far.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl OutboxOp {
    pub fn upsert(expense: Expense, now: DateTime<Utc>) -> Self {
        Self::with_payload(OutboxPayload::UpsertExpense { expense }, now)
    }

    pub fn delete(
        month_key: impl Into<String>,
        expense_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self::with_payload(
            OutboxPayload::DeleteExpense {
                expense_id: expense_id.into(),
                month_key: month_key.into(),
            },
            now,
        )
    }

    fn with_payload(payload: OutboxPayload, now: DateTime<Utc>) -> Self {
        Self {
            op_id: new_record_id(),
            enqueued_at: now,
            payload,
            attempts: 0,
            last_attempt_at: None,
            last_error: None,
        }
    }

    pub fn kind(&self) -> OpKind {
        match self.payload {
            OutboxPayload::UpsertExpense { .. } => OpKind::Upsert,
            OutboxPayload::DeleteExpense { .. } => OpKind::Delete,
        }
    }

    pub fn record_id(&self) -> &str {
        match &self.payload {
            OutboxPayload::UpsertExpense { expense } => &expense.id,
            OutboxPayload::DeleteExpense { expense_id, .. } => expense_id,
        }
    }

    pub fn month_key(&self) -> &str {
        match &self.payload {
            OutboxPayload::UpsertExpense { expense } => &expense.month_key,
            OutboxPayload::DeleteExpense { month_key, .. } => month_key,
        }
    }
}

/// Result of one delivery attempt within a drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Flushed { op_id: String },
    Failed {
        op_id: String,
        error: String,
        at: DateTime<Utc>,
        /// The remote rejected the credentials or throttled the request.
        refused: bool,
    },
    /// Not attempted: the backoff strategy says the operation is not due yet.
    Deferred { op_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpFailure {
    pub op_id: String,
    pub record_id: String,
    pub kind: OpKind,
    pub error: String,
    pub refused: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    pub flushed: usize,
    pub remaining: usize,
    pub deferred: usize,
    pub failures: Vec<OpFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutboxSnapshot {
    version: u32,
    ops: Vec<OutboxOp>,
}

pub struct Outbox {
    ops: Vec<OutboxOp>,
    slot: PersistSlot<OutboxSnapshot>,
}

impl Outbox {
    pub fn open(adapter: Arc<dyn PersistenceAdapter>, codec: SnapshotCodec) -> Result<Self> {
        let slot: PersistSlot<OutboxSnapshot> = PersistSlot::new(adapter, codec, keys::OUTBOX);
        let ops = match slot.load()? {
            Some(snapshot) if snapshot.version == OUTBOX_FORMAT_VERSION => snapshot.ops,
            Some(snapshot) => {
                return Err(SyncError::SnapshotVersion {
                    key: keys::OUTBOX.to_string(),
                    found: snapshot.version,
                    expected: OUTBOX_FORMAT_VERSION,
                });
            }
            None => Vec::new(),
        };
        event!(Level::DEBUG, pending = ops.len(), "outbox opened");
        Ok(Self { ops, slot })
    }

    /// Appends an operation to the durable log. Fails only when persistence fails,
    /// in which case the log is left unchanged.
    pub fn enqueue(&mut self, op: OutboxOp) -> Result<()> {
        self.ops.push(op);
        if let Err(err) = self.persist() {
            let dropped = self.ops.pop();
            event!(
                Level::ERROR,
                error = %err,
                op_id = dropped.as_ref().map(|op| op.op_id.as_str()).unwrap_or_default(),
                "outbox enqueue failed"
            );
            return Err(err);
        }
        Ok(())
    }

    /// Consistent copy of the queued operations, in order.
    pub fn pending(&self) -> Vec<OutboxOp> {
        self.ops.clone()
    }

    pub fn ops(&self) -> &[OutboxOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Applies delivery outcomes: flushed operations are removed, failed ones keep
    /// their position with updated attempt bookkeeping. Operations enqueued after
    /// the batch was taken are untouched.
    pub fn settle(&mut self, outcomes: &[DispatchOutcome]) -> Result<DrainReport> {
        let mut by_id: HashMap<&str, &DispatchOutcome> = HashMap::with_capacity(outcomes.len());
        for outcome in outcomes {
            let op_id = match outcome {
                DispatchOutcome::Flushed { op_id }
                | DispatchOutcome::Failed { op_id, .. }
                | DispatchOutcome::Deferred { op_id } => op_id.as_str(),
            };
            by_id.insert(op_id, outcome);
        }

        let mut report = DrainReport::default();
        let mut next = Vec::with_capacity(self.ops.len());
        for op in &self.ops {
            match by_id.get(op.op_id.as_str()) {
                Some(DispatchOutcome::Flushed { .. }) => report.flushed += 1,
                Some(DispatchOutcome::Failed {
                    error, at, refused, ..
                }) => {
                    let mut retained = op.clone();
                    retained.attempts = retained.attempts.saturating_add(1);
                    retained.last_attempt_at = Some(*at);
                    retained.last_error = Some(error.clone());
                    report.failures.push(OpFailure {
                        op_id: op.op_id.clone(),
                        record_id: op.record_id().to_string(),
                        kind: op.kind(),
                        error: error.clone(),
                        refused: *refused,
                    });
                    next.push(retained);
                }
                Some(DispatchOutcome::Deferred { .. }) => {
                    report.deferred += 1;
                    next.push(op.clone());
                }
                None => next.push(op.clone()),
            }
        }
        report.remaining = next.len();

        let previous = std::mem::replace(&mut self.ops, next);
        if let Err(err) = self.persist() {
            self.ops = previous;
            event!(Level::ERROR, error = %err, "outbox settle failed; operations will be resent");
            return Err(err);
        }
        Ok(report)
    }

    /// Delivers every queued operation once, independently, and keeps the ones
    /// that failed.
    pub async fn drain(
        &mut self,
        gateway: &dyn RemoteGateway,
        backoff: &dyn BackoffStrategy,
        now: DateTime<Utc>,
    ) -> Result<DrainReport> {
        let batch = self.pending();
        let outcomes = dispatch(&batch, gateway, backoff, now).await;
        self.settle(&outcomes)
    }

    fn persist(&self) -> Result<()> {
        self.slot.save(&OutboxSnapshot {
            version: OUTBOX_FORMAT_VERSION,
            ops: self.ops.clone(),
        })
    }
}

/// Sends each operation of `batch` in order. Failures are logged and recorded,
/// never propagated.
pub async fn dispatch(
    batch: &[OutboxOp],
    gateway: &dyn RemoteGateway,
    backoff: &dyn BackoffStrategy,
    now: DateTime<Utc>,
) -> Vec<DispatchOutcome> {
    let mut outcomes = Vec::with_capacity(batch.len());
    for op in batch {
        if !backoff.is_due(op, now) {
            outcomes.push(DispatchOutcome::Deferred {
                op_id: op.op_id.clone(),
            });
            continue;
        }

        let span = info_span!(
            "outbox.dispatch",
            op_id = %op.op_id,
            record_id = %op.record_id(),
            kind = ?op.kind(),
            attempts = op.attempts
        );
        match gateway.send(op).instrument(span).await {
            Ok(()) => {
                event!(Level::DEBUG, op_id = %op.op_id, "outbox operation flushed");
                outcomes.push(DispatchOutcome::Flushed {
                    op_id: op.op_id.clone(),
                });
            }
            Err(err) => {
                let refused = err.is_auth_or_throttle();
                if refused {
                    event!(
                        Level::ERROR,
                        op_id = %op.op_id,
                        error = %err,
                        "remote refused outbox operation (credentials or rate limit)"
                    );
                } else {
                    event!(
                        Level::WARN,
                        op_id = %op.op_id,
                        record_id = %op.record_id(),
                        error = %err,
                        "outbox operation failed; retained for retry"
                    );
                }
                outcomes.push(DispatchOutcome::Failed {
                    op_id: op.op_id.clone(),
                    error: err.to_string(),
                    at: now,
                    refused,
                });
            }
        }
    }
    outcomes
}
