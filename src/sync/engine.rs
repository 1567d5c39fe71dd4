use super::cursor::SyncCursor;
use super::report::{PullReport, TickOutcome, TickReport};
use crate::config::SyncConfig;
use crate::core::{
    Clock, Expense, ExpenseCategory, NewExpense, Result, SyncError, month_key_from_date,
    validate_month_key,
};
use crate::gateway::{RemoteExpenseRow, RemoteGateway};
use crate::ingest::ReceiptCandidate;
use crate::merge::MergeDecision;
use crate::outbox::{DrainReport, Outbox, OutboxOp, dispatch};
use crate::store::RecordStore;
use crate::storage::PersistenceAdapter;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{Instrument, Level, event, info_span};

/// State mutated by both user actions and reconciliation. Always accessed under
/// one lock, never held across a network call.
pub struct EngineState {
    pub store: RecordStore,
    pub outbox: Outbox,
    pub cursor: SyncCursor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub records: usize,
    pub pending_ops: usize,
    pub cursor: Option<DateTime<Utc>>,
    pub last_report: Option<TickReport>,
}

/// Local-first sync engine: record store, outbox and cursor behind one lock, plus
/// the gateway they reconcile against.
pub struct SyncEngine {
    state: Mutex<EngineState>,
    gateway: Arc<dyn RemoteGateway>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    tick_gate: tokio::sync::Mutex<()>,
    last_report: Mutex<Option<TickReport>>,
}

impl SyncEngine {
    /// Restores the store, outbox and cursor from `adapter`.
    pub fn open(
        adapter: Arc<dyn PersistenceAdapter>,
        gateway: Arc<dyn RemoteGateway>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Result<Self> {
        let store = RecordStore::open(adapter.clone(), config.codec)?;
        let outbox = Outbox::open(adapter.clone(), config.codec)?;
        let cursor = SyncCursor::open(adapter, config.codec)?;
        event!(
            Level::INFO,
            records = store.len(),
            pending_ops = outbox.len(),
            cursor = ?cursor.get(),
            "sync engine opened"
        );

        Ok(Self {
            state: Mutex::new(EngineState {
                store,
                outbox,
                cursor,
            }),
            gateway,
            clock,
            config,
            tick_gate: tokio::sync::Mutex::new(()),
            last_report: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Local mutations
    // ------------------------------------------------------------------

    /// Creates an expense and queues it for upload.
    pub fn add_expense(&self, draft: NewExpense) -> Result<Expense> {
        let created = draft.into_expense(self.clock.now());
        self.with_state(|state| commit_local(state, created.clone()))?;
        event!(Level::INFO, record_id = %created.id, month = %created.month_key, "expense added");
        Ok(created)
    }

    /// Replaces the editable fields of an existing expense.
    ///
    /// `created_at` is kept from the stored copy and the partition follows the date.
    pub fn update_expense(&self, edited: Expense) -> Result<Expense> {
        let now = self.clock.now();
        let updated = self.with_state(|state| {
            let existing = state
                .store
                .find(&edited.id)
                .filter(|existing| existing.is_active())
                .cloned()
                .ok_or_else(|| {
                    SyncError::RecordNotFound(edited.id.clone(), edited.month_key.clone())
                })?;
            let mut updated = edited;
            updated.created_at = existing.created_at;
            updated.month_key = month_key_from_date(updated.date);
            updated.updated_at = existing.touched(now).updated_at;
            commit_local(state, updated.clone())?;
            Ok(updated)
        })?;
        event!(Level::INFO, record_id = %updated.id, "expense updated");
        Ok(updated)
    }

    /// Deletes an expense.
    ///
    /// A known record becomes a tombstone that is uploaded like any edit. An id
    /// unknown locally only gets a delete marker sent to the remote.
    pub fn remove_expense(&self, month_key: &str, id: &str) -> Result<Option<Expense>> {
        let now = self.clock.now();
        let removed = self.with_state(|state| {
            match state.store.find(id).cloned() {
                Some(existing) if existing.deleted => Ok(None),
                Some(existing) => {
                    let tombstone = existing.tombstone(now);
                    commit_local(state, tombstone.clone())?;
                    Ok(Some(tombstone))
                }
                None => {
                    state.outbox.enqueue(OutboxOp::delete(month_key, id, now))?;
                    Ok(None)
                }
            }
        })?;
        event!(
            Level::INFO,
            record_id = %id,
            month = %month_key,
            tombstoned = removed.is_some(),
            "expense removed"
        );
        Ok(removed)
    }

    /// Sets the single "quick" expense of a category for a month, creating it on
    /// first use. Quick entries use the category name as vendor.
    pub fn upsert_monthly_quick(
        &self,
        month_key: &str,
        category: ExpenseCategory,
        amount: Decimal,
    ) -> Result<Expense> {
        validate_month_key(month_key)?;
        let now = self.clock.now();
        let date = quick_entry_date(month_key, now.date_naive())?;
        let currency = self.config.default_currency.clone();

        self.with_state(|state| {
            let existing = state
                .store
                .list_active(month_key)
                .into_iter()
                .find(|e| e.category == category && e.vendor == category.as_str());

            let record = match existing {
                Some(existing) => {
                    let mut record = existing.touched(now);
                    record.date = date;
                    record.amount = amount;
                    record
                }
                None => NewExpense::manual(date, category.as_str(), amount, currency, category)
                    .into_expense(now),
            };
            commit_local(state, record.clone())?;
            Ok(record)
        })
    }

    /// Imports a receipt candidate as an email-sourced expense.
    pub fn import_receipt(
        &self,
        candidate: &ReceiptCandidate,
        category: ExpenseCategory,
    ) -> Result<Expense> {
        if !candidate.is_importable() {
            return Err(SyncError::InvalidRecord(format!(
                "receipt candidate {} is already {:?}",
                candidate.id, candidate.status
            )));
        }
        let imported = self.add_expense(candidate.to_new_expense(category))?;
        event!(
            Level::INFO,
            candidate_id = %candidate.id,
            record_id = %imported.id,
            "receipt imported"
        );
        Ok(imported)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn get(&self, month_key: &str, id: &str) -> Result<Option<Expense>> {
        self.with_state(|state| Ok(state.store.get(month_key, id).cloned()))
    }

    pub fn find(&self, id: &str) -> Result<Option<Expense>> {
        self.with_state(|state| Ok(state.store.find(id).cloned()))
    }

    pub fn list_active(&self, month_key: &str) -> Result<Vec<Expense>> {
        self.with_state(|state| Ok(state.store.list_active(month_key)))
    }

    pub fn month_total(&self, month_key: &str) -> Result<BTreeMap<String, Decimal>> {
        self.with_state(|state| Ok(state.store.month_total(month_key)))
    }

    pub fn months(&self) -> Result<Vec<String>> {
        self.with_state(|state| Ok(state.store.months()))
    }

    pub fn pending_ops(&self) -> Result<Vec<OutboxOp>> {
        self.with_state(|state| Ok(state.outbox.pending()))
    }

    pub fn cursor(&self) -> Result<Option<DateTime<Utc>>> {
        self.with_state(|state| Ok(state.cursor.get()))
    }

    pub fn last_report(&self) -> Option<TickReport> {
        self.last_report
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn status(&self) -> Result<EngineStatus> {
        let last_report = self.last_report();
        self.with_state(|state| {
            Ok(EngineStatus {
                records: state.store.len(),
                pending_ops: state.outbox.len(),
                cursor: state.cursor.get(),
                last_report,
            })
        })
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    /// Drains the outbox, then pulls and merges one page of remote changes.
    ///
    /// Phases are isolated: a failure in one is recorded in the report and does not
    /// stop the other. Returns [`TickOutcome::Skipped`] when another tick is running.
    pub async fn tick(&self) -> TickOutcome {
        let Ok(_gate) = self.tick_gate.try_lock() else {
            event!(Level::DEBUG, "reconciliation already in flight; trigger skipped");
            return TickOutcome::Skipped;
        };

        let started_at = self.clock.now();
        let span = info_span!("reconciler.tick", started_at = %started_at);
        let report = self.run_tick(started_at).instrument(span).await;

        match self.last_report.lock() {
            Ok(mut guard) => *guard = Some(report.clone()),
            Err(poisoned) => *poisoned.into_inner() = Some(report.clone()),
        }
        TickOutcome::Completed(report)
    }

    /// Pulls page after page until a short page, a halted merge, a failure or
    /// `max_pages`. Waits for a running tick instead of skipping.
    pub async fn backfill(&self, max_pages: usize) -> Result<Vec<PullReport>> {
        let _gate = self.tick_gate.lock().await;
        let mut pages = Vec::new();
        for _ in 0..max_pages {
            let (report, errors) = self.pull_once().await?;
            for error in &errors {
                event!(Level::WARN, error = %error, "backfill page had errors");
            }
            let more = report.pulled >= self.config.pull_page_size && !report.halted;
            pages.push(report);
            if !more {
                break;
            }
        }
        Ok(pages)
    }

    async fn run_tick(&self, started_at: DateTime<Utc>) -> TickReport {
        let mut report = TickReport {
            started_at: Some(started_at),
            ..TickReport::default()
        };

        match self.drain_outbox(started_at).await {
            Ok(drain) => {
                for failure in &drain.failures {
                    report.remote_refused |= failure.refused;
                    report.errors.push(format!(
                        "send {} ({}): {}",
                        failure.op_id, failure.record_id, failure.error
                    ));
                }
                report.drain = Some(drain);
            }
            Err(err) => {
                event!(Level::ERROR, error = %err, "outbox drain failed");
                report.errors.push(format!("drain: {}", err));
            }
        }

        match self.pull_once().await {
            Ok((pull, errors)) => {
                report.errors.extend(errors);
                report.pull = Some(pull);
            }
            Err(SyncError::Remote(err)) if err.is_auth_or_throttle() => {
                event!(
                    Level::ERROR,
                    error = %err,
                    "remote refused pull (credentials or rate limit)"
                );
                report.remote_refused = true;
                report.errors.push(format!("pull refused: {}", err));
            }
            Err(err) => {
                event!(Level::WARN, error = %err, "pull failed");
                report.errors.push(format!("pull: {}", err));
            }
        }

        event!(Level::INFO, summary = %report.summary(), "reconciliation tick finished");
        report
    }

    async fn drain_outbox(&self, now: DateTime<Utc>) -> Result<DrainReport> {
        let batch = self.with_state(|state| Ok(state.outbox.pending()))?;
        if batch.is_empty() {
            return Ok(DrainReport::default());
        }
        let outcomes = dispatch(&batch, self.gateway.as_ref(), &self.config.backoff, now).await;
        self.with_state(|state| state.outbox.settle(&outcomes))
    }

    /// One pull-and-merge pass. Transport failures are returned as errors; per-row
    /// problems are listed alongside the report.
    async fn pull_once(&self) -> Result<(PullReport, Vec<String>)> {
        let cursor = self.with_state(|state| Ok(state.cursor.get()))?;
        let rows = self
            .gateway
            .pull_since(cursor, self.config.pull_page_size)
            .await?;
        self.with_state(|state| Ok(apply_pulled(state, rows)))
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut EngineState) -> Result<R>) -> Result<R> {
        let mut guard = self.state.lock()?;
        f(&mut guard)
    }
}

/// Upserts locally, then queues the upload. If the enqueue fails the store is put
/// back the way it was and the enqueue error is returned. When even that undo
/// fails the record is left stored without an upload, reported as
/// [`SyncError::UnqueuedChange`].
fn commit_local(state: &mut EngineState, record: Expense) -> Result<()> {
    let previous = state.store.upsert(record.clone())?;
    let enqueued_at = record.updated_at;
    let Err(err) = state.outbox.enqueue(OutboxOp::upsert(record.clone(), enqueued_at)) else {
        return Ok(());
    };

    let restored = match previous {
        Some(previous) => state.store.upsert(previous).map(|_| ()),
        None => state
            .store
            .delete(&record.month_key, &record.id)
            .map(|_| ()),
    };
    match restored {
        Ok(()) => Err(err),
        Err(restore_err) => {
            event!(
                Level::ERROR,
                record_id = %record.id,
                error = %restore_err,
                "could not undo local write after failed enqueue"
            );
            Err(SyncError::UnqueuedChange {
                record_id: record.id,
                cause: err.to_string(),
            })
        }
    }
}

/// Merges a pulled page in ascending `updated_at` order and advances the cursor.
///
/// Malformed rows are skipped. A failed local write halts the page; the cursor
/// then stays strictly below the failed row's timestamp, so that row and any
/// sharing its timestamp are pulled again.
fn apply_pulled(
    state: &mut EngineState,
    mut rows: Vec<RemoteExpenseRow>,
) -> (PullReport, Vec<String>) {
    rows.sort_by_key(|row| row.updated_at());
    let mut report = PullReport {
        pulled: rows.len(),
        ..PullReport::default()
    };
    let mut errors = Vec::new();
    let mut processed: Vec<DateTime<Utc>> = Vec::with_capacity(rows.len());
    let mut halted_at: Option<DateTime<Utc>> = None;

    for row in rows {
        let row_updated_at = row.updated_at();
        match row.into_expense() {
            Ok(expense) => {
                let record_id = expense.id.clone();
                match state.store.merge_incoming(expense) {
                    Ok(MergeDecision::Apply) => report.applied += 1,
                    Ok(MergeDecision::Ignore) => report.ignored += 1,
                    Err(err) => {
                        event!(
                            Level::ERROR,
                            record_id = %record_id,
                            error = %err,
                            "merge write failed; halting page"
                        );
                        errors.push(format!("merge {}: {}", record_id, err));
                        report.halted = true;
                        halted_at = row_updated_at;
                        break;
                    }
                }
            }
            Err(err) => {
                event!(Level::WARN, error = %err, "rejected malformed remote row");
                errors.push(format!("rejected row: {}", err));
                report.rejected += 1;
            }
        }
        processed.extend(row_updated_at);
    }

    let watermark = processed
        .into_iter()
        .filter(|at| halted_at.is_none_or(|halt| *at < halt))
        .max();
    if let Some(watermark) = watermark {
        if let Err(err) = state.cursor.advance(watermark) {
            event!(
                Level::ERROR,
                error = %err,
                "cursor persist failed; page will be pulled again"
            );
            errors.push(format!("cursor: {}", err));
        }
    }
    report.cursor = state.cursor.get();
    (report, errors)
}

/// Today when it falls in `month_key`, otherwise the first day of that month.
fn quick_entry_date(month_key: &str, today: NaiveDate) -> Result<NaiveDate> {
    if month_key_from_date(today) == month_key {
        return Ok(today);
    }
    let (year, month) = month_key
        .split_once('-')
        .and_then(|(y, m)| Some((y.parse::<i32>().ok()?, m.parse::<u32>().ok()?)))
        .ok_or_else(|| {
            SyncError::InvalidRecord(format!("month key '{}' is not YYYY-MM", month_key))
        })?;
    NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| {
        SyncError::InvalidRecord(format!("month key '{}' is out of range", month_key))
    })
}
