//! Authoritative in-memory snapshot of all known expenses.
//!
//! Records are grouped by month; the month grouping is only an index, identity is
//! the record id. Every mutation is written through to the persistence adapter
//! before it returns, and rolled back in memory if that write fails.

use crate::core::{Expense, MonthData, Result, SyncError};
use crate::merge::{MergeDecision, merge};
use crate::storage::{PersistSlot, PersistenceAdapter, SnapshotCodec, keys};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{Level, event};

const STORE_FORMAT_VERSION: u32 = 1;

/// Persisted form of the record store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    pub version: u32,
    pub months: BTreeMap<String, MonthData>,
}

pub struct RecordStore {
    months: BTreeMap<String, BTreeMap<String, Expense>>,
    locations: HashMap<String, String>,
    slot: PersistSlot<StoreSnapshot>,
}

impl RecordStore {
    /// Loads the persisted snapshot, or starts empty when none exists.
    pub fn open(adapter: Arc<dyn PersistenceAdapter>, codec: SnapshotCodec) -> Result<Self> {
        let slot: PersistSlot<StoreSnapshot> = PersistSlot::new(adapter, codec, keys::RECORD_STORE);
        let mut store = Self {
            months: BTreeMap::new(),
            locations: HashMap::new(),
            slot,
        };

        if let Some(snapshot) = store.slot.load()? {
            if snapshot.version != STORE_FORMAT_VERSION {
                return Err(SyncError::SnapshotVersion {
                    key: keys::RECORD_STORE.to_string(),
                    found: snapshot.version,
                    expected: STORE_FORMAT_VERSION,
                });
            }
            for (_, month) in snapshot.months {
                for expense in month.expenses {
                    if let Err(err) = expense.validate() {
                        event!(Level::WARN, error = %err, "skipping malformed persisted expense");
                        continue;
                    }
                    store.insert_in_memory(expense);
                }
            }
        }

        event!(
            Level::DEBUG,
            records = store.locations.len(),
            months = store.months.len(),
            "record store opened"
        );
        Ok(store)
    }

    /// Inserts or replaces the record with the same id.
    ///
    /// A record whose month changed is moved out of its previous month. Returns
    /// the replaced copy, if any.
    pub fn upsert(&mut self, record: Expense) -> Result<Option<Expense>> {
        record.validate()?;
        let id = record.id.clone();
        let previous = self.insert_in_memory(record);

        if let Err(err) = self.persist() {
            self.remove_in_memory(&id);
            if let Some(previous) = previous {
                self.insert_in_memory(previous);
            }
            event!(
                Level::ERROR,
                error = %err,
                record_id = %id,
                "record store write-through failed"
            );
            return Err(err);
        }
        Ok(previous)
    }

    /// Hard-removes a record. Only meant for local records that never synced;
    /// synced deletions are tombstones written through [`RecordStore::upsert`].
    pub fn delete(&mut self, month_key: &str, id: &str) -> Result<Option<Expense>> {
        if self.locations.get(id).map(String::as_str) != Some(month_key) {
            return Ok(None);
        }
        let removed = self.remove_in_memory(id);

        if let Err(err) = self.persist() {
            if let Some(removed) = removed {
                self.insert_in_memory(removed);
            }
            event!(
                Level::ERROR,
                error = %err,
                record_id = %id,
                "record store write-through failed"
            );
            return Err(err);
        }
        Ok(removed)
    }

    /// Runs `incoming` through the conflict policy and upserts it when it wins.
    pub fn merge_incoming(&mut self, incoming: Expense) -> Result<MergeDecision> {
        let decision = merge(self.find(&incoming.id), &incoming);
        if decision.is_apply() {
            self.upsert(incoming)?;
        }
        Ok(decision)
    }

    pub fn get(&self, month_key: &str, id: &str) -> Option<&Expense> {
        self.months.get(month_key).and_then(|month| month.get(id))
    }

    /// Looks a record up by id alone; ids are unique across months.
    pub fn find(&self, id: &str) -> Option<&Expense> {
        let month_key = self.locations.get(id)?;
        self.get(month_key, id)
    }

    /// Non-deleted records of a month, newest date first.
    pub fn list_active(&self, month_key: &str) -> Vec<Expense> {
        self.list_all(month_key)
            .into_iter()
            .filter(Expense::is_active)
            .collect()
    }

    /// Every record of a month, tombstones included.
    pub fn list_all(&self, month_key: &str) -> Vec<Expense> {
        let mut expenses = self
            .months
            .get(month_key)
            .map(|month| month.values().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        sort_for_display(&mut expenses);
        expenses
    }

    /// Sum of active amounts of a month, per currency.
    pub fn month_total(&self, month_key: &str) -> BTreeMap<String, Decimal> {
        let mut totals = BTreeMap::new();
        if let Some(month) = self.months.get(month_key) {
            for expense in month.values().filter(|e| e.is_active()) {
                *totals
                    .entry(expense.currency.clone())
                    .or_insert(Decimal::ZERO) += expense.amount;
            }
        }
        totals
    }

    pub fn months(&self) -> Vec<String> {
        self.months.keys().cloned().collect()
    }

    /// Number of stored records, tombstones included.
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let months = self
            .months
            .keys()
            .map(|month_key| {
                (
                    month_key.clone(),
                    MonthData {
                        month_key: month_key.clone(),
                        expenses: self.list_all(month_key),
                    },
                )
            })
            .collect();
        StoreSnapshot {
            version: STORE_FORMAT_VERSION,
            months,
        }
    }

    fn persist(&self) -> Result<()> {
        self.slot.save(&self.snapshot())
    }

    fn insert_in_memory(&mut self, record: Expense) -> Option<Expense> {
        let previous = self.remove_in_memory(&record.id);
        self.locations
            .insert(record.id.clone(), record.month_key.clone());
        self.months
            .entry(record.month_key.clone())
            .or_default()
            .insert(record.id.clone(), record);
        previous
    }

    fn remove_in_memory(&mut self, id: &str) -> Option<Expense> {
        let month_key = self.locations.remove(id)?;
        let month = self.months.get_mut(&month_key)?;
        let removed = month.remove(id);
        if month.is_empty() {
            self.months.remove(&month_key);
        }
        removed
    }
}

fn sort_for_display(expenses: &mut [Expense]) {
    expenses.sort_by(|a, b| {
        b.date
            .cmp(&a.date)
            .then(b.created_at.cmp(&a.created_at))
            .then(a.id.cmp(&b.id))
    });
}
