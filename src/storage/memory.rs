use super::adapter::PersistenceAdapter;
use crate::core::{Result, SyncError};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// In-memory persistence, for tests and ephemeral hosts.
///
/// Writes can be made to fail on demand to exercise local persistence failures.
#[derive(Debug)]
pub struct MemoryAdapter {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    /// Saves still allowed to succeed; `UNLIMITED` disables failure injection.
    write_budget: AtomicU64,
    /// When set, only saves to this key draw from the budget.
    scope: Mutex<Option<String>>,
    saves: AtomicU64,
}

const UNLIMITED: u64 = u64::MAX;

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            write_budget: AtomicU64::new(UNLIMITED),
            scope: Mutex::new(None),
            saves: AtomicU64::new(0),
        }
    }
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `save` fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        let budget = if fail { 0 } else { UNLIMITED };
        self.arm(None, budget);
    }

    /// Lets the next `successes` saves through, then fails every later one until
    /// [`MemoryAdapter::fail_writes`] resets it.
    pub fn fail_writes_after(&self, successes: u64) {
        self.arm(None, successes.min(UNLIMITED - 1));
    }

    /// Like [`MemoryAdapter::fail_writes_after`], counting and failing only saves
    /// to `key`.
    pub fn fail_key_writes_after(&self, key: &str, successes: u64) {
        self.arm(Some(key.to_string()), successes.min(UNLIMITED - 1));
    }

    fn arm(&self, scope: Option<String>, budget: u64) {
        if let Ok(mut current) = self.scope.lock() {
            *current = scope;
        }
        self.write_budget.store(budget, Ordering::SeqCst);
    }

    fn in_scope(&self, key: &str) -> Result<bool> {
        let scope = self.scope.lock()?;
        Ok(scope.as_deref().is_none_or(|scoped| scoped == key))
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .map(|entries| entries.contains_key(key))
            .unwrap_or(false)
    }
}

impl PersistenceAdapter for MemoryAdapter {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.lock()?;
        Ok(entries.get(key).cloned())
    }

    fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let allowed = !self.in_scope(key)?
            || self
                .write_budget
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                    UNLIMITED => Some(UNLIMITED),
                    0 => None,
                    n => Some(n - 1),
                })
                .is_ok();
        if !allowed {
            return Err(SyncError::Persistence(format!(
                "write to '{}' rejected (simulated failure)",
                key
            )));
        }
        let mut entries = self.entries.lock()?;
        entries.insert(key.to_string(), bytes.to_vec());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
