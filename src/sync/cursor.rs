use crate::core::{Result, SyncError};
use crate::storage::{PersistSlot, PersistenceAdapter, SnapshotCodec, keys};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const CURSOR_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CursorSnapshot {
    version: u32,
    last_pull_at: Option<DateTime<Utc>>,
}

/// Watermark of the newest remote `updated_at` already pulled. Never moves back.
pub struct SyncCursor {
    watermark: Option<DateTime<Utc>>,
    slot: PersistSlot<CursorSnapshot>,
}

impl SyncCursor {
    pub fn open(adapter: Arc<dyn PersistenceAdapter>, codec: SnapshotCodec) -> Result<Self> {
        let slot: PersistSlot<CursorSnapshot> = PersistSlot::new(adapter, codec, keys::SYNC_CURSOR);
        let watermark = match slot.load()? {
            Some(snapshot) if snapshot.version == CURSOR_FORMAT_VERSION => snapshot.last_pull_at,
            Some(snapshot) => {
                return Err(SyncError::SnapshotVersion {
                    key: keys::SYNC_CURSOR.to_string(),
                    found: snapshot.version,
                    expected: CURSOR_FORMAT_VERSION,
                });
            }
            None => None,
        };
        Ok(Self { watermark, slot })
    }

    pub fn get(&self) -> Option<DateTime<Utc>> {
        self.watermark
    }

    /// Moves the watermark to `candidate` if that is newer, and persists it.
    ///
    /// Returns whether the watermark moved. A failed write leaves it unchanged.
    pub fn advance(&mut self, candidate: DateTime<Utc>) -> Result<bool> {
        if self.watermark.is_some_and(|current| candidate <= current) {
            return Ok(false);
        }
        self.slot.save(&CursorSnapshot {
            version: CURSOR_FORMAT_VERSION,
            last_pull_at: Some(candidate),
        })?;
        self.watermark = Some(candidate);
        Ok(true)
    }
}
