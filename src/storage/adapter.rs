use super::codec::SnapshotCodec;
use crate::core::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;

/// Durable key-value persistence.
///
/// A single `save` must be atomic for its key: readers observe either the previous
/// value or the new one, never a torn write.
pub trait PersistenceAdapter: Send + Sync {
    /// Returns the bytes stored under `key`, or `None` if nothing was ever saved.
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Replaces the value stored under `key`.
    fn save(&self, key: &str, bytes: &[u8]) -> Result<()>;
}

/// One typed value stored under a fixed key of a [`PersistenceAdapter`].
pub struct PersistSlot<T> {
    adapter: Arc<dyn PersistenceAdapter>,
    codec: SnapshotCodec,
    key: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> PersistSlot<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(
        adapter: Arc<dyn PersistenceAdapter>,
        codec: SnapshotCodec,
        key: impl Into<String>,
    ) -> Self {
        Self {
            adapter,
            codec,
            key: key.into(),
            _marker: PhantomData,
        }
    }

    pub fn load(&self) -> Result<Option<T>> {
        match self.adapter.load(&self.key)? {
            Some(bytes) => self.codec.decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    pub fn save(&self, value: &T) -> Result<()> {
        let bytes = self.codec.encode(value)?;
        self.adapter.save(&self.key, &bytes)
    }
}

impl<T> std::fmt::Debug for PersistSlot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistSlot")
            .field("key", &self.key)
            .field("codec", &self.codec)
            .finish()
    }
}
