use crate::core::{Result, SyncError};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Encoding used for persisted snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotCodec {
    #[default]
    Json,
    /// Compact binary encoding.
    MessagePack,
}

impl SnapshotCodec {
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Self::Json => serde_json::to_vec(value)
                .map_err(|e| SyncError::Codec(format!("Failed to serialize JSON snapshot: {}", e))),
            Self::MessagePack => rmp_serde::to_vec_named(value).map_err(|e| {
                SyncError::Codec(format!("Failed to serialize MessagePack snapshot: {}", e))
            }),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            Self::Json => serde_json::from_slice(bytes).map_err(|e| {
                SyncError::Codec(format!("Failed to deserialize JSON snapshot: {}", e))
            }),
            Self::MessagePack => rmp_serde::from_slice(bytes).map_err(|e| {
                SyncError::Codec(format!("Failed to deserialize MessagePack snapshot: {}", e))
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::MessagePack => "msgpack",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "msgpack" | "messagepack" | "rmp" => Some(Self::MessagePack),
            _ => None,
        }
    }
}
