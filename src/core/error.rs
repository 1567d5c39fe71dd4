use thiserror::Error;

/// Errors raised by local engine operations.
///
/// Remote failures are kept apart in [`GatewayError`]: they are transient and never
/// fatal to a local mutation.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Record '{0}' not found in partition '{1}'")]
    RecordNotFound(String, String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Unsupported snapshot version {found} for '{key}' (expected {expected})")]
    SnapshotVersion { key: String, found: u32, expected: u32 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("Remote error: {0}")]
    Remote(#[from] GatewayError),

    #[error("I/O error: {0}")]
    IoError(String),

    /// The change to `record_id` is in the local store but no upload is queued for
    /// it, and it could not be undone.
    #[error("Change to '{record_id}' was saved locally but not queued for upload: {cause}")]
    UnqueuedChange { record_id: String, cause: String },
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl<T> From<std::sync::PoisonError<T>> for SyncError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

/// Failures reported by a remote gateway.
///
/// Every variant is treated as transient by the reconciler: the outbox keeps the
/// operation and the cursor stays where it was.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("remote unreachable")]
    Offline,

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("undecodable response: {0}")]
    Decode(String),

    #[error("rejected by remote: {0}")]
    Rejected(String),
}

impl GatewayError {
    /// Whether the failure is an authorization or rate-limit response rather than
    /// a connectivity problem.
    pub fn is_auth_or_throttle(&self) -> bool {
        matches!(
            self,
            Self::Http { status, .. } if *status == 401 || *status == 403 || *status == 429
        )
    }
}
