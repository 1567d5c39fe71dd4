use crate::core::{Result, SyncError};
use crate::outbox::BackoffPolicy;
use crate::storage::SnapshotCodec;
use std::path::PathBuf;
use std::time::Duration;

/// Sync engine configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Directory holding the persisted snapshots (file-backed hosts only)
    pub data_dir: PathBuf,

    /// Maximum rows fetched by one pull
    pub pull_page_size: usize,

    /// Interval between scheduled reconciliation ticks
    pub tick_interval: Duration,

    /// Retry schedule for failed outbox deliveries
    pub backoff: BackoffPolicy,

    /// Snapshot encoding
    pub codec: SnapshotCodec,

    /// Currency used when none is given
    pub default_currency: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".monthfinance"),
            pull_page_size: 2000,
            tick_interval: Duration::from_secs(8),
            backoff: BackoffPolicy::EveryTick,
            codec: SnapshotCodec::Json,
            default_currency: "USD".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the data directory
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Set the pull page size (at least 1)
    pub fn pull_page_size(mut self, size: usize) -> Self {
        self.pull_page_size = size.max(1);
        self
    }

    /// Set the tick interval
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set the retry schedule
    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the snapshot codec
    pub fn codec(mut self, codec: SnapshotCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Set the default currency
    pub fn default_currency(mut self, currency: &str) -> Self {
        self.default_currency = currency.trim().to_ascii_uppercase();
        self
    }

    /// Reads overrides from the environment:
    /// `MONTHFINANCE_DATA_DIR`, `MONTHFINANCE_PULL_PAGE_SIZE`,
    /// `MONTHFINANCE_TICK_INTERVAL_MS`, `MONTHFINANCE_CODEC`,
    /// `MONTHFINANCE_BACKOFF_INITIAL_MS` / `MONTHFINANCE_BACKOFF_MAX_MS`,
    /// `MONTHFINANCE_CURRENCY`.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let mut config = Self::default()
            .data_dir(env_string(
                "MONTHFINANCE_DATA_DIR",
                &defaults.data_dir.to_string_lossy(),
            ))
            .pull_page_size(
                env_u64("MONTHFINANCE_PULL_PAGE_SIZE", defaults.pull_page_size as u64)? as usize,
            )
            .tick_interval(Duration::from_millis(env_u64(
                "MONTHFINANCE_TICK_INTERVAL_MS",
                defaults.tick_interval.as_millis() as u64,
            )?))
            .default_currency(&env_string("MONTHFINANCE_CURRENCY", &defaults.default_currency));

        let codec_name = env_string("MONTHFINANCE_CODEC", defaults.codec.as_str());
        config.codec = SnapshotCodec::parse(&codec_name).ok_or_else(|| {
            SyncError::Config(format!("MONTHFINANCE_CODEC: unknown codec '{}'", codec_name))
        })?;

        if std::env::var("MONTHFINANCE_BACKOFF_INITIAL_MS").is_ok() {
            let initial = env_u64("MONTHFINANCE_BACKOFF_INITIAL_MS", 1_000)?;
            let max = env_u64("MONTHFINANCE_BACKOFF_MAX_MS", 5 * 60_000)?;
            config.backoff = BackoffPolicy::exponential(initial, max);
        }
        Ok(config)
    }
}

/// Connection settings for the hosted remote table
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Project base URL, e.g. `https://<project>.supabase.co`
    pub url: String,

    /// Public API key, sent as `apikey` and bearer token
    pub anon_key: String,

    /// Per-request timeout
    pub timeout: Duration,
}

impl RemoteConfig {
    pub fn new(url: &str, anon_key: &str) -> Self {
        Self {
            url: normalize_base_url(url),
            anon_key: anon_key.trim().to_string(),
            timeout: Duration::from_secs(15),
        }
    }

    /// Set the per-request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Reads `SUPABASE_URL`, `SUPABASE_ANON_KEY` and `SUPABASE_TIMEOUT_MS`.
    ///
    /// Returns `None` when the URL or key is unset, meaning the host runs offline.
    pub fn from_env() -> Result<Option<Self>> {
        let url = std::env::var("SUPABASE_URL").unwrap_or_default();
        let anon_key = std::env::var("SUPABASE_ANON_KEY").unwrap_or_default();
        if url.trim().is_empty() || anon_key.trim().is_empty() {
            return Ok(None);
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(SyncError::Config(format!(
                "SUPABASE_URL must start with http:// or https://, got '{}'",
                url
            )));
        }
        let timeout = Duration::from_millis(env_u64("SUPABASE_TIMEOUT_MS", 15_000)?);
        Ok(Some(Self::new(&url, &anon_key).timeout(timeout)))
    }
}

pub fn normalize_base_url(input: &str) -> String {
    input.trim().trim_end_matches('/').to_string()
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
    let raw = std::env::var(key).unwrap_or_else(|_| default.to_string());
    raw.trim()
        .parse::<u64>()
        .map_err(|e| SyncError::Config(format!("{}: invalid number '{}': {}", key, raw, e)))
}
