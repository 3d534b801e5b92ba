//! Indexer configuration
//!
//! Everything is driven by environment variables (a `.env` file is honored)
//! with compiled-in defaults. `IP_RANGES` syntax is documented on
//! [`crate::iptools::parse_ip_ranges_str`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::iptools::parse_ip_ranges_str;

// ============================================================================
// Defaults
// ============================================================================

/// Minimum gap between two full sweeps past the first configured address.
pub const DEFAULT_SCAN_DELAY_SECS: u64 = 1800;

/// Minimum age before a server is re-indexed.
pub const DEFAULT_INDEX_DELAY_SECS: u64 = 7200;

/// Maximum addresses probed per tick.
pub const DEFAULT_SCAN_COUNT: usize = 200;

/// Maximum servers indexed per tick.
pub const DEFAULT_INDEX_COUNT: usize = 10;

/// Offline age after which a server is deleted.
pub const DEFAULT_PRUNE_FTP_TIME_SECS: u64 = 7 * 24 * 3600;

/// Per-probe/connect timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 2;

/// Default catalog location.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://ftpscout.db";

/// Indexer engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Scannable address space, e.g. `"10.8.0.0-10.8.255.255, 192.168.1.12"`.
    pub ip_ranges: String,

    pub scan_delay: Duration,
    pub index_delay: Duration,
    pub scan_count: usize,
    pub index_count: usize,
    pub prune_ftp_time: Duration,
    pub timeout: Duration,

    /// Suffixes stripped from reverse-DNS names, e.g. `".lan.example.org"`.
    pub hostname_strip_suffixes: Vec<String>,

    /// Width of the concurrent probe pool.
    pub probe_pool: usize,

    pub database: DatabaseConfig,
}

/// Catalog store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,

    /// Bulk insert chunk; `None` keeps the backend's default.
    pub bulk_size: Option<usize>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            ip_ranges: String::new(),
            scan_delay: Duration::from_secs(DEFAULT_SCAN_DELAY_SECS),
            index_delay: Duration::from_secs(DEFAULT_INDEX_DELAY_SECS),
            scan_count: DEFAULT_SCAN_COUNT,
            index_count: DEFAULT_INDEX_COUNT,
            prune_ftp_time: Duration::from_secs(DEFAULT_PRUNE_FTP_TIME_SECS),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            hostname_strip_suffixes: Vec::new(),
            probe_pool: crate::probe::DEFAULT_PROBE_POOL,
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                bulk_size: None,
            },
        }
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

impl IndexerConfig {
    /// Load configuration from the environment and validate it.
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Ok(ranges) = std::env::var("FTPSCOUT_IP_RANGES") {
            config.ip_ranges = ranges;
        }
        if let Some(delay) = env_secs("FTPSCOUT_SCAN_DELAY") {
            config.scan_delay = delay;
        }
        if let Some(delay) = env_secs("FTPSCOUT_INDEX_DELAY") {
            config.index_delay = delay;
        }
        if let Some(count) = env_usize("FTPSCOUT_SCAN_COUNT") {
            config.scan_count = count;
        }
        if let Some(count) = env_usize("FTPSCOUT_INDEX_COUNT") {
            config.index_count = count;
        }
        if let Some(age) = env_secs("FTPSCOUT_PRUNE_FTP_TIME") {
            config.prune_ftp_time = age;
        }
        if let Some(timeout) = env_secs("FTPSCOUT_TIMEOUT") {
            config.timeout = timeout;
        }
        if let Ok(suffixes) = std::env::var("FTPSCOUT_HOSTNAME_STRIP_SUFFIX") {
            config.hostname_strip_suffixes = suffixes
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(pool) = env_usize("FTPSCOUT_PROBE_POOL") {
            config.probe_pool = pool;
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database.url = url;
        }
        config.database.bulk_size = env_usize("FTPSCOUT_BULK_SIZE");

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration; a bad range list aborts here rather than in
    /// the middle of a tick.
    pub fn validate(&self) -> anyhow::Result<()> {
        parse_ip_ranges_str(&self.ip_ranges)
            .map_err(|e| anyhow::anyhow!("FTPSCOUT_IP_RANGES: {e}"))?;

        if self.probe_pool == 0 {
            anyhow::bail!("probe pool width must be greater than 0");
        }

        if self.timeout.is_zero() {
            anyhow::bail!("probe timeout must be greater than 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("database URL cannot be empty");
        }

        Ok(())
    }
}
