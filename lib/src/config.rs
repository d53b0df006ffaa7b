//! Open-time configuration for a quad store.
//!
//! The first group of fields are tuning knobs for the underlying ordered
//! key-value engine and carry no indexing semantics; the rest size the
//! dictionary cache, range reads and the background sync scheduler.

use crate::errors::{Result, StoreError};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::io::{BufReader, Write};
use std::path::Path;
use std::time::Duration;

fn default_page_size() -> usize {
    4096
}
fn default_block_size() -> usize {
    4096
}
fn default_true() -> bool {
    true
}
fn default_autoflush() -> usize {
    8192
}
fn default_autocheckpoint() -> usize {
    8192
}
fn default_cache_capacity() -> usize {
    5000
}
fn default_scan_batch() -> usize {
    256
}

/// Debounce parameters for the background flush.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SyncOptions {
    /// Flush once no mutation has happened for this long.
    #[serde(default = "SyncOptions::default_min_quiet")]
    pub min_quiet_secs: f64,
    /// Flush at the latest this long after the first pending mutation.
    #[serde(default = "SyncOptions::default_max_wait")]
    pub max_wait_secs: f64,
    /// How often the scheduler re-checks its deadlines while a flush is pending.
    #[serde(default = "SyncOptions::default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl SyncOptions {
    fn default_min_quiet() -> f64 {
        10.0
    }
    fn default_max_wait() -> f64 {
        300.0
    }
    fn default_poll_interval() -> u64 {
        100
    }

    pub fn new(min_quiet_secs: f64, max_wait_secs: f64) -> Self {
        Self {
            min_quiet_secs,
            max_wait_secs,
            ..Self::default()
        }
    }

    pub fn min_quiet(&self) -> Duration {
        Duration::try_from_secs_f64(self.min_quiet_secs).unwrap_or(Duration::ZERO)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::try_from_secs_f64(self.max_wait_secs).unwrap_or(Duration::ZERO)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            min_quiet_secs: Self::default_min_quiet(),
            max_wait_secs: Self::default_max_wait(),
            poll_interval_ms: Self::default_poll_interval(),
        }
    }
}

#[derive(Serialize, Deserialize, Builder, Debug, Clone, PartialEq)]
#[builder(pattern = "owned", default, setter(into))]
pub struct StoreOptions {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    /// When false, the store also takes an exclusive lock on `store.lock` in its
    /// directory. Either way the engine files admit one open handle at a time; a
    /// second open fails with [`StoreError::Locked`](crate::StoreError::Locked).
    #[serde(default = "default_true")]
    pub multiple_processes: bool,
    /// When true, every write is committed durably instead of waiting for a sync.
    #[serde(default)]
    pub write_safety: bool,
    /// Engine page cache size in KiB.
    #[serde(default = "default_autoflush")]
    pub autoflush: usize,
    #[serde(default = "default_autocheckpoint")]
    pub autocheckpoint: usize,
    #[serde(default)]
    pub transaction_log: bool,
    /// Entries held by each direction of the term dictionary cache.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Entries fetched per range read during prefix scans.
    #[serde(default = "default_scan_batch")]
    pub scan_batch: usize,
    #[serde(default)]
    pub sync: SyncOptions,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            block_size: default_block_size(),
            multiple_processes: true,
            write_safety: false,
            autoflush: default_autoflush(),
            autocheckpoint: default_autocheckpoint(),
            transaction_log: false,
            cache_capacity: default_cache_capacity(),
            scan_batch: default_scan_batch(),
            sync: SyncOptions::default(),
        }
    }
}

impl From<StoreOptionsBuilderError> for StoreError {
    fn from(e: StoreOptionsBuilderError) -> Self {
        StoreError::Config(e.to_string())
    }
}

impl StoreOptions {
    pub fn builder() -> StoreOptionsBuilder {
        StoreOptionsBuilder::default()
    }

    /// Rejects values the store cannot run with.
    pub fn check(&self) -> Result<()> {
        if self.cache_capacity == 0 {
            return Err(StoreError::Config("cache_capacity must be positive".into()));
        }
        if self.scan_batch == 0 {
            return Err(StoreError::Config("scan_batch must be positive".into()));
        }
        let sync = &self.sync;
        for (name, v) in [
            ("min_quiet_secs", sync.min_quiet_secs),
            ("max_wait_secs", sync.max_wait_secs),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(StoreError::Config(format!(
                    "{} must be a non-negative number of seconds, got {}",
                    name, v
                )));
            }
        }
        if sync.min_quiet_secs > sync.max_wait_secs {
            return Err(StoreError::Config(
                "min_quiet_secs must not exceed max_wait_secs".into(),
            ));
        }
        Ok(())
    }

    /// Engine page cache in bytes, derived from `autoflush`.
    pub fn cache_bytes(&self) -> usize {
        self.autoflush.saturating_mul(1024)
    }

    pub fn save_to_file(&self, file: &Path) -> Result<()> {
        let config_str = serde_json::to_string_pretty(&self)?;
        let mut file = std::fs::File::create(file)?;
        file.write_all(config_str.as_bytes())?;
        Ok(())
    }

    pub fn from_file(file: &Path) -> Result<Self> {
        let file = std::fs::File::open(file)?;
        let reader = BufReader::new(file);
        let options: StoreOptions = serde_json::from_reader(reader)?;
        options.check()?;
        Ok(options)
    }
}
