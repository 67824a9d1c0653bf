//! Durable execution statistics, keyed by block number.

use rocksdb::{BlockBasedOptions, Cache, Options};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod stats_db;
pub use stats_db::{StatsDb, StoreState};

pub const DEFAULT_PATH: &str = "statsdb";
pub const DEFAULT_CACHE: usize = 16;
pub const DEFAULT_HANDLES: i32 = 500;

const MIB: usize = 1024 * 1024;
const BLOOM_BITS_PER_KEY: f64 = 10.0;

/// Store location and resource limits. Only read when the store opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsDbConfig {
    pub path: PathBuf,
    /// Memory budget in MiB, split between block cache and write buffer.
    pub cache: usize,
    /// Maximum number of open file handles.
    pub handles: i32,
}

impl Default for StatsDbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_PATH),
            cache: DEFAULT_CACHE,
            handles: DEFAULT_HANDLES,
        }
    }
}

impl StatsDbConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_limits(mut self, cache: usize, handles: i32) -> Self {
        self.cache = cache;
        self.handles = handles;
        self
    }

    pub fn block_cache_size(&self) -> usize {
        self.cache / 2 * MIB
    }

    pub fn write_buffer_size(&self) -> usize {
        self.cache / 4 * MIB
    }

    pub fn rocksdb_options(&self) -> Options {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_open_files(self.handles);
        if self.write_buffer_size() > 0 {
            opts.set_write_buffer_size(self.write_buffer_size());
        }

        let mut table = BlockBasedOptions::default();
        if self.block_cache_size() > 0 {
            table.set_block_cache(&Cache::new_lru_cache(self.block_cache_size()));
        }
        table.set_bloom_filter(BLOOM_BITS_PER_KEY, false);
        opts.set_block_based_table_factory(&table);
        opts
    }
}

/// Storage key for a block: its number as big-endian bytes with leading
/// zero bytes stripped. Block 0 maps to the empty key.
pub fn block_key(number: u64) -> Vec<u8> {
    let bytes = number.to_be_bytes();
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

/// Failures of the stats store.
///
/// Every variant is fatal for the operation that hit it: persisted state may
/// be ambiguous, so block processing must stop instead of carrying on without
/// statistics. A missing record is not an error.
#[derive(Debug, Error)]
pub enum StatsDbError {
    #[error("failed to open stats db at {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rocksdb::Error,
    },
    #[error("failed to recover corrupted stats db at {}: {source}", .path.display())]
    Recover {
        path: PathBuf,
        #[source]
        source: rocksdb::Error,
    },
    #[error("failed to write stats for block {number} at {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        number: u64,
        #[source]
        source: rocksdb::Error,
    },
    #[error("failed to read stats for block {number} at {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        number: u64,
        #[source]
        source: rocksdb::Error,
    },
    #[error("failed to delete stats for block {number} at {}: {source}", .path.display())]
    Delete {
        path: PathBuf,
        number: u64,
        #[source]
        source: rocksdb::Error,
    },
    #[error("corrupted stats record for block {number} at {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        number: u64,
        #[source]
        source: alloy_rlp::Error,
    },
}

impl StatsDbError {
    pub fn path(&self) -> &Path {
        match self {
            Self::Open { path, .. }
            | Self::Recover { path, .. }
            | Self::Write { path, .. }
            | Self::Read { path, .. }
            | Self::Delete { path, .. }
            | Self::Decode { path, .. } => path,
        }
    }

    /// Block the failing operation was keyed by, if any.
    pub fn block_number(&self) -> Option<u64> {
        match self {
            Self::Open { .. } | Self::Recover { .. } => None,
            Self::Write { number, .. }
            | Self::Read { number, .. }
            | Self::Delete { number, .. }
            | Self::Decode { number, .. } => Some(*number),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_key_is_minimal_big_endian() {
        assert!(block_key(0).is_empty());
        assert_eq!(block_key(1), vec![0x01]);
        assert_eq!(block_key(255), vec![0xff]);
        assert_eq!(block_key(256), vec![0x01, 0x00]);
        assert_eq!(block_key(0x0102_0304), vec![0x01, 0x02, 0x03, 0x04]);
        assert_eq!(block_key(u64::MAX), vec![0xff; 8]);
    }

    #[test]
    fn test_config_sizes() {
        let config = StatsDbConfig::new("/tmp/stats").with_limits(16, 500);
        assert_eq!(config.block_cache_size(), 8 * MIB);
        assert_eq!(config.write_buffer_size(), 4 * MIB);

        let tiny = config.with_limits(3, 64);
        assert_eq!(tiny.write_buffer_size(), 0);
        assert_eq!(tiny.block_cache_size(), MIB);
    }

    #[test]
    fn test_config_from_json() {
        let config: StatsDbConfig =
            serde_json::from_str(r#"{ "path": "/data/statsdb", "cache": 64 }"#).unwrap();
        assert_eq!(config.path, PathBuf::from("/data/statsdb"));
        assert_eq!(config.cache, 64);
        assert_eq!(config.handles, DEFAULT_HANDLES);
    }
}
