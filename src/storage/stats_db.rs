use super::{block_key, StatsDbConfig, StatsDbError};
use crate::types::ExecutionStats;
use alloy_rlp::Decodable;
use rocksdb::{ErrorKind, DB};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    Unopened,
    Open,
    Closed,
}

enum Slot {
    Unopened,
    Open(DB),
    Closed,
}

struct Inner {
    config: StatsDbConfig,
    slot: Slot,
}

/// Registry owning the execution stats database.
///
/// The node creates one per process and hands it to every consumer. The
/// engine is opened on first use, and again on the first use after `close`.
/// Opening happens under the write lock so two threads never open the same
/// path; reads, writes and deletes share the read lock and run concurrently.
pub struct StatsDb {
    inner: RwLock<Inner>,
}

impl StatsDb {
    /// Creates the registry without touching the disk.
    pub fn new(config: StatsDbConfig) -> Self {
        Self {
            inner: RwLock::new(Inner {
                config,
                slot: Slot::Unopened,
            }),
        }
    }

    /// Creates the registry and opens the engine right away.
    pub fn open(config: StatsDbConfig) -> Result<Self, StatsDbError> {
        let db = Self::new(config);
        db.ensure_open()?;
        Ok(db)
    }

    pub fn state(&self) -> StoreState {
        match self.read_inner().slot {
            Slot::Unopened => StoreState::Unopened,
            Slot::Open(_) => StoreState::Open,
            Slot::Closed => StoreState::Closed,
        }
    }

    pub fn config(&self) -> StatsDbConfig {
        self.read_inner().config.clone()
    }

    /// Changes the store location. Ignored while the store is open.
    pub fn set_path(&self, path: impl Into<PathBuf>) -> bool {
        let path = path.into();
        let mut inner = self.write_inner();
        if matches!(inner.slot, Slot::Open(_)) {
            warn!(path = %path.display(), "stats db already open, path change ignored");
            return false;
        }
        info!(path = %path.display(), "set stats db path");
        inner.config.path = path;
        true
    }

    /// Changes the resource limits. Ignored while the store is open.
    pub fn set_options(&self, cache: usize, handles: i32) -> bool {
        let mut inner = self.write_inner();
        if matches!(inner.slot, Slot::Open(_)) {
            warn!(cache, handles, "stats db already open, option change ignored");
            return false;
        }
        inner.config.cache = cache;
        inner.config.handles = handles;
        true
    }

    pub fn write(&self, number: u64, stats: &ExecutionStats) -> Result<(), StatsDbError> {
        let encoded = alloy_rlp::encode(stats);
        self.with_db(|db, path| {
            info!(
                number,
                data = %serde_json::to_string(stats).unwrap_or_default(),
                "write execution stats"
            );
            db.put(block_key(number), &encoded).map_err(|source| {
                error!(number, path = %path.display(), %source, "failed to write execution stats");
                StatsDbError::Write {
                    path: path.to_path_buf(),
                    number,
                    source,
                }
            })
        })
    }

    /// Returns the stats stored for `number`, or `None` if there are none.
    pub fn read(&self, number: u64) -> Result<Option<ExecutionStats>, StatsDbError> {
        let Some(bytes) = self.get(number)? else {
            return Ok(None);
        };
        if bytes.is_empty() {
            return Ok(None);
        }

        ExecutionStats::decode(&mut bytes.as_slice())
            .map(Some)
            .map_err(|source| {
                let path = self.config().path;
                error!(number, path = %path.display(), %source, "failed to decode execution stats");
                StatsDbError::Decode {
                    path,
                    number,
                    source,
                }
            })
    }

    pub fn has(&self, number: u64) -> Result<bool, StatsDbError> {
        Ok(self.get(number)?.is_some())
    }

    pub fn delete(&self, number: u64) -> Result<(), StatsDbError> {
        self.with_db(|db, path| {
            debug!(number, "delete execution stats");
            db.delete(block_key(number)).map_err(|source| {
                error!(number, path = %path.display(), %source, "failed to delete execution stats");
                StatsDbError::Delete {
                    path: path.to_path_buf(),
                    number,
                    source,
                }
            })
        })
    }

    /// Releases the engine. The next operation reopens it.
    pub fn close(&self) {
        let mut inner = self.write_inner();
        if matches!(inner.slot, Slot::Open(_)) {
            inner.slot = Slot::Closed;
            info!(path = %inner.config.path.display(), "stats db closed");
        }
    }

    fn get(&self, number: u64) -> Result<Option<Vec<u8>>, StatsDbError> {
        self.with_db(|db, path| {
            db.get(block_key(number)).map_err(|source| {
                error!(number, path = %path.display(), %source, "failed to read execution stats");
                StatsDbError::Read {
                    path: path.to_path_buf(),
                    number,
                    source,
                }
            })
        })
    }

    /// Runs `op` against the open engine, opening it first if needed.
    fn with_db<T>(
        &self,
        op: impl FnOnce(&DB, &Path) -> Result<T, StatsDbError>,
    ) -> Result<T, StatsDbError> {
        loop {
            {
                let inner = self.read_inner();
                if let Slot::Open(db) = &inner.slot {
                    return op(db, &inner.config.path);
                }
            }
            // a concurrent close may win the race; the next pass reopens
            self.ensure_open()?;
        }
    }

    fn ensure_open(&self) -> Result<(), StatsDbError> {
        let mut inner = self.write_inner();
        if matches!(inner.slot, Slot::Open(_)) {
            return Ok(());
        }

        debug!(path = %inner.config.path.display(), "opening stats db");
        let db = open_db(&inner.config).inspect_err(|err| error!(%err, "init stats db failed"))?;
        info!(
            path = %inner.config.path.display(),
            cache = inner.config.cache,
            handles = inner.config.handles,
            "stats db opened"
        );
        inner.slot = Slot::Open(db);
        Ok(())
    }

    fn read_inner(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_inner(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for StatsDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.read_inner();
        f.debug_struct("StatsDb")
            .field("config", &inner.config)
            .field("open", &matches!(inner.slot, Slot::Open(_)))
            .finish()
    }
}

/// Opens the engine, running one repair pass if the files are corrupted.
fn open_db(config: &StatsDbConfig) -> Result<DB, StatsDbError> {
    let opts = config.rocksdb_options();
    match DB::open(&opts, &config.path) {
        Ok(db) => Ok(db),
        Err(err) if matches!(err.kind(), ErrorKind::Corruption) => {
            warn!(path = %config.path.display(), %err, "stats db corrupted, attempting recovery");
            DB::repair(&opts, &config.path)
                .and_then(|()| DB::open(&opts, &config.path))
                .map_err(|source| StatsDbError::Recover {
                    path: config.path.clone(),
                    source,
                })
        }
        Err(source) => Err(StatsDbError::Open {
            path: config.path.clone(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Address, U256};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, StatsDb) {
        let dir = tempfile::tempdir().unwrap();
        let db = StatsDb::new(StatsDbConfig::new(dir.path().join("statsdb")).with_limits(16, 500));
        (dir, db)
    }

    #[test]
    fn test_write_read_delete() {
        let (_dir, db) = temp_store();
        let stats = ExecutionStats::new(21_000, 1);

        db.write(1, &stats).unwrap();
        assert_eq!(db.read(1).unwrap(), Some(stats));
        assert_eq!(db.read(2).unwrap(), None);

        db.delete(1).unwrap();
        assert_eq!(db.read(1).unwrap(), None);
        // deleting a missing record is fine
        db.delete(1).unwrap();
    }

    #[test]
    fn test_overwrite_keeps_latest() {
        let (_dir, db) = temp_store();
        db.write(7, &ExecutionStats::new(100, 1)).unwrap();

        let mut latest = ExecutionStats::new(200, 2);
        latest.record_transfer(Address::repeat_byte(1), Address::repeat_byte(2), U256::from(9u64));
        db.write(7, &latest).unwrap();

        assert_eq!(db.read(7).unwrap(), Some(latest));
    }

    #[test]
    fn test_block_zero_and_large_numbers() {
        let (_dir, db) = temp_store();
        db.write(0, &ExecutionStats::new(1, 0)).unwrap();
        db.write(u64::MAX, &ExecutionStats::new(2, 0)).unwrap();

        assert_eq!(db.read(0).unwrap().unwrap().gas_used, 1);
        assert_eq!(db.read(u64::MAX).unwrap().unwrap().gas_used, 2);
        assert!(db.has(0).unwrap());
        assert!(!db.has(1).unwrap());
    }

    #[test]
    fn test_lifecycle_and_reopen() {
        let (_dir, db) = temp_store();
        assert_eq!(db.state(), StoreState::Unopened);
        db.close();
        assert_eq!(db.state(), StoreState::Unopened);

        db.write(3, &ExecutionStats::new(42, 1)).unwrap();
        assert_eq!(db.state(), StoreState::Open);

        db.close();
        assert_eq!(db.state(), StoreState::Closed);
        db.close();
        assert_eq!(db.state(), StoreState::Closed);

        assert_eq!(db.read(3).unwrap(), Some(ExecutionStats::new(42, 1)));
        assert_eq!(db.state(), StoreState::Open);
    }

    #[test]
    fn test_options_only_apply_while_not_open() {
        let (dir, db) = temp_store();
        assert!(db.set_options(32, 128));
        db.read(1).unwrap();

        assert!(!db.set_options(64, 64));
        assert!(!db.set_path(dir.path().join("elsewhere")));
        assert_eq!(db.config().cache, 32);
        assert_eq!(db.config().handles, 128);

        db.close();
        assert!(db.set_path(dir.path().join("elsewhere")));
        db.read(1).unwrap();
        assert!(dir.path().join("elsewhere").exists());
    }

    #[test]
    fn test_concurrent_writers() {
        let (_dir, db) = temp_store();
        let db = Arc::new(db);

        std::thread::scope(|scope| {
            for worker in 0..4u64 {
                let db = Arc::clone(&db);
                scope.spawn(move || {
                    for i in 0..25u64 {
                        let number = worker * 100 + i;
                        db.write(number, &ExecutionStats::new(number, worker)).unwrap();
                    }
                });
            }
        });

        for worker in 0..4u64 {
            for i in 0..25u64 {
                let number = worker * 100 + i;
                assert_eq!(db.read(number).unwrap(), Some(ExecutionStats::new(number, worker)));
            }
        }
    }

    #[test]
    fn test_undecodable_record() {
        let (dir, db) = temp_store();
        db.write(5, &ExecutionStats::new(1, 1)).unwrap();
        db.close();

        // write garbage under block 5 behind the store's back
        let path = dir.path().join("statsdb");
        {
            let raw = DB::open(&db.config().rocksdb_options(), &path).unwrap();
            raw.put(block_key(5), [0xc3, 0x01]).unwrap();
        }

        let err = db.read(5).unwrap_err();
        assert!(matches!(err, StatsDbError::Decode { number: 5, .. }));
        assert_eq!(err.block_number(), Some(5));
        assert_eq!(err.path(), path.as_path());
    }

    #[test]
    fn test_corrupted_store_is_recovered() {
        let (dir, db) = temp_store();
        let stats = ExecutionStats::new(21_000, 1);
        db.write(1, &stats).unwrap();
        db.close();

        // CURRENT without a trailing newline is a Corruption status on open
        std::fs::write(dir.path().join("statsdb").join("CURRENT"), b"garbage").unwrap();

        assert_eq!(db.read(1).unwrap(), Some(stats));
        assert_eq!(db.state(), StoreState::Open);

        db.write(2, &ExecutionStats::new(7, 0)).unwrap();
        db.close();
        assert_eq!(db.read(2).unwrap(), Some(ExecutionStats::new(7, 0)));
    }

    #[test]
    fn test_open_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"plain file").unwrap();

        let err = StatsDb::open(StatsDbConfig::new(&file)).unwrap_err();
        assert_eq!(err.path(), file.as_path());
        assert_eq!(err.block_number(), None);
    }
}
