//! RocksDB backend.
//!
//! Read-write handles take the engine's file lock, so a second writer
//! fails fast with [`StoreError::Busy`] instead of waiting. Read-only
//! handles can be opened against a database another process is serving.

use std::path::{Path, PathBuf};

use rocksdb::{DBWithThreadMode, Direction, IteratorMode, MultiThreaded, Options, ReadOptions};

use crate::{
    api::{OpenMode, Record, StorageBackend, SyncMode, WriteBatch},
    error::StoreError,
};

pub struct RocksDbBackend {
    db: DBWithThreadMode<MultiThreaded>,
}

impl RocksDbBackend {
    pub fn open(path: &Path, mode: OpenMode) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        let db = match mode {
            OpenMode::ReadOnly => {
                if !path.exists() {
                    return Err(StoreError::NotFound(path.to_path_buf()));
                }
                opts.set_disable_auto_compactions(true);
                opts.set_allow_mmap_reads(true);
                DBWithThreadMode::<MultiThreaded>::open_for_read_only(&opts, path, false)
                    .map_err(|error| classify_open_error(error, path))?
            }
            OpenMode::ReadWrite => {
                opts.create_if_missing(true);
                opts.set_max_background_jobs(4);
                DBWithThreadMode::<MultiThreaded>::open(&opts, path)
                    .map_err(|error| classify_open_error(error, path))?
            }
        };
        Ok(Self { db })
    }
}

/// The engine reports a held lock as an I/O error mentioning the LOCK
/// file; surface that as `Busy` so callers can tell it apart from
/// corruption.
fn classify_open_error(error: rocksdb::Error, path: &Path) -> StoreError {
    let message = error.to_string();
    if message.to_ascii_lowercase().contains("lock") {
        StoreError::Busy(PathBuf::from(path))
    } else {
        StoreError::Backend(message)
    }
}

impl StorageBackend for RocksDbBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.db.get(key)?)
    }

    fn iter_range(
        &self,
        lower: &[u8],
        upper: Option<&[u8]>,
    ) -> Result<Box<dyn Iterator<Item = Result<Record, StoreError>> + '_>, StoreError> {
        let mut read_opts = ReadOptions::default();
        if let Some(upper) = upper {
            read_opts.set_iterate_upper_bound(upper.to_vec());
        }
        let mode = IteratorMode::From(lower, Direction::Forward);
        let iter = self.db.iterator_opt(mode, read_opts);
        Ok(Box::new(iter.map(|entry| {
            entry
                .map(|(key, value)| (key.into_vec(), value.into_vec()))
                .map_err(StoreError::from)
        })))
    }

    fn write_batch(&self, batch: WriteBatch, sync: SyncMode) -> Result<(), StoreError> {
        let mut inner = rocksdb::WriteBatch::default();
        for (key, value) in batch.into_puts() {
            inner.put(key, value);
        }
        let mut write_opts = rocksdb::WriteOptions::default();
        write_opts.set_sync(matches!(sync, SyncMode::Sync));
        self.db.write_opt(inner, &write_opts)?;
        Ok(())
    }
}
