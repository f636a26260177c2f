//! Uniform adapter over an ordered byte-string key-value store.
//!
//! The [`Store`] wraps one of two backends (RocksDB on disk, an ordered
//! map in memory) behind the same surface: point gets, bounded range
//! iteration, and atomic write batches with an explicit sync flag.
//! Write-mode enforcement happens here, so a read-only handle rejects
//! batch commits with a typed error instead of silently succeeding.

pub mod api;
pub mod backend;
pub mod error;

use std::{path::Path, sync::Arc};

pub use api::{OpenMode, Record, StorageBackend, SyncMode, WriteBatch, prefix_upper_bound};
pub use error::StoreError;

use backend::{in_memory::InMemoryBackend, rocksdb::RocksDbBackend};

/// Which concrete engine backs a [`Store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineType {
    RocksDb,
    InMemory,
}

#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn StorageBackend>,
    mode: OpenMode,
}

impl Store {
    /// Opens (or, in read-write mode, creates) a store at `path`.
    ///
    /// A storage lock held by another process surfaces as
    /// [`StoreError::Busy`]; the open fails fast rather than waiting.
    pub fn open(
        path: impl AsRef<Path>,
        engine: EngineType,
        mode: OpenMode,
    ) -> Result<Self, StoreError> {
        let backend: Arc<dyn StorageBackend> = match engine {
            EngineType::RocksDb => Arc::new(RocksDbBackend::open(path.as_ref(), mode)?),
            EngineType::InMemory => Arc::new(InMemoryBackend::new()),
        };
        Ok(Self { backend, mode })
    }

    /// Fresh writable in-memory store.
    pub fn in_memory() -> Self {
        Self {
            backend: Arc::new(InMemoryBackend::new()),
            mode: OpenMode::ReadWrite,
        }
    }

    /// Read-only view of the same underlying data.
    pub fn read_only(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            mode: OpenMode::ReadOnly,
        }
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.backend.get(key)
    }

    pub fn contains(&self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }

    /// Lazy forward iteration over `[lower, upper)`, restartable from
    /// any previously yielded key.
    pub fn iter_range(
        &self,
        lower: &[u8],
        upper: Option<&[u8]>,
    ) -> Result<Box<dyn Iterator<Item = Result<Record, StoreError>> + '_>, StoreError> {
        self.backend.iter_range(lower, upper)
    }

    /// Iteration over every key carrying `prefix`.
    pub fn iter_prefix(
        &self,
        prefix: &[u8],
    ) -> Result<Box<dyn Iterator<Item = Result<Record, StoreError>> + '_>, StoreError> {
        let upper = prefix_upper_bound(prefix);
        self.backend.iter_range(prefix, upper.as_deref())
    }

    pub fn batch(&self) -> WriteBatch {
        WriteBatch::new()
    }

    /// Atomically commits a batch. Rejected with
    /// [`StoreError::ReadOnly`] on read-only handles.
    pub fn commit(&self, batch: WriteBatch, sync: SyncMode) -> Result<(), StoreError> {
        if self.mode == OpenMode::ReadOnly {
            return Err(StoreError::ReadOnly);
        }
        if batch.is_empty() {
            return Ok(());
        }
        self.backend.write_batch(batch, sync)
    }

    /// Convenience single put.
    pub fn put(
        &self,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
        sync: SyncMode,
    ) -> Result<(), StoreError> {
        let mut batch = self.batch();
        batch.put(key, value);
        self.commit(batch, sync)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_only_handle_rejects_writes() {
        let store = Store::in_memory();
        store.put(b"k".to_vec(), b"v".to_vec(), SyncMode::Async).unwrap();

        let reader = store.read_only();
        let mut batch = reader.batch();
        batch.put(b"k2".to_vec(), b"v2".to_vec());
        let result = reader.commit(batch, SyncMode::Async);
        assert!(matches!(result, Err(StoreError::ReadOnly)));

        // The shared data is still readable through the handle.
        assert_eq!(reader.get(b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn empty_batch_commit_is_a_noop() {
        let store = Store::in_memory();
        let batch = store.batch();
        store.commit(batch, SyncMode::Sync).unwrap();
    }

    #[test]
    fn iter_prefix_only_yields_matching_keys() {
        let store = Store::in_memory();
        let mut batch = store.batch();
        batch.put(b"ha".to_vec(), b"1".to_vec());
        batch.put(b"hb".to_vec(), b"2".to_vec());
        batch.put(b"i0".to_vec(), b"3".to_vec());
        store.commit(batch, SyncMode::Async).unwrap();

        let keys: Vec<Vec<u8>> = store
            .iter_prefix(b"h")
            .unwrap()
            .map(|record| record.unwrap().0)
            .collect();
        assert_eq!(keys, vec![b"ha".to_vec(), b"hb".to_vec()]);
    }
}
