use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store at {0} is busy: lock held by another process")]
    Busy(PathBuf),

    #[error("Store was opened read-only; refusing to write")]
    ReadOnly,

    #[error("Store directory not found: {0}")]
    NotFound(PathBuf),

    #[error("RocksDB error: {0}")]
    Backend(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rocksdb::Error> for StoreError {
    fn from(error: rocksdb::Error) -> Self {
        StoreError::Backend(error.into_string())
    }
}
