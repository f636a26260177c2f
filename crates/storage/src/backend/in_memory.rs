//! Ordered in-memory backend, used by tests and dry runs.
//!
//! Iteration is cursor-based over a `BTreeMap` so it stays lazy and
//! restartable without holding the map lock between steps.

use std::{
    collections::BTreeMap,
    ops::Bound,
    sync::{Arc, RwLock},
};

use crate::{
    api::{Record, StorageBackend, SyncMode, WriteBatch},
    error::StoreError,
};

#[derive(Default, Clone)]
pub struct InMemoryBackend {
    map: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct RangeCursor {
    map: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
    next_from: Bound<Vec<u8>>,
    upper: Option<Vec<u8>>,
}

impl Iterator for RangeCursor {
    type Item = Result<Record, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        let map = self.map.read().expect("lock poisoned");
        let range = (self.next_from.clone(), Bound::<Vec<u8>>::Unbounded);
        let (key, value) = map.range::<Vec<u8>, _>(range).next()?;
        if let Some(upper) = &self.upper
            && key >= upper
        {
            return None;
        }
        let record = (key.clone(), value.clone());
        self.next_from = Bound::Excluded(key.clone());
        Some(Ok(record))
    }
}

impl StorageBackend for InMemoryBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.map.read().expect("lock poisoned").get(key).cloned())
    }

    fn iter_range(
        &self,
        lower: &[u8],
        upper: Option<&[u8]>,
    ) -> Result<Box<dyn Iterator<Item = Result<Record, StoreError>> + '_>, StoreError> {
        Ok(Box::new(RangeCursor {
            map: Arc::clone(&self.map),
            next_from: Bound::Included(lower.to_vec()),
            upper: upper.map(<[u8]>::to_vec),
        }))
    }

    fn write_batch(&self, batch: WriteBatch, _sync: SyncMode) -> Result<(), StoreError> {
        let mut map = self.map.write().expect("lock poisoned");
        for (key, value) in batch.into_puts() {
            map.insert(key, value);
        }
        Ok(())
    }
}
