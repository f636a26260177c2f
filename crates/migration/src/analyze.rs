//! Read-only census of a ledger store.
//!
//! Counts every key by record class, finds the highest canonical
//! mapping, and reads the head pointers. A cheap sanity check to run
//! before and after a migration.

use std::collections::BTreeMap;

use chainport_storage::Store;
use serde::Serialize;

use crate::{error::MigrationError, schema, schema::KeyCodec};

#[derive(Debug, Clone, Serialize)]
pub struct StoreAnalysis {
    pub total_keys: u64,
    pub per_class: BTreeMap<String, u64>,
    pub unknown_keys: u64,
    pub malformed_keys: u64,
    pub highest_canonical: Option<u64>,
    pub head_block: Option<String>,
    pub head_header: Option<String>,
    pub head_fast: Option<String>,
}

/// Scans the range the codec covers and classifies every key. The
/// store is never written.
pub fn analyze(store: &Store, codec: &KeyCodec) -> Result<StoreAnalysis, MigrationError> {
    let (lower, upper) = codec.source_bounds();
    let mut analysis = StoreAnalysis {
        total_keys: 0,
        per_class: BTreeMap::new(),
        unknown_keys: 0,
        malformed_keys: 0,
        highest_canonical: None,
        head_block: None,
        head_header: None,
        head_fast: None,
    };

    for entry in store.iter_range(&lower, upper.as_deref())? {
        let (key, _) = entry?;
        analysis.total_keys += 1;
        match codec.encode(&key) {
            Ok((class, logical)) => {
                *analysis
                    .per_class
                    .entry(class.as_str().to_owned())
                    .or_insert(0) += 1;
                if class == schema::RecordClass::CanonicalMapping
                    && let Some(height) = schema::parse_canonical_key(&logical)
                {
                    let highest = analysis.highest_canonical.get_or_insert(height);
                    *highest = (*highest).max(height);
                }
            }
            Err(error) if error.is_unknown_tag() => analysis.unknown_keys += 1,
            Err(_) => analysis.malformed_keys += 1,
        }
    }

    analysis.head_block = read_head(store, codec, schema::HEAD_BLOCK_KEY)?;
    analysis.head_header = read_head(store, codec, schema::HEAD_HEADER_KEY)?;
    analysis.head_fast = read_head(store, codec, schema::HEAD_FAST_KEY)?;
    Ok(analysis)
}

fn read_head(
    store: &Store,
    codec: &KeyCodec,
    head_key: &[u8],
) -> Result<Option<String>, MigrationError> {
    let key = match codec.namespace() {
        Some(namespace) => [namespace, head_key].concat(),
        None => head_key.to_vec(),
    };
    Ok(store.get(&key)?.map(hex::encode))
}
