//! Resolves the usable chain tip from the canonical index.
//!
//! The highest canonical key is not trusted as the tip: partial
//! migrations leave trailing entries above a gap. The usable chain is
//! the longest contiguous run of canonical mappings starting at height
//! 0, and the tip is the highest height in that run whose header record
//! actually exists.

use chainport_storage::Store;
use ethereum_types::H256;
use serde::Serialize;
use tracing::{debug, warn};

use crate::{error::MigrationError, schema};

/// The resolved chain tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TipInfo {
    pub height: u64,
    pub hash: H256,
}

/// Resolves the tip of `store`, or `None` when the canonical index is
/// empty or lacks a genesis entry. An empty index is a valid, if
/// degenerate, result, never an error.
pub fn resolve_tip(store: &Store) -> Result<Option<TipInfo>, MigrationError> {
    // Forward scan over the canonical range; keys are big-endian so the
    // scan is in ascending height order. Stop at the first gap. Only
    // the length of the contiguous run is kept; hashes are re-read on
    // the downward walk so memory stays bounded.
    let mut contiguous_len: u64 = 0;
    for entry in store.iter_prefix(&[schema::CANONICAL_PREFIX])? {
        let (key, value) = entry?;
        let Some(height) = schema::parse_canonical_key(&key) else {
            // A key in the canonical range that does not parse is not a
            // canonical mapping ("n" is also the first byte of longer
            // malformed keys); it cannot extend the chain.
            warn!(key = %hex::encode(&key), "skipping malformed canonical key");
            continue;
        };
        if height != contiguous_len {
            debug!(
                expected = contiguous_len,
                found = height,
                "canonical gap terminates the usable chain"
            );
            break;
        }
        if value.len() != 32 {
            warn!(
                height,
                len = value.len(),
                "canonical value is not a 32-byte hash; treating as gap"
            );
            break;
        }
        contiguous_len += 1;
    }

    // Walk down from the contiguous end until a height whose header
    // record is present.
    while contiguous_len > 0 {
        let height = contiguous_len - 1;
        let hash = match store.get(&schema::canonical_key(height))? {
            Some(value) if value.len() == 32 => H256::from_slice(&value),
            _ => {
                contiguous_len -= 1;
                continue;
            }
        };
        if store.contains(&schema::header_key(height, hash))? {
            return Ok(Some(TipInfo { height, hash }));
        }
        debug!(height, "canonical entry lacks its header; walking down");
        contiguous_len -= 1;
    }

    Ok(None)
}
