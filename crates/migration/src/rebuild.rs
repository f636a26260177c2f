//! Rebuilds the canonical chain index from primary header records.
//!
//! Some source layouts never carried derived indices, and partial
//! migrations leave them inconsistent, so this pass reconstructs them
//! from scratch: number→hash mappings for every header found, missing
//! hash→number entries, and head pointers repointed at the resolved
//! tip. Every write is idempotent (rewriting an existing mapping with
//! the same value is a no-op), so repeated runs converge.

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicBool, Ordering},
    time::Instant,
};

use chainport_storage::{Store, SyncMode};
use ethereum_types::H256;
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    error::MigrationError,
    schema,
    tip::{TipInfo, resolve_tip},
    transcode::DEFAULT_BATCH_SIZE,
};

/// Heights above this bound are treated as corrupt keys masquerading as
/// block numbers, not as chain data.
pub const DEFAULT_MAX_HEIGHT: u64 = 10_000_000;

const SCAN_LOG_INTERVAL: u64 = 100_000;
const WARN_SAMPLES: u64 = 5;

#[derive(Debug, Clone)]
pub struct RebuildConfig {
    pub batch_size: usize,
    /// Sane-height guard; headers above it are skipped and counted.
    pub max_height: u64,
    pub sync: SyncMode,
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_height: DEFAULT_MAX_HEIGHT,
            sync: SyncMode::Sync,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RebuildSummary {
    pub headers_scanned: u64,
    pub canonical_written: u64,
    pub hash_index_written: u64,
    pub hash_index_repaired: u64,
    pub collisions: u64,
    pub skipped_heights: u64,
    pub malformed_keys: u64,
    pub tip: Option<TipInfo>,
    pub head_pointer: Option<String>,
    pub elapsed_ms: u64,
    pub interrupted: bool,
}

/// Restores a consistent canonical index and head-pointer set over a
/// transcoded store. Safe to run on partially migrated or already
/// repaired stores.
pub fn rebuild_canonical_index(
    store: &Store,
    config: &RebuildConfig,
    stop: &AtomicBool,
) -> Result<RebuildSummary, MigrationError> {
    let started = Instant::now();
    let mut summary = RebuildSummary {
        headers_scanned: 0,
        canonical_written: 0,
        hash_index_written: 0,
        hash_index_repaired: 0,
        collisions: 0,
        skipped_heights: 0,
        malformed_keys: 0,
        tip: None,
        head_pointer: None,
        elapsed_ms: 0,
        interrupted: false,
    };

    // (1) Scan every header record, last consistent writer per height.
    let mut heights: BTreeMap<u64, H256> = BTreeMap::new();
    for entry in store.iter_prefix(&[schema::HEADER_PREFIX])? {
        let (key, _) = entry?;
        summary.headers_scanned += 1;
        if summary.headers_scanned % SCAN_LOG_INTERVAL == 0 {
            info!(scanned = summary.headers_scanned, "scanning headers");
        }

        let Some((height, hash)) = schema::parse_header_key(&key) else {
            if summary.malformed_keys < WARN_SAMPLES {
                warn!(key = %hex::encode(&key), "malformed header key");
            }
            summary.malformed_keys += 1;
            continue;
        };
        // (2) Sane-height guard against corrupt keys.
        if height > config.max_height {
            if summary.skipped_heights < WARN_SAMPLES {
                warn!(height, max = config.max_height, "header height over sane bound");
            }
            summary.skipped_heights += 1;
            continue;
        }
        match heights.get(&height).copied() {
            Some(existing) if existing != hash => {
                // Deterministic pick: lexicographically smallest hash.
                let winner = hash.min(existing);
                warn!(height, kept = ?winner, dropped = ?hash.max(existing), "header collision");
                summary.collisions += 1;
                heights.insert(height, winner);
            }
            Some(_) => {}
            None => {
                heights.insert(height, hash);
            }
        }
    }
    info!(
        headers = summary.headers_scanned,
        unique_heights = heights.len(),
        "header scan complete"
    );

    // (3) Write number→hash mappings, ascending, batched.
    let mut batch = store.batch();
    for (&height, &hash) in &heights {
        batch.put(schema::canonical_key(height), hash.as_bytes().to_vec());
        summary.canonical_written += 1;
        if batch.len() >= config.batch_size {
            store.commit(std::mem::take(&mut batch), config.sync)?;
            if stop.load(Ordering::Relaxed) {
                summary.interrupted = true;
                summary.elapsed_ms = started.elapsed().as_millis() as u64;
                return Ok(summary);
            }
        }
    }
    store.commit(batch, config.sync)?;

    // (4) Synthesize missing (or repair wrong) hash→number entries.
    let mut batch = store.batch();
    for (&height, &hash) in &heights {
        let key = schema::hash_index_key(hash);
        match store.get(&key)? {
            Some(value) if value == height.to_be_bytes() => {}
            Some(_) => {
                batch.put(key, height.to_be_bytes().to_vec());
                summary.hash_index_repaired += 1;
            }
            None => {
                batch.put(key, height.to_be_bytes().to_vec());
                summary.hash_index_written += 1;
            }
        }
        if batch.len() >= config.batch_size {
            store.commit(std::mem::take(&mut batch), config.sync)?;
            if stop.load(Ordering::Relaxed) {
                summary.interrupted = true;
                summary.elapsed_ms = started.elapsed().as_millis() as u64;
                return Ok(summary);
            }
        }
    }
    store.commit(batch, config.sync)?;

    // (5) Repoint every head pointer at the resolved tip.
    summary.tip = resolve_tip(store)?;
    if let Some(tip) = summary.tip {
        let mut batch = store.batch();
        for head_key in [
            schema::HEAD_BLOCK_KEY,
            schema::HEAD_HEADER_KEY,
            schema::HEAD_FAST_KEY,
        ] {
            batch.put(head_key.to_vec(), tip.hash.as_bytes().to_vec());
        }
        store.commit(batch, config.sync)?;
        summary.head_pointer = Some(hex::encode(tip.hash.as_bytes()));
        info!(height = tip.height, hash = ?tip.hash, "head pointers updated");
    } else {
        warn!("no usable chain found; head pointers left untouched");
    }

    summary.elapsed_ms = started.elapsed().as_millis() as u64;
    info!(
        canonical = summary.canonical_written,
        hash_index = summary.hash_index_written,
        collisions = summary.collisions,
        "rebuild complete"
    );
    Ok(summary)
}
