//! Synthesizes the consensus-engine state for a migrated ledger.
//!
//! A Snowman-style engine resuming over imported history needs, for
//! every height up to the tip: the block bytes under a consensus block
//! identifier, an accepted-status record, a height→identifier index
//! entry, and a last-accepted pointer. Identifiers are derived from
//! ledger content as `sha256(height || ledger hash)`, so independent
//! runs over the same ledger produce identical state.
//!
//! ## Key layout (inside the `"state"` partition)
//!
//! | Data           | Key format                              |
//! |----------------|-----------------------------------------|
//! | Block bytes    | `0x00 + id(32) + revision(8 BE)`        |
//! | Block status   | `0x01 + id(32) + revision(8 BE)`        |
//! | Height index   | `0x02 + height(8 BE) + revision(8 BE)`  |
//! | Last accepted  | `"last_accepted" + revision(8 BE)`      |
//! | Revision       | `"currentRevision"` (no suffix)         |
//!
//! The revision suffix makes the layout append-only: synthesizing again
//! at a new revision leaves every earlier revision's records in place,
//! and rollback is pointing consumers at an earlier revision.

use std::sync::atomic::{AtomicBool, Ordering};

use chainport_storage::{Store, SyncMode, WriteBatch};
use ethereum_types::H256;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::{
    error::MigrationError,
    schema,
    tip::resolve_tip,
    transcode::DEFAULT_BATCH_SIZE,
};

/// Reserved namespace of the consensus-facing partition. Disjoint from
/// every ledger key: no ledger class starts with `"state"`.
pub const STATE_PARTITION: &[u8] = b"state";

/// Seconds of derived timestamp spacing between consecutive heights.
/// True timestamps are not needed to resume finalized history.
pub const BLOCK_SPACING_SECS: u64 = 12;

/// Status value the engine reads as "accepted".
pub const STATUS_ACCEPTED: u8 = 0x02;

const BLOCK_BYTES_PREFIX: u8 = 0x00;
const BLOCK_STATUS_PREFIX: u8 = 0x01;
const HEIGHT_INDEX_PREFIX: u8 = 0x02;
const LAST_ACCEPTED_KEY: &[u8] = b"last_accepted";
const CURRENT_REVISION_KEY: &[u8] = b"currentRevision";

const PROGRESS_LOG_INTERVAL: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct SynthesizeConfig {
    pub batch_size: usize,
    /// Target tip; resolved from the ledger when absent.
    pub tip: Option<u64>,
    /// Revision to write under; current+1 when absent.
    pub revision: Option<u64>,
    pub sync: SyncMode,
}

impl Default for SynthesizeConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            tip: None,
            revision: None,
            sync: SyncMode::Sync,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SynthesizeSummary {
    pub revision: u64,
    pub tip: u64,
    pub blocks_written: u64,
    pub last_accepted: String,
    pub elapsed_ms: u64,
    pub interrupted: bool,
}

/// Derives the deterministic consensus identifier for a ledger block.
pub fn derive_block_id(height: u64, ledger_hash: H256) -> H256 {
    let mut hasher = Sha256::new();
    hasher.update(height.to_be_bytes());
    hasher.update(ledger_hash.as_bytes());
    H256::from_slice(&hasher.finalize())
}

/// Minimal block bytes the engine can parse:
/// `height(8) || timestamp(8) || ledger_hash(32) || id(32)`.
pub fn encode_block_bytes(height: u64, ledger_hash: H256, id: H256) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(8 + 8 + 32 + 32);
    bytes.extend_from_slice(&height.to_be_bytes());
    bytes.extend_from_slice(&(height * BLOCK_SPACING_SECS).to_be_bytes());
    bytes.extend_from_slice(ledger_hash.as_bytes());
    bytes.extend_from_slice(id.as_bytes());
    bytes
}

fn partition_key(suffix: &[u8]) -> Vec<u8> {
    [STATE_PARTITION, suffix].concat()
}

fn revisioned_key(tag: &[u8], body: &[u8], revision: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(STATE_PARTITION.len() + tag.len() + body.len() + 8);
    key.extend_from_slice(STATE_PARTITION);
    key.extend_from_slice(tag);
    key.extend_from_slice(body);
    key.extend_from_slice(&revision.to_be_bytes());
    key
}

pub fn block_bytes_key(id: H256, revision: u64) -> Vec<u8> {
    revisioned_key(&[BLOCK_BYTES_PREFIX], id.as_bytes(), revision)
}

pub fn block_status_key(id: H256, revision: u64) -> Vec<u8> {
    revisioned_key(&[BLOCK_STATUS_PREFIX], id.as_bytes(), revision)
}

pub fn height_index_key(height: u64, revision: u64) -> Vec<u8> {
    revisioned_key(&[HEIGHT_INDEX_PREFIX], &height.to_be_bytes(), revision)
}

pub fn last_accepted_key(revision: u64) -> Vec<u8> {
    revisioned_key(LAST_ACCEPTED_KEY, &[], revision)
}

pub fn current_revision_key() -> Vec<u8> {
    partition_key(CURRENT_REVISION_KEY)
}

/// Reads the current revision from the partition metadata; 0 when the
/// partition has never been written.
pub fn current_revision(consensus: &Store) -> Result<u64, MigrationError> {
    match consensus.get(&current_revision_key())? {
        None => Ok(0),
        Some(value) => {
            let bytes: [u8; 8] = value.as_slice().try_into().map_err(|_| {
                MigrationError::ConsensusMetadata(format!(
                    "currentRevision is {} bytes, expected 8",
                    value.len()
                ))
            })?;
            Ok(u64::from_be_bytes(bytes))
        }
    }
}

/// Writes consensus state for every height `0..=tip` at one revision.
///
/// A height whose canonical hash or header record is missing aborts the
/// run at that height: a gap-filling placeholder would hand the engine
/// a broken history that fails much later and much more confusingly.
pub fn synthesize(
    ledger: &Store,
    consensus: &Store,
    config: &SynthesizeConfig,
    stop: &AtomicBool,
) -> Result<SynthesizeSummary, MigrationError> {
    let started = std::time::Instant::now();

    let resolved = resolve_tip(ledger)?.ok_or(MigrationError::EmptyChain)?;
    let tip = match config.tip {
        Some(requested) if requested > resolved.height => {
            return Err(MigrationError::TipUnreachable {
                requested,
                resolved: resolved.height,
            });
        }
        Some(requested) => requested,
        None => resolved.height,
    };

    let revision = match config.revision {
        Some(revision) => revision,
        None => current_revision(consensus)? + 1,
    };
    info!(tip, revision, "synthesizing consensus state");

    let mut batch = consensus.batch();
    let mut blocks_written = 0u64;
    let mut last_id = H256::zero();
    let mut interrupted = false;

    for height in 0..=tip {
        let hash = match ledger.get(&schema::canonical_key(height))? {
            Some(value) if value.len() == 32 => H256::from_slice(&value),
            _ => return Err(MigrationError::CanonicalGap { height }),
        };
        if !ledger.contains(&schema::header_key(height, hash))? {
            return Err(MigrationError::MissingHeader { height, hash });
        }

        last_id = accept_block(&mut batch, height, hash, revision);
        blocks_written += 1;

        if height % PROGRESS_LOG_INTERVAL == 0 && height > 0 {
            info!(height, tip, "accepted");
        }
        if batch.len() >= config.batch_size {
            consensus.commit(std::mem::take(&mut batch), config.sync)?;
            if stop.load(Ordering::Relaxed) {
                interrupted = true;
                break;
            }
        }
    }

    if !interrupted {
        // Metadata lands in the final batch, after every record it
        // refers to: a crash mid-run leaves consumers on the previous
        // revision.
        batch.put(current_revision_key(), revision.to_be_bytes().to_vec());
        consensus.commit(batch, config.sync)?;
    }

    let summary = SynthesizeSummary {
        revision,
        tip,
        blocks_written,
        last_accepted: hex::encode(last_id.as_bytes()),
        elapsed_ms: started.elapsed().as_millis() as u64,
        interrupted,
    };
    info!(
        revision,
        tip,
        blocks = blocks_written,
        interrupted,
        "synthesis finished"
    );
    Ok(summary)
}

/// Stages one accepted block. Write order inside the batch follows the
/// dependency direction: bytes and status before the index entries that
/// reference the identifier, the last-accepted pointer after all of
/// them.
fn accept_block(batch: &mut WriteBatch, height: u64, ledger_hash: H256, revision: u64) -> H256 {
    let id = derive_block_id(height, ledger_hash);
    batch.put(
        block_bytes_key(id, revision),
        encode_block_bytes(height, ledger_hash, id),
    );
    batch.put(block_status_key(id, revision), vec![STATUS_ACCEPTED]);
    batch.put(height_index_key(height, revision), id.as_bytes().to_vec());
    batch.put(last_accepted_key(revision), id.as_bytes().to_vec());
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainport_storage::SyncMode;

    fn hash(byte: u8) -> H256 {
        H256::repeat_byte(byte)
    }

    fn seed_ledger(heights: &[u64]) -> Store {
        let store = Store::in_memory();
        let mut batch = store.batch();
        for &height in heights {
            batch.put(
                schema::canonical_key(height),
                hash(height as u8).as_bytes().to_vec(),
            );
            batch.put(schema::header_key(height, hash(height as u8)), vec![0xaa]);
        }
        store.commit(batch, SyncMode::Async).unwrap();
        store
    }

    fn run(ledger: &Store, consensus: &Store, config: &SynthesizeConfig) -> SynthesizeSummary {
        synthesize(ledger, consensus, config, &AtomicBool::new(false)).unwrap()
    }

    #[test]
    fn identifier_derivation_is_deterministic_and_height_sensitive() {
        let a = derive_block_id(1, hash(0xaa));
        let b = derive_block_id(1, hash(0xaa));
        let c = derive_block_id(2, hash(0xaa));
        let d = derive_block_id(1, hash(0xbb));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn block_bytes_layout_is_fixed_width() {
        let id = derive_block_id(3, hash(0x01));
        let bytes = encode_block_bytes(3, hash(0x01), id);
        assert_eq!(bytes.len(), 80);
        assert_eq!(&bytes[..8], &3u64.to_be_bytes());
        assert_eq!(&bytes[8..16], &(3 * BLOCK_SPACING_SECS).to_be_bytes());
        assert_eq!(&bytes[16..48], hash(0x01).as_bytes());
        assert_eq!(&bytes[48..], id.as_bytes());
    }

    #[test]
    fn writes_all_records_for_every_height() {
        let ledger = seed_ledger(&[0, 1, 2]);
        let consensus = Store::in_memory();
        let summary = run(&ledger, &consensus, &SynthesizeConfig::default());

        assert_eq!(summary.tip, 2);
        assert_eq!(summary.revision, 1);
        assert_eq!(summary.blocks_written, 3);

        for height in 0..=2u64 {
            let id = derive_block_id(height, hash(height as u8));
            assert!(consensus.contains(&block_bytes_key(id, 1)).unwrap());
            assert_eq!(
                consensus.get(&block_status_key(id, 1)).unwrap().unwrap(),
                vec![STATUS_ACCEPTED]
            );
            assert_eq!(
                consensus.get(&height_index_key(height, 1)).unwrap().unwrap(),
                id.as_bytes().to_vec()
            );
        }

        let tip_id = derive_block_id(2, hash(2));
        assert_eq!(
            consensus.get(&last_accepted_key(1)).unwrap().unwrap(),
            tip_id.as_bytes().to_vec()
        );
        assert_eq!(current_revision(&consensus).unwrap(), 1);
    }

    #[test]
    fn two_runs_produce_identical_identifiers() {
        let ledger = seed_ledger(&[0, 1, 2, 3]);
        let first = Store::in_memory();
        let second = Store::in_memory();
        let config = SynthesizeConfig {
            revision: Some(7),
            ..Default::default()
        };
        let a = run(&ledger, &first, &config);
        let b = run(&ledger, &second, &config);

        assert_eq!(a.last_accepted, b.last_accepted);
        for height in 0..=3u64 {
            assert_eq!(
                first.get(&height_index_key(height, 7)).unwrap(),
                second.get(&height_index_key(height, 7)).unwrap()
            );
        }
    }

    #[test]
    fn new_revision_leaves_prior_revision_readable() {
        let ledger = seed_ledger(&[0, 1]);
        let consensus = Store::in_memory();
        let first = run(&ledger, &consensus, &SynthesizeConfig::default());
        assert_eq!(first.revision, 1);

        let second = run(&ledger, &consensus, &SynthesizeConfig::default());
        assert_eq!(second.revision, 2);
        assert_eq!(current_revision(&consensus).unwrap(), 2);

        // Revision 1 records are all still there.
        for height in 0..=1u64 {
            let id = derive_block_id(height, hash(height as u8));
            assert!(consensus.contains(&block_bytes_key(id, 1)).unwrap());
            assert!(consensus.contains(&height_index_key(height, 1)).unwrap());
        }
        assert!(consensus.contains(&last_accepted_key(1)).unwrap());
    }

    #[test]
    fn missing_header_aborts_instead_of_fabricating() {
        let ledger = seed_ledger(&[0, 1, 2]);
        // Canonical entry without its header at height 3.
        ledger
            .put(
                schema::canonical_key(3),
                hash(3).as_bytes().to_vec(),
                SyncMode::Async,
            )
            .unwrap();

        let consensus = Store::in_memory();
        let error = synthesize(
            &ledger,
            &consensus,
            &SynthesizeConfig {
                tip: Some(3),
                ..Default::default()
            },
            &AtomicBool::new(false),
        )
        .unwrap_err();

        // The resolver already refuses to call 3 the tip.
        assert!(matches!(
            error,
            MigrationError::TipUnreachable {
                requested: 3,
                resolved: 2
            }
        ));
    }

    #[test]
    fn interior_header_hole_aborts_at_that_height() {
        // Canonical mappings are contiguous and the tip header exists,
        // so the resolver is satisfied, but height 2's header is gone.
        let store = Store::in_memory();
        let mut batch = store.batch();
        for height in 0..=3u64 {
            batch.put(
                schema::canonical_key(height),
                hash(height as u8).as_bytes().to_vec(),
            );
        }
        for height in [0u64, 1, 3] {
            batch.put(schema::header_key(height, hash(height as u8)), vec![0xaa]);
        }
        store.commit(batch, SyncMode::Async).unwrap();

        let consensus = Store::in_memory();
        let error = synthesize(
            &store,
            &consensus,
            &SynthesizeConfig::default(),
            &AtomicBool::new(false),
        )
        .unwrap_err();
        assert!(matches!(
            error,
            MigrationError::MissingHeader { height: 2, .. }
        ));
    }

    #[test]
    fn requested_tip_within_resolved_range_is_honored() {
        let ledger = seed_ledger(&[0, 1, 2, 3, 4]);
        let consensus = Store::in_memory();
        let summary = run(
            &ledger,
            &consensus,
            &SynthesizeConfig {
                tip: Some(2),
                ..Default::default()
            },
        );
        assert_eq!(summary.tip, 2);
        assert_eq!(summary.blocks_written, 3);
        assert!(consensus.get(&height_index_key(3, 1)).unwrap().is_none());
    }

    #[test]
    fn empty_ledger_is_an_error_for_synthesis() {
        let ledger = Store::in_memory();
        let consensus = Store::in_memory();
        let error = synthesize(
            &ledger,
            &consensus,
            &SynthesizeConfig::default(),
            &AtomicBool::new(false),
        )
        .unwrap_err();
        assert!(matches!(error, MigrationError::EmptyChain));
    }

    #[test]
    fn interrupted_run_leaves_metadata_on_previous_revision() {
        let ledger = seed_ledger(&[0, 1, 2, 3, 4, 5, 6, 7]);
        let consensus = Store::in_memory();
        let stop = AtomicBool::new(true);
        let summary = synthesize(
            &ledger,
            &consensus,
            &SynthesizeConfig {
                batch_size: 8,
                ..Default::default()
            },
            &stop,
        )
        .unwrap();

        assert!(summary.interrupted);
        // Metadata never advanced, so a resume picks revision 1 again.
        assert_eq!(current_revision(&consensus).unwrap(), 0);

        let resumed = run(&ledger, &consensus, &SynthesizeConfig::default());
        assert!(!resumed.interrupted);
        assert_eq!(resumed.revision, 1);
        assert_eq!(current_revision(&consensus).unwrap(), 1);
    }
}
