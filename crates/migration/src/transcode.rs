//! Streaming re-encode of a source ledger into the destination layout.
//!
//! One forward scan over the source's namespace range; every record is
//! classified and rewritten through the [`KeyCodec`], accumulated into
//! batches and committed in key order. Because the codec is a pure
//! function of the key, re-running the pipeline over an already
//! migrated pair writes the same keys and values again: the whole pass
//! is idempotent and safe to resume after an interruption.

use std::sync::atomic::{AtomicBool, Ordering};

use chainport_storage::{Store, SyncMode};
use tracing::{debug, info, warn};

use crate::{
    error::MigrationError,
    progress::{Progress, RunSummary},
    schema::KeyCodec,
};

/// Records accumulated per committed batch.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Scanned-record interval between tolerance checks. Rejected records
/// never enter a batch, so the check cannot ride on batch boundaries.
const TOLERANCE_CHECK_INTERVAL: u64 = 10_000;

/// How many rejected keys to echo into the log before going quiet.
const REJECTED_LOG_SAMPLES: u64 = 5;

#[derive(Debug, Clone)]
pub struct TranscodeConfig {
    /// Records per committed batch. Larger batches amortize commit
    /// overhead at the cost of memory and at-risk work on interrupt.
    pub batch_size: usize,
    /// Maximum tolerated fraction of unclassifiable records before the
    /// run aborts with [`MigrationError::ToleranceExceeded`].
    pub tolerance: f64,
    /// Classify and count without committing anything.
    pub dry_run: bool,
    /// Durability of batch commits.
    pub sync: SyncMode,
    /// Known or estimated source record count, for ETA reporting.
    pub estimated_records: Option<u64>,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            tolerance: 0.0,
            dry_run: false,
            sync: SyncMode::Sync,
            estimated_records: None,
        }
    }
}

/// Runs the transcoding pass. `stop` is checked between batches; when
/// raised the pass commits nothing further and returns a summary marked
/// interrupted, leaving the last committed checkpoint intact.
pub fn transcode(
    source: &Store,
    destination: &Store,
    codec: &KeyCodec,
    config: &TranscodeConfig,
    stop: &AtomicBool,
) -> Result<RunSummary, MigrationError> {
    let (lower, upper) = codec.source_bounds();
    let mut progress = Progress::new("transcode", config.estimated_records);
    let mut batch = destination.batch();
    let mut last_committed_key: Option<Vec<u8>> = None;
    let mut interrupted = false;

    info!(
        namespace = ?codec.namespace().map(hex::encode),
        batch_size = config.batch_size,
        dry_run = config.dry_run,
        "starting transcode"
    );

    let mut iter = source.iter_range(&lower, upper.as_deref())?;
    loop {
        let Some(entry) = iter.next() else {
            break;
        };
        let (key, value) = entry?;
        progress.record_scanned();

        match codec.encode(&key) {
            Ok((class, destination_key)) => {
                batch.put(destination_key, value);
                progress.record_written(class);
            }
            Err(error) if error.is_unknown_tag() => {
                if progress.rejected() < REJECTED_LOG_SAMPLES {
                    debug!(key = %hex::encode(&key), %error, "unclassifiable record");
                }
                progress.record_unknown();
            }
            Err(error) => {
                if progress.rejected() < REJECTED_LOG_SAMPLES {
                    warn!(key = %hex::encode(&key), %error, "malformed record");
                }
                progress.record_malformed();
            }
        }

        if progress.scanned() % TOLERANCE_CHECK_INTERVAL == 0 {
            check_tolerance(&progress, config, last_committed_key.as_deref())?;
        }

        if batch.len() >= config.batch_size {
            let checkpoint = batch.last_key().map(<[u8]>::to_vec);
            if config.dry_run {
                batch = destination.batch();
            } else {
                if let Err(error) = destination.commit(std::mem::take(&mut batch), config.sync) {
                    tracing::error!(
                        checkpoint = ?last_committed_key.as_deref().map(hex::encode),
                        "batch commit failed; rerun resumes from the reported checkpoint"
                    );
                    return Err(error.into());
                }
                last_committed_key = checkpoint;
                info!(
                    checkpoint = ?last_committed_key.as_deref().map(hex::encode),
                    scanned = progress.scanned(),
                    "batch committed"
                );
            }
            if stop.load(Ordering::Relaxed) {
                interrupted = true;
                break;
            }
        }
    }

    if !interrupted && !batch.is_empty() && !config.dry_run {
        let checkpoint = batch.last_key().map(<[u8]>::to_vec);
        destination.commit(batch, config.sync)?;
        last_committed_key = checkpoint;
    }

    check_tolerance(&progress, config, last_committed_key.as_deref())?;

    let summary = progress.into_summary(last_committed_key, interrupted);
    info!(
        scanned = summary.scanned,
        written = summary.written,
        rejected = summary.rejected(),
        interrupted = summary.interrupted,
        "transcode finished"
    );
    Ok(summary)
}

fn check_tolerance(
    progress: &Progress,
    config: &TranscodeConfig,
    checkpoint: Option<&[u8]>,
) -> Result<(), MigrationError> {
    let fraction = progress.rejected_fraction();
    if fraction > config.tolerance {
        tracing::error!(
            rejected = progress.rejected(),
            scanned = progress.scanned(),
            fraction,
            tolerance = config.tolerance,
            checkpoint = ?checkpoint.map(hex::encode),
            "unclassifiable fraction over tolerance"
        );
        return Err(MigrationError::ToleranceExceeded {
            rejected: progress.rejected(),
            scanned: progress.scanned(),
            fraction,
            tolerance: config.tolerance,
        });
    }
    Ok(())
}
