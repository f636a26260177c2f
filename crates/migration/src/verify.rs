//! Post-migration verification.
//!
//! Walks the migrated chain and checks the downstream consumer
//! contract: canonical mappings and the hash index form a bijection
//! over `0..=tip`, a header exists for every height, all head pointers
//! reference the tip, and, when a consensus partition is present, the
//! current revision's last-accepted pointer and height index resolve to
//! identifiers re-derivable from ledger content. Neither store is ever
//! written.

use chainport_storage::Store;
use ethereum_types::H256;
use serde::Serialize;
use tracing::info;

use crate::{
    consensus::{
        self, STATUS_ACCEPTED, block_status_key, current_revision, derive_block_id,
        height_index_key, last_accepted_key,
    },
    error::MigrationError,
    schema,
    tip::resolve_tip,
};

/// Cap on individual failures carried in the report; counts keep
/// accumulating past it.
const MAX_REPORTED_FAILURES: usize = 100;

#[derive(Debug, Clone)]
pub struct VerifyConfig {
    /// Check only every `stride`-th height (1 = every height). Genesis
    /// and the tip are always checked.
    pub stride: u64,
    /// Also verify the consensus partition.
    pub check_consensus: bool,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            stride: 1,
            check_consensus: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyFailure {
    pub height: Option<u64>,
    pub check: &'static str,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub tip: Option<u64>,
    pub checked_heights: u64,
    pub failure_count: u64,
    pub failures: Vec<VerifyFailure>,
    pub head_pointers_ok: bool,
    pub consensus_checked: bool,
}

impl VerifyReport {
    pub fn ok(&self) -> bool {
        self.failure_count == 0 && self.head_pointers_ok
    }

    fn fail(&mut self, height: Option<u64>, check: &'static str, detail: String) {
        self.failure_count += 1;
        if self.failures.len() < MAX_REPORTED_FAILURES {
            self.failures.push(VerifyFailure {
                height,
                check,
                detail,
            });
        }
    }
}

/// Verifies the migrated ledger (and optionally its consensus
/// partition, when the two share a store or `consensus` is given).
pub fn verify(
    ledger: &Store,
    consensus: Option<&Store>,
    config: &VerifyConfig,
) -> Result<VerifyReport, MigrationError> {
    let mut report = VerifyReport {
        tip: None,
        checked_heights: 0,
        failure_count: 0,
        failures: Vec::new(),
        head_pointers_ok: false,
        consensus_checked: false,
    };

    let Some(tip) = resolve_tip(ledger)? else {
        report.fail(None, "tip", "no usable chain from genesis".to_owned());
        return Ok(report);
    };
    report.tip = Some(tip.height);

    let stride = config.stride.max(1);
    let mut height = 0u64;
    loop {
        check_height(ledger, height, &mut report)?;
        report.checked_heights += 1;
        if height == tip.height {
            break;
        }
        height = (height + stride).min(tip.height);
    }

    report.head_pointers_ok = check_head_pointers(ledger, tip.hash, &mut report)?;

    if config.check_consensus {
        let consensus = consensus.unwrap_or(ledger);
        check_consensus_partition(ledger, consensus, tip.height, tip.hash, &mut report)?;
        report.consensus_checked = true;
    }

    info!(
        tip = tip.height,
        checked = report.checked_heights,
        failures = report.failure_count,
        "verification finished"
    );
    Ok(report)
}

fn check_height(
    ledger: &Store,
    height: u64,
    report: &mut VerifyReport,
) -> Result<(), MigrationError> {
    let hash = match ledger.get(&schema::canonical_key(height))? {
        Some(value) if value.len() == 32 => H256::from_slice(&value),
        Some(value) => {
            report.fail(
                Some(height),
                "canonical",
                format!("canonical value is {} bytes", value.len()),
            );
            return Ok(());
        }
        None => {
            report.fail(Some(height), "canonical", "mapping missing".to_owned());
            return Ok(());
        }
    };

    // Bijection: the hash index must map the canonical hash back to
    // this exact height.
    match ledger.get(&schema::hash_index_key(hash))? {
        Some(value) if value == height.to_be_bytes() => {}
        Some(value) => report.fail(
            Some(height),
            "hash-index",
            format!("maps back to {}", hex::encode(value)),
        ),
        None => report.fail(Some(height), "hash-index", "entry missing".to_owned()),
    }

    if !ledger.contains(&schema::header_key(height, hash))? {
        report.fail(Some(height), "header", "record missing".to_owned());
    }
    Ok(())
}

fn check_head_pointers(
    ledger: &Store,
    tip_hash: H256,
    report: &mut VerifyReport,
) -> Result<bool, MigrationError> {
    let mut ok = true;
    for head_key in [
        schema::HEAD_BLOCK_KEY,
        schema::HEAD_HEADER_KEY,
        schema::HEAD_FAST_KEY,
    ] {
        match ledger.get(head_key)? {
            Some(value) if value == tip_hash.as_bytes() => {}
            Some(value) => {
                ok = false;
                report.fail(
                    None,
                    "head-pointer",
                    format!(
                        "{} is {}, expected tip hash",
                        String::from_utf8_lossy(head_key),
                        hex::encode(value)
                    ),
                );
            }
            None => {
                ok = false;
                report.fail(
                    None,
                    "head-pointer",
                    format!("{} missing", String::from_utf8_lossy(head_key)),
                );
            }
        }
    }
    Ok(ok)
}

fn check_consensus_partition(
    ledger: &Store,
    consensus: &Store,
    tip_height: u64,
    tip_hash: H256,
    report: &mut VerifyReport,
) -> Result<(), MigrationError> {
    let revision = current_revision(consensus)?;
    if revision == 0 {
        report.fail(None, "consensus", "no revision metadata".to_owned());
        return Ok(());
    }

    let expected_tip_id = derive_block_id(tip_height, tip_hash);
    match consensus.get(&last_accepted_key(revision))? {
        Some(value) if value == expected_tip_id.as_bytes() => {}
        Some(value) => report.fail(
            None,
            "last-accepted",
            format!("points at {}", hex::encode(value)),
        ),
        None => report.fail(
            None,
            "last-accepted",
            format!("missing at revision {revision}"),
        ),
    }

    // Every height's index entry must match an identifier re-derived
    // from the ledger, and the block must be marked accepted.
    for height in 0..=tip_height {
        let Some(value) = ledger.get(&schema::canonical_key(height))? else {
            continue; // already reported by the ledger walk
        };
        if value.len() != 32 {
            continue;
        }
        let id = derive_block_id(height, H256::from_slice(&value));
        match consensus.get(&height_index_key(height, revision))? {
            Some(index) if index == id.as_bytes() => {}
            Some(index) => report.fail(
                Some(height),
                "height-index",
                format!("holds {}", hex::encode(index)),
            ),
            None => report.fail(Some(height), "height-index", "entry missing".to_owned()),
        }
        match consensus.get(&block_status_key(id, revision))? {
            Some(status) if status == [STATUS_ACCEPTED] => {}
            Some(status) => report.fail(
                Some(height),
                "status",
                format!("is {}", hex::encode(status)),
            ),
            None => report.fail(Some(height), "status", "record missing".to_owned()),
        }
        if !consensus.contains(&consensus::block_bytes_key(id, revision))? {
            report.fail(Some(height), "block-bytes", "record missing".to_owned());
        }
    }
    Ok(())
}
