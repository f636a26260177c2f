use std::{path::PathBuf, sync::atomic::AtomicBool};

use clap::{Parser as ClapParser, Subcommand as ClapSubcommand};
use eyre::{Result, WrapErr};
use serde::Serialize;

use chainport_migration::{
    KeyCodec, RebuildConfig, RebuildSummary, RunSummary, SynthesizeConfig, SynthesizeSummary,
    TranscodeConfig, VerifyConfig, VerifyReport, rebuild_canonical_index, resolve_tip, synthesize,
    transcode, verify::verify,
};
use chainport_storage::{EngineType, OpenMode, Store, SyncMode};

const REPORT_SCHEMA_VERSION: u32 = 1;
const DEFAULT_BATCH_SIZE: u64 = chainport_migration::transcode::DEFAULT_BATCH_SIZE as u64;
const DEFAULT_MAX_HEIGHT: u64 = chainport_migration::rebuild::DEFAULT_MAX_HEIGHT;

#[allow(clippy::upper_case_acronyms)]
#[derive(ClapParser)]
#[command(
    name = "chainport",
    author = "Lambdaclass",
    about = "Chain state migration and consensus bootstrapping tools"
)]
pub struct CLI {
    #[command(subcommand)]
    pub command: Subcommand,
}

/// 32-byte chain namespace, given as 64 hex chars.
#[derive(Debug, Clone)]
pub struct Namespace(pub Vec<u8>);

fn parse_namespace(raw: &str) -> Result<Namespace, String> {
    let bytes = hex::decode(raw.trim_start_matches("0x"))
        .map_err(|error| format!("namespace is not valid hex: {error}"))?;
    if bytes.len() != 32 {
        return Err(format!(
            "namespace must be 32 bytes (64 hex chars), got {}",
            bytes.len()
        ));
    }
    Ok(Namespace(bytes))
}

fn parse_tolerance(raw: &str) -> Result<f64, String> {
    let value: f64 = raw
        .parse()
        .map_err(|error| format!("tolerance is not a number: {error}"))?;
    if !(0.0..=1.0).contains(&value) {
        return Err(format!("tolerance must be within 0.0..=1.0, got {value}"));
    }
    Ok(value)
}

#[derive(ClapSubcommand)]
pub enum Subcommand {
    #[command(
        name = "transcode",
        about = "Re-encode a source ledger into the destination layout"
    )]
    Transcode {
        #[arg(long = "store.src")]
        /// Path to the source store (opened read-only)
        source_path: PathBuf,
        #[arg(long = "store.dst")]
        /// Path for the destination store (created if absent)
        destination_path: PathBuf,
        #[arg(long = "namespace", value_parser = parse_namespace)]
        /// Chain namespace prefix carried by every source key (hex)
        namespace: Option<Namespace>,
        #[arg(long = "batch-size", default_value_t = DEFAULT_BATCH_SIZE, value_parser = clap::value_parser!(u64).range(1..=10_000_000))]
        /// Records per committed batch
        batch_size: u64,
        #[arg(long = "tolerance", default_value_t = 0.0, value_parser = parse_tolerance)]
        /// Maximum tolerated fraction of unclassifiable records
        tolerance: f64,
        #[arg(long = "estimated-records")]
        /// Source record count estimate, used for ETA reporting
        estimated_records: Option<u64>,
        #[arg(long = "dry-run", default_value_t = false)]
        /// Classify and count without writing the destination
        dry_run: bool,
        #[arg(long = "json", default_value_t = false)]
        /// Emit machine-readable JSON output
        json: bool,
    },
    #[command(
        name = "rebuild-index",
        about = "Rebuild canonical indices and head pointers from headers"
    )]
    RebuildIndex {
        #[arg(long = "store.dst")]
        /// Path to the migrated store (opened read-write)
        destination_path: PathBuf,
        #[arg(long = "batch-size", default_value_t = DEFAULT_BATCH_SIZE, value_parser = clap::value_parser!(u64).range(1..=10_000_000))]
        /// Records per committed batch
        batch_size: u64,
        #[arg(long = "max-height", default_value_t = DEFAULT_MAX_HEIGHT)]
        /// Sane-height bound; headers above it are skipped
        max_height: u64,
        #[arg(long = "json", default_value_t = false)]
        /// Emit machine-readable JSON output
        json: bool,
    },
    #[command(
        name = "resolve-tip",
        about = "Report the highest height with a gap-free chain from genesis"
    )]
    ResolveTip {
        #[arg(long = "store.dst")]
        /// Path to the migrated store (opened read-only)
        destination_path: PathBuf,
        #[arg(long = "json", default_value_t = false)]
        /// Emit machine-readable JSON output
        json: bool,
    },
    #[command(
        name = "synthesize",
        about = "Write consensus-engine state for the migrated chain"
    )]
    Synthesize {
        #[arg(long = "store.dst")]
        /// Path to the migrated ledger store
        destination_path: PathBuf,
        #[arg(long = "store.consensus")]
        /// Separate consensus store; defaults to the ledger store
        consensus_path: Option<PathBuf>,
        #[arg(long = "tip")]
        /// Target tip height; resolved automatically when omitted
        tip: Option<u64>,
        #[arg(long = "revision")]
        /// Revision to write under; current+1 when omitted
        revision: Option<u64>,
        #[arg(long = "batch-size", default_value_t = DEFAULT_BATCH_SIZE, value_parser = clap::value_parser!(u64).range(1..=10_000_000))]
        /// Records per committed batch
        batch_size: u64,
        #[arg(long = "json", default_value_t = false)]
        /// Emit machine-readable JSON output
        json: bool,
    },
    #[command(
        name = "migrate",
        about = "Full pipeline: transcode, rebuild indices, synthesize consensus state"
    )]
    Migrate {
        #[arg(long = "store.src")]
        /// Path to the source store (opened read-only)
        source_path: PathBuf,
        #[arg(long = "store.dst")]
        /// Path for the destination store (created if absent)
        destination_path: PathBuf,
        #[arg(long = "namespace", value_parser = parse_namespace)]
        /// Chain namespace prefix carried by every source key (hex)
        namespace: Option<Namespace>,
        #[arg(long = "batch-size", default_value_t = DEFAULT_BATCH_SIZE, value_parser = clap::value_parser!(u64).range(1..=10_000_000))]
        /// Records per committed batch
        batch_size: u64,
        #[arg(long = "tolerance", default_value_t = 0.0, value_parser = parse_tolerance)]
        /// Maximum tolerated fraction of unclassifiable records
        tolerance: f64,
        #[arg(long = "max-height", default_value_t = DEFAULT_MAX_HEIGHT)]
        /// Sane-height bound for the index rebuild
        max_height: u64,
        #[arg(long = "tip")]
        /// Target tip height; resolved automatically when omitted
        tip: Option<u64>,
        #[arg(long = "revision")]
        /// Consensus revision to write under; current+1 when omitted
        revision: Option<u64>,
        #[arg(long = "json", default_value_t = false)]
        /// Emit machine-readable JSON output
        json: bool,
    },
    #[command(name = "analyze", about = "Census of a store's key space (read-only)")]
    Analyze {
        #[arg(long = "store")]
        /// Path to the store to analyze (opened read-only)
        store_path: PathBuf,
        #[arg(long = "namespace", value_parser = parse_namespace)]
        /// Chain namespace prefix, when analyzing a source store (hex)
        namespace: Option<Namespace>,
        #[arg(long = "json", default_value_t = false)]
        /// Emit machine-readable JSON output
        json: bool,
    },
    #[command(
        name = "verify",
        about = "Check the migrated store against the consumer contract (read-only)"
    )]
    Verify {
        #[arg(long = "store.dst")]
        /// Path to the migrated ledger store (opened read-only)
        destination_path: PathBuf,
        #[arg(long = "store.consensus")]
        /// Separate consensus store; defaults to the ledger store
        consensus_path: Option<PathBuf>,
        #[arg(long = "stride", default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
        /// Check every stride-th height (genesis and tip always)
        stride: u64,
        #[arg(long = "skip-consensus", default_value_t = false)]
        /// Skip the consensus partition checks
        skip_consensus: bool,
        #[arg(long = "json", default_value_t = false)]
        /// Emit machine-readable JSON output
        json: bool,
    },
}

#[derive(Serialize)]
struct MigrateReport {
    schema_version: u32,
    status: &'static str,
    transcode: RunSummary,
    rebuild: RebuildSummary,
    synthesize: SynthesizeSummary,
}

#[derive(Serialize)]
struct TipReport {
    schema_version: u32,
    tip: Option<chainport_migration::TipInfo>,
}

#[derive(Serialize)]
struct ErrorReport {
    schema_version: u32,
    status: &'static str,
    error: String,
}

pub fn init_tracing(json: bool) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        // Keep stdout clean for the JSON report.
        builder.with_writer(std::io::stderr).init();
    } else {
        builder.init();
    }
}

pub fn emit_error_report(json: bool, error: &eyre::Report) {
    if json {
        let report = ErrorReport {
            schema_version: REPORT_SCHEMA_VERSION,
            status: "failed",
            error: format!("{error:#}"),
        };
        match serde_json::to_string(&report) {
            Ok(encoded) => println!("{encoded}"),
            Err(ser_error) => {
                eprintln!("Migration failed: {error:#}\nReport encoding failed: {ser_error}")
            }
        }
        return;
    }
    eprintln!("Migration failed: {error:#}");
}

fn emit_json<T: Serialize>(report: &T) -> Result<()> {
    let encoded = serde_json::to_string(report).wrap_err("Cannot serialize report")?;
    println!("{encoded}");
    Ok(())
}

fn open_read_only(path: &PathBuf) -> Result<Store> {
    Store::open(path, EngineType::RocksDb, OpenMode::ReadOnly)
        .wrap_err_with(|| format!("Cannot open store at {path:?} read-only"))
}

fn open_read_write(path: &PathBuf) -> Result<Store> {
    Store::open(path, EngineType::RocksDb, OpenMode::ReadWrite)
        .wrap_err_with(|| format!("Cannot open store at {path:?} read-write"))
}

fn codec_for(namespace: Option<&Namespace>) -> KeyCodec {
    match namespace {
        Some(Namespace(bytes)) => KeyCodec::namespaced(bytes.clone()),
        None => KeyCodec::flat(),
    }
}

impl Subcommand {
    pub fn json_output(&self) -> bool {
        match self {
            Self::Transcode { json, .. }
            | Self::RebuildIndex { json, .. }
            | Self::ResolveTip { json, .. }
            | Self::Synthesize { json, .. }
            | Self::Migrate { json, .. }
            | Self::Analyze { json, .. }
            | Self::Verify { json, .. } => *json,
        }
    }

    pub fn run(&self) -> Result<()> {
        // The stop flag is the engine's cooperative cancellation seam;
        // the supervisor wiring it up belongs to the orchestration
        // layer, so a plain CLI run never raises it.
        let stop = AtomicBool::new(false);
        match self {
            Self::Transcode {
                source_path,
                destination_path,
                namespace,
                batch_size,
                tolerance,
                estimated_records,
                dry_run,
                json,
            } => {
                let source = open_read_only(source_path)?;
                // A dry run writes nowhere; point the pipeline at a
                // scratch store instead of creating the destination.
                let destination = if *dry_run {
                    Store::in_memory()
                } else {
                    open_read_write(destination_path)?
                };
                let config = TranscodeConfig {
                    batch_size: *batch_size as usize,
                    tolerance: *tolerance,
                    dry_run: *dry_run,
                    sync: SyncMode::Sync,
                    estimated_records: *estimated_records,
                };
                let summary = transcode(
                    &source,
                    &destination,
                    &codec_for(namespace.as_ref()),
                    &config,
                    &stop,
                )?;
                if *json {
                    emit_json(&summary)?;
                } else {
                    print_transcode_summary(&summary);
                }
                Ok(())
            }
            Self::RebuildIndex {
                destination_path,
                batch_size,
                max_height,
                json,
            } => {
                let destination = open_read_write(destination_path)?;
                let config = RebuildConfig {
                    batch_size: *batch_size as usize,
                    max_height: *max_height,
                    sync: SyncMode::Sync,
                };
                let summary = rebuild_canonical_index(&destination, &config, &stop)?;
                if *json {
                    emit_json(&summary)?;
                } else {
                    print_rebuild_summary(&summary);
                }
                Ok(())
            }
            Self::ResolveTip {
                destination_path,
                json,
            } => {
                let destination = open_read_only(destination_path)?;
                let tip = resolve_tip(&destination)?;
                if *json {
                    emit_json(&TipReport {
                        schema_version: REPORT_SCHEMA_VERSION,
                        tip,
                    })?;
                } else {
                    match tip {
                        Some(tip) => println!("Tip: #{} ({:?})", tip.height, tip.hash),
                        None => println!("No usable chain from genesis."),
                    }
                }
                Ok(())
            }
            Self::Synthesize {
                destination_path,
                consensus_path,
                tip,
                revision,
                batch_size,
                json,
            } => {
                let config = SynthesizeConfig {
                    batch_size: *batch_size as usize,
                    tip: *tip,
                    revision: *revision,
                    sync: SyncMode::Sync,
                };
                let summary = match consensus_path {
                    Some(consensus_path) => {
                        let ledger = open_read_only(destination_path)?;
                        let consensus = open_read_write(consensus_path)?;
                        synthesize(&ledger, &consensus, &config, &stop)?
                    }
                    None => {
                        let store = open_read_write(destination_path)?;
                        synthesize(&store, &store, &config, &stop)?
                    }
                };
                if *json {
                    emit_json(&summary)?;
                } else {
                    print_synthesize_summary(&summary);
                }
                Ok(())
            }
            Self::Migrate {
                source_path,
                destination_path,
                namespace,
                batch_size,
                tolerance,
                max_height,
                tip,
                revision,
                json,
            } => {
                let source = open_read_only(source_path)?;
                let destination = open_read_write(destination_path)?;

                let transcode_summary = transcode(
                    &source,
                    &destination,
                    &codec_for(namespace.as_ref()),
                    &TranscodeConfig {
                        batch_size: *batch_size as usize,
                        tolerance: *tolerance,
                        dry_run: false,
                        sync: SyncMode::Sync,
                        estimated_records: None,
                    },
                    &stop,
                )?;
                let rebuild_summary = rebuild_canonical_index(
                    &destination,
                    &RebuildConfig {
                        batch_size: *batch_size as usize,
                        max_height: *max_height,
                        sync: SyncMode::Sync,
                    },
                    &stop,
                )?;
                let synthesize_summary = synthesize(
                    &destination,
                    &destination,
                    &SynthesizeConfig {
                        batch_size: *batch_size as usize,
                        tip: *tip,
                        revision: *revision,
                        sync: SyncMode::Sync,
                    },
                    &stop,
                )?;

                let report = MigrateReport {
                    schema_version: REPORT_SCHEMA_VERSION,
                    status: "completed",
                    transcode: transcode_summary,
                    rebuild: rebuild_summary,
                    synthesize: synthesize_summary,
                };
                if *json {
                    emit_json(&report)?;
                } else {
                    print_transcode_summary(&report.transcode);
                    print_rebuild_summary(&report.rebuild);
                    print_synthesize_summary(&report.synthesize);
                }
                Ok(())
            }
            Self::Analyze {
                store_path,
                namespace,
                json,
            } => {
                let store = open_read_only(store_path)?;
                let analysis =
                    chainport_migration::analyze(&store, &codec_for(namespace.as_ref()))?;
                if *json {
                    emit_json(&analysis)?;
                } else {
                    println!("Total keys: {}", analysis.total_keys);
                    for (class, count) in &analysis.per_class {
                        println!("  {class}: {count}");
                    }
                    if analysis.unknown_keys > 0 || analysis.malformed_keys > 0 {
                        println!(
                            "  unknown: {}, malformed: {}",
                            analysis.unknown_keys, analysis.malformed_keys
                        );
                    }
                    match analysis.highest_canonical {
                        Some(height) => println!("Highest canonical mapping: #{height}"),
                        None => println!("No canonical mappings."),
                    }
                }
                Ok(())
            }
            Self::Verify {
                destination_path,
                consensus_path,
                stride,
                skip_consensus,
                json,
            } => {
                let destination = open_read_only(destination_path)?;
                let consensus = consensus_path.as_ref().map(open_read_only).transpose()?;
                let config = VerifyConfig {
                    stride: *stride,
                    check_consensus: !*skip_consensus,
                };
                let report = verify(&destination, consensus.as_ref(), &config)?;
                if *json {
                    emit_json(&report)?;
                } else {
                    print_verify_report(&report);
                }
                if report.ok() {
                    Ok(())
                } else {
                    Err(eyre::eyre!(
                        "verification found {} failure(s)",
                        report.failure_count
                    ))
                }
            }
        }
    }
}

fn print_transcode_summary(summary: &RunSummary) {
    println!(
        "Transcode: {} scanned, {} written, {} rejected in {}ms{}",
        summary.scanned,
        summary.written,
        summary.rejected(),
        summary.elapsed_ms,
        if summary.interrupted {
            " (interrupted)"
        } else {
            ""
        }
    );
    for (class, count) in &summary.per_class {
        println!("  {class}: {count}");
    }
    if let Some(checkpoint) = &summary.last_committed_key {
        println!("  last committed key: {checkpoint}");
    }
}

fn print_rebuild_summary(summary: &RebuildSummary) {
    println!(
        "Rebuild: {} headers scanned, {} canonical written, {} hash-index synthesized, {} collisions",
        summary.headers_scanned,
        summary.canonical_written,
        summary.hash_index_written,
        summary.collisions
    );
    match (&summary.tip, &summary.head_pointer) {
        (Some(tip), Some(hash)) => println!("  head pointers set to #{} ({hash})", tip.height),
        _ => println!("  no usable chain; head pointers untouched"),
    }
}

fn print_synthesize_summary(summary: &SynthesizeSummary) {
    println!(
        "Synthesize: {} blocks at revision {}, tip #{}, last accepted {}{}",
        summary.blocks_written,
        summary.revision,
        summary.tip,
        summary.last_accepted,
        if summary.interrupted {
            " (interrupted)"
        } else {
            ""
        }
    );
}

fn print_verify_report(report: &VerifyReport) {
    match report.tip {
        Some(tip) => println!(
            "Verify: tip #{tip}, {} heights checked, {} failure(s)",
            report.checked_heights, report.failure_count
        ),
        None => println!("Verify: no usable chain from genesis"),
    }
    for failure in &report.failures {
        match failure.height {
            Some(height) => println!("  #{height} {}: {}", failure.check, failure.detail),
            None => println!("  {}: {}", failure.check, failure.detail),
        }
    }
}
