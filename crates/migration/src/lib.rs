//! Chain state migration and consensus-bootstrapping engine.
//!
//! Takes a ledger persisted under a namespaced key layout, re-encodes
//! it into the flat destination layout, rebuilds the canonical indices,
//! and synthesizes the consensus-engine state needed to resume over the
//! migrated history without replaying consensus.
//!
//! The passes run in this order:
//!
//! 1. [`transcode`]: stream the source, rewrite every key, batch-write
//!    the destination.
//! 2. [`rebuild`]: reconstruct number→hash and hash→number indices
//!    from header records and repair the head pointers.
//! 3. [`tip`]: resolve the highest height with a gap-free chain from
//!    genesis (read-only).
//! 4. [`consensus`]: write revisioned block/status/index records and
//!    the last-accepted pointer for every height up to the tip.
//!
//! [`analyze`] and [`verify`] are read-only companions for inspecting a
//! store before and after.

pub mod analyze;
pub mod consensus;
pub mod error;
pub mod progress;
pub mod rebuild;
pub mod schema;
pub mod tip;
pub mod transcode;
pub mod verify;

pub use analyze::{StoreAnalysis, analyze};
pub use consensus::{SynthesizeConfig, SynthesizeSummary, synthesize};
pub use error::MigrationError;
pub use progress::RunSummary;
pub use rebuild::{RebuildConfig, RebuildSummary, rebuild_canonical_index};
pub use schema::{KeyCodec, RecordClass};
pub use tip::{TipInfo, resolve_tip};
pub use transcode::{TranscodeConfig, transcode};
pub use verify::{VerifyConfig, VerifyReport, verify};
