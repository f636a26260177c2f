use chainport_storage::StoreError;
use ethereum_types::H256;

use crate::schema::CodecError;

/// Failures a migration pass can surface.
///
/// Store faults abort immediately; integrity findings are surfaced and
/// abort only when they block what the caller asked for; a tolerance
/// breach means the codec is wrong for the dataset and is always fatal.
/// Individual malformed records are counted, not raised; see
/// [`crate::progress::Progress`].
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("malformed record: {0}")]
    Format(#[from] CodecError),

    #[error(
        "unclassifiable records over tolerance: {rejected} of {scanned} ({fraction:.4} > {tolerance:.4})"
    )]
    ToleranceExceeded {
        rejected: u64,
        scanned: u64,
        fraction: f64,
        tolerance: f64,
    },

    #[error("canonical chain gap: no canonical hash for height {height}")]
    CanonicalGap { height: u64 },

    #[error("missing header for height {height} (canonical hash {hash:?})")]
    MissingHeader { height: u64, hash: H256 },

    #[error("requested tip {requested} exceeds resolved tip {resolved}")]
    TipUnreachable { requested: u64, resolved: u64 },

    #[error("no canonical chain found (empty index)")]
    EmptyChain,

    #[error("consensus metadata is malformed: {0}")]
    ConsensusMetadata(String),
}
