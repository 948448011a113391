//! Result and error types used by the linker passes.

use crate::ir::FixupKind;
use crate::isa::Architecture;
use thiserror::Error;

/// A fatal condition detected while running a linker pass.
///
/// None of these are recoverable; the link either completes or aborts with
/// the first error encountered.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// An architecture with no branch-distance parameters reached a pass that
    /// needs them. The passes return early for architectures they do not
    /// handle, so seeing this indicates an internal inconsistency.
    #[error("unsupported architecture: {0}")]
    UnsupportedArchitecture(Architecture),

    /// No atom without a follow-on grouping constraint was available at the
    /// point where an island region had to be placed.
    #[error("unable to insert branch island, no insertion point available before address {wanted_address:#x}")]
    NoIslandInsertionPoint {
        /// The address by which the next island region had to begin.
        wanted_address: u64,
    },

    /// A fixup kind that is not a supported branch reached the island
    /// factory.
    #[error("unexpected branch kind: {0:?}")]
    UnexpectedBranchKind(FixupKind),
}

/// A convenient alias for a `Result` that uses `LinkError` as the error type.
pub type LinkResult<T> = Result<T, LinkError>;
