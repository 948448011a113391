//! Fixups: store and relocation directives attached to atoms.
//!
//! A fixup names a byte offset inside its atom, an operation to perform
//! there, and how the operand of that operation is bound. Fixups at one store
//! site are grouped into a *cluster*: the cluster opens with a fixup marked
//! first-in-cluster and closes with one marked last-in-cluster, and a
//! consumer must treat the cluster as a unit. A typical branch cluster is
//! either the single combined form
//!
//! ```text
//!     StoreTargetAddressArm64Branch26 -> target
//! ```
//!
//! or the split form with a constant folded into the target address:
//!
//! ```text
//!     SetTargetAddress -> target
//!     AddAddend(0x40)
//!     StorePpcBranch24
//! ```

use crate::ir::Atom;

/// Position of a fixup within its cluster.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ClusterPosition {
    /// The only fixup of a one-element cluster.
    Only,
    /// The first fixup of a multi-element cluster.
    Begin,
    /// An interior fixup of a multi-element cluster.
    Mid,
    /// The last fixup of a multi-element cluster.
    End,
}

impl ClusterPosition {
    /// Does this fixup open a cluster?
    pub fn is_first_in_cluster(self) -> bool {
        match self {
            ClusterPosition::Only | ClusterPosition::Begin => true,
            ClusterPosition::Mid | ClusterPosition::End => false,
        }
    }

    /// Does this fixup close a cluster?
    pub fn is_last_in_cluster(self) -> bool {
        match self {
            ClusterPosition::Only | ClusterPosition::End => true,
            ClusterPosition::Begin | ClusterPosition::Mid => false,
        }
    }
}

/// How a fixup's operand is bound.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FixupBinding {
    /// No operand.
    None,
    /// Named symbol the resolver has not bound yet.
    ByNameUnbound,
    /// Bound to an atom chosen by content equality (coalesced literals).
    ByContentBound(Atom),
    /// Bound directly to an atom.
    DirectlyBound(Atom),
    /// Bound through the global indirect binding table.
    IndirectlyBound(u32),
}

/// The operation a fixup performs at its store site.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FixupKind {
    /// Add a constant to the target address accumulated so far.
    AddAddend {
        /// The constant to add.
        addend: u32,
    },
    /// Begin a store cluster by naming the target whose address is stored.
    SetTargetAddress,
    /// Store a PPC 24-bit branch displacement.
    StorePpcBranch24,
    /// Store an ARM 24-bit branch displacement.
    StoreArmBranch24,
    /// Store a Thumb 22-bit branch displacement.
    StoreThumbBranch22,
    /// Store an AArch64 26-bit branch displacement.
    StoreArm64Branch26,
    /// Combined set-target-and-store form of `StorePpcBranch24`.
    StoreTargetAddressPpcBranch24,
    /// Combined set-target-and-store form of `StoreArmBranch24`.
    StoreTargetAddressArmBranch24,
    /// Combined set-target-and-store form of `StoreThumbBranch22`.
    StoreTargetAddressThumbBranch22,
    /// Combined set-target-and-store form of `StoreArm64Branch26`.
    StoreTargetAddressArm64Branch26,
    /// Store the low 16 bits of the target address into a Thumb-2 `movw`.
    StoreThumbLow16,
    /// Store the high 16 bits of the target address into a Thumb-2 `movt`.
    StoreThumbHigh16,
    /// Tag an island atom with its ultimate destination so the writer can
    /// branch there directly when it turns out to be reachable.
    IslandTarget,
    /// The next atom in the section must stay immediately after this one.
    NoneFollowOn,
}

impl FixupKind {
    /// Is this one of the branch stores the island pass rewrites?
    pub fn is_branch(self) -> bool {
        match self {
            FixupKind::StorePpcBranch24
            | FixupKind::StoreArmBranch24
            | FixupKind::StoreThumbBranch22
            | FixupKind::StoreArm64Branch26
            | FixupKind::StoreTargetAddressPpcBranch24
            | FixupKind::StoreTargetAddressArmBranch24
            | FixupKind::StoreTargetAddressThumbBranch22
            | FixupKind::StoreTargetAddressArm64Branch26 => true,
            _ => false,
        }
    }
}

/// A single fixup record.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Fixup {
    /// Byte offset of the store site within the owning atom.
    pub offset_in_atom: u32,
    /// Position within the fixup cluster at that site.
    pub position: ClusterPosition,
    /// Operation to perform.
    pub kind: FixupKind,
    /// Operand binding.
    pub binding: FixupBinding,
}

impl Fixup {
    /// Create a fixup record.
    pub fn new(
        offset_in_atom: u32,
        position: ClusterPosition,
        kind: FixupKind,
        binding: FixupBinding,
    ) -> Self {
        Self {
            offset_in_atom,
            position,
            kind,
            binding,
        }
    }
}
