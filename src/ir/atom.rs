//! Atoms: the smallest relocatable units of linker output.
//!
//! Every byte of the final image belongs to exactly one atom. An atom has a
//! size, an alignment constraint, an owning section, and a list of fixups
//! describing the stores the writer must perform into its bytes. Atoms are
//! referenced by a compact `u32` entity index into the arena owned by
//! [`Program`](crate::ir::Program); the index is the atom's identity for the
//! rest of the link.

use crate::entity::entity_impl;
use crate::ir::{Fixup, Program, Section};
use smallvec::SmallVec;

/// An opaque reference to an atom.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Atom(u32);
entity_impl!(Atom, "atom");

/// An alignment constraint.
///
/// The atom's section offset `o` must satisfy `o % 2^powerof2 == modulus`.
/// A non-zero modulus occurs for atoms carved out of the middle of a larger
/// aligned chunk of an object file.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Alignment {
    /// Power-of-two exponent of the alignment.
    pub powerof2: u8,
    /// Required residue of the offset modulo `2^powerof2`.
    pub modulus: u32,
}

impl Alignment {
    /// An alignment of `2^powerof2` bytes with modulus zero.
    pub fn new(powerof2: u8) -> Self {
        Self {
            powerof2,
            modulus: 0,
        }
    }

    /// The smallest offset not less than `offset` that satisfies this
    /// constraint.
    pub fn round_up(self, offset: u64) -> u64 {
        let alignment = 1u64 << self.powerof2;
        let current_modulus = offset % alignment;
        let required_modulus = u64::from(self.modulus);
        if current_modulus == required_modulus {
            offset
        } else if required_modulus > current_modulus {
            offset + (required_modulus - current_modulus)
        } else {
            offset + (required_modulus + alignment - current_modulus)
        }
    }
}

/// Broad classification of an atom's role in the output.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AtomKind {
    /// Ordinary code from an object file.
    Code,
    /// A lazy-binding stub synthesized by the stub pass.
    Stub,
    /// Non-code data.
    Data,
    /// A branch island synthesized by the island pass.
    BranchIsland,
}

/// Symbol visibility of an atom.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Visible only within the defining translation unit.
    TranslationUnit,
    /// Visible within the linkage unit, not exported.
    LinkageUnit,
    /// Exported.
    Global,
}

/// Whether identical copies of an atom may be merged.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Combine {
    /// The atom is unique; never merge it.
    Never,
    /// Weak definitions merged by name.
    ByName,
}

/// Whether the atom gets a symbol table entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SymbolTable {
    /// No entry.
    NotIn,
    /// Listed in the symbol table.
    In,
}

/// The bytes an atom contributes to the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtomContent {
    /// Bytes carried over from an input file.
    Bytes(Vec<u8>),
    /// Machine code synthesized by the branch island pass.
    Island(IslandContent),
}

/// The body of a branch island, tagged per architecture.
///
/// Most variants are a single long-range branch whose displacement is filled
/// in by a fixup on the island. The two ARM-to-Thumb1 variants have no fixups
/// at all: they materialize a full 32-bit destination in their body, so their
/// bytes can only be produced once final addresses are known.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IslandContent {
    /// PPC `b` instruction, displacement stored by fixup.
    PpcBranch,
    /// AArch64 `b` instruction, displacement stored by fixup.
    Arm64Branch,
    /// ARM `b` instruction, displacement stored by fixup.
    ArmToArm,
    /// Thumb-2 `b.w` instruction, displacement stored by fixup.
    Thumb2ToThumb,
    /// Thumb-2 `movw; movt; bx r12` absolute sequence, halves stored by
    /// fixups.
    Thumb2Absolute,
    /// ARM `ldr ip, [pc, #4]; add ip, pc, ip; bx ip; .long disp` sequence
    /// jumping straight to the ultimate destination.
    PicArmToThumb1 {
        /// Ultimate destination of the original branch.
        final_target: Atom,
        /// Constant folded into the destination address.
        final_addend: u32,
    },
    /// ARM `ldr pc, [pc, #-4]; .long addr` absolute sequence jumping straight
    /// to the ultimate destination.
    NoPicArmToThumb1 {
        /// Ultimate destination of the original branch.
        final_target: Atom,
    },
}

impl IslandContent {
    /// Size in bytes of the island body.
    pub fn size(self) -> u64 {
        match self {
            IslandContent::PpcBranch
            | IslandContent::Arm64Branch
            | IslandContent::ArmToArm
            | IslandContent::Thumb2ToThumb => 4,
            IslandContent::Thumb2Absolute => 10,
            IslandContent::PicArmToThumb1 { .. } => 16,
            IslandContent::NoPicArmToThumb1 { .. } => 8,
        }
    }

    fn copy_raw_content(self, this: &AtomData, program: &Program, buffer: &mut [u8]) {
        match self {
            IslandContent::PpcBranch => write_be32(buffer, 0, 0x4800_0000),
            IslandContent::Arm64Branch => write_le32(buffer, 0, 0x1400_0000),
            IslandContent::ArmToArm => write_le32(buffer, 0, 0xEA00_0000),
            IslandContent::Thumb2ToThumb => write_le32(buffer, 0, 0xF000_8000),
            IslandContent::Thumb2Absolute => {
                write_le32(buffer, 0, 0x0c00_f240); // movw r12, #:lower16:
                write_le32(buffer, 4, 0x0c00_f2c0); // movt r12, #:upper16:
                write_le16(buffer, 8, 0x4760); // bx r12
            }
            IslandContent::PicArmToThumb1 {
                final_target,
                final_addend,
            } => {
                // There is no large-displacement Thumb-1 branch instruction,
                // so the island is ARM code that can jump to Thumb. The
                // 32-bit displacement reaches the ultimate destination in one
                // hop.
                let target = &program.atoms[final_target];
                let target_addr =
                    program.sections[target.section].address + target.section_offset;
                let this_addr = program.sections[this.section].address + this.section_offset;
                let mut displacement =
                    (target_addr + u64::from(final_addend)) as i64 - (this_addr + 12) as i64;
                if target.thumb {
                    displacement |= 1;
                }
                write_le32(buffer, 0, 0xe59f_c004); // ldr  ip, [pc, #4]
                write_le32(buffer, 4, 0xe08f_c00c); // add  ip, pc, ip
                write_le32(buffer, 8, 0xe12f_ff1c); // bx   ip
                write_le32(buffer, 12, displacement as u32); // .long target-this
            }
            IslandContent::NoPicArmToThumb1 { final_target } => {
                let target = &program.atoms[final_target];
                let mut target_addr = (program.sections[target.section].address
                    + target.section_offset) as u32;
                if target.thumb {
                    target_addr |= 1;
                }
                write_le32(buffer, 0, 0xe51f_f004); // ldr  pc, [pc, #-4]
                write_le32(buffer, 4, target_addr); // .long target
            }
        }
    }
}

fn write_le32(buffer: &mut [u8], offset: usize, value: u32) {
    buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn write_be32(buffer: &mut [u8], offset: usize, value: u32) {
    buffer[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

fn write_le16(buffer: &mut [u8], offset: usize, value: u16) {
    buffer[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

/// The data backing an atom.
#[derive(Debug, Clone)]
pub struct AtomData {
    /// Symbol name, if the atom has one.
    pub name: Option<String>,
    /// Owning section.
    pub section: Section,
    /// Offset within the owning section, assigned by layout.
    pub section_offset: u64,
    /// Size in bytes.
    pub size: u64,
    /// Alignment constraint on the section offset.
    pub align: Alignment,
    /// Whether the atom is Thumb code. Bit 0 of a code address encodes this
    /// on ARM.
    pub thumb: bool,
    /// Role of the atom in the output.
    pub kind: AtomKind,
    /// Symbol visibility.
    pub scope: Scope,
    /// Coalescing behavior.
    pub combine: Combine,
    /// Symbol table membership.
    pub symbol_table: SymbolTable,
    /// Address the atom had in its object file; zero for synthesized atoms.
    pub object_address: u64,
    /// The bytes the atom contributes.
    pub content: AtomContent,
    /// Fixups applied to the atom's bytes.
    pub fixups: SmallVec<[Fixup; 4]>,
}

impl AtomData {
    /// Create an ordinary code atom of `size` bytes with default alignment.
    pub fn code(section: Section, name: impl Into<String>, size: u64) -> Self {
        Self {
            name: Some(name.into()),
            section,
            section_offset: 0,
            size,
            align: Alignment::new(2),
            thumb: false,
            kind: AtomKind::Code,
            scope: Scope::Global,
            combine: Combine::Never,
            symbol_table: SymbolTable::In,
            object_address: 0,
            content: AtomContent::Bytes(Vec::new()),
            fixups: SmallVec::new(),
        }
    }

    /// Does the atom carry a fixup requiring the next atom to stay glued
    /// after it?
    pub fn has_follow_on_fixup(&self) -> bool {
        self.fixups
            .iter()
            .any(|fixup| fixup.kind == crate::ir::FixupKind::NoneFollowOn)
    }

    /// Write the atom's bytes into `buffer`, which must be at least
    /// `self.size` long. Island bodies that embed addresses read final
    /// layout out of `program`, so layout must be up to date.
    pub fn copy_raw_content(&self, program: &Program, buffer: &mut [u8]) {
        match &self.content {
            AtomContent::Bytes(bytes) => buffer[..bytes.len()].copy_from_slice(bytes),
            AtomContent::Island(island) => island.copy_raw_content(self, program, buffer),
        }
    }
}
