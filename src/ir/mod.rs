//! In-memory program representation shared by the linker's final phases.
//!
//! Atoms and sections live in entity arenas on [`Program`] and are referred
//! to everywhere by their `u32` entity index; see
//! [`atom`](crate::ir::atom) for why identity is an index rather than a
//! reference. The container corresponds to the state handed from pass to
//! pass between symbol resolution and writing the output file.

pub mod atom;
pub mod fixup;
pub mod section;

pub use self::atom::{
    Alignment, Atom, AtomContent, AtomData, AtomKind, Combine, IslandContent, Scope, SymbolTable,
};
pub use self::fixup::{ClusterPosition, Fixup, FixupBinding, FixupKind};
pub use self::section::{Section, SectionData, SectionKind};

use crate::entity::PrimaryMap;
use std::collections::HashMap;

/// The linker's in-memory program: every atom, every final section, and the
/// side tables later phases consume.
pub struct Program {
    /// All atoms, including ones not (yet) reachable from any section.
    pub atoms: PrimaryMap<Atom, AtomData>,
    /// Final sections in layout order.
    pub sections: PrimaryMap<Section, SectionData>,
    /// Address at which layout places the first section.
    pub base_address: u64,
    /// Targets of indirectly-bound fixups, indexed by binding index.
    pub indirect_binding_table: Vec<Atom>,
    /// Host section of every atom a pass manufactured after the sections
    /// were first populated. The writer consults this for symbol table
    /// bookkeeping.
    pub atom_to_section: HashMap<Atom, Section>,
}

impl Program {
    /// Create an empty program.
    pub fn new() -> Self {
        Self {
            atoms: PrimaryMap::new(),
            sections: PrimaryMap::new(),
            base_address: 0x1000,
            indirect_binding_table: Vec::new(),
            atom_to_section: HashMap::new(),
        }
    }

    /// Append a section to the layout order.
    pub fn add_section(&mut self, data: SectionData) -> Section {
        self.sections.push(data)
    }

    /// Add an atom and append it to its owning section's atom list.
    pub fn add_atom(&mut self, data: AtomData) -> Atom {
        let section = data.section;
        let atom = self.atoms.push(data);
        self.sections[section].atoms.push(atom);
        atom
    }

    /// The atom's address under current layout.
    pub fn atom_address(&self, atom: Atom) -> u64 {
        let data = &self.atoms[atom];
        self.sections[data.section].address + data.section_offset
    }

    /// The atom a fixup's operand is bound to, resolving indirect bindings
    /// through the indirect binding table.
    pub fn resolved_target(&self, fixup: &Fixup) -> Option<Atom> {
        match fixup.binding {
            FixupBinding::None | FixupBinding::ByNameUnbound => None,
            FixupBinding::ByContentBound(target) | FixupBinding::DirectlyBound(target) => {
                Some(target)
            }
            FixupBinding::IndirectlyBound(index) => {
                Some(self.indirect_binding_table[index as usize])
            }
        }
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}
