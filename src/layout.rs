//! Section layout: sizes, alignments, addresses, and file offsets.
//!
//! Two routines, run in this order. The first packs each section's atoms,
//! assigning every atom its section offset under its alignment constraint
//! and deriving the section's size and alignment. The second walks the
//! sections in layout order handing out virtual addresses and file offsets.
//! Passes that change atom lists re-run both before relying on addresses.

use crate::ir::{Program, Section};
use log::trace;

/// Pack each section's atoms and set the section's `size` and `align`.
pub fn set_section_sizes_and_alignments(program: &mut Program) {
    let section_ids: Vec<Section> = program.sections.keys().collect();
    for section_id in section_ids {
        let atom_list = program.sections[section_id].atoms.clone();
        let mut offset = 0u64;
        let mut max_alignment = 0u8;
        for atom in atom_list {
            let data = &mut program.atoms[atom];
            if data.align.powerof2 > max_alignment {
                max_alignment = data.align.powerof2;
            }
            offset = data.align.round_up(offset);
            data.section_offset = offset;
            offset += data.size;
        }
        let section = &mut program.sections[section_id];
        section.size = offset;
        section.align = max_alignment;
    }
}

/// Assign each section its virtual address and file offset.
///
/// Sections pack one after another from the program base address, except
/// that a section with a `fixed_address` pin jumps to that address.
pub fn assign_addresses(program: &mut Program) {
    let mut address = program.base_address;
    let mut file_offset = 0u64;
    let section_ids: Vec<Section> = program.sections.keys().collect();
    for section_id in section_ids {
        let section = &mut program.sections[section_id];
        let section_alignment = 1u64 << section.align;
        address = (address + section_alignment - 1) & !(section_alignment - 1);
        if let Some(fixed) = section.fixed_address {
            address = fixed;
        }
        file_offset = (file_offset + section_alignment - 1) & !(section_alignment - 1);
        section.address = address;
        section.file_offset = file_offset;
        trace!(
            "layout: {}/{} address={:#x} size={:#x}",
            section.segment,
            section.name,
            section.address,
            section.size
        );
        address += section.size;
        file_offset += section.size;
    }
}
