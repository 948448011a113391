//! Branch island insertion.
//!
//! # The reach problem
//!
//! Architectures with fixed-width branch instructions can only encode a
//! limited displacement: PowerPC and ARM `b`/`bl` reach ±32MB, Thumb-2 ±16MB,
//! Thumb-1 ±4MB, AArch64 ±128MB. Once the laid-out text grows past the
//! limit, a caller can no longer reach a distant callee directly:
//!
//! ```text
//!     bl  _far          ; displacement no longer fits in the instruction
//! ```
//!
//! The fix is to synthesize a *branch island*, a tiny atom holding a single
//! unconditional branch, at an intermediate address and retarget the caller
//! at it:
//!
//! ```text
//!     bl  _far.island   ; ...  _far.island:  b _far
//! ```
//!
//! When even the island cannot reach, islands chain through consecutive
//! regions until the destination is in range.
//!
//! # Algorithm
//!
//! The pass first sizes and places all sections, then decides conservatively
//! whether any branch could be out of range at all; most links return here.
//! If islands are possible it plans *island regions*: insertion points spaced
//! so that no run of code between two regions exceeds a per-architecture
//! distance held below the branch reach (the slack is where the islands
//! themselves live). Every code section is then scanned fixup cluster by
//! fixup cluster; an over-range branch gets an island in each region between
//! it and its destination, each island branching to the next, and the branch
//! is rewritten to aim at the island nearest its source. Islands for the
//! same ultimate destination are shared within a region. Finally the
//! accumulated islands are spliced into their host sections right after
//! their insertion points.

use crate::entity::SecondaryMap;
use crate::ir::{
    Alignment, Atom, AtomContent, AtomData, AtomKind, ClusterPosition, Combine, Fixup,
    FixupBinding, FixupKind, IslandContent, Program, Scope, Section, SectionKind, SymbolTable,
};
use crate::isa;
use crate::layout;
use crate::result::{LinkError, LinkResult};
use crate::settings::{LinkOptions, OutputKind};
use log::{debug, warn};
use smallvec::SmallVec;
use std::collections::HashMap;

/// Insert branch islands wherever the laid-out program contains a direct
/// branch whose destination is beyond the architecture's branch reach.
///
/// Runs section layout as a side effect. On return every branch fixup either
/// reaches its target directly or has been rewritten to reach it through a
/// chain of islands, and the islands are ordinary members of their host
/// sections.
pub fn insert_branch_islands(opts: &LinkOptions, program: &mut Program) -> LinkResult<()> {
    // Only final linked images get branch islands.
    if opts.output_kind == OutputKind::Object {
        return Ok(());
    }

    // The user may disable branch island generation.
    if !opts.allow_branch_islands {
        return Ok(());
    }

    // Variable-width-branch architectures never need islands.
    if !opts.architecture.has_limited_branch_reach() {
        return Ok(());
    }

    let mut pass = Pass::new();
    if !pass.might_need_branch_islands(opts, program)? {
        return Ok(());
    }

    // If branches cross sections (or the image is pre-linked), regions are
    // placed against whole-image addresses; otherwise section-local offsets
    // are enough.
    pass.global_addresses =
        pass.seen_cross_section_branch || opts.output_kind == OutputKind::Preload;
    if pass.global_addresses {
        pass.build_address_map(program);
    }

    pass.find_island_insertion_points(program)?;

    let section_ids: Vec<Section> = program.sections.keys().collect();
    for section_id in section_ids {
        if program.sections[section_id].kind == SectionKind::Code {
            pass.make_islands_for_section(opts, program, section_id)?;
        }
    }

    if pass.island_count == 0 {
        debug!("a bit surprising that we didn't need any branch islands after all");
        return Ok(());
    }
    debug!(
        "{} branch islands required in {} regions",
        pass.island_count,
        pass.regions.len()
    );

    pass.splice(program);
    Ok(())
}

/// Ultimate destination of a rewritten branch: the target atom plus the
/// constant addend folded into the branch.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct FinalTarget {
    atom: Atom,
    addend: u32,
}

/// One planned island region: an insertion point and everything that
/// accumulates behind it.
struct Region {
    /// Atom after which this region's islands are spliced.
    insertion_point: Atom,
    /// Section containing the insertion point.
    section: Section,
    /// End of the insertion point, in the resolver's coordinate system.
    address: u64,
    /// Islands in creation order.
    islands: Vec<Atom>,
    /// At most one island per ultimate destination within a region.
    islands_by_target: HashMap<FinalTarget, Atom>,
}

/// All state of one pass invocation. Dropped when the pass returns; only the
/// island atoms (handed off to their sections) outlive it.
struct Pass {
    seen_cross_section_branch: bool,
    seen_thumb_branch: bool,
    /// Whether source/destination/region addresses are whole-image rather
    /// than section-local.
    global_addresses: bool,
    lowest_text_addr: u64,
    furthest_stub_sect: u64,
    furthest_code_or_stub: u64,
    size_of_text_seg: u64,
    /// Maximum run of code between consecutive regions; also the branch
    /// limit the resolver checks displacements against.
    between_regions: u64,
    addresses: SecondaryMap<Atom, u64>,
    regions: Vec<Region>,
    island_count: usize,
}

impl Pass {
    fn new() -> Self {
        Self {
            seen_cross_section_branch: false,
            seen_thumb_branch: false,
            global_addresses: false,
            lowest_text_addr: u64::MAX,
            furthest_stub_sect: 0,
            furthest_code_or_stub: 0,
            size_of_text_seg: 0,
            between_regions: 0,
            addresses: SecondaryMap::new(),
            regions: Vec::new(),
            island_count: 0,
        }
    }

    /// Initial conservative check as to whether islands might be required.
    ///
    /// Runs layout, then computes the per-section branch flags and the
    /// global extent scalars. If the total span of code and stubs exceeds
    /// what one branch can reach, or any single section does on its own,
    /// islands are assumed to be possible.
    fn might_need_branch_islands(
        &mut self,
        opts: &LinkOptions,
        program: &mut Program,
    ) -> LinkResult<bool> {
        let mut any_section_needs_islands = false;
        let mut sections_with_branches = 0u32;

        layout::set_section_sizes_and_alignments(program);
        layout::assign_addresses(program);

        let section_ids: Vec<Section> = program.sections.keys().collect();
        for section_id in section_ids {
            let (address, size, kind, in_text) = {
                let section = &program.sections[section_id];
                (
                    section.address,
                    section.size,
                    section.kind,
                    section.segment.starts_with("__TEXT"),
                )
            };
            if in_text {
                if self.lowest_text_addr > address {
                    self.lowest_text_addr = address;
                }
                self.size_of_text_seg += size;
            }
            match kind {
                SectionKind::Stub => {
                    self.furthest_stub_sect = address + size;
                    self.furthest_code_or_stub = address + size;
                }
                SectionKind::Code => {
                    self.furthest_code_or_stub = address + size;
                    let mut has_branches = false;
                    let mut has_thumb_branches = false;
                    let mut has_cross_section = false;
                    let atom_list = program.sections[section_id].atoms.clone();
                    for atom in atom_list {
                        let mut target: Option<Atom> = None;
                        for index in 0..program.atoms[atom].fixups.len() {
                            let fixup = program.atoms[atom].fixups[index];
                            if fixup.position.is_first_in_cluster() {
                                target = None;
                            }
                            if let Some(resolved) = program.resolved_target(&fixup) {
                                target = Some(resolved);
                            }
                            let have_branch = match fixup.kind {
                                FixupKind::StoreThumbBranch22
                                | FixupKind::StoreTargetAddressThumbBranch22 => {
                                    has_thumb_branches = true;
                                    self.seen_thumb_branch = true;
                                    true
                                }
                                kind => kind.is_branch(),
                            };
                            if have_branch {
                                has_branches = true;
                                // Branches to stubs count as cross-section:
                                // we don't know what user-specific sections
                                // might get made.
                                if let Some(target) = target {
                                    if program.atoms[target].section != section_id {
                                        has_cross_section = true;
                                        self.seen_cross_section_branch = true;
                                    }
                                }
                            }
                        }
                    }
                    let reach = isa::branch_reach(opts, has_thumb_branches)?;
                    let section = &mut program.sections[section_id];
                    section.has_branches = has_branches;
                    section.has_thumb_branches = has_thumb_branches;
                    section.has_cross_section_branches = has_cross_section;
                    if has_branches {
                        sections_with_branches += 1;
                        // The section alone may exceed the reach of its own
                        // branches.
                        if size > reach {
                            section.needs_islands = true;
                            any_section_needs_islands = true;
                        }
                    }
                }
                _ => {}
            }
        }
        if self.lowest_text_addr == u64::MAX {
            // No __TEXT sections: assume the lowest address that might need
            // to reach somewhere is 0.
            self.lowest_text_addr = 0;
        }

        let reach = isa::branch_reach(opts, self.seen_thumb_branch)?;
        if self
            .furthest_code_or_stub
            .saturating_sub(self.lowest_text_addr)
            > reach
            && self.seen_cross_section_branch
        {
            any_section_needs_islands = true;
        }
        debug!(
            "__TEXT seg size {}M, lowest text addr {:#x}, furthest stub {:#x}, furthest code or stub {:#x}, {} sections with branches, {} islands",
            self.size_of_text_seg / (1024 * 1024),
            self.lowest_text_addr,
            self.furthest_stub_sect,
            self.furthest_code_or_stub,
            sections_with_branches,
            if any_section_needs_islands { "needs" } else { "no" }
        );

        self.between_regions = isa::max_distance_between_islands(opts, self.seen_thumb_branch)?;
        Ok(any_section_needs_islands)
    }

    /// Lay the atoms out well enough to know where everything lands.
    ///
    /// Section offsets alone can't compare addresses across sections, so
    /// when the resolver works image-wide it gets a side table of absolute
    /// atom addresses under the current layout.
    fn build_address_map(&mut self, program: &Program) {
        for (_, section) in program.sections.iter() {
            let mut offset = 0u64;
            for &atom in &section.atoms {
                let data = &program.atoms[atom];
                offset = data.align.round_up(offset);
                self.addresses[atom] = section.address + offset;
                offset += data.size;
            }
        }
    }

    /// Figure out how many island regions will be needed and where.
    ///
    /// Walks the sections in layout order committing an insertion point
    /// whenever the run of code since the previous one would otherwise
    /// exceed the inter-region distance. An atom is a legal insertion point
    /// only if nothing requires its successor to stay glued to it.
    fn find_island_insertion_points(&mut self, program: &Program) -> LinkResult<()> {
        let mut previous_island_end_addr = self.lowest_text_addr;
        self.regions
            .reserve((self.furthest_code_or_stub / self.between_regions * 2) as usize);

        for (section_id, section) in program.sections.iter() {
            let mut insertion_point: Option<Atom> = None;
            if previous_island_end_addr + self.between_regions > section.address + section.size {
                continue; // No islands in this section.
            }
            if previous_island_end_addr + self.between_regions > self.furthest_code_or_stub {
                break; // Done.
            }
            if section.kind != SectionKind::Code {
                warn!(
                    "want to insert branch island into non-code section {}/{}, wanted address {:#x}",
                    section.segment,
                    section.name,
                    previous_island_end_addr + self.between_regions
                );
            }

            // We expect one or more islands in this section.
            for &atom in &section.atoms {
                let data = &program.atoms[atom];
                // If we move past the next atom, will the run length exceed
                // the inter-region distance?
                if section.address + data.section_offset + data.size
                    > previous_island_end_addr + self.between_regions
                {
                    // Yes. Commit the last known good insertion point.
                    let point = insertion_point.ok_or(LinkError::NoIslandInsertionPoint {
                        wanted_address: previous_island_end_addr + self.between_regions,
                    })?;
                    let point_data = &program.atoms[point];
                    let point_end = point_data.section_offset + point_data.size;
                    previous_island_end_addr = section.address + point_end;
                    let region_address = if self.global_addresses {
                        section.address + point_end
                    } else {
                        point_end
                    };
                    debug!(
                        "branch islands will be inserted at {:#x} after {} in section {}/{}",
                        region_address,
                        point_data.name.as_deref().unwrap_or("(anon)"),
                        section.segment,
                        section.name
                    );
                    self.regions.push(Region {
                        insertion_point: point,
                        section: section_id,
                        address: region_address,
                        islands: Vec::new(),
                        islands_by_target: HashMap::new(),
                    });
                    insertion_point = None;
                }
                // Can we insert an island after this atom? Then remember it.
                if !data.has_follow_on_fixup() {
                    insertion_point = Some(atom);
                }
            }
        }

        debug!("will use {} branch island regions", self.regions.len());
        Ok(())
    }

    /// Create islands for every out-of-range branch in `section_id`.
    fn make_islands_for_section(
        &mut self,
        opts: &LinkOptions,
        program: &mut Program,
        section_id: Section,
    ) -> LinkResult<()> {
        let preload = opts.output_kind == OutputKind::Preload;
        let branch_limit = self.between_regions as i64;
        debug!(
            "checking section {}/{}",
            program.sections[section_id].segment, program.sections[section_id].name
        );

        let atom_list = program.sections[section_id].atoms.clone();
        for atom in atom_list {
            let mut target: Option<Atom> = None;
            let mut addend = 0u32;
            let mut fixup_with_target: Option<usize> = None;
            let mut fixup_with_addend: Option<usize> = None;
            for index in 0..program.atoms[atom].fixups.len() {
                let fixup = program.atoms[atom].fixups[index];
                if fixup.position.is_first_in_cluster() {
                    target = None;
                    addend = 0;
                    fixup_with_target = None;
                    fixup_with_addend = None;
                }
                if let Some(resolved) = program.resolved_target(&fixup) {
                    target = Some(resolved);
                    fixup_with_target = Some(index);
                }
                if let FixupKind::AddAddend { addend: value } = fixup.kind {
                    addend = value;
                    fixup_with_addend = Some(index);
                }
                if !fixup.kind.is_branch() {
                    continue;
                }
                let target = match target {
                    Some(target) => target,
                    None => continue,
                };

                let cross_section_branch =
                    program.atoms[atom].section != program.atoms[target].section;
                let (src_addr, mut dst_addr) = if self.global_addresses {
                    (
                        self.addresses[atom] + u64::from(fixup.offset_in_atom),
                        self.addresses[target] + u64::from(addend),
                    )
                } else {
                    (
                        program.atoms[atom].section_offset + u64::from(fixup.offset_in_atom),
                        program.atoms[target].section_offset + u64::from(addend),
                    )
                };
                // Any stub could end up at the far end of its section;
                // assume the worst.
                if program.sections[program.atoms[target].section].kind == SectionKind::Stub {
                    dst_addr = self.furthest_stub_sect;
                }
                let displacement = dst_addr as i64 - src_addr as i64;
                let final_target = FinalTarget {
                    atom: target,
                    addend,
                };

                if cross_section_branch
                    && preload
                    && (displacement > branch_limit || displacement < -branch_limit)
                {
                    // Pre-linked images have no dyld underneath them; give
                    // the branch one island it can always reach the far
                    // section through.
                    let island = self.find_or_make_island(
                        opts,
                        program,
                        fixup.kind,
                        0,
                        target,
                        final_target,
                        true,
                    )?;
                    debug!(
                        "using absolute island {} for branch to {} (displacement {:#x})",
                        program.atoms[island].name.as_deref().unwrap_or("(anon)"),
                        program.atoms[target].name.as_deref().unwrap_or("(anon)"),
                        displacement
                    );
                    retarget_branch(program, atom, fixup_with_target, fixup_with_addend, island);
                } else if displacement > branch_limit {
                    // Create a forward branch chain, farthest region first,
                    // each island branching to the one after it.
                    debug!(
                        "need forward branching island src {:#x}, dst {:#x}, target {}",
                        src_addr,
                        dst_addr,
                        program.atoms[target].name.as_deref().unwrap_or("(anon)")
                    );
                    let mut next_target = target;
                    for region_index in (0..self.regions.len()).rev() {
                        let region_address = self.regions[region_index].address as i64;
                        if (src_addr as i64) < region_address
                            && region_address <= dst_addr as i64
                        {
                            next_target = self.find_or_make_island(
                                opts,
                                program,
                                fixup.kind,
                                region_index,
                                next_target,
                                final_target,
                                false,
                            )?;
                        }
                    }
                    retarget_branch(
                        program,
                        atom,
                        fixup_with_target,
                        fixup_with_addend,
                        next_target,
                    );
                } else if displacement < -branch_limit {
                    // Create a backward branch chain, nearest region last.
                    debug!(
                        "need backward branching island src {:#x}, dst {:#x}, target {}",
                        src_addr,
                        dst_addr,
                        program.atoms[target].name.as_deref().unwrap_or("(anon)")
                    );
                    let mut prev_target = target;
                    for region_index in 0..self.regions.len() {
                        let region_address = self.regions[region_index].address as i64;
                        if (dst_addr as i64) < region_address
                            && region_address <= src_addr as i64
                        {
                            prev_target = self.find_or_make_island(
                                opts,
                                program,
                                fixup.kind,
                                region_index,
                                prev_target,
                                final_target,
                                false,
                            )?;
                        }
                    }
                    retarget_branch(
                        program,
                        atom,
                        fixup_with_target,
                        fixup_with_addend,
                        prev_target,
                    );
                }
            }
        }
        Ok(())
    }

    /// The island for `final_target` in `region_index`, manufacturing one on
    /// first use. Islands are shared by every branch through the region that
    /// has the same ultimate destination.
    fn find_or_make_island(
        &mut self,
        opts: &LinkOptions,
        program: &mut Program,
        kind: FixupKind,
        region_index: usize,
        next_target: Atom,
        final_target: FinalTarget,
        cross_section_branch: bool,
    ) -> LinkResult<Atom> {
        if let Some(&island) = self.regions[region_index].islands_by_target.get(&final_target) {
            return Ok(island);
        }
        let host_section = self.regions[region_index].section;
        let island = make_branch_island(
            opts,
            program,
            kind,
            region_index,
            next_target,
            final_target,
            host_section,
            cross_section_branch,
        )?;
        self.regions[region_index]
            .islands_by_target
            .insert(final_target, island);
        self.regions[region_index].islands.push(island);
        program.atom_to_section.insert(island, host_section);
        self.island_count += 1;
        debug!(
            "added island {} to region {}",
            program.atoms[island].name.as_deref().unwrap_or("(anon)"),
            region_index
        );
        Ok(island)
    }

    /// Interleave the accumulated islands into their host sections,
    /// preserving the pre-existing atom order.
    fn splice(&mut self, program: &mut Program) {
        let mut region_index = 0;
        while region_index < self.regions.len() {
            let first_unspliced = region_index;
            let section_id = self.regions[region_index].section;
            let old_atoms = std::mem::replace(&mut program.sections[section_id].atoms, Vec::new());
            let mut new_atoms = Vec::with_capacity(old_atoms.len() + self.island_count);
            for atom in old_atoms {
                new_atoms.push(atom);
                if region_index < self.regions.len()
                    && atom == self.regions[region_index].insertion_point
                {
                    let region = &self.regions[region_index];
                    debug_assert_eq!(region.section, section_id, "wrong section seen");
                    if !region.islands.is_empty() {
                        debug!(
                            "inserted {} islands after {} in {}/{}",
                            region.islands.len(),
                            program.atoms[atom].name.as_deref().unwrap_or("(anon)"),
                            program.sections[section_id].segment,
                            program.sections[section_id].name
                        );
                        new_atoms.extend(region.islands.iter().copied());
                    }
                    region_index += 1;
                }
            }
            program.sections[section_id].atoms = new_atoms;
            if region_index == first_unspliced {
                // Insertion points always live in their host section's atom
                // list; not finding one means the lists changed under us.
                debug_assert!(false, "insertion point vanished from host section");
                break;
            }
        }
    }
}

/// Rewrite a branch cluster to aim at `island`: the target-bearing fixup is
/// bound directly to the island and any addend is zeroed (the island's own
/// fixups encode the offset from here on).
fn retarget_branch(
    program: &mut Program,
    atom: Atom,
    fixup_with_target: Option<usize>,
    fixup_with_addend: Option<usize>,
    island: Atom,
) {
    if let Some(index) = fixup_with_target {
        program.atoms[atom].fixups[index].binding = FixupBinding::DirectlyBound(island);
    }
    if let Some(index) = fixup_with_addend {
        program.atoms[atom].fixups[index].kind = FixupKind::AddAddend { addend: 0 };
    }
}

/// Manufacture one island atom for `kind`, branching on to `next_target`.
///
/// The atom is pushed into the program's atom arena but joins its host
/// section's atom list only when the splicer runs.
fn make_branch_island(
    opts: &LinkOptions,
    program: &mut Program,
    kind: FixupKind,
    island_region: usize,
    next_target: Atom,
    final_target: FinalTarget,
    host_section: Section,
    cross_section_branch: bool,
) -> LinkResult<Atom> {
    let base_name = match &program.atoms[final_target.atom].name {
        Some(name) if !name.is_empty() => name.clone(),
        _ => String::from("anon"),
    };
    let name = if final_target.addend == 0 {
        if island_region == 0 {
            format!("{}.island", base_name)
        } else {
            format!("{}.island.{}", base_name, island_region)
        }
    } else {
        format!(
            "{}_plus_{}.island.{}",
            base_name, final_target.addend, island_region
        )
    };

    let target_is_thumb = program.atoms[final_target.atom].thumb;
    let data = match kind {
        FixupKind::StorePpcBranch24 | FixupKind::StoreTargetAddressPpcBranch24 => {
            ppc_island(name, host_section, next_target, final_target)
        }
        FixupKind::StoreArmBranch24
        | FixupKind::StoreThumbBranch22
        | FixupKind::StoreTargetAddressArmBranch24
        | FixupKind::StoreTargetAddressThumbBranch22 => {
            if cross_section_branch && opts.prefer_subarchitecture && opts.arch_supports_thumb2 {
                thumb2_absolute_island(name, host_section, final_target)
            } else if target_is_thumb {
                if opts.prefer_subarchitecture && opts.arch_supports_thumb2 {
                    thumb2_to_thumb_island(name, host_section, next_target, final_target)
                } else if opts.output_slidable() {
                    pic_arm_to_thumb1_island(name, host_section, final_target)
                } else {
                    no_pic_arm_to_thumb1_island(name, host_section, final_target)
                }
            } else {
                arm_to_arm_island(name, host_section, next_target, final_target)
            }
        }
        FixupKind::StoreArm64Branch26 | FixupKind::StoreTargetAddressArm64Branch26 => {
            arm64_island(name, host_section, next_target, final_target)
        }
        other => return Err(LinkError::UnexpectedBranchKind(other)),
    };
    Ok(program.atoms.push(data))
}

/// Attributes shared by every island variant.
fn island_atom(
    name: String,
    section: Section,
    thumb: bool,
    content: IslandContent,
    fixups: SmallVec<[Fixup; 4]>,
) -> AtomData {
    AtomData {
        name: Some(name),
        section,
        section_offset: 0,
        size: content.size(),
        align: Alignment::new(if thumb { 1 } else { 2 }),
        thumb,
        kind: AtomKind::BranchIsland,
        scope: Scope::LinkageUnit,
        combine: Combine::Never,
        symbol_table: SymbolTable::In,
        object_address: 0,
        content: AtomContent::Island(content),
        fixups,
    }
}

fn ppc_island(
    name: String,
    section: Section,
    next_target: Atom,
    final_target: FinalTarget,
) -> AtomData {
    let has_addend = final_target.addend != 0;
    let mut fixups: SmallVec<[Fixup; 4]> = SmallVec::new();
    if next_target == final_target.atom && has_addend {
        // This is the final hop, which needs the addend from the original
        // branch folded back in.
        fixups.push(Fixup::new(
            0,
            ClusterPosition::Begin,
            FixupKind::SetTargetAddress,
            FixupBinding::DirectlyBound(next_target),
        ));
        fixups.push(Fixup::new(
            0,
            ClusterPosition::Mid,
            FixupKind::AddAddend {
                addend: final_target.addend,
            },
            FixupBinding::None,
        ));
        fixups.push(Fixup::new(
            0,
            ClusterPosition::End,
            FixupKind::StorePpcBranch24,
            FixupBinding::None,
        ));
    } else {
        fixups.push(Fixup::new(
            0,
            ClusterPosition::Only,
            FixupKind::StoreTargetAddressPpcBranch24,
            FixupBinding::DirectlyBound(next_target),
        ));
    }
    // Record a shorthand for the ultimate destination, so that the writer
    // can optimize intermediate islands away when the final target turns out
    // to be reachable directly.
    if has_addend {
        fixups.push(Fixup::new(
            0,
            ClusterPosition::Begin,
            FixupKind::IslandTarget,
            FixupBinding::DirectlyBound(final_target.atom),
        ));
        fixups.push(Fixup::new(
            0,
            ClusterPosition::End,
            FixupKind::AddAddend {
                addend: final_target.addend,
            },
            FixupBinding::None,
        ));
    } else {
        fixups.push(Fixup::new(
            0,
            ClusterPosition::Only,
            FixupKind::IslandTarget,
            FixupBinding::DirectlyBound(final_target.atom),
        ));
    }
    island_atom(name, section, false, IslandContent::PpcBranch, fixups)
}

fn arm64_island(
    name: String,
    section: Section,
    next_target: Atom,
    final_target: FinalTarget,
) -> AtomData {
    let mut fixups: SmallVec<[Fixup; 4]> = SmallVec::new();
    fixups.push(Fixup::new(
        0,
        ClusterPosition::Only,
        FixupKind::StoreTargetAddressArm64Branch26,
        FixupBinding::DirectlyBound(next_target),
    ));
    fixups.push(Fixup::new(
        0,
        ClusterPosition::Only,
        FixupKind::IslandTarget,
        FixupBinding::DirectlyBound(final_target.atom),
    ));
    island_atom(name, section, false, IslandContent::Arm64Branch, fixups)
}

fn arm_to_arm_island(
    name: String,
    section: Section,
    next_target: Atom,
    final_target: FinalTarget,
) -> AtomData {
    let mut fixups: SmallVec<[Fixup; 4]> = SmallVec::new();
    fixups.push(Fixup::new(
        0,
        ClusterPosition::Only,
        FixupKind::StoreTargetAddressArmBranch24,
        FixupBinding::DirectlyBound(next_target),
    ));
    fixups.push(Fixup::new(
        0,
        ClusterPosition::Only,
        FixupKind::IslandTarget,
        FixupBinding::DirectlyBound(final_target.atom),
    ));
    island_atom(name, section, false, IslandContent::ArmToArm, fixups)
}

fn thumb2_to_thumb_island(
    name: String,
    section: Section,
    next_target: Atom,
    final_target: FinalTarget,
) -> AtomData {
    let mut fixups: SmallVec<[Fixup; 4]> = SmallVec::new();
    fixups.push(Fixup::new(
        0,
        ClusterPosition::Only,
        FixupKind::StoreTargetAddressThumbBranch22,
        FixupBinding::DirectlyBound(next_target),
    ));
    fixups.push(Fixup::new(
        0,
        ClusterPosition::Only,
        FixupKind::IslandTarget,
        FixupBinding::DirectlyBound(final_target.atom),
    ));
    island_atom(name, section, true, IslandContent::Thumb2ToThumb, fixups)
}

/// `movw r12, #lo16 ; movt r12, #hi16 ; bx r12` materializes the full
/// destination address, so it reaches anywhere in the image regardless of
/// where the sections land.
fn thumb2_absolute_island(name: String, section: Section, final_target: FinalTarget) -> AtomData {
    let mut fixups: SmallVec<[Fixup; 4]> = SmallVec::new();
    fixups.push(Fixup::new(
        0,
        ClusterPosition::Begin,
        FixupKind::SetTargetAddress,
        FixupBinding::DirectlyBound(final_target.atom),
    ));
    fixups.push(Fixup::new(
        0,
        ClusterPosition::End,
        FixupKind::StoreThumbLow16,
        FixupBinding::None,
    ));
    fixups.push(Fixup::new(
        4,
        ClusterPosition::Begin,
        FixupKind::SetTargetAddress,
        FixupBinding::DirectlyBound(final_target.atom),
    ));
    fixups.push(Fixup::new(
        4,
        ClusterPosition::End,
        FixupKind::StoreThumbHigh16,
        FixupBinding::None,
    ));
    fixups.push(Fixup::new(
        0,
        ClusterPosition::Only,
        FixupKind::IslandTarget,
        FixupBinding::DirectlyBound(final_target.atom),
    ));
    island_atom(name, section, true, IslandContent::Thumb2Absolute, fixups)
}

/// There is no large-displacement Thumb-1 branch instruction, so the island
/// body is ARM code that can jump to Thumb with a 32-bit displacement and
/// reach the destination in one hop. The bytes are produced at write time
/// from final addresses; no fixups.
fn pic_arm_to_thumb1_island(name: String, section: Section, final_target: FinalTarget) -> AtomData {
    island_atom(
        name,
        section,
        false,
        IslandContent::PicArmToThumb1 {
            final_target: final_target.atom,
            final_addend: final_target.addend,
        },
        SmallVec::new(),
    )
}

/// Absolute-address flavor of the ARM-to-Thumb1 island for images that never
/// slide.
fn no_pic_arm_to_thumb1_island(
    name: String,
    section: Section,
    final_target: FinalTarget,
) -> AtomData {
    island_atom(
        name,
        section,
        false,
        IslandContent::NoPicArmToThumb1 {
            final_target: final_target.atom,
        },
        SmallVec::new(),
    )
}
