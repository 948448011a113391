//! End-to-end scenarios for branch island insertion.
//!
//! Each test builds a small program the way the resolver would hand it to
//! the final phases, runs the pass, re-runs layout the way the writer does,
//! and then checks the rewritten branches against the architecture's reach.

use machlink::ir::{
    Atom, AtomContent, AtomData, AtomKind, ClusterPosition, Fixup, FixupBinding, FixupKind,
    IslandContent, Program, Section, SectionData, SectionKind,
};
use machlink::isa::Architecture;
use machlink::settings::{LinkOptions, OutputKind};
use machlink::{insert_branch_islands, layout, LinkError};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn code_section(program: &mut Program, name: &str) -> Section {
    program.add_section(SectionData::new("__TEXT", name, SectionKind::Code))
}

fn code_atom(program: &mut Program, section: Section, name: &str, size: u64) -> Atom {
    program.add_atom(AtomData::code(section, name, size))
}

fn thumb_atom(program: &mut Program, section: Section, name: &str, size: u64) -> Atom {
    let atom = code_atom(program, section, name, size);
    program.atoms[atom].thumb = true;
    atom
}

/// `count` filler atoms of `size` bytes each, standing in for ordinary code.
fn fill(program: &mut Program, section: Section, count: usize, size: u64) {
    for index in 0..count {
        code_atom(program, section, &format!("_fill{}", index), size);
    }
}

/// Attach a one-fixup branch cluster using a combined set-and-store kind.
fn direct_branch(program: &mut Program, from: Atom, offset: u32, kind: FixupKind, to: Atom) {
    program.atoms[from].fixups.push(Fixup::new(
        offset,
        ClusterPosition::Only,
        kind,
        FixupBinding::DirectlyBound(to),
    ));
}

/// Attach a three-fixup branch cluster carrying a constant addend.
fn branch_with_addend(
    program: &mut Program,
    from: Atom,
    offset: u32,
    store_kind: FixupKind,
    to: Atom,
    addend: u32,
) {
    let fixups = &mut program.atoms[from].fixups;
    fixups.push(Fixup::new(
        offset,
        ClusterPosition::Begin,
        FixupKind::SetTargetAddress,
        FixupBinding::DirectlyBound(to),
    ));
    fixups.push(Fixup::new(
        offset,
        ClusterPosition::Mid,
        FixupKind::AddAddend { addend },
        FixupBinding::None,
    ));
    fixups.push(Fixup::new(offset, ClusterPosition::End, store_kind, FixupBinding::None));
}

fn islands(program: &Program) -> Vec<Atom> {
    program
        .atoms
        .iter()
        .filter(|(_, data)| data.kind == AtomKind::BranchIsland)
        .map(|(atom, _)| atom)
        .collect()
}

fn branch_target(program: &Program, atom: Atom) -> Option<Atom> {
    let mut target = None;
    for fixup in &program.atoms[atom].fixups {
        if fixup.position.is_first_in_cluster() {
            target = None;
        }
        if let Some(resolved) = program.resolved_target(fixup) {
            target = Some(resolved);
        }
        if fixup.kind.is_branch() {
            return target;
        }
    }
    None
}

fn position(list: &[Atom], atom: Atom) -> usize {
    list.iter().position(|&candidate| candidate == atom).unwrap()
}

/// Every branch cluster in the program must reach its (possibly rewritten)
/// target within `reach` under final layout.
fn assert_branches_within_reach(program: &Program, reach: u64) {
    for (atom, data) in program.atoms.iter() {
        let mut target = None;
        let mut addend = 0u32;
        for fixup in &data.fixups {
            if fixup.position.is_first_in_cluster() {
                target = None;
                addend = 0;
            }
            if let Some(resolved) = program.resolved_target(fixup) {
                target = Some(resolved);
            }
            if let FixupKind::AddAddend { addend: value } = fixup.kind {
                addend = value;
            }
            if fixup.kind.is_branch() {
                if let Some(target) = target {
                    let src = program.atom_address(atom) + u64::from(fixup.offset_in_atom);
                    let dst = program.atom_address(target) + u64::from(addend);
                    let displacement = (dst as i64 - src as i64).unsigned_abs();
                    assert!(
                        displacement <= reach,
                        "branch from {:?} to {:?} spans {:#x}, beyond reach {:#x}",
                        data.name,
                        program.atoms[target].name,
                        displacement,
                        reach
                    );
                }
            }
        }
    }
}

#[test]
fn in_range_branches_are_left_alone() {
    init_logging();
    let mut program = Program::new();
    let text = code_section(&mut program, "__text");
    let caller = code_atom(&mut program, text, "_caller", 4);
    fill(&mut program, text, 10, 1_000_000);
    let callee = code_atom(&mut program, text, "_callee", 4);
    direct_branch(
        &mut program,
        caller,
        0,
        FixupKind::StoreTargetAddressArm64Branch26,
        callee,
    );
    let atoms_before = program.atoms.len();
    let fixups_before = program.atoms[caller].fixups.clone();

    let opts = LinkOptions::new(Architecture::Arm64, OutputKind::Executable);
    insert_branch_islands(&opts, &mut program).unwrap();

    assert_eq!(program.atoms.len(), atoms_before);
    assert_eq!(program.atoms[caller].fixups, fixups_before);
    assert!(islands(&program).is_empty());
}

#[test]
fn gated_outputs_are_untouched() {
    init_logging();
    for (kind, allow, arch) in [
        (OutputKind::Object, true, Architecture::Arm64),
        (OutputKind::Executable, false, Architecture::Arm64),
        (OutputKind::Executable, true, Architecture::X86_64),
    ] {
        let mut program = Program::new();
        let text = code_section(&mut program, "__text");
        let caller = code_atom(&mut program, text, "_caller", 4);
        fill(&mut program, text, 100, 2_000_000);
        let callee = code_atom(&mut program, text, "_callee", 4);
        direct_branch(
            &mut program,
            caller,
            0,
            FixupKind::StoreTargetAddressArm64Branch26,
            callee,
        );
        let atoms_before = program.atoms.len();
        let fixups_before = program.atoms[caller].fixups.clone();

        let mut opts = LinkOptions::new(arch, kind);
        opts.allow_branch_islands = allow;
        insert_branch_islands(&opts, &mut program).unwrap();

        assert_eq!(program.atoms.len(), atoms_before);
        assert_eq!(program.atoms[caller].fixups, fixups_before);
    }
}

#[test]
fn arm64_cross_section_branch_gets_one_island() {
    init_logging();
    let mut program = Program::new();
    program.base_address = 0x1_0000_0000;
    let text = code_section(&mut program, "__text");
    let caller = code_atom(&mut program, text, "_caller", 4);
    // 126MiB of code puts the end of __text past the 124MiB inter-region
    // distance, so one region lands inside it.
    fill(&mut program, text, 63, 2 * 1024 * 1024);
    let mut cold = SectionData::new("__TEXT", "__text_cold", SectionKind::Code);
    cold.fixed_address = Some(0x1_0000_0000 + 128 * 1024 * 1024 + 1);
    let cold = program.add_section(cold);
    let far = code_atom(&mut program, cold, "_far", 4);
    direct_branch(
        &mut program,
        caller,
        0,
        FixupKind::StoreTargetAddressArm64Branch26,
        far,
    );

    let opts = LinkOptions::new(Architecture::Arm64, OutputKind::Executable);
    insert_branch_islands(&opts, &mut program).unwrap();

    let islands = islands(&program);
    assert_eq!(islands.len(), 1);
    let island = islands[0];
    assert_eq!(program.atoms[island].name.as_deref(), Some("_far.island"));
    assert_eq!(
        program.atoms[island].content,
        AtomContent::Island(IslandContent::Arm64Branch)
    );
    assert_eq!(program.atoms[island].size, 4);

    // The caller hops through the island; the island branches on to _far.
    assert_eq!(branch_target(&program, caller), Some(island));
    assert_eq!(branch_target(&program, island), Some(far));
    assert_eq!(program.atom_to_section.get(&island), Some(&text));

    // The island was spliced into __text, not appended.
    let text_atoms = &program.sections[text].atoms;
    let island_position = position(text_atoms, island);
    assert!(island_position > 0 && island_position < text_atoms.len() - 1);

    layout::set_section_sizes_and_alignments(&mut program);
    layout::assign_addresses(&mut program);
    assert_branches_within_reach(&program, 128_000_000);

    let mut body = [0u8; 4];
    program.atoms[island].copy_raw_content(&program, &mut body);
    assert_eq!(body, [0x00, 0x00, 0x00, 0x14]);
}

#[test]
fn thumb2_forward_chain_is_shared_and_idempotent() {
    init_logging();
    let mut program = Program::new();
    let text = code_section(&mut program, "__text");
    let caller = thumb_atom(&mut program, text, "_caller", 4);
    let caller2 = thumb_atom(&mut program, text, "_caller2", 4);
    fill(&mut program, text, 44, 1_000_000);
    let far = thumb_atom(&mut program, text, "_far", 4);
    for &from in &[caller, caller2] {
        direct_branch(
            &mut program,
            from,
            0,
            FixupKind::StoreTargetAddressThumbBranch22,
            far,
        );
    }

    let mut opts = LinkOptions::new(Architecture::Arm, OutputKind::Executable);
    opts.prefer_subarchitecture = true;
    opts.arch_supports_thumb2 = true;
    insert_branch_islands(&opts, &mut program).unwrap();

    // Both callers chain through the same three islands, one per region.
    let islands = islands(&program);
    assert_eq!(islands.len(), 3);
    let first = branch_target(&program, caller).unwrap();
    assert_eq!(branch_target(&program, caller2), Some(first));
    assert_eq!(program.atoms[first].name.as_deref(), Some("_far.island"));
    let second = branch_target(&program, first).unwrap();
    assert_eq!(program.atoms[second].name.as_deref(), Some("_far.island.1"));
    let third = branch_target(&program, second).unwrap();
    assert_eq!(program.atoms[third].name.as_deref(), Some("_far.island.2"));
    assert_eq!(branch_target(&program, third), Some(far));
    for &island in &[first, second, third] {
        assert_eq!(
            program.atoms[island].content,
            AtomContent::Island(IslandContent::Thumb2ToThumb)
        );
        assert!(program.atoms[island].thumb);
    }

    // The chain is ordered along the address axis, caller first.
    layout::set_section_sizes_and_alignments(&mut program);
    layout::assign_addresses(&mut program);
    assert!(program.atom_address(first) < program.atom_address(second));
    assert!(program.atom_address(second) < program.atom_address(third));
    assert!(program.atom_address(third) < program.atom_address(far));
    assert_branches_within_reach(&program, 16_000_000);

    // A second run finds nothing left to do.
    let atoms_before = program.atoms.len();
    let list_before = program.sections[text].atoms.clone();
    insert_branch_islands(&opts, &mut program).unwrap();
    assert_eq!(program.atoms.len(), atoms_before);
    assert_eq!(program.sections[text].atoms, list_before);
}

#[test]
fn thumb1_backward_chain_uses_pic_islands() {
    init_logging();
    let mut program = Program::new();
    let text = code_section(&mut program, "__text");
    let home = thumb_atom(&mut program, text, "_home", 4);
    fill(&mut program, text, 19, 500_000);
    let caller = thumb_atom(&mut program, text, "_caller", 4);
    direct_branch(
        &mut program,
        caller,
        0,
        FixupKind::StoreTargetAddressThumbBranch22,
        home,
    );

    // Thumb-1 only, slidable image.
    let opts = LinkOptions::new(Architecture::Arm, OutputKind::Dylib);
    insert_branch_islands(&opts, &mut program).unwrap();

    let islands = islands(&program);
    assert_eq!(islands.len(), 2);
    for &island in &islands {
        assert_eq!(
            program.atoms[island].content,
            AtomContent::Island(IslandContent::PicArmToThumb1 {
                final_target: home,
                final_addend: 0
            })
        );
        assert_eq!(program.atoms[island].size, 16);
        // The trampoline is ARM code even though its destination is Thumb.
        assert!(!program.atoms[island].thumb);
        assert!(program.atoms[island].fixups.is_empty());
    }

    // The caller lands on the island nearest it, the one in the highest
    // region.
    layout::set_section_sizes_and_alignments(&mut program);
    layout::assign_addresses(&mut program);
    let nearest = branch_target(&program, caller).unwrap();
    assert_eq!(program.atoms[nearest].name.as_deref(), Some("_home.island.1"));
    let other = islands[0];
    assert!(program.atom_address(nearest) > program.atom_address(other));
    assert_branches_within_reach(&program, 4_000_000);

    // The island body branches straight to _home with the Thumb bit set.
    let mut body = [0u8; 16];
    program.atoms[nearest].copy_raw_content(&program, &mut body);
    assert_eq!(&body[0..4], &0xe59f_c004u32.to_le_bytes()); // ldr ip, [pc, #4]
    assert_eq!(&body[4..8], &0xe08f_c00cu32.to_le_bytes()); // add ip, pc, ip
    assert_eq!(&body[8..12], &0xe12f_ff1cu32.to_le_bytes()); // bx ip
    let expected = ((program.atom_address(home) as i64
        - (program.atom_address(nearest) + 12) as i64)
        | 1) as u32;
    assert_eq!(&body[12..16], &expected.to_le_bytes());
}

#[test]
fn ppc_island_carries_the_branch_addend() {
    init_logging();
    let mut program = Program::new();
    let text = code_section(&mut program, "__text");
    let caller = code_atom(&mut program, text, "_caller", 4);
    fill(&mut program, text, 36, 1_000_000);
    let far = code_atom(&mut program, text, "_far", 0x100);
    branch_with_addend(
        &mut program,
        caller,
        0,
        FixupKind::StorePpcBranch24,
        far,
        0x40,
    );

    let opts = LinkOptions::new(Architecture::Ppc, OutputKind::Executable);
    insert_branch_islands(&opts, &mut program).unwrap();

    let islands = islands(&program);
    assert_eq!(islands.len(), 1);
    let island = islands[0];
    assert_eq!(
        program.atoms[island].name.as_deref(),
        Some("_far_plus_64.island")
    );

    // The island is the final hop, so its store cluster folds the original
    // addend back in.
    let island_fixups = &program.atoms[island].fixups;
    assert_eq!(island_fixups[0].kind, FixupKind::SetTargetAddress);
    assert_eq!(island_fixups[0].binding, FixupBinding::DirectlyBound(far));
    assert_eq!(island_fixups[1].kind, FixupKind::AddAddend { addend: 0x40 });
    assert_eq!(island_fixups[2].kind, FixupKind::StorePpcBranch24);

    // The caller now aims at the island with a zeroed addend.
    let caller_fixups = &program.atoms[caller].fixups;
    assert_eq!(caller_fixups[0].binding, FixupBinding::DirectlyBound(island));
    assert_eq!(caller_fixups[1].kind, FixupKind::AddAddend { addend: 0 });
    assert_eq!(caller_fixups[2].kind, FixupKind::StorePpcBranch24);

    layout::set_section_sizes_and_alignments(&mut program);
    layout::assign_addresses(&mut program);
    assert_branches_within_reach(&program, 32_000_000);

    // PPC branches are stored big-endian.
    let mut body = [0u8; 4];
    program.atoms[island].copy_raw_content(&program, &mut body);
    assert_eq!(body, [0x48, 0x00, 0x00, 0x00]);
}

#[test]
fn preload_cross_section_branch_stays_relative_on_arm64() {
    init_logging();
    let mut program = Program::new();
    program.base_address = 0x1_0000_0000;
    let text = code_section(&mut program, "__text");
    let caller = code_atom(&mut program, text, "_caller", 4);
    fill(&mut program, text, 63, 2 * 1024 * 1024);
    let mut cold = SectionData::new("__TEXT", "__text_cold", SectionKind::Code);
    cold.fixed_address = Some(0x1_0000_0000 + 200 * 1024 * 1024);
    let cold = program.add_section(cold);
    let far = code_atom(&mut program, cold, "_far", 4);
    direct_branch(
        &mut program,
        caller,
        0,
        FixupKind::StoreTargetAddressArm64Branch26,
        far,
    );

    // The Thumb-2 knobs must not matter on arm64, even for the pre-linked
    // cross-section fast path.
    let mut opts = LinkOptions::new(Architecture::Arm64, OutputKind::Preload);
    opts.prefer_subarchitecture = true;
    opts.arch_supports_thumb2 = true;
    insert_branch_islands(&opts, &mut program).unwrap();

    let islands = islands(&program);
    assert_eq!(islands.len(), 1);
    let island = islands[0];
    assert_eq!(
        program.atoms[island].content,
        AtomContent::Island(IslandContent::Arm64Branch)
    );
    // The fast path goes straight to the destination, not through a chain.
    assert_eq!(branch_target(&program, island), Some(far));
    assert_eq!(branch_target(&program, caller), Some(island));
    assert!(program.sections[text].atoms.contains(&island));

    layout::set_section_sizes_and_alignments(&mut program);
    layout::assign_addresses(&mut program);
    assert_branches_within_reach(&program, 128_000_000);
}

#[test]
fn branches_to_stubs_assume_the_furthest_stub() {
    init_logging();
    let mut program = Program::new();
    let text = code_section(&mut program, "__text");
    let caller = code_atom(&mut program, text, "_caller", 4);
    fill(&mut program, text, 40, 1_000_000);
    let stubs = program.add_section(SectionData::new("__TEXT", "__stubs", SectionKind::Stub));
    let mut stub_data = AtomData::code(stubs, "_printf.stub", 16);
    stub_data.kind = AtomKind::Stub;
    let stub = program.add_atom(stub_data);
    direct_branch(
        &mut program,
        caller,
        0,
        FixupKind::StoreTargetAddressArmBranch24,
        stub,
    );

    let opts = LinkOptions::new(Architecture::Arm, OutputKind::Executable);
    insert_branch_islands(&opts, &mut program).unwrap();

    // The stub is close enough to the island either way, but the branch was
    // measured against the far end of the stub section and rewritten.
    let islands = islands(&program);
    assert_eq!(islands.len(), 1);
    let island = islands[0];
    assert_eq!(branch_target(&program, caller), Some(island));
    assert_eq!(branch_target(&program, island), Some(stub));

    layout::set_section_sizes_and_alignments(&mut program);
    layout::assign_addresses(&mut program);
    assert_branches_within_reach(&program, 32_000_000);
}

#[test]
fn indirectly_bound_branches_are_rewritten_to_direct() {
    init_logging();
    let mut program = Program::new();
    let text = code_section(&mut program, "__text");
    let caller = code_atom(&mut program, text, "_caller", 4);
    fill(&mut program, text, 39, 1_000_000);
    let far = code_atom(&mut program, text, "_far", 4);
    program.indirect_binding_table.push(far);
    program.atoms[caller].fixups.push(Fixup::new(
        0,
        ClusterPosition::Only,
        FixupKind::StoreTargetAddressArmBranch24,
        FixupBinding::IndirectlyBound(0),
    ));

    let opts = LinkOptions::new(Architecture::Arm, OutputKind::Executable);
    insert_branch_islands(&opts, &mut program).unwrap();

    let islands = islands(&program);
    assert_eq!(islands.len(), 1);
    // The rewrite binds the caller directly to the island; the indirect
    // entry is no longer consulted.
    assert_eq!(
        program.atoms[caller].fixups[0].binding,
        FixupBinding::DirectlyBound(islands[0])
    );
    assert_eq!(branch_target(&program, islands[0]), Some(far));
}

#[test]
fn follow_on_groups_are_never_split() {
    init_logging();
    let mut program = Program::new();
    let text = code_section(&mut program, "__text");
    let caller = code_atom(&mut program, text, "_caller", 4);
    fill(&mut program, text, 40, 1_000_000);
    let far = code_atom(&mut program, text, "_far", 4);
    direct_branch(
        &mut program,
        caller,
        0,
        FixupKind::StoreTargetAddressArmBranch24,
        far,
    );
    // Glue the two atoms straddling the natural insertion point to their
    // successors; the planner has to back off to _fill28.
    let section_atoms = program.sections[text].atoms.clone();
    for &glued in &[section_atoms[30], section_atoms[31]] {
        program.atoms[glued].fixups.push(Fixup::new(
            0,
            ClusterPosition::Only,
            FixupKind::NoneFollowOn,
            FixupBinding::None,
        ));
    }

    let opts = LinkOptions::new(Architecture::Arm, OutputKind::Executable);
    insert_branch_islands(&opts, &mut program).unwrap();

    let islands = islands(&program);
    assert_eq!(islands.len(), 1);
    let text_atoms = &program.sections[text].atoms;
    let island_position = position(text_atoms, islands[0]);
    let predecessor = text_atoms[island_position - 1];
    assert_eq!(program.atoms[predecessor].name.as_deref(), Some("_fill28"));
    assert!(!program.atoms[predecessor].has_follow_on_fixup());

    layout::set_section_sizes_and_alignments(&mut program);
    layout::assign_addresses(&mut program);
    assert_branches_within_reach(&program, 32_000_000);
}

#[test]
fn no_legal_insertion_point_is_fatal() {
    init_logging();
    let mut program = Program::new();
    let text = code_section(&mut program, "__text");
    let caller = code_atom(&mut program, text, "_caller", 4);
    fill(&mut program, text, 20, 2_000_000);
    let far = code_atom(&mut program, text, "_far", 4);
    direct_branch(
        &mut program,
        caller,
        0,
        FixupKind::StoreTargetAddressArmBranch24,
        far,
    );
    // Every atom is glued to its successor: there is nowhere to splice.
    let section_atoms = program.sections[text].atoms.clone();
    for &atom in &section_atoms {
        program.atoms[atom].fixups.push(Fixup::new(
            0,
            ClusterPosition::Only,
            FixupKind::NoneFollowOn,
            FixupBinding::None,
        ));
    }

    let opts = LinkOptions::new(Architecture::Arm, OutputKind::Executable);
    let err = insert_branch_islands(&opts, &mut program).unwrap_err();
    assert!(matches!(err, LinkError::NoIslandInsertionPoint { .. }));
}
