//! Linker option state consumed by the passes.
//!
//! The full linker parses these from the command line; the passes only ever
//! see the resolved values, threaded by reference the whole way down.

use crate::isa::Architecture;

/// The kind of image being produced.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OutputKind {
    /// Relocatable object file (`-r`). Late passes are a no-op.
    Object,
    /// Main executable.
    Executable,
    /// Statically linked executable.
    StaticExecutable,
    /// Dynamic shared library.
    Dylib,
    /// Loadable bundle.
    Bundle,
    /// Pre-linked image loaded at a fixed address without dyld (`-preload`).
    Preload,
}

/// Options that influence the behavior of the late linker passes.
#[derive(Debug, Clone)]
pub struct LinkOptions {
    /// What kind of image is being produced.
    pub output_kind: OutputKind,
    /// Target architecture.
    pub architecture: Architecture,
    /// Whether the branch island pass may run at all.
    pub allow_branch_islands: bool,
    /// Whether code generation favors the selected sub-architecture
    /// (`-arch armv7` rather than a generic `-arch arm`).
    pub prefer_subarchitecture: bool,
    /// Whether the selected ARM sub-architecture implements Thumb-2.
    pub arch_supports_thumb2: bool,
    /// Position-independent main executable.
    pub pie: bool,
}

impl LinkOptions {
    /// Create options for the given architecture and output kind, with every
    /// other knob at its default.
    pub fn new(architecture: Architecture, output_kind: OutputKind) -> Self {
        Self {
            output_kind,
            architecture,
            allow_branch_islands: true,
            prefer_subarchitecture: false,
            arch_supports_thumb2: false,
            pie: false,
        }
    }

    /// Whether the image can be loaded at an address other than the one it
    /// was linked at. Position-dependent islands are only usable when this is
    /// false.
    pub fn output_slidable(&self) -> bool {
        match self.output_kind {
            OutputKind::Dylib | OutputKind::Bundle => true,
            OutputKind::Executable => self.pie,
            OutputKind::Object | OutputKind::StaticExecutable | OutputKind::Preload => false,
        }
    }
}
