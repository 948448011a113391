//! Target architecture identifiers and branch-distance parameters.
//!
//! The branch island pass needs exactly two numbers per architecture: the
//! distance at which a run of code makes out-of-range branches possible at
//! all, and the maximum run of code allowed between two island regions. The
//! latter is held below the former so that the islands inserted into a region
//! have room of their own without pushing their neighbors out of range.

use crate::result::{LinkError, LinkResult};
use crate::settings::LinkOptions;
use core::fmt;
use core::str;

/// Mach-O cputype identifiers recognized by the linker.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Architecture {
    /// 32-bit PowerPC.
    Ppc,
    /// 64-bit PowerPC.
    Ppc64,
    /// 32-bit ARM, including the Thumb and Thumb-2 sub-architectures.
    Arm,
    /// AArch64.
    Arm64,
    /// 32-bit x86. Branches are variable-width; no islands are ever needed.
    X86,
    /// x86-64. Branches are variable-width; no islands are ever needed.
    X86_64,
}

impl Architecture {
    /// Whether this architecture has fixed-width branch instructions whose
    /// displacement can be exceeded by a large enough text segment.
    pub fn has_limited_branch_reach(self) -> bool {
        match self {
            Architecture::Ppc | Architecture::Ppc64 | Architecture::Arm | Architecture::Arm64 => {
                true
            }
            Architecture::X86 | Architecture::X86_64 => false,
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            Architecture::Ppc => "ppc",
            Architecture::Ppc64 => "ppc64",
            Architecture::Arm => "arm",
            Architecture::Arm64 => "arm64",
            Architecture::X86 => "x86",
            Architecture::X86_64 => "x86_64",
        })
    }
}

impl str::FromStr for Architecture {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ppc" => Ok(Architecture::Ppc),
            "ppc64" => Ok(Architecture::Ppc64),
            "arm" => Ok(Architecture::Arm),
            "arm64" => Ok(Architecture::Arm64),
            "x86" => Ok(Architecture::X86),
            "x86_64" => Ok(Architecture::X86_64),
            _ => Err(()),
        }
    }
}

/// The text size at which branch islands become a consideration.
///
/// A single branch can reach anywhere within this distance, so code wholly
/// inside one such window never needs islands. On ARM the answer depends on
/// whether any Thumb branches were observed and which Thumb generation the
/// target supports.
pub fn branch_reach(opts: &LinkOptions, seen_thumb_branch: bool) -> LinkResult<u64> {
    match opts.architecture {
        // PPC can branch +/- 32MB.
        Architecture::Ppc | Architecture::Ppc64 => Ok(32_000_000),
        Architecture::Arm => {
            if !seen_thumb_branch {
                // ARM can branch +/- 32MB.
                Ok(32_000_000)
            } else if opts.prefer_subarchitecture && opts.arch_supports_thumb2 {
                // Thumb-2 can branch +/- 16MB.
                Ok(16_000_000)
            } else {
                // Thumb-1 can branch +/- 4MB.
                Ok(4_000_000)
            }
        }
        // AArch64 can branch +/- 128MB.
        Architecture::Arm64 => Ok(128_000_000),
        arch => Err(LinkError::UnsupportedArchitecture(arch)),
    }
}

/// The maximum run of code allowed between two island regions.
///
/// The gap between this and [`branch_reach`] is the headroom reserved for the
/// islands themselves.
pub fn max_distance_between_islands(
    opts: &LinkOptions,
    seen_thumb_branch: bool,
) -> LinkResult<u64> {
    match opts.architecture {
        // 2MB of branch islands per 32MB.
        Architecture::Ppc | Architecture::Ppc64 => Ok(30 * 1024 * 1024),
        Architecture::Arm => {
            if !seen_thumb_branch {
                // 2MB of branch islands per 32MB.
                Ok(30 * 1024 * 1024)
            } else if opts.prefer_subarchitecture && opts.arch_supports_thumb2 {
                // 2MB of branch islands per 16MB.
                Ok(14 * 1024 * 1024)
            } else {
                // 0.5MB of branch islands per 4MB.
                Ok(3_500_000)
            }
        }
        // 4MB of branch islands per 128MB.
        Architecture::Arm64 => Ok(124 * 1024 * 1024),
        arch => Err(LinkError::UnsupportedArchitecture(arch)),
    }
}
