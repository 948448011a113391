//! Mach-O static linker passes.
//!
//! This library holds the late-stage transformations a static linker runs
//! over its in-memory program representation after symbol resolution and
//! section layout: the program model itself (atoms, fixups, sections), the
//! layout collaborator that assigns offsets and addresses, and the passes
//! that rewrite the program in place before the writer emits the final image.

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

pub use cranelift_entity as entity;

pub mod ir;
pub mod isa;
pub mod layout;
pub mod passes;
pub mod settings;

mod result;

pub use crate::passes::branch_islands::insert_branch_islands;
pub use crate::result::{LinkError, LinkResult};

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
