//! Late-stage transformation passes over the laid-out program.

pub mod branch_islands;
