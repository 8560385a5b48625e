//! Rewrite passes. `driver::lower_program` fixes the order they run in.

pub mod arguments;
pub mod pipeline;
pub mod split;
pub mod ssa;
pub mod triad;
