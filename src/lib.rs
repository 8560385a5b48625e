//! Middle-end of the GPiler data-parallel compiler.
//!
//! The front-end hands over a tree of function declarations whose bodies may
//! contain pipelines (`x :: map(v: v * 2) > y`). [`lower_program`] rewrites
//! them into scalar kernels that each compute one element, plus the generated
//! helper functions they call, ready for code generation.

pub mod driver;
pub mod error;
mod index;
pub mod middle;

#[cfg(test)]
mod test_support;

pub use driver::{LoweredProgram, LoweringConfig, lower_program};
pub use error::{ErrorKind, LowerError, Result};
pub use middle::ast::Ast;
