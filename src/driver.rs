//! Runs the lowering passes over a program in their fixed order:
//!
//! 1. pipeline expansion
//! 2. single-assignment renaming
//! 3. natural/unnatural splitting, when enabled
//! 4. triad lowering
//! 5. kernel interface capture
//! 6. argument rewriting
//!
//! Each pass relies on the shape the previous one leaves behind, so the order
//! is not configurable. The first error aborts the run and the partially
//! rewritten tree is dropped.

use hashbrown::{HashMap, HashSet};
use tracing::{debug, debug_span};

use crate::{
    error::{ErrorKind, LowerError, Result},
    middle::{
        ast::{Ast, NodeKind},
        naming::NameGenerator,
        passes::{
            arguments::{self, Signature},
            pipeline, split, ssa, triad,
        },
        runtime::{self, KernelInterface},
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoweringConfig {
    /// Move statements that depend on another array's elements out of each
    /// kernel into generated helpers
    pub split_unnatural: bool,
    pub anon_prefix: String,
    pub temporary_prefix: String,
    pub split_prefix: String,
}

impl Default for LoweringConfig {
    fn default() -> Self {
        Self {
            split_unnatural: false,
            anon_prefix: "anon".into(),
            temporary_prefix: "_t".into(),
            split_prefix: "split".into(),
        }
    }
}

#[derive(Debug)]
pub struct LoweredProgram {
    pub ast: Ast,
    /// One entry per non-generated function, in program order
    pub kernels: Vec<KernelInterface>,
    pub signatures: HashMap<String, Signature>,
}

#[tracing::instrument(level = "debug", skip_all, fields(functions = ast.functions().len()))]
pub fn lower_program(mut ast: Ast, config: &LoweringConfig) -> Result<LoweredProgram> {
    check_input(&ast)?;

    let mut names = NameGenerator::new(config);

    debug_span!("pipeline").in_scope(|| pipeline::expand_pipelines(&mut ast, &mut names))?;
    debug_span!("ssa").in_scope(|| ssa::rename_program(&mut ast))?;

    if config.split_unnatural {
        debug_span!("split").in_scope(|| split::split_program(&mut ast, &mut names))?;
    }

    debug_span!("triad").in_scope(|| triad::lower_program(&mut ast))?;
    let kernels = runtime::capture_kernels(&ast)?;
    let signatures = debug_span!("arguments").in_scope(|| arguments::rewrite_program(&mut ast))?;

    debug!(
        kernels = kernels.len(),
        generated = signatures.len().saturating_sub(kernels.len()),
        "lowering complete"
    );

    Ok(LoweredProgram {
        ast,
        kernels,
        signatures,
    })
}

/// The root holds uniquely named function declarations only, each with a
/// block body
fn check_input(ast: &Ast) -> Result<()> {
    let mut seen = HashSet::new();

    for statement in ast.statements(ast.root())? {
        let function = ast.as_function_declaration(statement)?;

        if ast.kind(function.body) != NodeKind::Block {
            return Err(LowerError::unexpected(ast.kind(function.body), "function body"));
        }

        let name = ast.identifier_name(function.id)?;
        if !seen.insert(name) {
            return Err(ErrorKind::DuplicateFunction(name.to_owned()).into());
        }
    }

    Ok(())
}
