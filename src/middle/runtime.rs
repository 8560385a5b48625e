//! The interface a runtime driver needs to launch each kernel: what it reads
//! and what it writes, per element.
//!
//! Captured after triad lowering and before argument rewriting, while array
//! returns are still returns. The launcher allocates one buffer per array
//! descriptor and passes scalars by value.

use std::fmt;

use itertools::Itertools;
use tracing::debug;

use crate::{
    error::Result,
    middle::{
        ast::{Ast, NodeId},
        naming::component,
        ty::Ty,
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableDescriptor {
    pub name: String,
    pub ty: Ty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelInterface {
    pub name: String,
    pub inputs: Vec<VariableDescriptor>,
    pub outputs: Vec<VariableDescriptor>,
}

impl KernelInterface {
    /// Whether the launcher needs an element count for this kernel
    pub fn is_data_parallel(&self) -> bool {
        self.inputs
            .iter()
            .chain(&self.outputs)
            .any(|variable| variable.ty.is_array)
    }
}

impl fmt::Display for VariableDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.ty)
    }
}

impl fmt::Display for KernelInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "kernel {}({}) -> ({})",
            self.name,
            self.inputs.iter().join(", "),
            self.outputs.iter().join(", ")
        )
    }
}

/// Describes every non-generated function, in program order
pub fn capture_kernels(ast: &Ast) -> Result<Vec<KernelInterface>> {
    let mut kernels = vec![];

    for function in ast.functions() {
        let declaration = ast.as_function_declaration(function)?;
        if declaration.is_generated {
            continue;
        }

        kernels.push(KernelInterface {
            name: ast.function_name(function)?.to_owned(),
            inputs: describe(ast, &declaration.arguments)?,
            outputs: describe(ast, &declaration.returns)?,
        });
    }

    debug!(kernels = kernels.len(), "captured kernel interfaces");
    Ok(kernels)
}

/// A multi-valued declaration contributes one descriptor per component
fn describe(ast: &Ast, declarations: &[NodeId]) -> Result<Vec<VariableDescriptor>> {
    let mut descriptors = vec![];

    for declaration in declarations {
        let name = ast.declaration_name(*declaration)?;
        let types = &ast.as_variable_declaration(*declaration)?.types;

        if let [ty] = types.as_slice() {
            descriptors.push(VariableDescriptor {
                name: name.to_owned(),
                ty: ast.as_type(*ty)?.ty(),
            });
            continue;
        }

        for (position, ty) in types.iter().enumerate() {
            descriptors.push(VariableDescriptor {
                name: component(name, position),
                ty: ast.as_type(*ty)?.ty(),
            });
        }
    }

    Ok(descriptors)
}
