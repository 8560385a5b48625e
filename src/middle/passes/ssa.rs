//! Single-assignment renaming for straight-line function bodies.
//!
//! After this pass no two statements of a kernel write the same name, and
//! every read refers to the closest preceding write:
//!
//! ```text
//! x = a + 1;          x = a + 1;
//! x = x * 2;    =>    let x.1: int32;
//! y = x;              x.1 = x * 2;
//!                     y = x.1;
//! ```
//!
//! Names in the return list are the exception to "first write keeps the bare
//! name": the *last* write to a return keeps it, so the function still hands
//! back `r`, and earlier writes become `r.1`, `r.2`, ...
//!
//! Bodies must not branch or loop. Generated functions are left alone.

use hashbrown::{HashMap, HashSet};
use tracing::{debug, trace};

use crate::{
    error::Result,
    middle::{
        ast::{Ast, Node, NodeId},
        naming::component,
        type_inference::{apply_bindings, seed_environment},
    },
};

pub fn rename_program(ast: &mut Ast) -> Result<()> {
    for function in ast.functions() {
        if !ast.as_function_declaration(function)?.is_generated {
            rename_function(ast, function)?;
        }
    }

    Ok(())
}

pub fn rename_function(ast: &mut Ast, function: NodeId) -> Result<()> {
    let declaration = ast.as_function_declaration(function)?.clone();
    let body = declaration.body;

    split_initializers(ast, body)?;

    let mut env = seed_environment(ast, function)?;

    // Every argument already holds a value on entry
    let mut bound = declaration
        .arguments
        .iter()
        .map(|argument| ast.declaration_name(*argument).map(str::to_owned))
        .collect::<Result<HashSet<_>>>()?;
    let returns = declaration
        .returns
        .iter()
        .map(|ret| ast.declaration_name(*ret).map(str::to_owned))
        .collect::<Result<HashSet<_>>>()?;

    // Writes still to come for each return, so the last one can keep the name
    let mut pending_return_writes = HashMap::<String, usize>::new();
    for statement in ast.statements(body)? {
        for name in ast.assigned_names(statement) {
            if returns.contains(&name) {
                *pending_return_writes.entry(name).or_default() += 1;
            }
        }
    }

    let mut active = HashMap::<String, String>::new();
    let mut versions = HashMap::<String, usize>::new();
    let mut renamed = 0;
    let mut index = 0;

    while let Some(statement) = ast.statements(body)?.get(index).copied() {
        for reference in ast.id_refs(statement) {
            let name = ast.identifier_name(reference)?;
            if let Some(current) = active.get(name) {
                let current = current.clone();
                ast.update_identifier(reference, |identifier| identifier.name = current)?;
            }
        }

        let targets = match ast.node(statement) {
            Node::Assignment(assignment) => assignment.targets.clone(),
            _ => vec![],
        };

        let mut fresh_declarations = vec![];

        for target in targets {
            let Ok(name) = ast.identifier_name(target).map(str::to_owned) else {
                // Element stores write through a pointer and rebind nothing
                continue;
            };

            let new_name = if returns.contains(&name) {
                let pending = pending_return_writes.entry(name.clone()).or_default();
                *pending = pending.saturating_sub(1);

                if *pending == 0 {
                    active.remove(&name);
                    continue;
                }

                let version = versions.entry(name.clone()).or_default();
                *version += 1;
                component(&name, *version)
            } else if bound.insert(name.clone()) {
                continue;
            } else {
                let version = versions.entry(name.clone()).or_default();
                *version += 1;
                component(&name, *version)
            };

            let types = env.lookup(&name)?.clone();
            fresh_declarations.push(ast.declaration_of_types(&types, new_name.as_str(), None)?);

            trace!(%name, %new_name, "renamed write");
            let assigned = new_name.clone();
            ast.update_identifier(target, |identifier| identifier.name = assigned)?;
            active.insert(name, new_name);
            renamed += 1;
        }

        for declaration in fresh_declarations {
            apply_bindings(ast, declaration, &mut env)?;
            ast.insert_statement(body, index, declaration)?;
            index += 1;
        }

        apply_bindings(ast, statement, &mut env)?;
        index += 1;
    }

    debug!(function = ast.function_name(function)?, renamed, "renamed to single assignment");
    Ok(())
}

/// Turns `let x: T = e;` into `let x: T; x = e;`
pub(crate) fn split_initializers(ast: &mut Ast, body: NodeId) -> Result<()> {
    let mut index = 0;

    while let Some(statement) = ast.statements(body)?.get(index).copied() {
        index += 1;

        let Node::VariableDeclaration(declaration) = ast.node(statement) else {
            continue;
        };
        if declaration.initializer.is_none() {
            continue;
        }

        let name = ast.identifier_name(declaration.id)?.to_owned();
        let Some(initializer) =
            ast.update_variable_declaration(statement, |declaration| declaration.initializer.take())?
        else {
            continue;
        };

        let assignment = ast.assign(&[name.as_str()], initializer);
        ast.insert_statement(body, index, assignment)?;
        index += 1;
    }

    Ok(())
}
