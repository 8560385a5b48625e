//! Natural/unnatural splitting.
//!
//! A kernel can only compute values that follow from its own arguments one
//! element at a time. Statements are classified as:
//!
//! - **natural**: every name read is an argument or another natural value;
//! - **tainted**: a map with captures applied to natural values, i.e. the
//!   first value that depends on per-element context of another array;
//! - **unnatural**: anything reading a tainted or unnatural value.
//!
//! For each tainted value, the unnatural statements depending on it are moved
//! into a generated helper taking the tainted value as its first argument. The
//! kernel keeps its natural and tainted statements plus one call to the
//! helper, and the helper is classified (and split) again on its own.

use hashbrown::{HashMap, HashSet};
use tracing::{debug, trace};

use crate::{
    error::{LowerError, Result},
    middle::{
        ast::{Ast, Node, NodeId},
        naming::NameGenerator,
        type_inference::environment_at,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum Class {
    Natural,
    Tainted,
    Unnatural,
}

pub fn split_program(ast: &mut Ast, names: &mut NameGenerator) -> Result<()> {
    let mut generated = 0;

    for function in ast.functions() {
        if !ast.as_function_declaration(function)?.is_generated {
            split_function(ast, function, names, &mut generated)?;
        }
    }

    debug!(generated, "natural split complete");
    Ok(())
}

/// Classifies every statement of the body, in order
pub fn classify(ast: &Ast, function: NodeId) -> Result<Vec<(NodeId, Class)>> {
    let declaration = ast.as_function_declaration(function)?;
    let function_name = ast.function_name(function)?;
    let body = ast.statements(declaration.body)?;

    let mut classes = HashMap::<String, Class>::new();
    for argument in &declaration.arguments {
        classes.insert(ast.declaration_name(*argument)?.to_owned(), Class::Natural);
    }

    let mut declared = HashSet::<String>::new();
    for candidate in declaration.returns.iter().chain(&body) {
        if let Node::VariableDeclaration(local) = ast.node(*candidate) {
            declared.insert(ast.identifier_name(local.id)?.to_owned());
        }
    }

    let class_of = |classes: &HashMap<String, Class>, reference: NodeId| -> Result<Class> {
        let name = ast.identifier_name(reference)?;
        match classes.get(name) {
            Some(class) => Ok(*class),
            // Declared but not written yet
            None if declared.contains(name) => Ok(Class::Natural),
            None => Err(LowerError::unresolved(name, function_name)),
        }
    };

    let mut statements = vec![];
    for statement in &body {
        let class = match ast.node(*statement) {
            Node::VariableDeclaration(_) => None,
            Node::Assignment(assignment) => {
                let mut natural_reads = true;
                for reference in ast.id_refs(*statement) {
                    natural_reads &= class_of(&classes, reference)? == Class::Natural;
                }

                let class = match ast.node(assignment.value) {
                    Node::Map(map) if !map.captures.is_empty() && natural_reads => Class::Tainted,
                    _ if natural_reads => Class::Natural,
                    _ => Class::Unnatural,
                };
                Some(class)
            }
            _ => {
                let mut natural_reads = true;
                for reference in ast.id_refs(*statement) {
                    natural_reads &= class_of(&classes, reference)? == Class::Natural;
                }
                Some(if natural_reads {
                    Class::Natural
                } else {
                    Class::Unnatural
                })
            }
        };

        if let Some(class) = class {
            for name in ast.assigned_names(*statement) {
                classes.insert(name, class);
            }
        }
        statements.push((*statement, class));
    }

    // Declarations take the class of the value later written to their name
    statements
        .into_iter()
        .map(|(statement, class)| match class {
            Some(class) => Ok((statement, class)),
            None => {
                let name = ast.declaration_name(statement)?;
                Ok((statement, classes.get(name).copied().unwrap_or(Class::Natural)))
            }
        })
        .collect()
}

fn split_function(
    ast: &mut Ast,
    function: NodeId,
    names: &mut NameGenerator,
    generated: &mut usize,
) -> Result<()> {
    // Calls to helpers split off this function read tainted values by
    // construction and must not be claimed again
    let mut helper_calls = HashSet::new();

    loop {
        let classes = classify(ast, function)?;

        let mut split = None;
        for (position, (statement, class)) in classes.iter().enumerate() {
            if *class != Class::Tainted {
                continue;
            }

            let claimed = dependents(ast, &classes[position + 1..], *statement, &helper_calls)?;
            if !claimed.is_empty() {
                split = Some((*statement, claimed));
                break;
            }
        }

        let Some((tainted, claimed)) = split else {
            return Ok(());
        };

        let (call, helper) = split_off(ast, function, tainted, claimed, names)?;
        helper_calls.insert(call);

        let root = ast.root();
        ast.insert_statement(root, *generated, helper)?;
        *generated += 1;

        split_function(ast, helper, names, generated)?;
    }
}

/// The unnatural statements that transitively read what `tainted` writes
fn dependents(
    ast: &Ast,
    following: &[(NodeId, Class)],
    tainted: NodeId,
    excluded: &HashSet<NodeId>,
) -> Result<Vec<NodeId>> {
    let mut written = ast.assigned_names(tainted).into_iter().collect::<HashSet<_>>();
    let mut claimed = vec![];

    for (statement, class) in following {
        if *class != Class::Unnatural || excluded.contains(statement) {
            continue;
        }

        let mut reads_claimed = false;
        for reference in ast.id_refs(*statement) {
            reads_claimed |= written.contains(ast.identifier_name(reference)?);
        }

        if reads_claimed {
            claimed.push(*statement);
            written.extend(ast.assigned_names(*statement));
        }
    }

    Ok(claimed)
}

/// Moves `claimed` out of `function` into a new generated helper and puts a
/// call to it in place of the last claimed statement. Returns the call
/// statement and the helper.
fn split_off(
    ast: &mut Ast,
    function: NodeId,
    tainted: NodeId,
    mut claimed: Vec<NodeId>,
    names: &mut NameGenerator,
) -> Result<(NodeId, NodeId)> {
    let env = environment_at(ast, function, None)?;
    let declaration = ast.as_function_declaration(function)?.clone();
    let body = declaration.body;

    let returns = declaration
        .returns
        .iter()
        .map(|ret| ast.declaration_name(*ret).map(str::to_owned))
        .collect::<Result<HashSet<_>>>()?;

    let mut written = vec![];
    for statement in &claimed {
        for name in ast.assigned_names(*statement) {
            if !written.contains(&name) {
                written.push(name);
            }
        }
    }

    let outputs = written
        .iter()
        .filter(|name| returns.contains(*name))
        .cloned()
        .collect::<Vec<_>>();

    // Locals only the claimed statements write move along with them
    for statement in ast.statements(body)? {
        if let Node::VariableDeclaration(local) = ast.node(statement) {
            let name = ast.identifier_name(local.id)?;
            if written.iter().any(|w| w == name) && !outputs.iter().any(|o| o == name) {
                claimed.push(statement);
            }
        }
    }

    let mut inputs = ast.assigned_names(tainted);
    for statement in &claimed {
        for reference in ast.id_refs(*statement) {
            let name = ast.identifier_name(reference)?;
            if !inputs.iter().any(|i| i == name) && !written.iter().any(|w| w == name) {
                inputs.push(name.to_owned());
            }
        }
    }

    let helper_name = names.split();

    /* Build the call in the parent */

    let call_arguments = ast.identifiers(&inputs);
    let call = ast.call(helper_name.as_str(), call_arguments);
    let call_statement = if outputs.is_empty() {
        call
    } else {
        ast.assign(&outputs, call)
    };

    let statements = ast.statements(body)?;
    let position = statements
        .iter()
        .rposition(|statement| claimed.contains(statement))
        .ok_or_else(|| LowerError::unexpected(ast.kind(tainted), "statement with dependents"))?;
    ast.insert_statement(body, position, call_statement)?;

    let mut moved = vec![];
    ast.update_block(body, |block| {
        block.statements.retain(|statement| {
            if claimed.contains(statement) {
                moved.push(*statement);
                false
            } else {
                true
            }
        })
    })?;

    /* Build the helper */

    let mut arguments = vec![];
    for input in &inputs {
        let types = env
            .lookup(input)?
            .iter()
            .map(|ty| ty.element())
            .collect::<Vec<_>>();
        arguments.push(ast.declaration_of_types(&types, input.as_str(), None)?);
    }

    let mut helper_returns = vec![];
    for output in &outputs {
        let types = env.lookup(output)?.clone();
        helper_returns.push(ast.declaration_of_types(&types, output.as_str(), None)?);
    }

    let helper = ast.function(helper_name.as_str(), helper_returns, arguments, moved, true);

    trace!(
        function = %helper_name,
        inputs = ?inputs,
        outputs = ?outputs,
        "split off unnatural statements"
    );

    Ok((call_statement, helper))
}
