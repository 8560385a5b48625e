//! Triad lowering: the last multi-valued constructs become calls and scalar
//! assignments.
//!
//! - `t = map<anon0>(x; k)` becomes `t = anon0(x, k)`. A stage with several
//!   returns is called for its side effects instead, writing each return
//!   through an address: `anon0(&t.0, &t.1, x)`.
//! - `a, b = zip(c, d)` becomes `a = c; b = d;`.
//! - `a, b = p` becomes `a = p.0; b = p.1;`, and `q = p` with a multi-valued
//!   `p` becomes `q.0 = p.0; q.1 = p.1;`.
//! - `let p: (int32, float);` becomes `let p.0: int32; let p.1: float;`.
//!
//! Replacements are inserted before the statement they replace, which is then
//! erased.

use tracing::{debug, trace};

use crate::{
    error::{LowerError, Result},
    middle::{
        ast::{Assignment, Ast, Node, NodeId, NodeKind, VariableDeclaration},
        naming::component,
        passes::ssa::split_initializers,
        type_inference::{TypeEnvironment, apply_bindings, seed_environment},
    },
};

pub fn lower_program(ast: &mut Ast) -> Result<()> {
    for function in ast.functions() {
        lower_function(ast, function)?;
    }

    Ok(())
}

pub fn lower_function(ast: &mut Ast, function: NodeId) -> Result<()> {
    let body = ast.as_function_declaration(function)?.body;
    split_initializers(ast, body)?;

    let mut env = seed_environment(ast, function)?;
    let mut index = 0;
    let mut lowered = 0;

    while let Some(statement) = ast.statements(body)?.get(index).copied() {
        let replacements = lower_statement(ast, statement, &env)?;
        apply_bindings(ast, statement, &mut env)?;

        let Some(replacements) = replacements else {
            index += 1;
            continue;
        };

        trace!(
            statement = %ast.display(statement),
            replacements = replacements.len(),
            "lowered statement"
        );

        for replacement in &replacements {
            apply_bindings(ast, *replacement, &mut env)?;
        }
        index += ast.replace_statement(body, index, replacements)?;
        lowered += 1;
    }

    debug!(function = ast.function_name(function)?, lowered, "lowered triads");
    Ok(())
}

/// Returns the statements replacing `statement`, or `None` if it is already in
/// final form
fn lower_statement(ast: &mut Ast, statement: NodeId, env: &TypeEnvironment) -> Result<Option<Vec<NodeId>>> {
    match ast.node(statement) {
        Node::VariableDeclaration(declaration) if declaration.types.len() > 1 => {
            let declaration = declaration.clone();
            let name = ast.identifier_name(declaration.id)?.to_owned();

            let mut replacements = vec![];
            for (position, ty) in declaration.types.iter().enumerate() {
                let ty = ast.deep_clone(*ty);
                let id = ast.identifier(component(&name, position));
                replacements.push(ast.alloc(Node::VariableDeclaration(VariableDeclaration {
                    types: vec![ty],
                    id,
                    initializer: None,
                })));
            }

            Ok(Some(replacements))
        }
        Node::Assignment(assignment) => {
            let assignment = assignment.clone();

            match ast.kind(assignment.value) {
                NodeKind::Map => lower_map(ast, &assignment, env).map(Some),
                NodeKind::Zip => lower_zip(ast, &assignment).map(Some),
                NodeKind::Identifier => lower_tuple_copy(ast, statement, &assignment, env),
                _ => Ok(None),
            }
        }
        _ => Ok(None),
    }
}

fn lower_map(ast: &mut Ast, assignment: &Assignment, env: &TypeEnvironment) -> Result<Vec<NodeId>> {
    let map = ast.as_map(assignment.value)?.clone();
    let (Some(callee), Some(input)) = (map.anon_name, map.input) else {
        return Err(LowerError::unexpected(NodeKind::Map, "map with a generated function"));
    };

    let input = ast.identifier_name(input)?.to_owned();
    let mut arguments = if map.variables.len() == 1 {
        vec![ast.identifier(input)]
    } else {
        (0..map.variables.len())
            .map(|position| ast.identifier(component(&input, position)))
            .collect()
    };
    for capture in &map.captures {
        arguments.push(ast.deep_clone(*capture));
    }

    let returns = env.function_returns(&callee)?.len();

    if returns == 1 {
        let targets = assignment
            .targets
            .iter()
            .map(|target| ast.deep_clone(*target))
            .collect();
        let call = ast.call(callee, arguments);

        return Ok(vec![ast.assignment(targets, call)]);
    }

    let targets = assignment
        .targets
        .iter()
        .map(|target| ast.identifier_name(*target).map(str::to_owned))
        .collect::<Result<Vec<_>>>()?;

    let outputs = match targets.as_slice() {
        [target] => (0..returns).map(|position| component(target, position)).collect(),
        targets if targets.len() == returns => targets.to_vec(),
        targets => {
            return Err(LowerError::shape_mismatch(
                format!("call to `{callee}`"),
                returns,
                targets.len(),
            ));
        }
    };

    let mut call_arguments = outputs
        .into_iter()
        .map(|output| {
            let output = ast.identifier(output);
            ast.address_of(output)
        })
        .collect::<Vec<_>>();
    call_arguments.extend(arguments);

    Ok(vec![ast.call(callee, call_arguments)])
}

fn lower_zip(ast: &mut Ast, assignment: &Assignment) -> Result<Vec<NodeId>> {
    let sources = ast.as_zip(assignment.value)?.sources.clone();

    if let [source] = sources.as_slice() {
        let targets = assignment
            .targets
            .iter()
            .map(|target| ast.deep_clone(*target))
            .collect();
        let value = ast.deep_clone(*source);

        return Ok(vec![ast.assignment(targets, value)]);
    }

    let targets = if assignment.targets.len() == sources.len() {
        assignment
            .targets
            .iter()
            .map(|target| ast.deep_clone(*target))
            .collect::<Vec<_>>()
    } else if let [target] = assignment.targets.as_slice() {
        let name = ast.identifier_name(*target)?.to_owned();
        (0..sources.len())
            .map(|position| ast.identifier(component(&name, position)))
            .collect()
    } else {
        return Err(LowerError::shape_mismatch(
            "zip assignment",
            sources.len(),
            assignment.targets.len(),
        ));
    };

    Ok(targets
        .into_iter()
        .zip(sources)
        .map(|(target, source)| {
            let value = ast.deep_clone(source);
            ast.assignment(vec![target], value)
        })
        .collect())
}

fn lower_tuple_copy(
    ast: &mut Ast,
    statement: NodeId,
    assignment: &Assignment,
    env: &TypeEnvironment,
) -> Result<Option<Vec<NodeId>>> {
    let source = ast.identifier_name(assignment.value)?.to_owned();
    let count = env.lookup(&source)?.len();

    let targets = match assignment.targets.as_slice() {
        [target] if count > 1 => {
            let name = ast.identifier_name(*target)?.to_owned();
            (0..count).map(|position| component(&name, position)).collect::<Vec<_>>()
        }
        [_] => return Ok(None),
        targets if targets.len() == count => targets
            .iter()
            .map(|target| ast.identifier_name(*target).map(str::to_owned))
            .collect::<Result<Vec<_>>>()?,
        targets => {
            return Err(LowerError::shape_mismatch(
                format!("`{}`", ast.display(statement)),
                targets.len(),
                count,
            ));
        }
    };

    Ok(Some(
        targets
            .into_iter()
            .enumerate()
            .map(|(position, target)| {
                let value = ast.identifier(component(&source, position));
                ast.assign(&[target], value)
            })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        error::ErrorKind,
        middle::{
            ast::BinaryOperatorKind,
            naming::NameGenerator,
            passes::{pipeline::expand_pipelines, ssa::rename_program},
            primitive::PrimitiveKind::{Float, Int32},
        },
        test_support,
    };

    #[test]
    fn zip_assignment_becomes_component_copies() {
        let mut ast = Ast::new();
        let c = ast.identifier("c");
        let d = ast.identifier("d");
        let zip = ast.zip(vec![c, d]);
        let statement = ast.assign(&["a", "b"], zip);
        let arguments = vec![
            ast.declaration(&[(Int32, false)], "c", None),
            ast.declaration(&[(Int32, false)], "d", None),
        ];
        let function = ast.push_function("f", vec![], arguments, vec![statement], false);

        lower_program(&mut ast).unwrap();

        assert_eq!(
            ast.display(function).to_string(),
            indoc! {"
                fn f(c: int32, d: int32) {
                    a = c;
                    b = d;
                }"}
        );
        assert!(test_support::find_kind(&ast, NodeKind::Zip).is_empty());
    }

    #[test]
    fn single_return_map_becomes_a_call() {
        let mut ast = test_support::doubling_program();
        expand_pipelines(&mut ast, &mut NameGenerator::default()).unwrap();
        rename_program(&mut ast).unwrap();
        lower_program(&mut ast).unwrap();

        let function = ast.find_function("f").unwrap();
        assert_eq!(
            ast.display(function).to_string(),
            indoc! {"
                fn f(x: [int32]) -> (y: [int32]) {
                    let _t0: [int32];
                    _t0 = anon0(x);
                    y = _t0;
                }"}
        );
        assert!(test_support::find_kind(&ast, NodeKind::Map).is_empty());
    }

    #[test]
    fn multi_return_maps_write_through_addresses() {
        let mut ast = Ast::new();
        let p = ast.identifier("p");
        let q = ast.identifier("q");
        let sum = ast.binary(BinaryOperatorKind::Add, p, q);
        let p = ast.identifier("p");
        let q = ast.identifier("q");
        let difference = ast.binary(BinaryOperatorKind::Subtract, p, q);
        let map = ast.map("map", &["p", "q"], vec![sum, difference]);
        let pipeline = ast.pipeline(&["a", "b"], vec![map], &["s"]);
        let arguments = vec![
            ast.declaration(&[(Int32, true)], "a", None),
            ast.declaration(&[(Int32, true)], "b", None),
        ];
        let function = ast.push_function("f", vec![], arguments, vec![pipeline], false);

        expand_pipelines(&mut ast, &mut NameGenerator::default()).unwrap();
        rename_program(&mut ast).unwrap();
        lower_program(&mut ast).unwrap();

        assert_eq!(
            ast.display(function).to_string(),
            indoc! {"
                fn f(a: [int32], b: [int32]) {
                    let _t0.0: [int32];
                    let _t0.1: [int32];
                    _t0.0 = a;
                    _t0.1 = b;
                    let _t1.0: [int32];
                    let _t1.1: [int32];
                    anon0(&_t1.0, &_t1.1, _t0.0, _t0.1);
                    s.0 = _t1.0;
                    s.1 = _t1.1;
                }"}
        );
    }

    #[test]
    fn multi_typed_declarations_are_split() {
        let mut ast = Ast::new();
        let declaration = ast.declaration(&[(Int32, false), (Float, false)], "p", None);
        let function = ast.push_function("f", vec![], vec![], vec![declaration], false);

        lower_program(&mut ast).unwrap();

        assert_eq!(
            ast.display(function).to_string(),
            indoc! {"
                fn f() {
                    let p.0: int32;
                    let p.1: float;
                }"}
        );
    }

    #[test]
    fn tuple_copies_unpack_into_targets() {
        let mut ast = Ast::new();
        let declaration = ast.declaration(&[(Int32, false), (Float, false)], "p", None);
        let p = ast.identifier("p");
        let unpack = ast.assign(&["a", "b"], p);
        let function = ast.push_function("f", vec![], vec![], vec![declaration, unpack], false);

        lower_program(&mut ast).unwrap();

        assert_eq!(
            ast.display(function).to_string(),
            indoc! {"
                fn f() {
                    let p.0: int32;
                    let p.1: float;
                    a = p.0;
                    b = p.1;
                }"}
        );
    }

    #[test]
    fn zip_shape_mismatch_is_fatal() {
        let mut ast = Ast::new();
        let c = ast.identifier("c");
        let d = ast.identifier("d");
        let e = ast.identifier("e");
        let zip = ast.zip(vec![c, d, e]);
        let statement = ast.assign(&["a", "b"], zip);
        let arguments = vec![
            ast.declaration(&[(Int32, false)], "c", None),
            ast.declaration(&[(Int32, false)], "d", None),
            ast.declaration(&[(Int32, false)], "e", None),
        ];
        ast.push_function("f", vec![], arguments, vec![statement], false);

        let error = lower_program(&mut ast).unwrap_err();
        assert!(matches!(error.kind, ErrorKind::ShapeMismatch { .. }));
    }
}
