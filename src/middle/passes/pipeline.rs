//! Pipeline expansion.
//!
//! Every `sources :: stage :: stage > destinations` statement is replaced by
//! one temporary per stage. Each stage's body is hoisted into a generated
//! scalar function taking one element, and the stage node stays behind as the
//! temporary's initializer, now pointing at that function:
//!
//! ```text
//! x :: map(v: v * 2) > y;
//! ```
//!
//! becomes
//!
//! ```text
//! generated fn anon0(v: int32) -> (return: int32) {
//!     return = v * 2;
//! }
//!
//! let _t0: [int32] = map<anon0>(x);
//! y = _t0;
//! ```

use tracing::{debug, trace};

use crate::{
    error::{LowerError, Result},
    middle::{
        ast::{Ast, NodeId, NodeKind},
        naming::{NameGenerator, component},
        ty::{Ty, TypeList},
        type_inference::{TypeEnvironment, apply_bindings, get_type, seed_environment},
    },
};

/// Stage name marking a predicate stage
pub const FILTER: &str = "filter";

/// Name of the value a generated stage function returns. Stages with several
/// body expressions return `return.0`, `return.1`, ...
pub const RETURN: &str = "return";

pub fn expand_pipelines(ast: &mut Ast, names: &mut NameGenerator) -> Result<()> {
    let mut generated = 0;

    for function in ast.functions() {
        expand_function(ast, function, names, &mut generated)?;
    }

    debug!(generated, "pipeline expansion complete");
    Ok(())
}

struct Expansion {
    statements: Vec<NodeId>,
    helpers: Vec<NodeId>,
}

fn expand_function(
    ast: &mut Ast,
    function: NodeId,
    names: &mut NameGenerator,
    generated: &mut usize,
) -> Result<()> {
    let root = ast.root();
    let body = ast.as_function_declaration(function)?.body;
    let mut env = seed_environment(ast, function)?;
    let mut index = 0;

    while let Some(statement) = ast.statements(body)?.get(index).copied() {
        if ast.kind(statement) != NodeKind::PipeLine {
            apply_bindings(ast, statement, &mut env)?;
            index += 1;
            continue;
        }

        let expansion = expand_pipeline(ast, statement, &mut env, names)?;

        // Helpers go to the front of the program, in creation order
        for helper in expansion.helpers {
            ast.insert_statement(root, *generated, helper)?;
            *generated += 1;
        }

        for replacement in &expansion.statements {
            apply_bindings(ast, *replacement, &mut env)?;
        }

        index += ast.replace_statement(body, index, expansion.statements)?;
    }

    Ok(())
}

fn expand_pipeline(
    ast: &mut Ast,
    pipeline: NodeId,
    env: &mut TypeEnvironment,
    names: &mut NameGenerator,
) -> Result<Expansion> {
    let pipeline_node = ast.as_pipe_line(pipeline)?.clone();
    let mut statements = vec![];
    let mut helpers = vec![];

    let mut running = TypeList::new();
    for source in &pipeline_node.sources {
        running.extend(get_type(ast, *source, env)?);
    }
    let over_arrays = running.first().is_some_and(|ty| ty.is_array);

    // Several sources are zipped into one temporary first
    let mut current = match pipeline_node.sources.as_slice() {
        [source] => ast.identifier_name(*source)?.to_owned(),
        sources => {
            let temporary = names.temporary();
            let clones = sources
                .iter()
                .map(|source| ast.deep_clone(*source))
                .collect::<Vec<_>>();
            let zip = ast.zip(clones);

            statements.push(ast.declaration_of_types(&running, &temporary, Some(zip))?);
            temporary
        }
    };

    // Validity temporaries of the filter stages seen so far
    let mut validity = vec![];

    for stage in pipeline_node.chain {
        let map = ast.as_map(stage)?.clone();
        let stage_name = ast.identifier_name(map.name)?.to_owned();
        let is_filter = stage_name == FILTER;

        let variables = map
            .variables
            .iter()
            .map(|variable| ast.identifier_name(*variable).map(str::to_owned))
            .collect::<Result<Vec<_>>>()?;

        // TODO: maps taking a different number of values than flow into them
        if variables.len() != running.len() {
            return Err(LowerError::shape_mismatch(
                format!("stage `{}`", ast.display(stage)),
                running.len(),
                variables.len(),
            ));
        }
        if is_filter && map.expressions.len() != 1 {
            return Err(LowerError::shape_mismatch(
                format!("predicate `{}`", ast.display(stage)),
                1,
                map.expressions.len(),
            ));
        }

        let mut captures: Vec<String> = vec![];
        for reference in ast.id_refs(stage) {
            let name = ast.identifier_name(reference)?;
            if !captures.iter().any(|capture| capture == name) {
                captures.push(name.to_owned());
            }
        }

        let anon = names.anon();
        let (helper, returns) =
            generate_stage_function(ast, &anon, &variables, &running, &captures, &map.expressions, env)?;
        env.define_function(anon.as_str(), returns.clone());
        helpers.push(helper);

        let expanded = ast.deep_clone(stage);
        let input = ast.identifier(current.as_str());
        let capture_ids = ast.identifiers(&captures);
        ast.update_map(expanded, |node| {
            node.anon_name = Some(anon.clone());
            node.input = Some(input);
            node.captures = capture_ids;
        })?;

        let temporary = names.temporary();
        let temporary_types = returns
            .iter()
            .map(|ty| if over_arrays { ty.array() } else { *ty })
            .collect::<Vec<_>>();
        statements.push(ast.declaration_of_types(&temporary_types, &temporary, Some(expanded))?);

        trace!(stage = %stage_name, function = %anon, %temporary, "expanded stage");

        // A predicate only records which elements are valid; the values flowing
        // through the pipeline are unchanged
        if is_filter {
            validity.push(temporary);
        } else {
            current = temporary;
            running = temporary_types;
        }
    }

    if validity.is_empty() {
        let destinations = pipeline_node
            .destinations
            .iter()
            .map(|destination| ast.deep_clone(*destination))
            .collect::<Vec<_>>();
        let value = ast.identifier(current);
        statements.push(ast.assignment(destinations, value));
    } else {
        statements.extend(gated_store(
            ast,
            pipeline,
            &pipeline_node.destinations,
            &current,
            &running,
            &validity,
            env,
        )?);
    }

    Ok(Expansion {
        statements,
        helpers,
    })
}

/// Stores the running value only where every predicate held, keeping the
/// destination's previous element elsewhere:
///
/// ```text
/// y = _t1 ? _t0 : y;
/// ```
///
/// A destination with no value yet is declared first.
fn gated_store(
    ast: &mut Ast,
    pipeline: NodeId,
    destinations: &[NodeId],
    current: &str,
    running: &[Ty],
    validity: &[String],
    env: &TypeEnvironment,
) -> Result<Vec<NodeId>> {
    let [destination] = destinations else {
        return Err(LowerError::shape_mismatch(
            format!("filtered pipeline `{}`", ast.display(pipeline)),
            1,
            destinations.len(),
        ));
    };
    if running.len() != 1 {
        return Err(LowerError::shape_mismatch(
            format!("filtered pipeline `{}`", ast.display(pipeline)),
            1,
            running.len(),
        ));
    }

    let destination = ast.identifier_name(*destination)?.to_owned();
    let mut statements = vec![];

    if !env.is_bound(&destination) {
        statements.push(ast.declaration_of_types(running, destination.as_str(), None)?);
    }

    let mut value = ast.identifier(current);
    for valid in validity.iter().rev() {
        let condition = ast.identifier(valid.as_str());
        let previous = ast.identifier(destination.as_str());
        value = ast.select(condition, value, previous);
    }
    statements.push(ast.assign(&[destination.as_str()], value));

    Ok(statements)
}

/// Builds the scalar function a stage is hoisted into: one argument per bound
/// variable typed with the element of the running type, then one per capture,
/// and one return per body expression.
fn generate_stage_function(
    ast: &mut Ast,
    name: &str,
    variables: &[String],
    running: &[Ty],
    captures: &[String],
    expressions: &[NodeId],
    env: &TypeEnvironment,
) -> Result<(NodeId, TypeList)> {
    let mut scope = env.nested(name);
    let mut arguments = vec![];

    for (variable, ty) in variables.iter().zip(running) {
        let element = ty.element();
        scope.bind(variable.as_str(), vec![element]);
        arguments.push(ast.declaration_of_types(&[element], variable.as_str(), None)?);
    }

    for capture in captures {
        let types = env.lookup(capture)?.clone();
        arguments.push(ast.declaration_of_types(&types, capture.as_str(), None)?);
        scope.bind(capture.as_str(), types);
    }

    let mut returns = vec![];
    let mut return_types = TypeList::new();
    let mut body = vec![];

    for (position, expression) in expressions.iter().enumerate() {
        let types = get_type(ast, *expression, &scope)?;
        let return_name = if expressions.len() == 1 {
            RETURN.to_owned()
        } else {
            component(RETURN, position)
        };

        returns.push(ast.declaration_of_types(&types, return_name.as_str(), None)?);
        let value = ast.deep_clone(*expression);
        body.push(ast.assign(&[return_name.as_str()], value));
        return_types.extend(types);
    }

    let function = ast.function(name, returns, arguments, body, true);
    Ok((function, return_types))
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        error::ErrorKind,
        middle::{ast::BinaryOperatorKind, primitive::PrimitiveKind::Int32},
        test_support,
    };

    #[test]
    fn single_map_becomes_a_generated_function() {
        let mut ast = test_support::doubling_program();
        expand_pipelines(&mut ast, &mut NameGenerator::default()).unwrap();

        assert_eq!(
            ast.to_string(),
            indoc! {"
                generated fn anon0(v: int32) -> (return: int32) {
                    return = v * 2;
                }

                fn f(x: [int32]) -> (y: [int32]) {
                    let _t0: [int32] = map<anon0>(x);
                    y = _t0;
                }"}
        );
        assert!(test_support::find_kind(&ast, NodeKind::PipeLine).is_empty());
        assert!(ast.parent_links_consistent());
    }

    #[test]
    fn zipped_sources_filters_and_captures() {
        let mut ast = Ast::new();
        let p = ast.identifier("p");
        let q = ast.identifier("q");
        let k = ast.identifier("k");
        let scaled = ast.binary(BinaryOperatorKind::Multiply, q, k);
        let sum = ast.binary(BinaryOperatorKind::Add, p, scaled);
        let map = ast.map("map", &["p", "q"], vec![sum]);
        let s = ast.identifier("s");
        let zero = ast.integer(0);
        let positive = ast.binary(BinaryOperatorKind::GreaterThan, s, zero);
        let filter = ast.map(FILTER, &["s"], vec![positive]);
        let pipeline = ast.pipeline(&["a", "b"], vec![map, filter], &["c"]);

        let arguments = vec![
            ast.declaration(&[(Int32, true)], "a", None),
            ast.declaration(&[(Int32, true)], "b", None),
            ast.declaration(&[(Int32, false)], "k", None),
        ];
        let returns = vec![ast.declaration(&[(Int32, true)], "c", None)];
        ast.push_function("f", returns, arguments, vec![pipeline], false);

        expand_pipelines(&mut ast, &mut NameGenerator::default()).unwrap();

        assert_eq!(
            ast.to_string(),
            indoc! {"
                generated fn anon0(p: int32, q: int32, k: int32) -> (return: int32) {
                    return = p + (q * k);
                }

                generated fn anon1(s: int32) -> (return: bool) {
                    return = s > 0;
                }

                fn f(a: [int32], b: [int32], k: int32) -> (c: [int32]) {
                    let _t0: ([int32], [int32]) = zip(a, b);
                    let _t1: [int32] = map<anon0>(_t0; k);
                    let _t2: [bool] = filter<anon1>(_t1);
                    c = _t2 ? _t1 : c;
                }"}
        );
    }

    #[test]
    fn filters_gate_the_destination_store() {
        let mut ast = Ast::new();
        let s = ast.identifier("s");
        let zero = ast.integer(0);
        let positive = ast.binary(BinaryOperatorKind::GreaterThan, s, zero);
        let first = ast.map(FILTER, &["s"], vec![positive]);
        let v = ast.identifier("v");
        let two = ast.integer(2);
        let double = ast.binary(BinaryOperatorKind::Multiply, v, two);
        let map = ast.map("map", &["v"], vec![double]);
        let t = ast.identifier("t");
        let ten = ast.integer(10);
        let small = ast.binary(BinaryOperatorKind::LessThan, t, ten);
        let second = ast.map(FILTER, &["t"], vec![small]);
        let pipeline = ast.pipeline(&["x"], vec![first, map, second], &["z"]);
        let arguments = vec![ast.declaration(&[(Int32, true)], "x", None)];
        let function = ast.push_function("f", vec![], arguments, vec![pipeline], false);

        expand_pipelines(&mut ast, &mut NameGenerator::default()).unwrap();

        assert_eq!(
            ast.display(function).to_string(),
            indoc! {"
                fn f(x: [int32]) {
                    let _t0: [bool] = filter<anon0>(x);
                    let _t1: [int32] = map<anon1>(x);
                    let _t2: [bool] = filter<anon2>(_t1);
                    let z: [int32];
                    z = _t0 ? (_t2 ? _t1 : z) : z;
                }"}
        );
    }

    #[test]
    fn filtered_tuples_are_rejected() {
        let mut ast = Ast::new();
        let p = ast.identifier("p");
        let q = ast.identifier("q");
        let greater = ast.binary(BinaryOperatorKind::GreaterThan, p, q);
        let filter = ast.map(FILTER, &["p", "q"], vec![greater]);
        let pipeline = ast.pipeline(&["a", "b"], vec![filter], &["c"]);
        let arguments = vec![
            ast.declaration(&[(Int32, true)], "a", None),
            ast.declaration(&[(Int32, true)], "b", None),
        ];
        ast.push_function("f", vec![], arguments, vec![pipeline], false);

        let error = expand_pipelines(&mut ast, &mut NameGenerator::default()).unwrap_err();
        assert!(matches!(
            error.kind,
            ErrorKind::ShapeMismatch {
                expected: 1,
                found: 2,
                ..
            }
        ));
    }

    #[test]
    fn multi_expression_stages_return_components() {
        let mut ast = Ast::new();
        let v = ast.identifier("v");
        let one = ast.integer(1);
        let plus = ast.binary(BinaryOperatorKind::Add, v, one);
        let v2 = ast.identifier("v");
        let one2 = ast.integer(1);
        let minus = ast.binary(BinaryOperatorKind::Subtract, v2, one2);
        let map = ast.map("map", &["v"], vec![plus, minus]);
        let pipeline = ast.pipeline(&["x"], vec![map], &["y"]);
        let arguments = vec![ast.declaration(&[(Int32, true)], "x", None)];
        ast.push_function("f", vec![], arguments, vec![pipeline], false);

        expand_pipelines(&mut ast, &mut NameGenerator::default()).unwrap();

        assert_eq!(
            ast.to_string(),
            indoc! {"
                generated fn anon0(v: int32) -> (return.0: int32, return.1: int32) {
                    return.0 = v + 1;
                    return.1 = v - 1;
                }

                fn f(x: [int32]) {
                    let _t0: ([int32], [int32]) = map<anon0>(x);
                    y = _t0;
                }"}
        );
    }

    #[test]
    fn stage_arity_must_match_the_running_value() {
        let mut ast = Ast::new();
        let a = ast.identifier("a");
        let map = ast.map("map", &["a", "b"], vec![a]);
        let pipeline = ast.pipeline(&["x"], vec![map], &["y"]);
        let arguments = vec![ast.declaration(&[(Int32, true)], "x", None)];
        ast.push_function("f", vec![], arguments, vec![pipeline], false);

        let error = expand_pipelines(&mut ast, &mut NameGenerator::default()).unwrap_err();
        assert!(matches!(
            error.kind,
            ErrorKind::ShapeMismatch {
                expected: 1,
                found: 2,
                ..
            }
        ));
    }

    #[test]
    fn unknown_sources_are_fatal() {
        let mut ast = Ast::new();
        let v = ast.identifier("v");
        let map = ast.map("map", &["v"], vec![v]);
        let pipeline = ast.pipeline(&["missing"], vec![map], &["y"]);
        ast.push_function("f", vec![], vec![], vec![pipeline], false);

        let error = expand_pipelines(&mut ast, &mut NameGenerator::default()).unwrap_err();
        assert_eq!(
            error.kind,
            ErrorKind::UnresolvedName {
                name: "missing".into(),
                function: "f".into(),
            }
        );
    }
}
