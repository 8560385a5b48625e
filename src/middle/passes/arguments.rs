//! Array-to-pointer argument rewriting.
//!
//! Turns every kernel into a function computing one element. Returns move to
//! the front of the argument list as pointers the caller supplies, array
//! arguments become pointers, and functions touching array data take a leading
//! `idx` naming the element being computed. Inside the body, every remaining
//! use of a pointer argument becomes an explicit element access:
//!
//! ```text
//! fn f(x: [int32]) -> (y: [int32]) {        fn f(idx: int32, y: *int32, x: *int32) {
//!     let _t0: [int32];                         let _t0: int32;
//!     _t0 = anon0(x);                 =>        _t0 = anon0(x[idx]);
//!     y = _t0;                                  y[idx] = _t0;
//! }                                         }
//! ```
//!
//! Must run after single-assignment renaming and triad lowering, so that every
//! bare reference to an array is a genuine element access.

use hashbrown::HashMap;
use tracing::{debug, trace};

use crate::{
    error::{ErrorKind, LowerError, Result},
    middle::{
        ast::{Ast, Node, NodeId, NodeKind},
        primitive::PrimitiveKind,
    },
};

/// Name of the synthetic element index argument
pub const INDEX: &str = "idx";

/// How a function is called once its signature has been rewritten
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub takes_index: bool,
    /// Number of out-arguments following `idx` that used to be returns
    pub outputs: usize,
    /// Whether each argument, `idx` included, is passed by pointer
    pub pointer_parameters: Vec<bool>,
    /// Whether each argument points into an array the function indexes with
    /// `idx`
    pub array_parameters: Vec<bool>,
}

pub fn rewrite_program(ast: &mut Ast) -> Result<HashMap<String, Signature>> {
    let mut signatures = HashMap::new();

    for function in ast.functions() {
        let signature = rewrite_signature(ast, function)?;
        signatures.insert(ast.function_name(function)?.to_owned(), signature);
    }

    for function in ast.functions() {
        rewrite_call_sites(ast, function, &signatures)?;
        rewrite_element_access(ast, function, &signatures)?;
    }

    Ok(signatures)
}

fn declaration_types(ast: &Ast, declaration: NodeId) -> Result<Vec<NodeId>> {
    Ok(ast.as_variable_declaration(declaration)?.types.clone())
}

fn has_array_type(ast: &Ast, declaration: NodeId) -> Result<bool> {
    for ty in declaration_types(ast, declaration)? {
        if ast.as_type(ty)?.is_array {
            return Ok(true);
        }
    }
    Ok(false)
}

fn has_pointer_type(ast: &Ast, declaration: NodeId) -> Result<bool> {
    for ty in declaration_types(ast, declaration)? {
        if ast.as_type(ty)?.is_pointer {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Migrates returns into the argument list and decides whether the function
/// needs `idx`. Kernels migrate every return. Generated functions keep a
/// single scalar return and migrate otherwise.
fn rewrite_signature(ast: &mut Ast, function: NodeId) -> Result<Signature> {
    let declaration = ast.as_function_declaration(function)?.clone();

    let mut array_arguments = false;
    for argument in &declaration.arguments {
        array_arguments |= has_array_type(ast, *argument)?;
    }
    let mut array_returns = false;
    for ret in &declaration.returns {
        array_returns |= has_array_type(ast, *ret)?;
    }

    let migrate = !declaration.is_generated || declaration.returns.len() > 1 || array_returns;
    let (migrated, kept) = if migrate {
        (declaration.returns.clone(), vec![])
    } else {
        (vec![], declaration.returns.clone())
    };

    // Array returns keep their array flag, so the body indexes them; scalar
    // returns become plain by-reference outputs
    for ret in &migrated {
        for ty in declaration_types(ast, *ret)? {
            ast.update_type(ty, |ty| ty.is_pointer = true)?;
        }
    }

    for argument in &declaration.arguments {
        for ty in declaration_types(ast, *argument)? {
            ast.update_type(ty, |ty| ty.is_pointer |= ty.is_array)?;
        }
    }

    for statement in ast.statements(declaration.body)? {
        if ast.kind(statement) != NodeKind::VariableDeclaration {
            continue;
        }
        for ty in declaration_types(ast, statement)? {
            ast.update_type(ty, |ty| ty.is_array = false)?;
        }
    }

    let takes_index = if declaration.is_generated {
        array_arguments || array_returns
    } else {
        let mut by_pointer = false;
        for parameter in migrated.iter().chain(&declaration.arguments) {
            by_pointer |= has_pointer_type(ast, *parameter)?;
        }
        by_pointer
    };

    let mut arguments = vec![];
    if takes_index {
        arguments.push(ast.declaration(&[(PrimitiveKind::Int32, false)], INDEX, None));
    }
    arguments.extend(migrated.iter().copied());
    arguments.extend(declaration.arguments.iter().copied());

    let mut pointer_parameters = vec![];
    let mut array_parameters = vec![];
    for argument in &arguments {
        pointer_parameters.push(has_pointer_type(ast, *argument)?);
        array_parameters.push(has_array_type(ast, *argument)?);
    }

    ast.update_function_declaration(function, |function| {
        function.arguments = arguments;
        function.returns = kept;
    })?;

    debug!(
        function = ast.function_name(function)?,
        takes_index,
        outputs = migrated.len(),
        "rewrote signature"
    );

    Ok(Signature {
        takes_index,
        outputs: migrated.len(),
        pointer_parameters,
        array_parameters,
    })
}

/// Names of the function's arguments passed by pointer, with whether each
/// one points into an array
fn pointer_arguments(ast: &Ast, function: NodeId) -> Result<HashMap<String, bool>> {
    let mut pointers = HashMap::new();

    for argument in &ast.as_function_declaration(function)?.arguments {
        for ty in declaration_types(ast, *argument)? {
            let ty = ast.as_type(ty)?;
            if ty.is_pointer {
                pointers.insert(ast.declaration_name(*argument)?.to_owned(), ty.is_array);
            }
        }
    }

    Ok(pointers)
}

/// Rewrites `targets = g(args)` into `g(idx, outs..., args)` for every callee
/// whose returns moved into its arguments, and passes `idx` to every callee
/// taking it
fn rewrite_call_sites(ast: &mut Ast, function: NodeId, signatures: &HashMap<String, Signature>) -> Result<()> {
    let body = ast.as_function_declaration(function)?.body;
    let pointers = pointer_arguments(ast, function)?;
    // Innermost calls first, so nested calls are complete before an enclosing
    // call copies its arguments
    let calls = ast
        .descendants(body)
        .into_iter()
        .rev()
        .filter(|id| ast.kind(*id) == NodeKind::Call)
        .collect::<Vec<_>>();

    for call in calls {
        let callee = ast.identifier_name(ast.as_call(call)?.function)?.to_owned();
        let Some(signature) = signatures.get(&callee) else {
            continue;
        };

        let parent = ast.parent(call);
        let statement = parent.filter(|parent| {
            ast.as_assignment(*parent)
                .is_ok_and(|assignment| assignment.value == call)
        });

        if signature.outputs > 0 && parent != Some(body) {
            let Some(statement) = statement else {
                return Err(LowerError::unexpected(
                    ast.kind(parent.unwrap_or(call)),
                    "assignment receiving every result of a call",
                ));
            };

            rewrite_output_call(ast, body, statement, call, signature, &pointers)?;
            continue;
        }

        if signature.takes_index {
            let index = ast.identifier(INDEX);
            ast.update_call(call, |call| call.arguments.insert(0, index))?;
        }
    }

    Ok(())
}

fn rewrite_output_call(
    ast: &mut Ast,
    body: NodeId,
    statement: NodeId,
    call: NodeId,
    signature: &Signature,
    pointers: &HashMap<String, bool>,
) -> Result<()> {
    let assignment = ast.as_assignment(statement)?.clone();
    let callee = ast.identifier_name(ast.as_call(call)?.function)?.to_owned();

    if assignment.targets.len() != signature.outputs {
        return Err(LowerError::shape_mismatch(
            format!("call to `{callee}`"),
            signature.outputs,
            assignment.targets.len(),
        ));
    }

    let mut arguments = vec![];
    if signature.takes_index {
        arguments.push(ast.identifier(INDEX));
    }

    let first_output = usize::from(signature.takes_index);
    for (position, target) in assignment.targets.iter().enumerate() {
        let into_array = signature
            .array_parameters
            .get(first_output + position)
            .copied()
            .unwrap_or(false);
        let caller_pointer = ast
            .identifier_name(*target)
            .ok()
            .and_then(|name| pointers.get(name).copied());

        let output = ast.deep_clone(*target);
        let output = match (into_array, caller_pointer) {
            // Caller and callee index the same buffer with the same `idx`
            (true, Some(true)) => output,
            (true, _) => {
                return Err(LowerError::new(ErrorKind::UnbufferedArrayOutput {
                    callee: callee.clone(),
                    target: ast.display(*target).to_string(),
                }));
            }
            (false, Some(true)) => {
                let index = ast.identifier(INDEX);
                let element = ast.array_ref(output, index);
                ast.address_of(element)
            }
            (false, Some(false)) => output,
            (false, None) => ast.address_of(output),
        };
        arguments.push(output);
    }

    for argument in ast.as_call(call)?.arguments.clone() {
        arguments.push(ast.deep_clone(argument));
    }

    let replacement = ast.call(callee.as_str(), arguments);
    let index = ast
        .statements(body)?
        .iter()
        .position(|candidate| *candidate == statement)
        .ok_or_else(|| LowerError::unexpected(ast.kind(statement), "statement of the body"))?;
    ast.replace_statement(body, index, vec![replacement])?;

    trace!(%callee, "passed outputs by reference");
    Ok(())
}

/// Replaces each use of a pointer argument with the element it designates:
/// `name[idx]` for arrays and `*name` for scalars passed by reference
fn rewrite_element_access(
    ast: &mut Ast,
    function: NodeId,
    signatures: &HashMap<String, Signature>,
) -> Result<()> {
    let body = ast.as_function_declaration(function)?.body;
    let pointers = pointer_arguments(ast, function)?;
    if pointers.is_empty() {
        return Ok(());
    }

    let mut uses = vec![];
    for id in ast.descendants(body) {
        let Node::Identifier(identifier) = ast.node(id) else {
            continue;
        };
        let Some(is_array) = pointers.get(&identifier.name).copied() else {
            continue;
        };
        let Some(parent) = ast.parent(id) else {
            continue;
        };

        if uses_pointer_itself(ast, parent, id, signatures)? {
            continue;
        }

        uses.push((parent, id, identifier.name.clone(), is_array));
    }

    for (parent, id, name, is_array) in &uses {
        let base = ast.identifier(name.as_str());
        let access = if *is_array {
            let index = ast.identifier(INDEX);
            ast.array_ref(base, index)
        } else {
            ast.deref(base)
        };
        ast.replace_child(*parent, *id, access);
    }

    debug!(
        function = ast.function_name(function)?,
        rewritten = uses.len(),
        "rewrote element accesses"
    );
    Ok(())
}

/// True where the pointer itself is wanted rather than the element: explicit
/// indexing, address-of and dereference, declarations, and arguments of
/// pointer parameters
fn uses_pointer_itself(
    ast: &Ast,
    parent: NodeId,
    id: NodeId,
    signatures: &HashMap<String, Signature>,
) -> Result<bool> {
    Ok(match ast.node(parent) {
        Node::ArrayRef(array_ref) => array_ref.array == id,
        Node::Unary(_) | Node::VariableDeclaration(_) => true,
        Node::Call(call) => {
            if call.function == id {
                return Ok(true);
            }

            let callee = ast.identifier_name(call.function)?;
            let position = call.arguments.iter().position(|argument| *argument == id);

            match (signatures.get(callee), position) {
                (Some(signature), Some(position)) => signature
                    .pointer_parameters
                    .get(position)
                    .copied()
                    .unwrap_or(false),
                _ => false,
            }
        }
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::middle::{
        ast::BinaryOperatorKind,
        naming::NameGenerator,
        passes::{pipeline::expand_pipelines, ssa::rename_program, triad::lower_program},
        primitive::PrimitiveKind::Int32,
    };
    use crate::test_support;

    fn lower_up_to_arguments(ast: &mut Ast) -> HashMap<String, Signature> {
        expand_pipelines(ast, &mut NameGenerator::default()).unwrap();
        rename_program(ast).unwrap();
        lower_program(ast).unwrap();
        rewrite_program(ast).unwrap()
    }

    #[test]
    fn kernel_becomes_per_element() {
        let mut ast = test_support::doubling_program();
        let signatures = lower_up_to_arguments(&mut ast);

        assert_eq!(
            ast.to_string(),
            indoc! {"
                generated fn anon0(v: int32) -> (return: int32) {
                    return = v * 2;
                }

                fn f(idx: int32, y: *int32, x: *int32) {
                    let _t0: int32;
                    _t0 = anon0(x[idx]);
                    y[idx] = _t0;
                }"}
        );
        assert_eq!(
            signatures["f"],
            Signature {
                takes_index: true,
                outputs: 1,
                pointer_parameters: vec![false, true, true],
                array_parameters: vec![false, true, true],
            }
        );
        assert!(!signatures["anon0"].takes_index);
    }

    #[test]
    fn array_returns_leave_the_return_list() {
        let mut ast = test_support::doubling_program();
        lower_up_to_arguments(&mut ast);

        for function in ast.functions() {
            let declaration = ast.as_function_declaration(function).unwrap();
            if declaration.is_generated {
                continue;
            }

            for ret in &declaration.returns {
                assert!(!has_array_type(&ast, *ret).unwrap());
            }
            assert_eq!(ast.declaration_name(declaration.arguments[0]).unwrap(), INDEX);
        }
    }

    #[test]
    fn multi_return_helpers_write_through_pointers() {
        let mut ast = Ast::new();
        let p = ast.identifier("p");
        let one = ast.integer(1);
        let plus = ast.binary(BinaryOperatorKind::Add, p, one);
        let p = ast.identifier("p");
        let one = ast.integer(1);
        let minus = ast.binary(BinaryOperatorKind::Subtract, p, one);
        let map = ast.map("map", &["p"], vec![plus, minus]);
        let pipeline = ast.pipeline(&["a"], vec![map], &["lo"]);
        let arguments = vec![ast.declaration(&[(Int32, true)], "a", None)];
        ast.push_function("f", vec![], arguments, vec![pipeline], false);

        lower_up_to_arguments(&mut ast);

        assert_eq!(
            ast.to_string(),
            indoc! {"
                generated fn anon0(return.0: *int32, return.1: *int32, p: int32) {
                    *return.0 = p + 1;
                    *return.1 = p - 1;
                }

                fn f(idx: int32, a: *int32) {
                    let _t0.0: int32;
                    let _t0.1: int32;
                    anon0(&_t0.0, &_t0.1, a[idx]);
                    lo.0 = _t0.0;
                    lo.1 = _t0.1;
                }"}
        );
    }

    #[test]
    fn scalar_kernels_return_by_reference() {
        let mut ast = Ast::new();
        let a = ast.identifier("a");
        let b = ast.identifier("b");
        let sum = ast.binary(BinaryOperatorKind::Add, a, b);
        let statement = ast.assign(&["s"], sum);
        let arguments = vec![
            ast.declaration(&[(Int32, false)], "a", None),
            ast.declaration(&[(Int32, false)], "b", None),
        ];
        let returns = vec![ast.declaration(&[(Int32, false)], "s", None)];
        let add = ast.push_function("add", returns, arguments, vec![statement], false);

        let x = ast.identifier("x");
        let two = ast.integer(2);
        let call = ast.call("add", vec![x, two]);
        let statement = ast.assign(&["t"], call);
        let arguments = vec![ast.declaration(&[(Int32, true)], "x", None)];
        let caller = ast.push_function("main", vec![], arguments, vec![statement], false);

        rewrite_program(&mut ast).unwrap();

        assert_eq!(
            ast.display(add).to_string(),
            indoc! {"
                fn add(idx: int32, s: *int32, a: int32, b: int32) {
                    *s = a + b;
                }"}
        );
        assert_eq!(
            ast.display(caller).to_string(),
            indoc! {"
                fn main(idx: int32, x: *int32) {
                    add(idx, &t, x[idx], 2);
                }"}
        );
    }

    #[test]
    fn map_helpers_capturing_arrays_take_the_index() {
        let mut ast = Ast::new();
        let v = ast.identifier("v");
        let w = ast.identifier("w");
        let zero = ast.integer(0);
        let first = ast.array_ref(w, zero);
        let sum = ast.binary(BinaryOperatorKind::Add, v, first);
        let map = ast.map("map", &["v"], vec![sum]);
        let pipeline = ast.pipeline(&["x"], vec![map], &["y"]);
        let arguments = vec![
            ast.declaration(&[(Int32, true)], "x", None),
            ast.declaration(&[(Int32, true)], "w", None),
        ];
        let returns = vec![ast.declaration(&[(Int32, true)], "y", None)];
        ast.push_function("f", returns, arguments, vec![pipeline], false);

        let signatures = lower_up_to_arguments(&mut ast);

        assert!(signatures["anon0"].takes_index);
        assert_eq!(
            ast.to_string(),
            indoc! {"
                generated fn anon0(idx: int32, v: int32, w: *int32) -> (return: int32) {
                    return = v + w[0];
                }

                fn f(idx: int32, y: *int32, x: *int32, w: *int32) {
                    let _t0: int32;
                    _t0 = anon0(idx, x[idx], w);
                    y[idx] = _t0;
                }"}
        );
    }

    /// `g(x: [int32]) -> (r: [int32]) { r = x; }`
    fn push_copy_kernel(ast: &mut Ast) {
        let x = ast.identifier("x");
        let statement = ast.assign(&["r"], x);
        let arguments = vec![ast.declaration(&[(Int32, true)], "x", None)];
        let returns = vec![ast.declaration(&[(Int32, true)], "r", None)];
        ast.push_function("g", returns, arguments, vec![statement], false);
    }

    #[test]
    fn array_outputs_go_straight_to_the_callers_buffer() {
        let mut ast = Ast::new();
        push_copy_kernel(&mut ast);

        let x = ast.identifier("x");
        let call = ast.call("g", vec![x]);
        let statement = ast.assign(&["y"], call);
        let arguments = vec![ast.declaration(&[(Int32, true)], "x", None)];
        let returns = vec![ast.declaration(&[(Int32, true)], "y", None)];
        let caller = ast.push_function("f", returns, arguments, vec![statement], false);

        let signatures = rewrite_program(&mut ast).unwrap();

        assert_eq!(signatures["g"].array_parameters, vec![false, true, true]);
        assert_eq!(
            ast.display(caller).to_string(),
            indoc! {"
                fn f(idx: int32, y: *int32, x: *int32) {
                    g(idx, y, x);
                }"}
        );
    }

    #[test]
    fn array_outputs_into_locals_are_rejected() {
        let mut ast = Ast::new();
        push_copy_kernel(&mut ast);

        let x = ast.identifier("x");
        let call = ast.call("g", vec![x]);
        let first = ast.assign(&["t"], call);
        let t = ast.identifier("t");
        let second = ast.assign(&["y"], t);
        let arguments = vec![ast.declaration(&[(Int32, true)], "x", None)];
        let returns = vec![ast.declaration(&[(Int32, true)], "y", None)];
        ast.push_function("f", returns, arguments, vec![first, second], false);

        let error = rewrite_program(&mut ast).unwrap_err();

        assert_eq!(
            error.kind,
            ErrorKind::UnbufferedArrayOutput {
                callee: "g".into(),
                target: "t".into(),
            }
        );
    }

    #[test]
    fn scalar_outputs_into_arrays_take_the_element_address() {
        let mut ast = Ast::new();
        let a = ast.identifier("a");
        let b = ast.identifier("b");
        let sum = ast.binary(BinaryOperatorKind::Add, a, b);
        let statement = ast.assign(&["s"], sum);
        let arguments = vec![
            ast.declaration(&[(Int32, false)], "a", None),
            ast.declaration(&[(Int32, false)], "b", None),
        ];
        let returns = vec![ast.declaration(&[(Int32, false)], "s", None)];
        ast.push_function("add", returns, arguments, vec![statement], false);

        let x = ast.identifier("x");
        let two = ast.integer(2);
        let call = ast.call("add", vec![x, two]);
        let statement = ast.assign(&["y"], call);
        let arguments = vec![ast.declaration(&[(Int32, true)], "x", None)];
        let returns = vec![ast.declaration(&[(Int32, true)], "y", None)];
        let caller = ast.push_function("main", returns, arguments, vec![statement], false);

        rewrite_program(&mut ast).unwrap();

        assert_eq!(
            ast.display(caller).to_string(),
            indoc! {"
                fn main(idx: int32, y: *int32, x: *int32) {
                    add(idx, &y[idx], x[idx], 2);
                }"}
        );
    }
}
