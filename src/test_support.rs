use std::sync::Once;

use crate::middle::{
    ast::{Ast, BinaryOperatorKind, NodeId, NodeKind},
    primitive::PrimitiveKind::Int32,
};

static TRACING_INIT: Once = Once::new();

/// Prints pass logs while testing. Enable with `RUST_LOG=gpilerc=trace`.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{EnvFilter, fmt, prelude::*};

        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::registry()
                .with(fmt::layer().with_test_writer())
                .with(EnvFilter::from_default_env())
                .init();
        }
    });
}

/// ```text
/// fn f(x: [int32]) -> (y: [int32]) {
///     x :: map(v: v * 2) > y;
/// }
/// ```
pub fn doubling_program() -> Ast {
    let mut ast = Ast::new();

    let v = ast.identifier("v");
    let two = ast.integer(2);
    let double = ast.binary(BinaryOperatorKind::Multiply, v, two);
    let map = ast.map("map", &["v"], vec![double]);
    let pipeline = ast.pipeline(&["x"], vec![map], &["y"]);

    let arguments = vec![ast.declaration(&[(Int32, true)], "x", None)];
    let returns = vec![ast.declaration(&[(Int32, true)], "y", None)];
    ast.push_function("f", returns, arguments, vec![pipeline], false);

    ast
}

/// ```text
/// fn f(n: int32, arr: [int32]) -> (out: [int32]) {
///     x = n + 1;
///     arr :: map(v: v + x) > out;
/// }
/// ```
pub fn offset_program() -> Ast {
    let mut ast = Ast::new();

    let n = ast.identifier("n");
    let one = ast.integer(1);
    let increment = ast.binary(BinaryOperatorKind::Add, n, one);
    let offset = ast.assign(&["x"], increment);

    let v = ast.identifier("v");
    let x = ast.identifier("x");
    let sum = ast.binary(BinaryOperatorKind::Add, v, x);
    let map = ast.map("map", &["v"], vec![sum]);
    let pipeline = ast.pipeline(&["arr"], vec![map], &["out"]);

    let arguments = vec![
        ast.declaration(&[(Int32, false)], "n", None),
        ast.declaration(&[(Int32, true)], "arr", None),
    ];
    let returns = vec![ast.declaration(&[(Int32, true)], "out", None)];
    ast.push_function("f", returns, arguments, vec![offset, pipeline], false);

    ast
}

/// Nodes of the given kind reachable from the root
pub fn find_kind(ast: &Ast, kind: NodeKind) -> Vec<NodeId> {
    ast.descendants(ast.root())
        .into_iter()
        .filter(|id| ast.kind(*id) == kind)
        .collect()
}
