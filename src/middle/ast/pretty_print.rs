//! Source-like rendering of a tree, used in diagnostics, traces and tests.
//!
//! ```text
//! generated fn anon0(v: int32) -> (return: int32) {
//!     return = v * 2;
//! }
//!
//! fn f(idx: int32, y: *int32, x: *int32) {
//!     let _t0: int32;
//!     _t0 = anon0(x[idx]);
//!     y[idx] = _t0;
//! }
//! ```

use core::fmt;

use itertools::Itertools;

use super::*;

const INDENT: &str = "    ";

/// Displays the subtree rooted at a node. Obtained through [`Ast::display`].
pub struct DisplayNode<'a> {
    ast: &'a Ast,
    id: NodeId,
}

impl Ast {
    pub fn display(&self, id: NodeId) -> DisplayNode<'_> {
        DisplayNode { ast: self, id }
    }
}

impl fmt::Display for DisplayNode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let printer = Printer { ast: self.ast };

        if self.id == self.ast.root() {
            let functions = self.ast.children(self.id);
            return write!(
                f,
                "{}",
                functions
                    .into_iter()
                    .map(|function| printer.statement(function, 0))
                    .join("\n\n")
            );
        }

        match self.ast.kind(self.id) {
            NodeKind::FunctionDeclaration
            | NodeKind::VariableDeclaration
            | NodeKind::Assignment
            | NodeKind::PipeLine
            | NodeKind::Block => write!(f, "{}", printer.statement(self.id, 0)),
            _ => write!(f, "{}", printer.expression(self.id)),
        }
    }
}

impl fmt::Display for Ast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display(self.root()))
    }
}

struct Printer<'a> {
    ast: &'a Ast,
}

impl Printer<'_> {
    fn statement(&self, id: NodeId, depth: usize) -> String {
        let indent = INDENT.repeat(depth);

        match self.ast.node(id) {
            Node::FunctionDeclaration(function) => {
                let keyword = if function.is_generated {
                    "generated fn"
                } else {
                    "fn"
                };
                let arguments = function
                    .arguments
                    .iter()
                    .map(|argument| self.parameter(*argument))
                    .join(", ");
                let returns = if function.returns.is_empty() {
                    String::new()
                } else {
                    format!(
                        " -> ({})",
                        function
                            .returns
                            .iter()
                            .map(|ret| self.parameter(*ret))
                            .join(", ")
                    )
                };

                format!(
                    "{indent}{keyword} {}({arguments}){returns} {}",
                    self.expression(function.id),
                    self.statement(function.body, depth)
                )
            }
            Node::Block(block) => {
                let mut out = String::from("{\n");
                for statement in &block.statements {
                    out.push_str(&self.statement(*statement, depth + 1));
                    out.push('\n');
                }
                out.push_str(&indent);
                out.push('}');
                out
            }
            Node::VariableDeclaration(declaration) => {
                let initializer = declaration
                    .initializer
                    .map(|init| format!(" = {}", self.expression(init)))
                    .unwrap_or_default();

                format!("{indent}let {}{initializer};", self.parameter(id))
            }
            Node::Assignment(assignment) => format!(
                "{indent}{} = {};",
                self.list(&assignment.targets),
                self.expression(assignment.value)
            ),
            Node::PipeLine(pipeline) => {
                let stages = pipeline
                    .chain
                    .iter()
                    .map(|stage| format!(" :: {}", self.expression(*stage)))
                    .join("");

                format!(
                    "{indent}{}{stages} > {};",
                    self.list(&pipeline.sources),
                    self.list(&pipeline.destinations)
                )
            }
            _ => format!("{indent}{};", self.expression(id)),
        }
    }

    /// `name: type` or `name: (type, type)`
    fn parameter(&self, id: NodeId) -> String {
        match self.ast.node(id) {
            Node::VariableDeclaration(declaration) => {
                let types = if declaration.types.len() == 1 {
                    self.expression(declaration.types[0])
                } else {
                    format!("({})", self.list(&declaration.types))
                };

                format!("{}: {types}", self.expression(declaration.id))
            }
            _ => self.expression(id),
        }
    }

    fn list(&self, ids: &[NodeId]) -> String {
        ids.iter().map(|id| self.expression(*id)).join(", ")
    }

    /// Renders an operand, parenthesizing anything that is itself an operator
    fn operand(&self, id: NodeId) -> String {
        match self.ast.kind(id) {
            NodeKind::BinaryOperator | NodeKind::Select => format!("({})", self.expression(id)),
            _ => self.expression(id),
        }
    }

    fn expression(&self, id: NodeId) -> String {
        match self.ast.node(id) {
            Node::Identifier(identifier) => identifier.name.clone(),
            Node::Integer(value) => value.to_string(),
            Node::Double(value) => format!("{value:?}"),
            Node::Type(ty) => {
                if ty.is_pointer {
                    format!("*{}", ty.primitive)
                } else if ty.is_array {
                    format!("[{}]", ty.primitive)
                } else {
                    ty.primitive.to_string()
                }
            }
            Node::BinaryOperator(op) => format!(
                "{} {} {}",
                self.operand(op.lhs),
                op.operator,
                self.operand(op.rhs)
            ),
            Node::Unary(unary) => format!("{}{}", unary.operator, self.operand(unary.operand)),
            Node::Select(select) => format!(
                "{} ? {} : {}",
                self.operand(select.condition),
                self.operand(select.positive),
                self.operand(select.negative)
            ),
            Node::ArrayRef(array_ref) => format!(
                "{}[{}]",
                self.operand(array_ref.array),
                self.expression(array_ref.index)
            ),
            Node::Call(call) => format!(
                "{}({})",
                self.expression(call.function),
                self.list(&call.arguments)
            ),
            Node::Map(map) => match &map.anon_name {
                None => format!(
                    "{}({}: {})",
                    self.expression(map.name),
                    self.list(&map.variables),
                    self.list(&map.expressions)
                ),
                Some(anon) => {
                    let input = map.input.map(|i| self.expression(i)).unwrap_or_default();
                    if map.captures.is_empty() {
                        format!("{}<{anon}>({input})", self.expression(map.name))
                    } else {
                        format!(
                            "{}<{anon}>({input}; {})",
                            self.expression(map.name),
                            self.list(&map.captures)
                        )
                    }
                }
            },
            Node::Zip(zip) => format!("zip({})", self.list(&zip.sources)),
            Node::Block(_)
            | Node::PipeLine(_)
            | Node::VariableDeclaration(_)
            | Node::Assignment(_)
            | Node::FunctionDeclaration(_) => self.statement(id, 0),
        }
    }
}
