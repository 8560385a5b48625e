//! Fatal lowering diagnostics
//!
//! The middle-end has no recoverable errors: every pass stops at the first
//! invariant violation it detects and hands a [`LowerError`] back to the
//! driver, which discards the partially rewritten tree.

use std::panic::Location;

use colored::Colorize;
use thiserror::Error;

use crate::middle::{ast::NodeKind, ty::Ty};

pub type Result<T, E = LowerError> = core::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ErrorKind {
    /// A name was not found in any scope visible from the function
    #[error("unresolved name `{name}` in function `{function}`")]
    UnresolvedName { name: String, function: String },
    /// A call or map refers to a function that is not in the program
    #[error("call to undefined function `{0}`")]
    UndefinedFunction(String),
    /// A pass or query was handed a node kind it does not understand
    #[error("unexpected {found} node (expected {expected})")]
    UnexpectedNode {
        found: NodeKind,
        expected: &'static str,
    },
    /// Value and target counts disagree
    #[error("shape mismatch in {context}: expected {expected} value(s), found {found}")]
    ShapeMismatch {
        context: String,
        expected: usize,
        found: usize,
    },
    /// An operator was applied to a multi-valued operand
    #[error("operator applied to {count} values in `{expression}`; only scalars are allowed")]
    ArithmeticOnVector { expression: String, count: usize },
    /// An inferred type has no source-level name to declare it with
    #[error("type {0} cannot be spelled in a declaration")]
    UnspellableType(Ty),
    /// A node that should live inside a function has no enclosing function
    #[error("{0} node is not inside a function declaration")]
    DetachedNode(NodeKind),
    /// Two top level functions share a name
    #[error("function `{0}` is declared more than once")]
    DuplicateFunction(String),
    /// A callee writes an array output element by element, but the caller
    /// stores it in a local that holds a single element
    #[error("array output of `{callee}` is stored in `{target}`, which is not an array argument of the caller")]
    UnbufferedArrayOutput { callee: String, target: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}")]
pub struct LowerError {
    pub kind: ErrorKind,
    /// Where in the compiler the error was raised
    origin: &'static Location<'static>,
}

impl LowerError {
    #[track_caller]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            origin: Location::caller(),
        }
    }

    #[track_caller]
    pub fn unresolved(name: impl Into<String>, function: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnresolvedName {
            name: name.into(),
            function: function.into(),
        })
    }

    #[track_caller]
    pub fn unexpected(found: NodeKind, expected: &'static str) -> Self {
        Self::new(ErrorKind::UnexpectedNode { found, expected })
    }

    #[track_caller]
    pub fn shape_mismatch(context: impl Into<String>, expected: usize, found: usize) -> Self {
        Self::new(ErrorKind::ShapeMismatch {
            context: context.into(),
            expected,
            found,
        })
    }

    pub fn origin(&self) -> &'static Location<'static> {
        self.origin
    }

    /// Renders the diagnostic for a terminal
    pub fn render(&self) -> String {
        let headline = format!("{}: {}", "error".red().bold(), self.kind);

        if cfg!(feature = "error-backtrace") {
            format!(
                "{headline}\n  {} {}",
                "-->".blue(),
                format!("raised at {}", self.origin).white()
            )
        } else {
            headline
        }
    }
}

impl From<ErrorKind> for LowerError {
    #[track_caller]
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}
