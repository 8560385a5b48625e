//! The tree every pass rewrites.
//!
//! Nodes live in a single arena owned by [`Ast`] and refer to each other by
//! [`NodeId`]. The typed fields of each node kind (e.g. an assignment's
//! `targets` and `value`) are the authoritative structure; [`Node::children`]
//! is a view derived from those fields, so the child list can never disagree
//! with them. Every node also records its parent, which exists purely for
//! upward lookups like "which function encloses this expression". Parent links
//! are maintained by [`Ast::alloc`] and [`Ast::update`]; passes must go through
//! those (or the typed `update_*` helpers) instead of editing fields directly.
//!
//! Nodes are never freed. A node that was removed from the tree simply becomes
//! unreachable from the root and loses its parent link.

use paste::paste;
use strum::EnumDiscriminants;

use crate::{
    error::{LowerError, Result},
    index::{IndexVec, simple_index},
    middle::{primitive::PrimitiveKind, ty::Ty},
};

pub mod build;
pub mod pretty_print;

simple_index! {
    /// Identifies a node within an [`Ast`]
    pub struct NodeId;
}

/// A node coupled with the ID of its parent. The root block and detached
/// nodes have no parent.
#[derive(Debug, Clone)]
pub struct ParentedNode {
    pub parent: Option<NodeId>,
    pub node: Node,
}

#[derive(Debug, Clone, PartialEq, EnumDiscriminants)]
#[strum_discriminants(name(NodeKind), derive(Hash, strum::Display))]
pub enum Node {
    Block(Block),
    Identifier(Identifier),
    Type(Type),
    Integer(i64),
    Double(f64),
    BinaryOperator(BinaryOperator),
    Unary(Unary),
    Select(Select),
    ArrayRef(ArrayRef),
    Call(Call),
    Map(Map),
    Zip(Zip),
    PipeLine(PipeLine),
    VariableDeclaration(VariableDeclaration),
    Assignment(Assignment),
    FunctionDeclaration(FunctionDeclaration),
}

/// An ordered list of statements. The root of the program is a block of
/// function declarations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    pub statements: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Identifier {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Type {
    pub primitive: PrimitiveKind,
    pub is_array: bool,
    pub is_pointer: bool,
}

impl Type {
    pub fn ty(&self) -> Ty {
        Ty {
            is_array: self.is_array,
            is_pointer: self.is_pointer,
            ..self.primitive.ty()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryOperator {
    pub operator: BinaryOperatorKind,
    pub lhs: NodeId,
    pub rhs: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperatorKind {
    Add,                  // +
    Subtract,             // -
    Multiply,             // *
    Divide,               // /
    Equals,               // ==
    NotEquals,            // !=
    LessThan,             // <
    LessThanOrEqualTo,    // <=
    GreaterThan,          // >
    GreaterThanOrEqualTo, // >=
}

impl BinaryOperatorKind {
    pub fn is_comparison(self) -> bool {
        match self {
            Self::Add | Self::Subtract | Self::Multiply | Self::Divide => false,
            Self::Equals
            | Self::NotEquals
            | Self::LessThan
            | Self::LessThanOrEqualTo
            | Self::GreaterThan
            | Self::GreaterThanOrEqualTo => true,
        }
    }
}

impl core::fmt::Display for BinaryOperatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Add => write!(f, "+"),
            Self::Subtract => write!(f, "-"),
            Self::Multiply => write!(f, "*"),
            Self::Divide => write!(f, "/"),
            Self::Equals => write!(f, "=="),
            Self::NotEquals => write!(f, "!="),
            Self::LessThan => write!(f, "<"),
            Self::LessThanOrEqualTo => write!(f, "<="),
            Self::GreaterThan => write!(f, ">"),
            Self::GreaterThanOrEqualTo => write!(f, ">="),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Unary {
    pub operator: UnaryOperatorKind,
    pub operand: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperatorKind {
    AddressOf, // &
    Deref,     // *
}

impl core::fmt::Display for UnaryOperatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AddressOf => write!(f, "&"),
            Self::Deref => write!(f, "*"),
        }
    }
}

/// `condition ? positive : negative`
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub condition: NodeId,
    pub positive: NodeId,
    pub negative: NodeId,
}

/// `array[index]`
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayRef {
    pub array: NodeId,
    pub index: NodeId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub function: NodeId,
    pub arguments: Vec<NodeId>,
}

/// A single pipeline stage, e.g. `map(v: v * 2)` or `filter(v: v > 0)`.
///
/// Before pipeline expansion only `name`, `variables` and `expressions` are
/// set. Expansion hoists the expressions into a generated function whose name
/// is stored in `anon_name`, records the value flowing into the stage as
/// `input`, and lists every name the body reads from the enclosing function in
/// `captures`.
#[derive(Debug, Clone, PartialEq)]
pub struct Map {
    pub name: NodeId,
    pub variables: Vec<NodeId>,
    pub expressions: Vec<NodeId>,
    pub input: Option<NodeId>,
    pub captures: Vec<NodeId>,
    pub anon_name: Option<String>,
}

/// Several sources combined into one multi-valued value
#[derive(Debug, Clone, PartialEq)]
pub struct Zip {
    pub sources: Vec<NodeId>,
}

/// `a, b :: map(...) :: filter(...) > c, d`
#[derive(Debug, Clone, PartialEq)]
pub struct PipeLine {
    pub sources: Vec<NodeId>,
    pub chain: Vec<NodeId>,
    pub destinations: Vec<NodeId>,
}

/// Declares `id` with one type per value it holds
#[derive(Debug, Clone, PartialEq)]
pub struct VariableDeclaration {
    pub types: Vec<NodeId>,
    pub id: NodeId,
    pub initializer: Option<NodeId>,
}

/// `targets = value`. Targets are identifiers, or a single element store
/// (`a[i]` or `*p`).
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub targets: Vec<NodeId>,
    pub value: NodeId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDeclaration {
    pub id: NodeId,
    /// Named return values, all variable declarations
    pub returns: Vec<NodeId>,
    /// All variable declarations
    pub arguments: Vec<NodeId>,
    pub body: NodeId,
    /// Set on helpers synthesized by a pass. Only functions without this flag
    /// are exposed to the runtime as kernels.
    pub is_generated: bool,
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        self.into()
    }

    /// Every node owned by this one, in field order
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            Node::Block(Block { statements }) => statements.clone(),
            Node::Identifier(_) | Node::Type(_) | Node::Integer(_) | Node::Double(_) => vec![],
            Node::BinaryOperator(BinaryOperator { lhs, rhs, .. }) => vec![*lhs, *rhs],
            Node::Unary(Unary { operand, .. }) => vec![*operand],
            Node::Select(Select {
                condition,
                positive,
                negative,
            }) => vec![*condition, *positive, *negative],
            Node::ArrayRef(ArrayRef { array, index }) => vec![*array, *index],
            Node::Call(Call {
                function,
                arguments,
            }) => core::iter::once(*function)
                .chain(arguments.iter().copied())
                .collect(),
            Node::Map(Map {
                name,
                variables,
                expressions,
                input,
                captures,
                ..
            }) => core::iter::once(*name)
                .chain(variables.iter().copied())
                .chain(expressions.iter().copied())
                .chain(*input)
                .chain(captures.iter().copied())
                .collect(),
            Node::Zip(Zip { sources }) => sources.clone(),
            Node::PipeLine(PipeLine {
                sources,
                chain,
                destinations,
            }) => sources
                .iter()
                .chain(chain)
                .chain(destinations)
                .copied()
                .collect(),
            Node::VariableDeclaration(VariableDeclaration {
                types,
                id,
                initializer,
            }) => types
                .iter()
                .copied()
                .chain(core::iter::once(*id))
                .chain(*initializer)
                .collect(),
            Node::Assignment(Assignment { targets, value }) => targets
                .iter()
                .copied()
                .chain(core::iter::once(*value))
                .collect(),
            Node::FunctionDeclaration(FunctionDeclaration {
                id,
                returns,
                arguments,
                body,
                ..
            }) => core::iter::once(*id)
                .chain(returns.iter().copied())
                .chain(arguments.iter().copied())
                .chain(core::iter::once(*body))
                .collect(),
        }
    }

    /// Mutable access to every child slot, in the same order as
    /// [`Node::children`]
    fn child_slots_mut(&mut self) -> Vec<&mut NodeId> {
        match self {
            Node::Block(Block { statements }) => statements.iter_mut().collect(),
            Node::Identifier(_) | Node::Type(_) | Node::Integer(_) | Node::Double(_) => vec![],
            Node::BinaryOperator(BinaryOperator { lhs, rhs, .. }) => vec![lhs, rhs],
            Node::Unary(Unary { operand, .. }) => vec![operand],
            Node::Select(Select {
                condition,
                positive,
                negative,
            }) => vec![condition, positive, negative],
            Node::ArrayRef(ArrayRef { array, index }) => vec![array, index],
            Node::Call(Call {
                function,
                arguments,
            }) => core::iter::once(function)
                .chain(arguments.iter_mut())
                .collect(),
            Node::Map(Map {
                name,
                variables,
                expressions,
                input,
                captures,
                ..
            }) => core::iter::once(name)
                .chain(variables.iter_mut())
                .chain(expressions.iter_mut())
                .chain(input.iter_mut())
                .chain(captures.iter_mut())
                .collect(),
            Node::Zip(Zip { sources }) => sources.iter_mut().collect(),
            Node::PipeLine(PipeLine {
                sources,
                chain,
                destinations,
            }) => sources
                .iter_mut()
                .chain(chain.iter_mut())
                .chain(destinations.iter_mut())
                .collect(),
            Node::VariableDeclaration(VariableDeclaration {
                types,
                id,
                initializer,
            }) => types
                .iter_mut()
                .chain(core::iter::once(id))
                .chain(initializer.iter_mut())
                .collect(),
            Node::Assignment(Assignment { targets, value }) => targets
                .iter_mut()
                .chain(core::iter::once(value))
                .collect(),
            Node::FunctionDeclaration(FunctionDeclaration {
                id,
                returns,
                arguments,
                body,
                ..
            }) => core::iter::once(id)
                .chain(returns.iter_mut())
                .chain(arguments.iter_mut())
                .chain(core::iter::once(body))
                .collect(),
        }
    }
}

/// The whole program: an arena of nodes plus the root block holding the top
/// level function declarations.
#[derive(Debug, Clone)]
pub struct Ast {
    nodes: IndexVec<NodeId, ParentedNode>,
    root: NodeId,
}

impl Default for Ast {
    fn default() -> Self {
        Self::new()
    }
}

impl Ast {
    /// Creates a program with an empty root block
    pub fn new() -> Self {
        let mut nodes = IndexVec::new();
        let root = nodes.push(ParentedNode {
            parent: None,
            node: Node::Block(Block::default()),
        });

        Self { nodes, root }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id].node
    }

    pub fn kind(&self, id: NodeId) -> NodeKind {
        self.nodes[id].node.kind()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes[id].node.children()
    }

    /// Adds a node to the arena and adopts all of its children
    pub fn alloc(&mut self, node: Node) -> NodeId {
        let children = node.children();
        let id = self.nodes.push(ParentedNode { parent: None, node });

        for child in children {
            self.nodes[child].parent = Some(id);
        }

        id
    }

    /// Runs `f` on the node and then re-links children: nodes no longer
    /// referenced by any field lose their parent, and every current child is
    /// adopted. This keeps the typed fields, the child view and the parent
    /// links in agreement after any field replacement.
    pub fn update<R>(&mut self, id: NodeId, f: impl FnOnce(&mut Node) -> R) -> R {
        let before = self.nodes[id].node.children();
        let result = f(&mut self.nodes[id].node);
        let after = self.nodes[id].node.children();

        for child in before {
            if !after.contains(&child) && self.nodes[child].parent == Some(id) {
                self.nodes[child].parent = None;
            }
        }

        for child in after {
            self.nodes[child].parent = Some(id);
        }

        result
    }

    /// Replaces every slot of `parent` holding `old` with `new`. Returns false
    /// if `old` is not a child of `parent`.
    pub fn replace_child(&mut self, parent: NodeId, old: NodeId, new: NodeId) -> bool {
        self.update(parent, |node| {
            let mut replaced = false;

            for slot in node.child_slots_mut() {
                if *slot == old {
                    *slot = new;
                    replaced = true;
                }
            }

            replaced
        })
    }

    /// Copies the subtree rooted at `id`. Every node of the copy is freshly
    /// allocated, so mutating the copy never affects the original. The copy is
    /// detached (has no parent) until it is placed somewhere.
    pub fn deep_clone(&mut self, id: NodeId) -> NodeId {
        let mut node = self.nodes[id].node.clone();

        for slot in node.child_slots_mut() {
            *slot = self.deep_clone(*slot);
        }

        self.alloc(node)
    }

    /// `id` and everything below it, in pre-order
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = vec![];
        let mut stack = vec![id];

        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(self.children(node).into_iter().rev());
        }

        out
    }

    /// True if `ancestor` is `node` or lies on the parent chain above it
    pub fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);

        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }

        false
    }

    /// Finds the function declaration owning `id` (or `id` itself if it is a
    /// function declaration)
    #[track_caller]
    pub fn enclosing_function(&self, id: NodeId) -> Result<NodeId> {
        let mut current = Some(id);

        while let Some(node) = current {
            if self.kind(node) == NodeKind::FunctionDeclaration {
                return Ok(node);
            }
            current = self.parent(node);
        }

        Err(crate::error::ErrorKind::DetachedNode(self.kind(id)).into())
    }

    /// Checks that every node reachable from the root is the parent of each of
    /// its children
    pub fn parent_links_consistent(&self) -> bool {
        let mut stack = vec![self.root];

        while let Some(id) = stack.pop() {
            for child in self.children(id) {
                if self.parent(child) != Some(id) {
                    return false;
                }
                stack.push(child);
            }
        }

        true
    }
}

macro_rules! node_accessors {
    ($($variant:ident),* $(,)?) => {
        paste! {
            impl Ast {
                $(
                    #[doc = concat!("Borrows the node as a [`", stringify!($variant), "`]")]
                    #[track_caller]
                    pub fn [<as_ $variant:snake>](&self, id: NodeId) -> Result<&$variant> {
                        match &self.nodes[id].node {
                            Node::$variant(inner) => Ok(inner),
                            other => Err(LowerError::unexpected(other.kind(), stringify!($variant))),
                        }
                    }

                    #[doc = concat!("Mutates the node as a [`", stringify!($variant), "`] and re-links its children")]
                    #[track_caller]
                    pub fn [<update_ $variant:snake>]<R>(
                        &mut self,
                        id: NodeId,
                        f: impl FnOnce(&mut $variant) -> R,
                    ) -> Result<R> {
                        self.update(id, |node| match node {
                            Node::$variant(inner) => Ok(f(inner)),
                            other => Err(other.kind()),
                        })
                        .map_err(|found| LowerError::unexpected(found, stringify!($variant)))
                    }
                )*
            }
        }
    };
}

node_accessors!(
    Block,
    Identifier,
    Type,
    BinaryOperator,
    Unary,
    Select,
    ArrayRef,
    Call,
    Map,
    Zip,
    PipeLine,
    VariableDeclaration,
    Assignment,
    FunctionDeclaration,
);

/* Convenience lookups used by every pass */

impl Ast {
    #[track_caller]
    pub fn identifier_name(&self, id: NodeId) -> Result<&str> {
        Ok(&self.as_identifier(id)?.name)
    }

    #[track_caller]
    pub fn function_name(&self, function: NodeId) -> Result<&str> {
        self.identifier_name(self.as_function_declaration(function)?.id)
    }

    #[track_caller]
    pub fn declaration_name(&self, declaration: NodeId) -> Result<&str> {
        self.identifier_name(self.as_variable_declaration(declaration)?.id)
    }

    /// Top level function declarations in program order
    pub fn functions(&self) -> Vec<NodeId> {
        match self.node(self.root) {
            Node::Block(block) => block
                .statements
                .iter()
                .copied()
                .filter(|id| self.kind(*id) == NodeKind::FunctionDeclaration)
                .collect(),
            _ => vec![],
        }
    }

    pub fn find_function(&self, name: &str) -> Option<NodeId> {
        self.functions()
            .into_iter()
            .find(|function| self.function_name(*function).is_ok_and(|n| n == name))
    }

    pub fn statements(&self, block: NodeId) -> Result<Vec<NodeId>> {
        Ok(self.as_block(block)?.statements.clone())
    }

    pub fn body_statements(&self, function: NodeId) -> Result<Vec<NodeId>> {
        self.statements(self.as_function_declaration(function)?.body)
    }

    pub fn insert_statement(&mut self, block: NodeId, index: usize, statement: NodeId) -> Result<()> {
        self.update_block(block, |block| block.statements.insert(index, statement))
    }

    pub fn push_statement(&mut self, block: NodeId, statement: NodeId) -> Result<()> {
        self.update_block(block, |block| block.statements.push(statement))
    }

    pub fn remove_statement(&mut self, block: NodeId, index: usize) -> Result<NodeId> {
        self.update_block(block, |block| block.statements.remove(index))
    }

    /// Inserts `replacements` immediately before the statement at `index` and
    /// then erases it. Returns the number of inserted statements.
    pub fn replace_statement(
        &mut self,
        block: NodeId,
        index: usize,
        replacements: Vec<NodeId>,
    ) -> Result<usize> {
        let count = replacements.len();

        self.update_block(block, |block| {
            block.statements.splice(index..=index, replacements);
        })?;

        Ok(count)
    }

    /// Collects every identifier node whose value the given node reads. Names
    /// being written (plain assignment targets, declared ids) are excluded, as
    /// are function names in calls. An expanded map only reads its input and
    /// captures; an unexpanded one reads whatever its body uses besides its
    /// bound variables.
    pub fn id_refs(&self, id: NodeId) -> Vec<NodeId> {
        let mut refs = vec![];
        self.collect_id_refs(id, &mut refs);
        refs
    }

    fn collect_id_refs(&self, id: NodeId, refs: &mut Vec<NodeId>) {
        match self.node(id) {
            Node::Identifier(_) => refs.push(id),
            Node::Type(_) | Node::Integer(_) | Node::Double(_) => {}
            Node::Block(Block { statements }) => {
                for statement in statements {
                    self.collect_id_refs(*statement, refs);
                }
            }
            Node::BinaryOperator(BinaryOperator { lhs, rhs, .. }) => {
                self.collect_id_refs(*lhs, refs);
                self.collect_id_refs(*rhs, refs);
            }
            Node::Unary(Unary { operand, .. }) => self.collect_id_refs(*operand, refs),
            Node::Select(Select {
                condition,
                positive,
                negative,
            }) => {
                self.collect_id_refs(*condition, refs);
                self.collect_id_refs(*positive, refs);
                self.collect_id_refs(*negative, refs);
            }
            Node::ArrayRef(ArrayRef { array, index }) => {
                self.collect_id_refs(*array, refs);
                self.collect_id_refs(*index, refs);
            }
            Node::Call(Call { arguments, .. }) => {
                for argument in arguments {
                    self.collect_id_refs(*argument, refs);
                }
            }
            Node::Map(map) => {
                if let Some(input) = map.input {
                    self.collect_id_refs(input, refs);
                }

                if map.anon_name.is_some() {
                    refs.extend(map.captures.iter().copied());
                } else {
                    let bound = map
                        .variables
                        .iter()
                        .filter_map(|v| self.identifier_name(*v).ok())
                        .collect::<Vec<_>>();

                    for expression in &map.expressions {
                        for reference in self.id_refs(*expression) {
                            if self
                                .identifier_name(reference)
                                .is_ok_and(|name| !bound.contains(&name))
                            {
                                refs.push(reference);
                            }
                        }
                    }
                }
            }
            Node::Zip(Zip { sources }) => refs.extend(sources.iter().copied()),
            Node::PipeLine(PipeLine { sources, chain, .. }) => {
                refs.extend(sources.iter().copied());
                for map in chain {
                    self.collect_id_refs(*map, refs);
                }
            }
            Node::VariableDeclaration(VariableDeclaration { initializer, .. }) => {
                if let Some(initializer) = initializer {
                    self.collect_id_refs(*initializer, refs);
                }
            }
            Node::Assignment(Assignment { targets, value }) => {
                for target in targets {
                    // Element stores read the base pointer and the index
                    if self.kind(*target) != NodeKind::Identifier {
                        self.collect_id_refs(*target, refs);
                    }
                }
                self.collect_id_refs(*value, refs);
            }
            Node::FunctionDeclaration(FunctionDeclaration { body, .. }) => {
                self.collect_id_refs(*body, refs)
            }
        }
    }

    /// Names written by a statement: the plain identifier targets of an
    /// assignment or the destinations of a pipeline. Declarations only
    /// introduce a name and write nothing.
    pub fn assigned_names(&self, statement: NodeId) -> Vec<String> {
        match self.node(statement) {
            Node::Assignment(assignment) => assignment
                .targets
                .iter()
                .filter_map(|target| self.identifier_name(*target).ok())
                .map(str::to_owned)
                .collect(),
            Node::PipeLine(pipeline) => pipeline
                .destinations
                .iter()
                .filter_map(|target| self.identifier_name(*target).ok())
                .map(str::to_owned)
                .collect(),
            _ => vec![],
        }
    }
}
