//! Constructors for every node kind. The front-end uses these to hand a tree
//! to the middle-end, and passes use them to synthesize statements.

use super::*;
use crate::{
    error::{ErrorKind, Result},
    middle::ty::Ty,
};

impl Ast {
    pub fn identifier(&mut self, name: impl Into<String>) -> NodeId {
        self.alloc(Node::Identifier(Identifier { name: name.into() }))
    }

    pub fn identifiers<S: AsRef<str>>(&mut self, names: &[S]) -> Vec<NodeId> {
        names
            .iter()
            .map(|name| self.identifier(name.as_ref()))
            .collect()
    }

    pub fn integer(&mut self, value: i64) -> NodeId {
        self.alloc(Node::Integer(value))
    }

    pub fn double(&mut self, value: f64) -> NodeId {
        self.alloc(Node::Double(value))
    }

    pub fn type_node(&mut self, primitive: PrimitiveKind, is_array: bool) -> NodeId {
        self.alloc(Node::Type(Type {
            primitive,
            is_array,
            is_pointer: false,
        }))
    }

    /// Creates a type node spelling `ty`
    pub fn type_from_ty(&mut self, ty: Ty) -> Result<NodeId> {
        let primitive = ty.primitive().ok_or(ErrorKind::UnspellableType(ty))?;

        Ok(self.alloc(Node::Type(Type {
            primitive,
            is_array: ty.is_array,
            is_pointer: ty.is_pointer,
        })))
    }

    pub fn binary(&mut self, operator: BinaryOperatorKind, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.alloc(Node::BinaryOperator(BinaryOperator { operator, lhs, rhs }))
    }

    pub fn address_of(&mut self, operand: NodeId) -> NodeId {
        self.alloc(Node::Unary(Unary {
            operator: UnaryOperatorKind::AddressOf,
            operand,
        }))
    }

    pub fn deref(&mut self, operand: NodeId) -> NodeId {
        self.alloc(Node::Unary(Unary {
            operator: UnaryOperatorKind::Deref,
            operand,
        }))
    }

    pub fn select(&mut self, condition: NodeId, positive: NodeId, negative: NodeId) -> NodeId {
        self.alloc(Node::Select(Select {
            condition,
            positive,
            negative,
        }))
    }

    pub fn array_ref(&mut self, array: NodeId, index: NodeId) -> NodeId {
        self.alloc(Node::ArrayRef(ArrayRef { array, index }))
    }

    pub fn call(&mut self, function: impl Into<String>, arguments: Vec<NodeId>) -> NodeId {
        let function = self.identifier(function);
        self.alloc(Node::Call(Call {
            function,
            arguments,
        }))
    }

    /// An unexpanded pipeline stage such as `map(v: v * 2)`
    pub fn map<S: AsRef<str>>(&mut self, name: &str, variables: &[S], expressions: Vec<NodeId>) -> NodeId {
        let name = self.identifier(name);
        let variables = self.identifiers(variables);

        self.alloc(Node::Map(Map {
            name,
            variables,
            expressions,
            input: None,
            captures: vec![],
            anon_name: None,
        }))
    }

    pub fn zip(&mut self, sources: Vec<NodeId>) -> NodeId {
        self.alloc(Node::Zip(Zip { sources }))
    }

    pub fn pipeline<S: AsRef<str>>(&mut self, sources: &[S], chain: Vec<NodeId>, destinations: &[S]) -> NodeId {
        let sources = self.identifiers(sources);
        let destinations = self.identifiers(destinations);

        self.alloc(Node::PipeLine(PipeLine {
            sources,
            chain,
            destinations,
        }))
    }

    /// Declares `name` with one `(type, is_array)` pair per value
    pub fn declaration(
        &mut self,
        types: &[(PrimitiveKind, bool)],
        name: impl Into<String>,
        initializer: Option<NodeId>,
    ) -> NodeId {
        let types = types
            .iter()
            .map(|(primitive, is_array)| self.type_node(*primitive, *is_array))
            .collect();
        let id = self.identifier(name);

        self.alloc(Node::VariableDeclaration(VariableDeclaration {
            types,
            id,
            initializer,
        }))
    }

    /// Declares `name` with inferred types
    pub fn declaration_of_types(
        &mut self,
        types: &[Ty],
        name: impl Into<String>,
        initializer: Option<NodeId>,
    ) -> Result<NodeId> {
        let types = types
            .iter()
            .map(|ty| self.type_from_ty(*ty))
            .collect::<Result<Vec<_>>>()?;
        let id = self.identifier(name);

        Ok(self.alloc(Node::VariableDeclaration(VariableDeclaration {
            types,
            id,
            initializer,
        })))
    }

    pub fn assignment(&mut self, targets: Vec<NodeId>, value: NodeId) -> NodeId {
        self.alloc(Node::Assignment(Assignment { targets, value }))
    }

    /// Shorthand for assigning to plain names
    pub fn assign<S: AsRef<str>>(&mut self, targets: &[S], value: NodeId) -> NodeId {
        let targets = self.identifiers(targets);
        self.assignment(targets, value)
    }

    pub fn block(&mut self, statements: Vec<NodeId>) -> NodeId {
        self.alloc(Node::Block(Block { statements }))
    }

    /// Creates a function declaration without placing it in the program
    pub fn function(
        &mut self,
        name: impl Into<String>,
        returns: Vec<NodeId>,
        arguments: Vec<NodeId>,
        statements: Vec<NodeId>,
        is_generated: bool,
    ) -> NodeId {
        let id = self.identifier(name);
        let body = self.block(statements);

        self.alloc(Node::FunctionDeclaration(FunctionDeclaration {
            id,
            returns,
            arguments,
            body,
            is_generated,
        }))
    }

    /// Creates a function declaration and appends it to the program
    pub fn push_function(
        &mut self,
        name: impl Into<String>,
        returns: Vec<NodeId>,
        arguments: Vec<NodeId>,
        statements: Vec<NodeId>,
        is_generated: bool,
    ) -> NodeId {
        let function = self.function(name, returns, arguments, statements, is_generated);
        let root = self.root();

        self.update(root, |node| {
            if let Node::Block(block) = node {
                block.statements.push(function);
            }
        });

        function
    }
}
