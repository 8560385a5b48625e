//! Type inference over the AST.
//!
//! There is no separate type checking phase: types are derived on demand from
//! declarations, and a name that has no binding yet at the point it is used is
//! a fatal error. This doubles as the declaration-before-use check.

use hashbrown::HashMap;

use crate::{
    error::{ErrorKind, LowerError, Result},
    middle::{
        ast::{Ast, Node, NodeId, UnaryOperatorKind},
        ty::{Ty, TypeList, promote},
    },
};

/// Names visible inside one function, plus the return types of the functions
/// it can call
#[derive(Debug, Clone, Default)]
pub struct TypeEnvironment {
    function: String,
    locals: HashMap<String, TypeList>,
    functions: HashMap<String, TypeList>,
}

impl TypeEnvironment {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            ..Default::default()
        }
    }

    /// A fresh scope for another function that can call everything this one
    /// can
    pub fn nested(&self, function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            locals: HashMap::new(),
            functions: self.functions.clone(),
        }
    }

    /// Binds `name` unless it is already bound. Earlier bindings win, which
    /// gives arguments precedence over returns and returns over locals.
    pub fn bind(&mut self, name: impl Into<String>, types: TypeList) -> bool {
        let name = name.into();
        if self.locals.contains_key(&name) {
            return false;
        }

        self.locals.insert(name, types);
        true
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.locals.contains_key(name)
    }

    #[track_caller]
    pub fn lookup(&self, name: &str) -> Result<&TypeList> {
        self.locals
            .get(name)
            .ok_or_else(|| LowerError::unresolved(name, &self.function))
    }

    pub fn define_function(&mut self, name: impl Into<String>, returns: TypeList) {
        self.functions.insert(name.into(), returns);
    }

    #[track_caller]
    pub fn function_returns(&self, name: &str) -> Result<&TypeList> {
        self.functions
            .get(name)
            .ok_or_else(|| ErrorKind::UndefinedFunction(name.to_owned()).into())
    }
}

/// Answers the type list of `id` under `env`
pub fn get_type(ast: &Ast, id: NodeId, env: &TypeEnvironment) -> Result<TypeList> {
    match ast.node(id) {
        Node::Identifier(identifier) => env.lookup(&identifier.name).cloned(),
        Node::Type(ty) => Ok(vec![ty.ty()]),
        Node::Integer(_) => Ok(vec![Ty::INT32]),
        Node::Double(_) => Ok(vec![Ty::FLOAT]),
        Node::BinaryOperator(op) => {
            let lhs = single_type(ast, op.lhs, env)?;
            let rhs = single_type(ast, op.rhs, env)?;

            if op.operator.is_comparison() {
                Ok(vec![Ty::BOOL])
            } else {
                Ok(vec![promote(lhs, rhs)])
            }
        }
        Node::Unary(unary) => {
            let operand = get_type(ast, unary.operand, env)?;

            Ok(match unary.operator {
                UnaryOperatorKind::AddressOf => operand.into_iter().map(Ty::pointer).collect(),
                UnaryOperatorKind::Deref => operand.into_iter().map(Ty::element).collect(),
            })
        }
        Node::Select(select) => {
            let positive = single_type(ast, select.positive, env)?;
            let negative = single_type(ast, select.negative, env)?;

            Ok(vec![promote(positive, negative)])
        }
        Node::ArrayRef(array_ref) => Ok(vec![single_type(ast, array_ref.array, env)?.element()]),
        Node::Call(call) => env
            .function_returns(ast.identifier_name(call.function)?)
            .cloned(),
        Node::Map(map) => match &map.anon_name {
            Some(anon) => env.function_returns(anon).cloned(),
            None => Err(LowerError::unexpected(
                ast.kind(id),
                "map with a generated function",
            )),
        },
        Node::Zip(zip) => {
            let mut types = vec![];
            for source in &zip.sources {
                types.extend(get_type(ast, *source, env)?);
            }
            Ok(types)
        }
        Node::VariableDeclaration(declaration) => declaration
            .types
            .iter()
            .map(|ty| -> Result<Ty> { Ok(ast.as_type(*ty)?.ty()) })
            .collect(),
        Node::Assignment(assignment) => get_type(ast, assignment.value, env),
        Node::FunctionDeclaration(function) => {
            let mut types = vec![];
            for ret in &function.returns {
                types.extend(get_type(ast, *ret, env)?);
            }
            Ok(types)
        }
        Node::Block(_) | Node::PipeLine(_) => Err(LowerError::unexpected(ast.kind(id), "expression")),
    }
}

/// Type of an operand that must hold exactly one value
fn single_type(ast: &Ast, id: NodeId, env: &TypeEnvironment) -> Result<Ty> {
    let types = get_type(ast, id, env)?;

    match types.as_slice() {
        [ty] => Ok(*ty),
        _ => Err(ErrorKind::ArithmeticOnVector {
            expression: ast.display(id).to_string(),
            count: types.len(),
        }
        .into()),
    }
}

/// Builds the environment at the top of a function body: the return types of
/// every other function, then the function's own arguments and returns
pub fn seed_environment(ast: &Ast, function: NodeId) -> Result<TypeEnvironment> {
    let declaration = ast.as_function_declaration(function)?;
    let mut env = TypeEnvironment::new(ast.function_name(function)?);

    for other in ast.functions() {
        if other != function {
            let returns = get_type(ast, other, &env)?;
            env.define_function(ast.function_name(other)?, returns);
        }
    }

    for parameter in declaration.arguments.iter().chain(&declaration.returns) {
        let types = get_type(ast, *parameter, &env)?;
        env.bind(ast.declaration_name(*parameter)?, types);
    }

    Ok(env)
}

/// Records the bindings a body statement introduces. Declarations bind their
/// declared types. Assignments bind any target that has no binding yet, one
/// value per target, or the whole value list when there is a single target.
pub fn apply_bindings(ast: &Ast, statement: NodeId, env: &mut TypeEnvironment) -> Result<()> {
    match ast.node(statement) {
        Node::VariableDeclaration(declaration) => {
            let types = get_type(ast, statement, env)?;
            env.bind(ast.identifier_name(declaration.id)?, types);
        }
        Node::Assignment(assignment) => {
            let types = get_type(ast, assignment.value, env)?;
            let targets = ast.assigned_names(statement);

            if targets.is_empty() {
                return Ok(());
            }

            if targets.len() == 1 {
                env.bind(targets[0].clone(), types);
            } else if targets.len() == types.len() {
                for (target, ty) in targets.into_iter().zip(types) {
                    env.bind(target, vec![ty]);
                }
            } else {
                return Err(LowerError::shape_mismatch(
                    format!("`{}`", ast.display(statement)),
                    targets.len(),
                    types.len(),
                ));
            }
        }
        _ => {}
    }

    Ok(())
}

/// The environment in effect just before the body statement that contains
/// `stop`, or at the end of the body when `stop` is `None` or not in the body
pub fn environment_at(ast: &Ast, function: NodeId, stop: Option<NodeId>) -> Result<TypeEnvironment> {
    let mut env = seed_environment(ast, function)?;

    for statement in ast.body_statements(function)? {
        if stop.is_some_and(|stop| ast.is_ancestor(statement, stop)) {
            break;
        }
        apply_bindings(ast, statement, &mut env)?;
    }

    Ok(env)
}

/// Whole-program type query: the type of `target` given everything bound
/// before the statement it appears in
pub fn type_of(ast: &Ast, target: NodeId) -> Result<TypeList> {
    let function = ast.enclosing_function(target)?;
    let env = environment_at(ast, function, Some(target))?;

    get_type(ast, target, &env)
}

/// The declared type of `name` inside `function`. Arguments are searched
/// first, then returns, then the declarations of the body. With `allow_array`
/// unset the array flag is stripped from the result.
#[track_caller]
pub fn declared_types(ast: &Ast, function: NodeId, name: &str, allow_array: bool) -> Result<TypeList> {
    let declaration = ast.as_function_declaration(function)?;
    let body = ast.statements(declaration.body)?;

    let found = declaration
        .arguments
        .iter()
        .chain(&declaration.returns)
        .chain(&body)
        .find(|candidate| {
            ast.as_variable_declaration(**candidate).is_ok()
                && ast.declaration_name(**candidate).is_ok_and(|n| n == name)
        });

    let Some(found) = found else {
        return Err(LowerError::unresolved(name, ast.function_name(function)?));
    };

    let env = TypeEnvironment::new(ast.function_name(function)?);
    let mut types = get_type(ast, *found, &env)?;

    if !allow_array {
        for ty in &mut types {
            ty.is_array = false;
        }
    }

    Ok(types)
}
