use std::rc::Rc;

use tracing::{debug, trace};

use crate::ast::{FALSE_TOKEN, Lambda, Node, Procedure, TRUE_TOKEN, Value};
use crate::builtinops::{Arity, OpKind, find_special_form, get_builtin_ops};
use crate::scheme::parse_number;
use crate::{Error, MAX_EVAL_DEPTH};

pub mod environment;

pub use environment::{Binding, Environment};

/// Position of an evaluation in the nesting of its top-level expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalDepth {
    pub current: usize,
    pub limit: usize,
}

impl EvalDepth {
    fn top_level(limit: usize) -> Self {
        EvalDepth { current: 0, limit }
    }

    /// Depth for an evaluation nested directly inside this one
    pub fn deeper(self) -> Self {
        EvalDepth {
            current: self.current + 1,
            ..self
        }
    }

    fn check(self) -> Result<(), Error> {
        if self.current >= self.limit {
            debug!(limit = self.limit, "evaluation depth exhausted");
            return Err(Error::StackExhausted { limit: self.limit });
        }
        Ok(())
    }
}

/// Evaluate a parsed expression (public API)
pub fn eval(expr: &Node, env: &Environment) -> Result<Value, Error> {
    eval_with_limit(expr, env, MAX_EVAL_DEPTH)
}

/// Evaluate a parsed expression, failing with `StackExhausted` once nesting
/// reaches `limit`
pub fn eval_with_limit(expr: &Node, env: &Environment, limit: usize) -> Result<Value, Error> {
    eval_with_depth_tracking(expr, env, EvalDepth::top_level(limit))
}

/// Ensure sufficient stack space is available before executing `f`.
#[inline]
fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    /// Minimum stack space to keep available (100KB red zone).
    const RED_ZONE: usize = 100 * 1024;

    /// Stack space to allocate when growing (1MB).
    const STACK_PER_RECURSION: usize = 1024 * 1024;

    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}

/// Evaluate an expression with depth tracking to prevent stack overflow
fn eval_with_depth_tracking(
    expr: &Node,
    env: &Environment,
    depth: EvalDepth,
) -> Result<Value, Error> {
    depth.check()?;
    ensure_sufficient_stack(|| match expr {
        Node::Atom(token) => eval_atom(token, env),
        Node::List(elements) => eval_list(elements, env, depth),
    })
}

/// Boolean literal, then numeric literal, then variable lookup
fn eval_atom(token: &str, env: &Environment) -> Result<Value, Error> {
    match token {
        TRUE_TOKEN => Ok(Value::Bool(true)),
        FALSE_TOKEN => Ok(Value::Bool(false)),
        _ => match parse_number(token) {
            Some(n) => Ok(Value::Number(n)),
            None => env
                .get(token)
                .ok_or_else(|| Error::UnknownIdentifier(token.to_owned())),
        },
    }
}

/// Evaluate a list expression (special form or procedure application)
fn eval_list(elements: &[Node], env: &Environment, depth: EvalDepth) -> Result<Value, Error> {
    let [head, operands @ ..] = elements else {
        return Err(Error::EmptyExpression);
    };

    // Special forms are recognized by keyword and get their operands unevaluated
    if let Some(keyword) = head.as_atom()
        && let Some(op) = find_special_form(keyword)
        && let OpKind::SpecialForm(special_form) = op.op_kind
    {
        op.validate_arity(operands.len())?;
        return special_form(operands, env, depth);
    }

    let procedure = match eval_with_depth_tracking(head, env, depth.deeper())? {
        Value::Procedure(procedure) => procedure,
        other => return Err(Error::NotAProcedure(other.to_string())),
    };

    let args = eval_args(operands, env, depth)?;
    apply(&procedure, &args, depth)
}

/// Evaluate argument expressions left to right
fn eval_args(args: &[Node], env: &Environment, depth: EvalDepth) -> Result<Vec<Value>, Error> {
    args.iter()
        .map(|arg| eval_with_depth_tracking(arg, env, depth.deeper()))
        .collect()
}

/// Apply a procedure to already-evaluated arguments
fn apply(procedure: &Procedure, args: &[Value], depth: EvalDepth) -> Result<Value, Error> {
    trace!(procedure = procedure.name(), argc = args.len(), "apply");
    match procedure {
        Procedure::Builtin { name, arity, func } => {
            arity.validate(name, args.len())?;
            func(args)
        }
        Procedure::Lambda(lambda) => {
            Arity::Exact(lambda.params.len()).validate(&lambda.name, args.len())?;

            // Fresh frame per call, child of the captured environment
            let call_env = Environment::with_parent(&lambda.env);
            for (param, arg) in lambda.params.iter().zip(args) {
                call_env.bind(param.clone(), arg.clone());
            }

            eval_with_depth_tracking(&lambda.body, &call_env, depth.deeper())
        }
    }
}

/// Identifier in a binding position: any atom that is not a literal
fn expect_identifier<'a>(form: &str, node: &'a Node) -> Result<&'a str, Error> {
    match node {
        Node::Atom(token)
            if token != TRUE_TOKEN && token != FALSE_TOKEN && parse_number(token).is_none() =>
        {
            Ok(token)
        }
        other => Err(Error::TypeMismatch(format!(
            "{form} requires an identifier, found {other}"
        ))),
    }
}

/// Evaluate define special form
///
/// `(define name expr)` binds the value of `expr`; `(define (name params...) body)`
/// binds a procedure closing over `env`. Either way the bound value is returned.
pub(crate) fn eval_define(
    args: &[Node],
    env: &Environment,
    depth: EvalDepth,
) -> Result<Value, Error> {
    match args {
        [Node::List(signature), body] => {
            let (name_node, param_nodes) = signature.split_first().ok_or_else(|| {
                Error::TypeMismatch("define requires a procedure name, found ()".to_owned())
            })?;
            let name = expect_identifier("define", name_node)?;

            let mut params: Vec<String> = Vec::with_capacity(param_nodes.len());
            for param in param_nodes {
                let param = expect_identifier("define", param)?;
                if params.iter().any(|p| p == param) {
                    return Err(Error::DuplicateDefinition(param.to_owned()));
                }
                params.push(param.to_owned());
            }

            let value = Value::Procedure(Procedure::Lambda(Rc::new(Lambda {
                name: name.to_owned(),
                params,
                body: body.clone(),
                env: env.clone(),
            })));
            env.define(name, value.clone())?;
            debug!(name, "defined procedure");
            Ok(value)
        }
        [target, expr] => {
            let name = expect_identifier("define", target)?;
            let value = eval_with_depth_tracking(expr, env, depth.deeper())?;
            env.define(name, value.clone())?;
            debug!(name, value = %value, "defined variable");
            Ok(value)
        }
        _ => Err(Error::arity_mismatch("define", Arity::Exact(2), args.len())),
    }
}

/// Evaluate set! special form
pub(crate) fn eval_set(args: &[Node], env: &Environment, depth: EvalDepth) -> Result<Value, Error> {
    match args {
        [target, expr] => {
            let name = expect_identifier("set!", target)?;
            let value = eval_with_depth_tracking(expr, env, depth.deeper())?;
            env.set(name, value.clone())?;
            debug!(name, value = %value, "set variable");
            Ok(value)
        }
        _ => Err(Error::arity_mismatch("set!", Arity::Exact(2), args.len())),
    }
}

/// Create a global environment with built-in functions
pub fn create_global_env() -> Environment {
    let env = Environment::new();

    // Special forms are keywords, not values, so only functions are bound
    for builtin_op in get_builtin_ops() {
        if let OpKind::Function(func) = builtin_op.op_kind {
            env.register_builtin_function(builtin_op.id, builtin_op.arity, func);
        }
    }

    env
}
