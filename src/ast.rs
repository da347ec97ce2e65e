//! This module defines the tree produced by the reader and the runtime values
//! produced by the evaluator. The tree type, [`Node`], keeps atoms as raw
//! tokens; what a token means (boolean literal, number, identifier) is decided
//! at evaluation time. The value type, [`Value`], is a closed union of numbers,
//! booleans and procedures, and its `Display` implementation is the printable
//! form handed to collaborators. Ergonomic helpers such as [`atom`], [`list`]
//! and [`val`] keep tree and value construction short in tests.

use std::fmt;
use std::rc::Rc;

use crate::Error;
use crate::builtinops::Arity;
use crate::evaluator::Environment;

/// Type alias for number values in interpreter
pub type NumberType = i64;

/// Reserved token for the true boolean literal
pub const TRUE_TOKEN: &str = "#t";
/// Reserved token for the false boolean literal
pub const FALSE_TOKEN: &str = "#f";

/// A parsed s-expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// A whitespace/paren-delimited token, kept verbatim
    Atom(String),
    /// A parenthesized sequence of nodes (possibly empty)
    List(Vec<Node>),
}

impl Node {
    /// The token of an atom, `None` for lists
    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Node::Atom(token) => Some(token),
            Node::List(_) => None,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Atom(token) => write!(f, "{token}"),
            Node::List(children) => {
                write!(f, "(")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{child}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Native implementation of a builtin procedure.
///
/// Arguments arrive already evaluated and already arity-checked against the
/// [`Arity`] stored next to the function.
pub type BuiltinFn = fn(&[Value]) -> Result<Value, Error>;

/// A user-defined procedure created by `(define (name params...) body)`
pub struct Lambda {
    pub name: String,
    pub params: Vec<String>,
    pub body: Node,
    /// Environment active at definition time, shared with everything else
    /// defined in the same scope
    pub env: Environment,
}

impl fmt::Debug for Lambda {
    // The captured environment is omitted: it usually contains this lambda.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lambda")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}

/// A callable value
#[derive(Clone)]
pub enum Procedure {
    /// Primitive operation implemented in Rust
    Builtin {
        name: String,
        arity: Arity,
        func: BuiltinFn,
    },
    /// Closure over its defining environment
    Lambda(Rc<Lambda>),
}

impl Procedure {
    pub fn name(&self) -> &str {
        match self {
            Procedure::Builtin { name, .. } => name,
            Procedure::Lambda(lambda) => &lambda.name,
        }
    }
}

impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Procedure::Builtin { name, arity, .. } => write!(f, "Builtin({name}, {arity:?})"),
            Procedure::Lambda(lambda) => write!(f, "{lambda:?}"),
        }
    }
}

impl PartialEq for Procedure {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            // Compare builtins by name, not function pointer
            (Procedure::Builtin { name: a, .. }, Procedure::Builtin { name: b, .. }) => a == b,
            (Procedure::Lambda(a), Procedure::Lambda(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Runtime value produced by evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Numbers (integers only)
    Number(NumberType),
    Bool(bool),
    Procedure(Procedure),
}

impl Value {
    /// Kind name used in error messages and environment listings
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Bool(_) => "boolean",
            Value::Procedure(Procedure::Builtin { .. }) => "builtin",
            Value::Procedure(Procedure::Lambda(_)) => "procedure",
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Value {
            fn from(n: $int_type) -> Self {
                Value::Number(NumberType::from(n))
            }
        }
    };
}

impl_from_integer!(i8);
impl_from_integer!(i16);
impl_from_integer!(i32);
impl_from_integer!(NumberType);
impl_from_integer!(u8);
impl_from_integer!(u16);
impl_from_integer!(u32);

impl TryFrom<Value> for NumberType {
    type Error = Error;

    fn try_from(value: Value) -> Result<NumberType, Error> {
        match value {
            Value::Number(n) => Ok(n),
            other => Err(Error::TypeMismatch(format!(
                "expected number, found {} {other}",
                other.type_name()
            ))),
        }
    }
}

impl TryFrom<Value> for bool {
    type Error = Error;

    fn try_from(value: Value) -> Result<bool, Error> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(Error::TypeMismatch(format!(
                "expected boolean, found {} {other}",
                other.type_name()
            ))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{}", if *b { TRUE_TOKEN } else { FALSE_TOKEN }),
            Value::Procedure(Procedure::Builtin { name, .. }) => write!(f, "#<builtin:{name}>"),
            Value::Procedure(Procedure::Lambda(lambda)) => write!(
                f,
                "#<procedure {} ({}) {}>",
                lambda.name,
                lambda.params.join(" "),
                lambda.body
            ),
        }
    }
}

/// Helper function for creating atoms
pub fn atom<S: AsRef<str>>(token: S) -> Node {
    Node::Atom(token.as_ref().to_owned())
}

/// Helper function for creating list nodes
pub fn list<I: IntoIterator<Item = Node>>(children: I) -> Node {
    Node::List(children.into_iter().collect())
}

/// Helper function for creating Values from Rust literals
pub fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_lambda() -> Rc<Lambda> {
        Rc::new(Lambda {
            name: "square".into(),
            params: vec!["n".into()],
            body: list([atom("*"), atom("n"), atom("n")]),
            env: Environment::new(),
        })
    }

    #[test]
    fn test_node_display() {
        let test_cases = vec![
            (atom("foo"), "foo"),
            (atom("-42"), "-42"),
            (list([]), "()"),
            (list([atom("+"), atom("1"), atom("2")]), "(+ 1 2)"),
            (
                list([atom("a"), list([atom("b"), list([])]), atom("c")]),
                "(a (b ()) c)",
            ),
        ];

        for (node, expected) in test_cases {
            assert_eq!(format!("{node}"), expected);
        }
    }

    #[test]
    fn test_value_display() {
        let builtin = Value::Procedure(Procedure::Builtin {
            name: "+".into(),
            arity: Arity::AtLeast(2),
            func: |_| Ok(Value::Number(0)),
        });

        let test_cases = vec![
            (val(42), "42"),
            (val(-7), "-7"),
            (val(true), "#t"),
            (val(false), "#f"),
            (builtin, "#<builtin:+>"),
            (
                Value::Procedure(Procedure::Lambda(sample_lambda())),
                "#<procedure square (n) (* n n)>",
            ),
        ];

        for (value, expected) in test_cases {
            assert_eq!(format!("{value}"), expected);
        }
    }

    #[test]
    fn test_value_equality() {
        let lambda = sample_lambda();
        let same = Value::Procedure(Procedure::Lambda(Rc::clone(&lambda)));
        let other = Value::Procedure(Procedure::Lambda(sample_lambda()));

        assert_eq!(val(5), val(5));
        assert_ne!(val(5), val(6));
        assert_ne!(val(1), val(true));
        assert_eq!(same, Value::Procedure(Procedure::Lambda(lambda)));
        // Structurally identical closures are still distinct procedures
        assert_ne!(same, other);
    }

    #[test]
    fn test_type_names_and_conversions() {
        assert_eq!(val(1).type_name(), "number");
        assert_eq!(val(true).type_name(), "boolean");
        assert_eq!(NumberType::try_from(val(9)), Ok(9));
        assert_eq!(bool::try_from(val(false)), Ok(false));
        assert!(matches!(
            NumberType::try_from(val(true)),
            Err(Error::TypeMismatch(_))
        ));
        assert!(matches!(bool::try_from(val(0)), Err(Error::TypeMismatch(_))));
    }
}
