//! Built-in operations registry.
//!
//! Every name the language knows before any user code runs is listed once in
//! [`BUILTIN_OPS`], together with its arity and its implementation:
//!
//! ```scheme
//! (+ 1 2 3)          ; arithmetic, left fold from the first argument
//! (< 1 2)            ; numeric comparison
//! (and #t (not #f))  ; boolean logic
//! (define x 5)       ; special form
//! ```
//!
//! ## Functions vs Special Forms
//!
//! - **Functions**: receive all arguments already evaluated (e.g. `+`, `not`).
//!   They are bound as procedure values in the global environment, so they can
//!   be passed around and shadowed like any other value.
//! - **Special Forms**: receive their operands unevaluated (`define`, `set!`).
//!   They are recognized by the keyword in head position and are not values.
//!
//! ## Error Handling
//!
//! - **Type Safety**: operations reject incorrect types (e.g. `(not 42)` errors)
//! - **No Coercion**: numbers never act as booleans and vice versa
//! - **Overflow Detection**: arithmetic reports overflow and division by zero
//! - **Arity Checking**: argument counts are validated before the call

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use crate::Error;
use crate::ast::{BuiltinFn, Node, NumberType, Value};
use crate::evaluator::{EvalDepth, Environment, eval_define, eval_set};

/// Number of arguments an operation accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly n arguments
    Exact(usize),
    /// At least n arguments
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(&self, arg_count: usize) -> bool {
        match *self {
            Arity::Exact(n) => arg_count == n,
            Arity::AtLeast(n) => arg_count >= n,
        }
    }

    /// Check `arg_count`, reporting a mismatch against the named procedure
    pub fn validate(&self, procedure: &str, arg_count: usize) -> Result<(), Error> {
        if self.accepts(arg_count) {
            Ok(())
        } else {
            Err(Error::arity_mismatch(procedure, *self, arg_count))
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
        }
    }
}

/// Special form implementation: unevaluated operands, the environment the
/// form appears in, and the current evaluation depth
pub type SpecialFormFn = fn(&[Node], &Environment, EvalDepth) -> Result<Value, Error>;

/// Represents the implementation of a built-in operation
#[derive(Clone, Copy)]
pub enum OpKind {
    Function(BuiltinFn),
    SpecialForm(SpecialFormFn),
}

impl fmt::Debug for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Function(_) => write!(f, "Function(<fn>)"),
            OpKind::SpecialForm(_) => write!(f, "SpecialForm(<fn>)"),
        }
    }
}

/// Definition of a built-in operation
#[derive(Debug, Clone, Copy)]
pub struct BuiltinOp {
    /// The identifier bound to (or recognized as) this operation
    pub id: &'static str,
    pub op_kind: OpKind,
    pub arity: Arity,
}

impl PartialEq for BuiltinOp {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl BuiltinOp {
    pub fn is_special_form(&self) -> bool {
        matches!(self.op_kind, OpKind::SpecialForm(_))
    }

    pub fn validate_arity(&self, arg_count: usize) -> Result<(), Error> {
        self.arity.validate(self.id, arg_count)
    }
}

//
// Builtin Function Implementations
//

fn expect_number(op: &str, value: &Value) -> Result<NumberType, Error> {
    match value {
        Value::Number(n) => Ok(*n),
        other => Err(Error::TypeMismatch(format!(
            "{op} requires numbers, found {} {other}",
            other.type_name()
        ))),
    }
}

fn expect_bool(op: &str, value: &Value) -> Result<bool, Error> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => Err(Error::TypeMismatch(format!(
            "{op} requires boolean arguments (no truthiness), found {} {other}",
            other.type_name()
        ))),
    }
}

/// Split off the first operand of a left fold; callers have already
/// validated an `AtLeast` arity, so an empty slice only occurs on direct calls.
fn fold_operands<'a>(op: &str, args: &'a [Value]) -> Result<(NumberType, &'a [Value]), Error> {
    match args.split_first() {
        Some((first, rest)) => Ok((expect_number(op, first)?, rest)),
        None => Err(Error::arity_mismatch(op, Arity::AtLeast(2), 0)),
    }
}

// Macro to generate checked left-fold arithmetic functions
macro_rules! arithmetic_fold {
    ($name:ident, $op_str:expr, $checked:ident, $what:expr) => {
        fn $name(args: &[Value]) -> Result<Value, Error> {
            let (mut acc, rest) = fold_operands($op_str, args)?;
            for arg in rest {
                let n = expect_number($op_str, arg)?;
                acc = acc.$checked(n).ok_or_else(|| {
                    Error::ArithmeticError(concat!("integer overflow in ", $what).to_owned())
                })?;
            }
            Ok(Value::Number(acc))
        }
    };
}

arithmetic_fold!(builtin_add, "+", checked_add, "addition");
arithmetic_fold!(builtin_sub, "-", checked_sub, "subtraction");
arithmetic_fold!(builtin_mul, "*", checked_mul, "multiplication");

fn builtin_div(args: &[Value]) -> Result<Value, Error> {
    let (mut acc, rest) = fold_operands("/", args)?;
    for arg in rest {
        let n = expect_number("/", arg)?;
        if n == 0 {
            return Err(Error::ArithmeticError("division by zero".to_owned()));
        }
        acc = acc
            .checked_div(n)
            .ok_or_else(|| Error::ArithmeticError("integer overflow in division".to_owned()))?;
    }
    Ok(Value::Number(acc))
}

fn builtin_eq(args: &[Value]) -> Result<Value, Error> {
    // Strict equality: values of different kinds are never equal
    Ok(Value::Bool(args.windows(2).all(|pair| pair[0] == pair[1])))
}

// Macro to generate binary numeric comparison functions
macro_rules! numeric_comparison {
    ($name:ident, $op:tt, $op_str:expr) => {
        fn $name(args: &[Value]) -> Result<Value, Error> {
            match args {
                [left, right] => {
                    let left = expect_number($op_str, left)?;
                    let right = expect_number($op_str, right)?;
                    Ok(Value::Bool(left $op right))
                }
                _ => Err(Error::arity_mismatch($op_str, Arity::Exact(2), args.len())),
            }
        }
    };
}

numeric_comparison!(builtin_lt, <, "<");
numeric_comparison!(builtin_gt, >, ">");

// Every argument is already evaluated, so every argument is type-checked;
// there is no short-circuit.
macro_rules! boolean_fold {
    ($name:ident, $op_str:expr, $combine:ident) => {
        fn $name(args: &[Value]) -> Result<Value, Error> {
            let flags = args
                .iter()
                .map(|arg| expect_bool($op_str, arg))
                .collect::<Result<Vec<bool>, Error>>()?;
            Ok(Value::Bool(flags.into_iter().$combine(|flag| flag)))
        }
    };
}

boolean_fold!(builtin_and, "and", all);
boolean_fold!(builtin_or, "or", any);

fn builtin_not(args: &[Value]) -> Result<Value, Error> {
    match args {
        [arg] => Ok(Value::Bool(!expect_bool("not", arg)?)),
        _ => Err(Error::arity_mismatch("not", Arity::Exact(1), args.len())),
    }
}

/// Global registry of all built-in operations.
pub static BUILTIN_OPS: &[BuiltinOp] = &[
    // Arithmetic operations
    BuiltinOp {
        id: "+",
        op_kind: OpKind::Function(builtin_add),
        arity: Arity::AtLeast(2),
    },
    BuiltinOp {
        id: "-",
        op_kind: OpKind::Function(builtin_sub),
        arity: Arity::AtLeast(2),
    },
    BuiltinOp {
        id: "*",
        op_kind: OpKind::Function(builtin_mul),
        arity: Arity::AtLeast(2),
    },
    BuiltinOp {
        id: "/",
        op_kind: OpKind::Function(builtin_div),
        arity: Arity::AtLeast(2),
    },
    // Comparison operations
    BuiltinOp {
        id: "=",
        op_kind: OpKind::Function(builtin_eq),
        arity: Arity::AtLeast(2),
    },
    BuiltinOp {
        id: "<",
        op_kind: OpKind::Function(builtin_lt),
        arity: Arity::Exact(2),
    },
    BuiltinOp {
        id: ">",
        op_kind: OpKind::Function(builtin_gt),
        arity: Arity::Exact(2),
    },
    // Logical operations
    BuiltinOp {
        id: "and",
        op_kind: OpKind::Function(builtin_and),
        arity: Arity::AtLeast(2),
    },
    BuiltinOp {
        id: "or",
        op_kind: OpKind::Function(builtin_or),
        arity: Arity::AtLeast(2),
    },
    BuiltinOp {
        id: "not",
        op_kind: OpKind::Function(builtin_not),
        arity: Arity::Exact(1),
    },
    // Special forms
    BuiltinOp {
        id: "define",
        op_kind: OpKind::SpecialForm(eval_define),
        arity: Arity::Exact(2),
    },
    BuiltinOp {
        id: "set!",
        op_kind: OpKind::SpecialForm(eval_set),
        arity: Arity::Exact(2),
    },
];

/// Lazy static map from id to BuiltinOp (private - use find_op)
static BUILTIN_BY_ID: LazyLock<HashMap<&'static str, &'static BuiltinOp>> =
    LazyLock::new(|| BUILTIN_OPS.iter().map(|op| (op.id, op)).collect());

/// Get all builtin operations
pub fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS
}

/// Find a builtin operation (function or special form) by identifier
pub fn find_op(id: &str) -> Option<&'static BuiltinOp> {
    BUILTIN_BY_ID.get(id).copied()
}

/// Find a special form by its keyword
pub(crate) fn find_special_form(keyword: &str) -> Option<&'static BuiltinOp> {
    find_op(keyword).filter(|op| op.is_special_form())
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::val;

    /// Invoke a builtin function through the registry, validating arity the
    /// same way procedure application does
    fn call_builtin(name: &str, args: &[Value]) -> Result<Value, Error> {
        let op = find_op(name).unwrap();
        op.validate_arity(args.len())?;
        match op.op_kind {
            OpKind::Function(func) => func(args),
            OpKind::SpecialForm(_) => {
                panic!("expected function builtin in tests, got special form: {name}")
            }
        }
    }

    /// Expected outcome of a builtin call
    #[derive(Debug)]
    enum Expect {
        Returns(Value),
        ArityErr,
        TypeErr,
        ArithmeticErr,
    }
    use Expect::*;

    fn returns<T: Into<Value>>(value: T) -> Expect {
        Returns(val(value))
    }

    #[test]
    fn test_builtin_ops_registry() {
        let not_op = find_op("not").unwrap();
        assert_eq!(not_op.arity, Arity::Exact(1));
        assert!(!not_op.is_special_form());

        let define_op = find_op("define").unwrap();
        assert!(define_op.is_special_form());
        assert_eq!(define_op.arity, Arity::Exact(2));
        assert!(find_special_form("set!").is_some());
        assert!(find_special_form("+").is_none());

        assert!(find_op("unknown").is_none());
        assert!(find_op("if").is_none()); // No conditionals in this language
        assert!(find_op("lambda").is_none());

        // Identifiers are unique
        let ops = get_builtin_ops();
        for (i, op) in ops.iter().enumerate() {
            assert!(!ops[i + 1..].contains(op), "duplicate builtin {}", op.id);
        }
    }

    #[test]
    fn test_arity_validation() {
        assert!(Arity::Exact(2).accepts(2));
        assert!(!Arity::Exact(2).accepts(3));
        assert!(Arity::AtLeast(2).accepts(5));
        assert!(!Arity::AtLeast(2).accepts(1));
        assert_eq!(
            Arity::Exact(1).validate("not", 0),
            Err(Error::ArityMismatch {
                procedure: "not".into(),
                expected: Arity::Exact(1),
                got: 0
            })
        );
    }

    #[test]
    fn test_builtin_function_implementations() {
        let many_ones: Vec<Value> = (0..100).map(|_| val(1)).collect();
        let all_fives: Vec<Value> = (0..10).map(|_| val(5)).collect();
        let mut mostly_fives = all_fives.clone();
        mostly_fives.push(val(6));

        let test_cases: Vec<(&str, Vec<Value>, Expect)> = vec![
            // === ARITHMETIC ===
            ("+", vec![val(1), val(2), val(3)], returns(6)),
            ("+", vec![val(-5), val(5)], returns(0)),
            ("+", many_ones, returns(100)),
            ("-", vec![val(10), val(3), val(2)], returns(5)),
            ("-", vec![val(0), val(7)], returns(-7)),
            ("*", vec![val(2), val(3), val(4)], returns(24)),
            ("*", vec![val(-2), val(3)], returns(-6)),
            ("/", vec![val(100), val(5), val(2)], returns(10)),
            ("/", vec![val(7), val(2)], returns(3)), // Truncating integer division
            ("/", vec![val(-7), val(2)], returns(-3)),
            // Fewer than two operands
            ("+", vec![val(1)], ArityErr),
            ("-", vec![], ArityErr),
            ("*", vec![val(3)], ArityErr),
            ("/", vec![val(3)], ArityErr),
            // Non-numeric operands anywhere in the fold
            ("+", vec![val(1), val(true)], TypeErr),
            ("-", vec![val(false), val(1)], TypeErr),
            ("*", vec![val(1), val(2), val(true)], TypeErr),
            ("/", vec![val(true), val(1)], TypeErr),
            // Overflow and division by zero
            ("+", vec![val(i64::MAX), val(1)], ArithmeticErr),
            ("-", vec![val(i64::MIN), val(1)], ArithmeticErr),
            ("*", vec![val(i64::MAX), val(2)], ArithmeticErr),
            ("/", vec![val(1), val(0)], ArithmeticErr),
            ("/", vec![val(i64::MIN), val(-1)], ArithmeticErr),
            // === EQUALITY ===
            ("=", vec![val(5), val(5)], returns(true)),
            ("=", vec![val(5), val(6)], returns(false)),
            ("=", all_fives, returns(true)),
            ("=", mostly_fives, returns(false)),
            ("=", vec![val(true), val(true)], returns(true)),
            ("=", vec![val(1), val(true)], returns(false)), // Different kinds
            ("=", vec![val(5)], ArityErr),
            // === COMPARISON ===
            ("<", vec![val(3), val(5)], returns(true)),
            ("<", vec![val(5), val(3)], returns(false)),
            ("<", vec![val(5), val(5)], returns(false)),
            (">", vec![val(5), val(3)], returns(true)),
            (">", vec![val(-5), val(-3)], returns(false)),
            ("<", vec![val(1), val(2), val(3)], ArityErr),
            (">", vec![val(1)], ArityErr),
            ("<", vec![val(true), val(1)], TypeErr),
            (">", vec![val(1), val(false)], TypeErr),
            // === BOOLEAN LOGIC ===
            ("and", vec![val(true), val(true)], returns(true)),
            ("and", vec![val(true), val(false)], returns(false)),
            ("and", vec![val(true), val(true), val(true)], returns(true)),
            ("or", vec![val(false), val(false)], returns(false)),
            ("or", vec![val(false), val(true)], returns(true)),
            ("or", vec![val(false), val(false), val(true)], returns(true)),
            ("and", vec![val(true)], ArityErr),
            ("or", vec![val(false)], ArityErr),
            // Every argument is checked, even after the outcome is known
            ("and", vec![val(false), val(1)], TypeErr),
            ("or", vec![val(true), val(0)], TypeErr),
            ("not", vec![val(true)], returns(false)),
            ("not", vec![val(false)], returns(true)),
            ("not", vec![val(0)], TypeErr),
            ("not", vec![], ArityErr),
            ("not", vec![val(true), val(false)], ArityErr),
        ];

        for (i, (name, args, expected)) in test_cases.into_iter().enumerate() {
            let test_id = format!("Builtin test #{} ({name})", i + 1);
            match (call_builtin(name, &args), &expected) {
                (Ok(actual), Returns(expected_val)) => {
                    assert_eq!(actual, *expected_val, "{test_id}");
                }
                (Err(Error::ArityMismatch { .. }), ArityErr)
                | (Err(Error::TypeMismatch(_)), TypeErr)
                | (Err(Error::ArithmeticError(_)), ArithmeticErr) => {}
                (result, expected) => {
                    panic!("{test_id}: expected {expected:?}, got {result:?}")
                }
            }
        }
    }

    #[test]
    fn test_type_error_messages() {
        let err = call_builtin("+", &[val(1), val(true)]).unwrap_err();
        assert_eq!(
            format!("{err}"),
            "Type error: + requires numbers, found boolean #t"
        );

        let err = call_builtin("not", &[val(42)]).unwrap_err();
        assert!(format!("{err}").contains("boolean arguments"));
    }
}
