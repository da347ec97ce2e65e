//! miniscm - Minimal s-expression interpreter
//!
//! This crate parses parenthesized text into a tree and evaluates it against a
//! chained lexical environment. The language is deliberately tiny:
//!
//! ```scheme
//! (+ 1 2 3)                    ; arithmetic over 64-bit integers
//! (and #t (> 5 3))             ; strict boolean logic
//! (define x 5)                 ; variable binding
//! (define (square n) (* n n))  ; user-defined procedures (closures)
//! (set! x 6)                   ; mutation of an existing binding
//! ```
//!
//! ## Strict Typing
//!
//! - Booleans are the two literals `#t` and `#f`; there is no "truthiness"
//! - Arithmetic detects overflow and division by zero
//! - Every builtin validates its arity and argument types
//! - Redefining a name in the same scope is an error, use `set!` instead
//!
//! ## Modules
//!
//! - `scheme`: reader turning source text into a [`ast::Node`] tree
//! - `evaluator`: evaluation engine and the chained [`evaluator::Environment`]
//! - `builtinops`: registry of primitive procedures and special forms
//! - `ast`: tree nodes, runtime values and their printable forms
//!
//! ## Example
//!
//! ```
//! use miniscm::Interpreter;
//! use miniscm::ast::Value;
//!
//! let session = Interpreter::new();
//! session.evaluate_source("(define (square n) (* n n))").unwrap();
//! assert_eq!(session.evaluate_source("(square 5)").unwrap(), Value::Number(25));
//! ```

use std::fmt;

use crate::ast::{Node, Value};
use crate::builtinops::Arity;
use crate::evaluator::{Binding, Environment};
use crate::scheme::ParseConfig;

/// Maximum list nesting accepted by the reader.
///
/// The reader itself keeps open lists on an explicit stack, but dropping and
/// printing a [`ast::Node`] recurse once per nesting level, so deeper trees
/// could overflow the native stack outside the reader.
pub const MAX_PARSE_DEPTH: usize = 512;

/// Default maximum evaluation depth before reporting `StackExhausted`.
/// Every nested evaluation (argument, body, operator) counts one level.
pub const MAX_EVAL_DEPTH: usize = 10_000;

/// Categorizes the different kinds of parsing errors.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ParseErrorKind {
    /// A closing parenthesis without a matching open list
    UnmatchedClose,
    /// Input ended while one or more lists were still open
    Unclosed,
    /// Input contained no expression at all
    Empty,
    /// Extra input found after a complete, valid expression
    TrailingContent,
    /// A token that looks like a literal but is not a valid one
    MalformedAtom,
    /// Expression nesting exceeded [`MAX_PARSE_DEPTH`]
    TooDeeplyNested,
}

/// A structured error providing detailed information about a parsing failure.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Context snippet from the input showing where the error occurred (max 100 chars)
    pub context: Option<String>,
    /// The problematic token or character encountered, if identifiable
    pub found: Option<String>,
}

impl ParseError {
    /// Create a ParseError with all fields
    pub fn new(
        kind: ParseErrorKind,
        message: impl Into<String>,
        context: Option<String>,
        found: Option<String>,
    ) -> Self {
        ParseError {
            kind,
            message: message.into(),
            context,
            found,
        }
    }

    /// Create a simple ParseError with a kind and message but no context
    pub fn from_message(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message, None, None)
    }

    /// Create a ParseError with context extracted from input at a given byte offset
    pub fn with_context(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
    ) -> Self {
        Self::with_context_and_found(kind, message, input, error_offset, None)
    }

    /// Create a ParseError with context and found token
    pub fn with_context_and_found(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
        found: Option<String>,
    ) -> Self {
        const MAX_CONTEXT: usize = 100;

        // Show up to 20 characters before the error position
        let error_char = input
            .get(..error_offset)
            .map_or(0, |prefix| prefix.chars().count());
        let context_start = error_char.saturating_sub(20);

        let context_str: String = input
            .chars()
            .skip(context_start)
            .take(MAX_CONTEXT)
            .collect();

        let mut display_context = String::new();
        if context_start > 0 {
            display_context.push_str("[...]");
        }
        display_context.push_str(&context_str);
        if context_start + context_str.chars().count() < input.chars().count() {
            display_context.push_str("[...]");
        }

        let display_context = display_context.replace('\n', "\\n").replace('\r', "");

        Self::new(kind, message, Some(display_context), found)
    }
}

/// Error types for the interpreter
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Source text could not be turned into a complete tree
    SyntaxError(ParseError),
    /// An identifier was evaluated but is bound nowhere in the chain
    UnknownIdentifier(String),
    /// `set!` targeted a name bound nowhere in the chain
    UndefinedVariable(String),
    /// `define` targeted a name already bound in the same scope
    DuplicateDefinition(String),
    /// The operator position evaluated to a non-procedure (its printable form)
    NotAProcedure(String),
    ArityMismatch {
        procedure: String,
        expected: Arity,
        got: usize,
    },
    TypeMismatch(String),
    /// `()` was evaluated
    EmptyExpression,
    /// Evaluation nested deeper than the configured limit
    StackExhausted { limit: usize },
    /// Integer overflow or division by zero
    ArithmeticError(String),
}

impl Error {
    /// Create an ArityMismatch for the named procedure
    pub fn arity_mismatch(procedure: impl Into<String>, expected: Arity, got: usize) -> Self {
        Error::ArityMismatch {
            procedure: procedure.into(),
            expected,
            got,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::SyntaxError(e) => {
                write!(f, "SyntaxError: {}", e.message)?;
                if let Some(found) = &e.found {
                    write!(f, "\nFound: {found}")?;
                }
                if let Some(context) = &e.context {
                    write!(f, "\nContext: {context}")?;
                }
                Ok(())
            }
            Error::UnknownIdentifier(name) => write!(f, "Unknown identifier: {name}"),
            Error::UndefinedVariable(name) => {
                write!(f, "Undefined variable: cannot set! {name} before it is defined")
            }
            Error::DuplicateDefinition(name) => {
                write!(f, "Duplicate definition: {name} is already bound in this scope")
            }
            Error::NotAProcedure(value) => write!(f, "Not a procedure: {value}"),
            Error::ArityMismatch {
                procedure,
                expected,
                got,
            } => write!(
                f,
                "ArityError: {procedure} expected {expected} arguments, got {got}"
            ),
            Error::TypeMismatch(msg) => write!(f, "Type error: {msg}"),
            Error::EmptyExpression => write!(f, "Cannot evaluate empty expression ()"),
            Error::StackExhausted { limit } => {
                write!(f, "Stack exhausted: evaluation deeper than {limit} levels")
            }
            Error::ArithmeticError(msg) => write!(f, "Arithmetic error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

/// Parse and evaluate one expression against `env` using default settings.
///
/// Afterwards, call frames of `env`'s tree that only unreachable closures
/// still hold are released (see [`Environment::release_unreachable`]).
pub fn evaluate_source(text: &str, env: &Environment) -> Result<Value, Error> {
    let expr = scheme::parse_scheme(text)?;
    let result = evaluator::eval(&expr, env);
    env.release_unreachable();
    result
}

/// Settings for an [`Interpreter`] session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterpreterConfig {
    pub parse: ParseConfig,
    pub max_eval_depth: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        InterpreterConfig {
            parse: ParseConfig::default(),
            max_eval_depth: MAX_EVAL_DEPTH,
        }
    }
}

/// A single interpreter session: the global environment plus its settings.
///
/// The global environment lives exactly as long as the session: dropping the
/// session clears it along with every call frame still retained by a closure,
/// including for other handles obtained from [`Interpreter::global_env`] and
/// for procedure values the host kept. Each call to
/// [`Interpreter::evaluate_source`] evaluates one complete expression; a failure
/// aborts only that call, and bindings made by `define`/`set!` before the
/// failure inside the same expression are kept.
#[derive(Debug)]
pub struct Interpreter {
    global: Environment,
    config: InterpreterConfig,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_config(InterpreterConfig::default())
    }

    pub fn with_config(config: InterpreterConfig) -> Self {
        Interpreter {
            global: evaluator::create_global_env(),
            config,
        }
    }

    /// The session's global environment
    pub fn global_env(&self) -> &Environment {
        &self.global
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    /// Parse `text` with the session's reader settings
    pub fn parse(&self, text: &str) -> Result<Node, Error> {
        scheme::parse_scheme_with_config(text, self.config.parse)
    }

    /// Parse and evaluate one expression in the global environment
    ///
    /// Only `#t` and `#f` are boolean literals. `true` and `false` are plain
    /// identifiers, so `(and true false)` fails with `UnknownIdentifier` in a
    /// fresh session, and with `TypeMismatch` once they are bound to
    /// non-boolean values.
    pub fn evaluate_source(&self, text: &str) -> Result<Value, Error> {
        self.evaluate_source_in(text, &self.global)
    }

    /// Parse and evaluate one expression in an explicit environment
    #[tracing::instrument(level = "debug", skip(self, env))]
    pub fn evaluate_source_in(&self, text: &str, env: &Environment) -> Result<Value, Error> {
        let expr = self.parse(text)?;
        let result = evaluator::eval_with_limit(&expr, env, self.config.max_eval_depth);
        env.release_unreachable();
        result
    }

    /// Sorted listing of every name visible from the global environment
    pub fn bindings(&self) -> Vec<Binding> {
        self.global.bindings()
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        self.global.clear();
    }
}

pub mod ast;
pub mod builtinops;
pub mod evaluator;
pub mod scheme;
