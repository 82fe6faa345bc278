//! Poy - a minimal Lisp-style expression interpreter
//!
//! This crate reads one-line expressions, parses them into a nested tree of
//! atoms and lists, and evaluates that tree against a chain of lexically
//! scoped environments. Code and data share one representation, so a quoted
//! list comes back from the evaluator as ordinary data.
//!
//! ```text
//! (define sq (lambda (x) (* x x)))
//! (sq 5)                ; 25
//! (quote (a b c))       ; (a b c)
//! (if (> 3 2) 1 2)      ; 1
//! (/ 7 2)               ; 3.5
//! ```
//!
//! ## Evaluation model
//!
//! - Special forms `quote`, `if`, `define`, `set!` and `lambda` are dispatched by
//!   the evaluator on their head symbol and receive unevaluated operands
//! - Every other list is a procedure application: head first, then arguments
//!   left to right
//! - Closures capture their defining environment by reference count, so they
//!   may outlive the call that created them
//! - There is no tail-call elimination; nesting is bounded by a configurable
//!   evaluation depth limit instead of the native stack
//!
//! ## Modules
//!
//! - `reader`: tokenizer, recursive reader and atom classifier
//! - `ast`: the `Value` sum type shared by code and data, and its printer
//! - `evaluator`: environments, special forms and procedure application
//! - `builtinops`: the built-in procedure table installed in the root environment
//! - `intooperation`: adapters turning typed Rust functions into built-ins
//! - `interpreter`: an owned interpreter instance with its own global environment

use std::fmt;

/// Default maximum evaluation depth
///
/// Each nested sub-expression and each closure invocation adds one level.
/// Exceeding the limit is reported as an evaluation error instead of letting
/// the native call stack overflow. The default leaves headroom on the 2 MiB
/// stack of a spawned thread in an unoptimized build. Interpreters may change
/// it through [`interpreter::InterpreterConfig`]; raising it well past this
/// value requires running evaluation on a thread with a larger stack.
pub const MAX_EVAL_DEPTH: usize = 400;

/// Categorizes the different kinds of parsing errors.
#[derive(Debug, PartialEq, Clone)]
pub enum ParseErrorKind {
    /// Invalid or unexpected syntax, such as a close delimiter with no matching open
    InvalidSyntax,
    /// Input ended before the expression was complete (unbalanced open delimiter, empty input)
    Incomplete,
}

/// A structured error describing a parsing failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// The problematic token, if one was encountered
    pub found: Option<String>,
}

impl ParseError {
    /// Create a ParseError with all fields
    pub fn new(kind: ParseErrorKind, message: impl Into<String>, found: Option<String>) -> Self {
        ParseError {
            kind,
            message: message.into(),
            found,
        }
    }

    /// Create a ParseError with a kind and message but no offending token
    pub fn from_message(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message, None)
    }

    pub(crate) fn unexpected_eof() -> Self {
        Self::from_message(ParseErrorKind::Incomplete, "unexpected end of input")
    }

    pub(crate) fn unexpected_close() -> Self {
        Self::new(
            ParseErrorKind::InvalidSyntax,
            "unexpected )",
            Some(")".to_owned()),
        )
    }
}

/// Error types for the interpreter
///
/// `SyntaxError` comes from the reader, `UnboundSymbol` from environment
/// lookup and assignment. `TypeError`, `ArityError` and `EvalError` together
/// make up application errors: a head that is not callable, a built-in
/// receiving the wrong kind or number of arguments, or a runtime failure.
/// `Exit` is raised by the process-control built-ins and asks the host to stop.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    SyntaxError(ParseError),
    UnboundSymbol(String),
    EvalError(String),
    TypeError(String),
    ArityError {
        expected: usize,
        got: usize,
        expression: Option<String>,
    },
    Exit(i32),
}

impl Error {
    /// Create an ArityError without expression context
    pub fn arity_error(expected: usize, got: usize) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: None,
        }
    }

    /// Create an ArityError with expression context
    pub fn arity_error_with_expr(expected: usize, got: usize, expression: String) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: Some(expression),
        }
    }

    /// True for the failures raised while applying a procedure
    pub fn is_application_error(&self) -> bool {
        matches!(
            self,
            Error::TypeError(_) | Error::ArityError { .. } | Error::EvalError(_)
        )
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::SyntaxError(e)
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
                Ok(())
            }
            Error::UnboundSymbol(name) => write!(f, "Unbound symbol: {name}"),
            Error::EvalError(msg) => write!(f, "EvaluationError: {msg}"),
            Error::TypeError(msg) => write!(f, "Type error: {msg}"),
            Error::ArityError {
                expected,
                got,
                expression,
            } => match expression {
                Some(expr) => write!(
                    f,
                    "ArityError: expression {expr}: expected {expected} arguments, got {got}"
                ),
                None => write!(
                    f,
                    "ArityError: procedure expected {expected} arguments but got {got}"
                ),
            },
            Error::Exit(code) => write!(f, "Exit requested with status {code}"),
        }
    }
}

impl std::error::Error for Error {}

pub mod ast;
pub mod builtinops;
pub mod evaluator;
pub mod interpreter;
pub mod intooperation;
pub mod reader;

pub use interpreter::{Interpreter, InterpreterConfig};
pub use reader::{ParseConfig, parse, parse_with_config, tokenize};
