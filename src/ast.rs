//! This module defines the [`Value`] sum type shared by source expressions and
//! runtime values, together with the printer that renders values back to
//! source-like text. The reader only ever produces the `Number`, `Float`,
//! `Symbol` and `List` variants; the remaining variants appear during
//! evaluation. Because code and data share this representation, a quoted list
//! is returned to the caller exactly as the reader built it.
//!
//! Ergonomic helpers such as [`val`], [`sym`] and [`nil`] build values in code
//! and tests, and conversion traits cover common Rust literals, arrays, slices
//! and vectors.

use std::rc::Rc;

use crate::Error;
use crate::evaluator::Environment;
use crate::intooperation::OperationFn;

/// Type alias for exact (integer) numbers
pub type NumberType = i64;

/// Type alias for inexact (floating point) numbers
pub type FloatType = f64;

/// Core value type of the interpreter
///
/// To build values, use the helper functions:
/// - `val(42)` for values, `sym("name")` for symbols, `nil()` for empty lists
/// - `val([1, 2, 3])` for homogeneous lists
/// - `val(vec![sym("op"), val(42)])` for mixed lists
#[derive(Clone)]
pub enum Value {
    /// Exact integers
    Number(NumberType),
    /// Inexact floating point numbers
    Float(FloatType),
    /// Symbols (identifiers); also stand in for text data
    Symbol(String),
    /// Boolean values, reachable through the global names `true` and `false`
    Bool(bool),
    /// Lists, both as code and as data; the empty list is nil
    List(Vec<Value>),
    /// Native procedures from the built-in table
    /// Uses the id string for equality comparison instead of the function pointer
    BuiltinFunction { id: String, func: Rc<OperationFn> },
    /// User-defined procedures created by `lambda`
    Function(Rc<Closure>),
    /// The "no value" marker returned by `define`, `set!` and output procedures
    /// This value never equals itself or any other value
    Unspecified,
}

/// A procedure value: parameter names, body and the environment it was created in.
///
/// Invoking a closure binds its parameters in a fresh child of `env`, so the
/// captured chain stays alive for as long as the closure does.
pub struct Closure {
    pub params: Vec<String>,
    pub body: Value,
    pub env: Environment,
}

/// A number argument after type checking, keeping the exact/inexact distinction
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Num {
    Int(NumberType),
    Float(FloatType),
}

impl Num {
    pub fn as_float(self) -> FloatType {
        match self {
            Num::Int(n) => n as FloatType,
            Num::Float(x) => x,
        }
    }

    pub fn is_zero(self) -> bool {
        match self {
            Num::Int(n) => n == 0,
            Num::Float(x) => x == 0.0,
        }
    }
}

impl From<Num> for Value {
    fn from(n: Num) -> Self {
        match n {
            Num::Int(n) => Value::Number(n),
            Num::Float(x) => Value::Float(x),
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Number(n) => write!(f, "Number({n})"),
            Value::Float(x) => write!(f, "Float({x:?})"),
            Value::Symbol(s) => write!(f, "Symbol({s})"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::List(list) => {
                write!(f, "List(")?;
                for (i, v) in list.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v:?}")?;
                }
                write!(f, ")")
            }
            Value::BuiltinFunction { id, .. } => write!(f, "BuiltinFunction({id})"),
            // The captured environment is left out: it may contain this closure.
            Value::Function(closure) => write!(
                f,
                "Function(params={:?}, body={:?})",
                closure.params, closure.body
            ),
            Value::Unspecified => write!(f, "Unspecified"),
        }
    }
}

// Symbols double as the language's text type, so string slices become symbols.
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Symbol(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Symbol(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<FloatType> for Value {
    fn from(x: FloatType) -> Self {
        Value::Float(x)
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Value {
            fn from(n: $int_type) -> Self {
                Value::Number(n as NumberType)
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

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        // Lengths beyond i64::MAX cannot occur for in-memory lists.
        Value::Number(NumberType::try_from(n).unwrap_or(NumberType::MAX))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(|x| x.into()).collect())
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(arr: [T; N]) -> Self {
        Value::List(arr.into_iter().map(|x| x.into()).collect())
    }
}

impl<T: Into<Value> + Clone> From<&[T]> for Value {
    fn from(slice: &[T]) -> Self {
        Value::List(slice.iter().cloned().map(|x| x.into()).collect())
    }
}

// Fallible conversions from `Value` back into primitive Rust types.

impl TryFrom<Value> for NumberType {
    type Error = Error;

    fn try_from(value: Value) -> Result<NumberType, Error> {
        if let Value::Number(n) = value {
            Ok(n)
        } else {
            Err(Error::TypeError(format!("expected integer, got {value}")))
        }
    }
}

impl TryFrom<Value> for Num {
    type Error = Error;

    fn try_from(value: Value) -> Result<Num, Error> {
        match value {
            Value::Number(n) => Ok(Num::Int(n)),
            Value::Float(x) => Ok(Num::Float(x)),
            other => Err(Error::TypeError(format!("expected number, got {other}"))),
        }
    }
}

impl TryFrom<Value> for FloatType {
    type Error = Error;

    fn try_from(value: Value) -> Result<FloatType, Error> {
        Num::try_from(value).map(Num::as_float)
    }
}

impl TryFrom<Value> for bool {
    type Error = Error;

    fn try_from(value: Value) -> Result<bool, Error> {
        if let Value::Bool(b) = value {
            Ok(b)
        } else {
            Err(Error::TypeError(format!("expected boolean, got {value}")))
        }
    }
}

impl TryFrom<Value> for Vec<Value> {
    type Error = Error;

    fn try_from(value: Value) -> Result<Vec<Value>, Error> {
        if let Value::List(list) = value {
            Ok(list)
        } else {
            Err(Error::TypeError(format!("expected list, got {value}")))
        }
    }
}

/// Helper function for creating symbols - works great in mixed lists!
pub fn sym<S: AsRef<str>>(name: S) -> Value {
    Value::Symbol(name.as_ref().to_owned())
}

/// Helper function for creating Values - works great in mixed lists!
/// Accepts any type that can be converted to Value
pub fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

/// Helper function for creating empty lists (nil)
pub fn nil() -> Value {
    Value::List(vec![])
}

/// Printer: renders a value back to source-like text.
///
/// Lists print as their elements' own forms separated by single spaces inside
/// parentheses. Floats use the shortest round-trip form, which always keeps a
/// fractional part or exponent, so `3.0` never reads back as the integer `3`.
impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::Symbol(s) => write!(f, "{s}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::List(elements) => {
                write!(f, "(")?;
                for (i, elem) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{elem}")?;
                }
                write!(f, ")")
            }
            Value::BuiltinFunction { id, .. } => write!(f, "#<builtin:{id}>"),
            Value::Function(closure) => write!(f, "#<lambda ({})>", closure.params.join(" ")),
            Value::Unspecified => write!(f, "#<unspecified>"),
        }
    }
}

impl Value {
    /// Check if a value represents nil (empty list)
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::List(list) if list.is_empty())
    }

    /// Truthiness used by `if` and `not`
    ///
    /// `false`, zero, the empty list, the empty symbol and the unspecified
    /// marker are false; every other value is true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0,
            Value::Float(x) => *x != 0.0,
            Value::Symbol(s) => !s.is_empty(),
            Value::List(list) => !list.is_empty(),
            Value::BuiltinFunction { .. } | Value::Function(_) => true,
            Value::Unspecified => false,
        }
    }

    pub fn is_procedure(&self) -> bool {
        matches!(self, Value::BuiltinFunction { .. } | Value::Function(_))
    }

    /// Short human-readable name of the variant, for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "integer",
            Value::Float(_) => "float",
            Value::Symbol(_) => "symbol",
            Value::Bool(_) => "boolean",
            Value::List(_) => "list",
            Value::BuiltinFunction { .. } | Value::Function(_) => "procedure",
            Value::Unspecified => "unspecified",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::BuiltinFunction { id: id1, .. }, Value::BuiltinFunction { id: id2, .. }) => {
                id1 == id2
            }
            // Closures are equal only to themselves
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Unspecified, _) | (_, Value::Unspecified) => false,
            _ => false,
        }
    }
}
