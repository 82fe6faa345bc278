use std::marker::PhantomData;
use std::rc::Rc;

use crate::Error;
use crate::ast::{FloatType, Num, NumberType, Value};
use crate::evaluator::CallContext;

/// Canonical erased builtin procedure type used by the evaluator.
///
/// Builtins receive ownership of their argument vector, enabling
/// implementations that consume or rearrange arguments. The
/// [`CallContext`] lets higher-order builtins (such as `map`) call back
/// into procedures without losing track of the evaluation depth.
pub type OperationFn = dyn Fn(Vec<Value>, CallContext) -> Result<Value, Error>;

// =====================================================================
// Argument conversion
//
// `FromParam` turns an evaluated argument into a strongly-typed Rust
// parameter. All supported parameter types are listed here so that they
// are easy to audit.
// =====================================================================

/// Conversion from an owned argument into a builtin parameter type.
pub trait FromParam: Sized {
    fn from_arg(value: Value) -> Result<Self, Error>;
}

impl FromParam for Value {
    fn from_arg(value: Value) -> Result<Self, Error> {
        Ok(value)
    }
}

macro_rules! impl_from_param_via_try_from {
    ($($t:ty),+) => {
        $(
            impl FromParam for $t {
                fn from_arg(value: Value) -> Result<Self, Error> {
                    <$t>::try_from(value)
                }
            }
        )+
    };
}

impl_from_param_via_try_from!(NumberType, FloatType, Num, Vec<Value>);

/// Symbol text as an owned string
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolName(pub String);

impl FromParam for SymbolName {
    fn from_arg(value: Value) -> Result<Self, Error> {
        match value {
            Value::Symbol(s) => Ok(SymbolName(s)),
            other => Err(Error::TypeError(format!("expected symbol, got {other}"))),
        }
    }
}

fn convert_rest<T: FromParam>(rest: Vec<Value>) -> Result<Vec<T>, Error> {
    rest.into_iter().map(T::from_arg).collect()
}

/// Marker type used in `Args` tuples to indicate that a parameter
/// position is populated from all remaining arguments, each converted
/// with [`FromParam`].
#[derive(Debug, Clone, Copy)]
pub struct Rest<T>(PhantomData<T>);

pub type ValuesRest = Rest<Value>;
pub type NumRest = Rest<Num>;

/// Convert a strongly-typed Rust function or closure into the erased
/// [`OperationFn`], parameterized by an argument tuple type.
///
/// Builtins return `Result<R, Error>` for any `R: Into<Value>`; the
/// argument count is checked before any conversion happens.
pub trait IntoOperation<Args> {
    fn into_operation(self) -> Rc<OperationFn>;
}

/// Trait for operations whose last parameter collects the remaining
/// arguments as a `Vec<T>`, optionally after a fixed prefix.
pub trait IntoVariadicOperation<Args> {
    fn into_variadic_operation(self) -> Rc<OperationFn>;
}

// =====================================================================
// Variadic adapters
// =====================================================================

impl<F, R, T> IntoVariadicOperation<(Rest<T>,)> for F
where
    T: FromParam,
    F: Fn(Vec<T>) -> Result<R, Error> + 'static,
    R: Into<Value>,
{
    fn into_variadic_operation(self) -> Rc<OperationFn> {
        Rc::new(move |args: Vec<Value>, _ctx: CallContext| -> Result<Value, Error> {
            let rest = convert_rest::<T>(args)?;
            (self)(rest).map(Into::into)
        })
    }
}

macro_rules! impl_into_variadic_operation_for_prefix_and_rest {
    ($prefix:expr, $( $p:ident : $A:ident ),+ ) => {
        impl<F, R, T, $( $A ),+> IntoVariadicOperation<( $( $A, )+ Rest<T>, )> for F
        where
            T: FromParam,
            $( $A: FromParam, )+
            F: Fn( $( $A ),+, Vec<T> ) -> Result<R, Error> + 'static,
            R: Into<Value>,
        {
            fn into_variadic_operation(self) -> Rc<OperationFn> {
                Rc::new(move |args: Vec<Value>, _ctx: CallContext| -> Result<Value, Error> {
                    if args.len() < $prefix {
                        return Err(Error::arity_error($prefix, args.len()));
                    }
                    let mut args = args.into_iter();
                    $(
                        let $p = match args.next() {
                            Some(value) => <$A as FromParam>::from_arg(value)?,
                            None => return Err(Error::arity_error($prefix, 0)),
                        };
                    )+
                    let rest = convert_rest::<T>(args.collect())?;
                    (self)( $( $p ),+, rest ).map(Into::into)
                })
            }
        }
    };
}

impl_into_variadic_operation_for_prefix_and_rest!(1, p0: A1);

// =====================================================================
// Fixed-arity adapters
// =====================================================================

macro_rules! impl_into_operation_for_arity {
    ($arity:expr, $( $p:ident : $A:ident ),+ ) => {
        impl<F, R, $( $A ),+> IntoOperation<( $( $A, )+ )> for F
        where
            F: Fn( $( $A ),+ ) -> Result<R, Error> + 'static,
            R: Into<Value>,
            $( $A: FromParam, )+
        {
            fn into_operation(self) -> Rc<OperationFn> {
                Rc::new(move |args: Vec<Value>, _ctx: CallContext| -> Result<Value, Error> {
                    if args.len() != $arity {
                        return Err(Error::arity_error($arity, args.len()));
                    }
                    let mut args = args.into_iter();
                    $(
                        let $p = match args.next() {
                            Some(value) => <$A as FromParam>::from_arg(value)?,
                            None => return Err(Error::arity_error($arity, 0)),
                        };
                    )+
                    (self)( $( $p ),+ ).map(Into::into)
                })
            }
        }
    };
}

// 0-arg functions / closures
impl<F, R> IntoOperation<()> for F
where
    F: Fn() -> Result<R, Error> + 'static,
    R: Into<Value>,
{
    fn into_operation(self) -> Rc<OperationFn> {
        Rc::new(move |args: Vec<Value>, _ctx: CallContext| -> Result<Value, Error> {
            if !args.is_empty() {
                return Err(Error::arity_error(0, args.len()));
            }
            (self)().map(Into::into)
        })
    }
}

impl_into_operation_for_arity!(1, p0: A1);
impl_into_operation_for_arity!(2, p0: A1, p1: A2);

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{sym, val};

    fn call(op: &Rc<OperationFn>, args: Vec<Value>) -> Result<Value, Error> {
        op(args, CallContext::default())
    }

    #[test]
    fn test_fixed_arity_adapter_converts_and_checks_count() {
        fn add(a: NumberType, b: NumberType) -> Result<NumberType, Error> {
            Ok(a + b)
        }
        let op = IntoOperation::<(NumberType, NumberType)>::into_operation(add);

        assert_eq!(call(&op, vec![val(2), val(3)]).unwrap(), val(5));
        assert_eq!(
            call(&op, vec![val(2)]).unwrap_err(),
            Error::arity_error(2, 1)
        );
        assert!(matches!(
            call(&op, vec![val(2), sym("x")]).unwrap_err(),
            Error::TypeError(_)
        ));
    }

    #[test]
    fn test_zero_arg_adapter_rejects_arguments() {
        fn answer() -> Result<NumberType, Error> {
            Ok(42)
        }
        let op = IntoOperation::<()>::into_operation(answer);

        assert_eq!(call(&op, vec![]).unwrap(), val(42));
        assert_eq!(call(&op, vec![val(1)]).unwrap_err(), Error::arity_error(0, 1));
    }

    #[test]
    fn test_variadic_adapters() {
        fn count(rest: Vec<Value>) -> Result<usize, Error> {
            Ok(rest.len())
        }
        fn scaled_sum(factor: Num, rest: Vec<Num>) -> Result<Num, Error> {
            let total: FloatType = rest.into_iter().map(Num::as_float).sum();
            Ok(Num::Float(factor.as_float() * total))
        }

        let count_op = IntoVariadicOperation::<(ValuesRest,)>::into_variadic_operation(count);
        assert_eq!(call(&count_op, vec![]).unwrap(), val(0));
        assert_eq!(call(&count_op, vec![val(1), sym("a")]).unwrap(), val(2));

        let sum_op =
            IntoVariadicOperation::<(Num, NumRest)>::into_variadic_operation(scaled_sum);
        assert_eq!(
            call(&sum_op, vec![val(2), val(1), val(1.5)]).unwrap(),
            val(5.0)
        );
        assert_eq!(call(&sum_op, vec![]).unwrap_err(), Error::arity_error(1, 0));
        assert!(call(&sum_op, vec![val(2), sym("x")]).is_err());
    }

    #[test]
    fn test_symbol_name_param() {
        fn shout(name: SymbolName) -> Result<String, Error> {
            Ok(name.0.to_uppercase())
        }
        let op = IntoOperation::<(SymbolName,)>::into_operation(shout);
        assert_eq!(call(&op, vec![sym("abc")]).unwrap(), sym("ABC"));
        assert!(call(&op, vec![val(1)]).is_err());
    }
}
