//! Adapter layer turning strongly-typed Rust functions into the erased
//! [`OperationFn`] stored in [`crate::ast::Primitive`].
//!
//! Application code normally only names the iterator aliases [`ValueArgs`]
//! and [`NumArgs`] in builtin signatures, and otherwise goes through the
//! registration methods on [`crate::Environment`].

use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::Error;
use crate::ast::{NumberType, Value};
use crate::evaluator::Arity;

/// Canonical erased builtin function type used by the evaluator.
///
/// Builtins receive ownership of their argument vector, so implementations
/// can move values out of it instead of cloning.
pub type OperationFn = dyn Fn(Vec<Value>) -> Result<Value, Error> + Send + Sync;

// ---------------------------------------------------------------------
// Single-argument conversion
// ---------------------------------------------------------------------

/// Converts one evaluated argument into a typed parameter.
#[doc(hidden)]
pub trait FromArg {
    type Param<'a>;

    fn from_arg(value: &mut Value) -> Result<Self::Param<'_>, Error>;
}

impl FromArg for Value {
    type Param<'a> = Value;

    fn from_arg(value: &mut Value) -> Result<Self::Param<'_>, Error> {
        Ok(std::mem::replace(value, Value::Unspecified))
    }
}

// Covers `i64` and `bool`, via the `TryInto` impls in `ast.rs`.
impl<T> FromArg for T
where
    Value: TryInto<T, Error = Error>,
{
    type Param<'a> = T;

    fn from_arg(value: &mut Value) -> Result<Self::Param<'_>, Error> {
        std::mem::replace(value, Value::Unspecified).try_into()
    }
}

// ---------------------------------------------------------------------
// Rest arguments
// ---------------------------------------------------------------------

/// Describes how each element of a rest-argument slice is checked and viewed.
#[doc(hidden)]
pub trait ArgKind {
    type Item<'a>;

    fn check(value: &Value) -> Result<(), Error>;
    fn project(value: &Value) -> Self::Item<'_>;
}

/// Iterator over the trailing arguments of a call. All elements are
/// validated by `K` before the builtin body runs.
#[doc(hidden)]
pub struct ArgIter<'a, K: ArgKind> {
    inner: std::slice::Iter<'a, Value>,
    _marker: PhantomData<K>,
}

impl<'a, K: ArgKind> ArgIter<'a, K> {
    pub(crate) fn new(values: &'a [Value]) -> Result<Self, Error> {
        values.iter().try_for_each(K::check)?;
        Ok(ArgIter {
            inner: values.iter(),
            _marker: PhantomData,
        })
    }
}

impl<'a, K: ArgKind> Iterator for ArgIter<'a, K> {
    type Item = K::Item<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(K::project)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K: ArgKind> ExactSizeIterator for ArgIter<'_, K> {}
impl<K: ArgKind> FusedIterator for ArgIter<'_, K> {}

#[doc(hidden)]
pub struct AnyKind;

impl ArgKind for AnyKind {
    type Item<'a> = &'a Value;

    fn check(_value: &Value) -> Result<(), Error> {
        Ok(())
    }

    fn project(value: &Value) -> Self::Item<'_> {
        value
    }
}

#[doc(hidden)]
pub struct NumberKind;

impl ArgKind for NumberKind {
    type Item<'a> = NumberType;

    fn check(value: &Value) -> Result<(), Error> {
        match value {
            Value::Number(_) => Ok(()),
            other => Err(Error::type_mismatch("integer", other)),
        }
    }

    fn project(value: &Value) -> Self::Item<'_> {
        if let Value::Number(n) = value {
            *n
        } else {
            debug_assert!(false, "NumberKind::project saw a non-integer after check");
            unreachable!("NumberKind invariant violated")
        }
    }
}

/// Trailing arguments as borrowed values.
pub type ValueArgs<'a> = ArgIter<'a, AnyKind>;

/// Trailing arguments, all checked to be integers.
pub type NumArgs<'a> = ArgIter<'a, NumberKind>;

/// Builds a rest parameter from the trailing slice of arguments.
#[doc(hidden)]
pub trait FromRest {
    type Param<'a>;

    fn from_rest(slice: &[Value]) -> Result<Self::Param<'_>, Error>;
}

impl<K: ArgKind> FromRest for ArgIter<'static, K> {
    type Param<'a> = ArgIter<'a, K>;

    fn from_rest(slice: &[Value]) -> Result<Self::Param<'_>, Error> {
        ArgIter::new(slice)
    }
}

// ---------------------------------------------------------------------
// Return values
// ---------------------------------------------------------------------

/// Normalizes builtin return types to `Result<Value, Error>`.
#[doc(hidden)]
pub trait IntoValueResult {
    fn into_value_result(self) -> Result<Value, Error>;
}

impl<T> IntoValueResult for Result<T, Error>
where
    T: Into<Value>,
{
    fn into_value_result(self) -> Result<Value, Error> {
        self.map(Into::into)
    }
}

impl<T> IntoValueResult for T
where
    T: Into<Value>,
{
    fn into_value_result(self) -> Result<Value, Error> {
        Ok(self.into())
    }
}

// ---------------------------------------------------------------------
// Operation traits
// ---------------------------------------------------------------------

/// Fixed-arity Rust functions usable as builtins, parameterized by the
/// tuple of their parameter types.
pub trait IntoOperation<Args> {
    /// Argument count implied by the signature
    fn arity() -> Arity;

    fn into_operation(self) -> Arc<OperationFn>;
}

/// Rust functions whose last parameter is a rest iterator.
pub trait IntoVariadicOperation<Args> {
    fn into_variadic_operation(self) -> Arc<OperationFn>;
}

impl<F, I, R> IntoVariadicOperation<(I,)> for F
where
    I: FromRest,
    F: for<'a> Fn(<I as FromRest>::Param<'a>) -> R + Send + Sync + 'static,
    R: IntoValueResult,
{
    fn into_variadic_operation(self) -> Arc<OperationFn> {
        Arc::new(move |args: Vec<Value>| {
            let rest = I::from_rest(&args)?;
            (self)(rest).into_value_result()
        })
    }
}

macro_rules! impl_variadic_with_prefix {
    ($prefix:expr, $( $v:ident, $p:ident : $A:ident ),+ ) => {
        impl<F, I, R, $( $A ),+> IntoVariadicOperation<( $( $A, )+ I, )> for F
        where
            I: FromRest,
            $( $A: FromArg, )+
            F: for<'a> Fn(
                    $( <$A as FromArg>::Param<'a> ),+,
                    <I as FromRest>::Param<'a>,
                ) -> R
                + Send
                + Sync
                + 'static,
            R: IntoValueResult,
        {
            fn into_variadic_operation(self) -> Arc<OperationFn> {
                Arc::new(move |mut args: Vec<Value>| {
                    let len = args.len();
                    match args.as_mut_slice() {
                        [ $( $v ),+, rest @ .. ] => {
                            $( let $p = <$A as FromArg>::from_arg($v)?; )+
                            let rest = I::from_rest(rest)?;
                            (self)( $( $p ),+, rest ).into_value_result()
                        }
                        _ => Err(Error::arity_error(Arity::AtLeast($prefix), len)),
                    }
                })
            }
        }
    };
}

impl_variadic_with_prefix!(1, v0, p0: A1);
impl_variadic_with_prefix!(2, v0, p0: A1, v1, p1: A2);
impl_variadic_with_prefix!(3, v0, p0: A1, v1, p1: A2, v2, p2: A3);

impl<F, R> IntoOperation<()> for F
where
    F: Fn() -> R + Send + Sync + 'static,
    R: IntoValueResult,
{
    fn arity() -> Arity {
        Arity::Exact(0)
    }

    fn into_operation(self) -> Arc<OperationFn> {
        Arc::new(move |args: Vec<Value>| {
            if !args.is_empty() {
                return Err(Error::arity_error(Arity::Exact(0), args.len()));
            }
            (self)().into_value_result()
        })
    }
}

macro_rules! impl_fixed_arity {
    ($arity:expr, $( $v:ident, $p:ident : $A:ident ),+ ) => {
        impl<F, R, $( $A ),+> IntoOperation<( $( $A, )+ )> for F
        where
            F: for<'a> Fn( $( <$A as FromArg>::Param<'a> ),+ ) -> R
                + Send
                + Sync
                + 'static,
            $( $A: FromArg, )+
            R: IntoValueResult,
        {
            fn arity() -> Arity {
                Arity::Exact($arity)
            }

            fn into_operation(self) -> Arc<OperationFn> {
                Arc::new(move |mut args: Vec<Value>| {
                    let len = args.len();
                    match args.as_mut_slice() {
                        [ $( $v ),+ ] => {
                            $( let $p = <$A as FromArg>::from_arg($v)?; )+
                            (self)( $( $p ),+ ).into_value_result()
                        }
                        _ => Err(Error::arity_error(Arity::Exact($arity), len)),
                    }
                })
            }
        }
    };
}

impl_fixed_arity!(1, v0, p0: A1);
impl_fixed_arity!(2, v0, p0: A1, v1, p1: A2);
impl_fixed_arity!(3, v0, p0: A1, v1, p1: A2, v2, p2: A3);
impl_fixed_arity!(4, v0, p0: A1, v1, p1: A2, v2, p2: A3, v3, p3: A4);
