//! Built-in procedures installed in every global environment.
//!
//! Each entry of the registry pairs a Scheme identifier with an [`Arity`]
//! and an erased [`OperationFn`]. The implementations themselves are plain
//! typed Rust functions wired through the adapter layer in
//! [`crate::evaluator::intooperation`], the same path used for custom
//! builtins registered on an [`crate::Environment`].
//!
//! ```scheme
//! (+ 1 2 3)            ; => 6
//! (< 1 2 3)            ; => #t, chained
//! (cons 1 '(2))        ; => (1 2)
//! (list? (cons 1 2))   ; => #f
//! (not 0)              ; => #f, only #f is false
//! ```
//!
//! Special forms (`if`, `define`, `lambda`, ...) are syntax and live in the
//! evaluator, not here.
//!
//! ## Adding New Operations
//!
//! 1. Implement a typed function over `i64`, `bool`, `Value`, or the rest
//!    iterators [`NumArgs`] / [`ValueArgs`]
//! 2. Add it to `BUILTIN_OPS` with its identifier and arity
//! 3. Cover it in the table-driven tests below

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, LazyLock};

use crate::Error;
use crate::ast::{NumberType, Value};
use crate::evaluator::Arity;
use crate::evaluator::intooperation::{
    IntoOperation, IntoVariadicOperation, NumArgs, OperationFn, ValueArgs,
};

/// Definition of a built-in operation
#[derive(Clone)]
pub struct BuiltinOp {
    pub id: &'static str,
    pub func: Arc<OperationFn>,
    pub arity: Arity,
}

impl std::fmt::Debug for BuiltinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinOp")
            .field("id", &self.id)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

impl PartialEq for BuiltinOp {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

//
// Builtin Function Implementations
//

// Chained comparison: every adjacent pair must satisfy the operator.
macro_rules! numeric_comparison {
    ($name:ident, $op:tt) => {
        fn $name(first: NumberType, rest: NumArgs<'_>) -> bool {
            let mut prev = first;
            for current in rest {
                if !(prev $op current) {
                    return false;
                }
                prev = current;
            }
            true
        }
    };
}

numeric_comparison!(builtin_eq, ==);
numeric_comparison!(builtin_lt, <);
numeric_comparison!(builtin_gt, >);
numeric_comparison!(builtin_le, <=);
numeric_comparison!(builtin_ge, >=);

fn builtin_add(args: NumArgs<'_>) -> Result<NumberType, Error> {
    args.into_iter().try_fold(0, |sum: NumberType, n| {
        sum.checked_add(n)
            .ok_or_else(|| Error::EvalError("Integer overflow in addition".into()))
    })
}

fn builtin_sub(first: NumberType, rest: NumArgs<'_>) -> Result<NumberType, Error> {
    if rest.len() == 0 {
        return first
            .checked_neg()
            .ok_or_else(|| Error::EvalError("Integer overflow in negation".into()));
    }

    rest.into_iter().try_fold(first, |acc, n| {
        acc.checked_sub(n)
            .ok_or_else(|| Error::EvalError("Integer overflow in subtraction".into()))
    })
}

fn builtin_mul(args: NumArgs<'_>) -> Result<NumberType, Error> {
    args.into_iter().try_fold(1, |product: NumberType, n| {
        product
            .checked_mul(n)
            .ok_or_else(|| Error::EvalError("Integer overflow in multiplication".into()))
    })
}

fn builtin_cons(car: Value, cdr: Value) -> Value {
    Value::cons(car, cdr)
}

fn builtin_list(args: ValueArgs<'_>) -> Value {
    Value::list(args.cloned().collect::<Vec<_>>())
}

fn builtin_car(value: Value) -> Result<Value, Error> {
    match &value {
        Value::Pair(pair) => Ok(pair.car().clone()),
        other => Err(Error::type_mismatch("pair", other)),
    }
}

fn builtin_cdr(value: Value) -> Result<Value, Error> {
    match &value {
        Value::Pair(pair) => Ok(pair.cdr().clone()),
        other => Err(Error::type_mismatch("pair", other)),
    }
}

fn builtin_is_pair(value: Value) -> bool {
    value.is_pair()
}

fn builtin_is_list(value: Value) -> bool {
    value.is_list()
}

fn builtin_is_null(value: Value) -> bool {
    value.is_nil()
}

fn builtin_not(value: Value) -> bool {
    !value.is_truthy()
}

fn builtin_equal(first: Value, second: Value) -> bool {
    first == second
}

/// Text written by `display`: strings without quotes, everything else as printed.
fn display_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn write_stdout(text: &str) -> Result<Value, Error> {
    let mut out = std::io::stdout().lock();
    out.write_all(text.as_bytes())
        .and_then(|()| out.flush())
        .map_err(|err| Error::EvalError(format!("failed to write output: {err}")))?;
    Ok(Value::Unspecified)
}

fn builtin_display(value: Value) -> Result<Value, Error> {
    write_stdout(&display_text(&value))
}

fn builtin_newline() -> Result<Value, Error> {
    write_stdout("\n")
}

fn builtin_assert(value: Value) -> Result<Value, Error> {
    if value.is_truthy() {
        Ok(Value::Unspecified)
    } else {
        Err(Error::AssertionFailed(format!("{value} is false")))
    }
}

fn builtin_assert_eq(actual: Value, expected: Value) -> Result<Value, Error> {
    if actual == expected {
        Ok(Value::Unspecified)
    } else {
        Err(Error::AssertionFailed(format!(
            "expected {expected}, got {actual}"
        )))
    }
}

fn builtin_error(args: ValueArgs<'_>) -> Result<Value, Error> {
    let parts: Vec<String> = args.map(display_text).collect();

    let message = if parts.is_empty() {
        "Error".to_owned()
    } else {
        parts.join(" ")
    };

    Err(Error::EvalError(message))
}

/// Global registry of all built-in operations, built once through the
/// typed adapter layer.
static BUILTIN_OPS: LazyLock<Vec<BuiltinOp>> = LazyLock::new(|| {
    fn builtin_fixed<Args, F>(f: F) -> Arc<OperationFn>
    where
        F: IntoOperation<Args>,
    {
        <F as IntoOperation<Args>>::into_operation(f)
    }

    fn builtin_variadic<Args, F>(f: F) -> Arc<OperationFn>
    where
        F: IntoVariadicOperation<Args>,
    {
        <F as IntoVariadicOperation<Args>>::into_variadic_operation(f)
    }

    fn comparison(id: &'static str, f: fn(NumberType, NumArgs<'_>) -> bool) -> BuiltinOp {
        BuiltinOp {
            id,
            func: builtin_variadic::<(NumberType, NumArgs<'static>), _>(f),
            arity: Arity::AtLeast(1),
        }
    }

    vec![
        // Arithmetic
        BuiltinOp {
            id: "+",
            func: builtin_variadic::<(NumArgs<'static>,), _>(builtin_add),
            arity: Arity::Any,
        },
        BuiltinOp {
            id: "-",
            func: builtin_variadic::<(NumberType, NumArgs<'static>), _>(builtin_sub),
            arity: Arity::AtLeast(1),
        },
        BuiltinOp {
            id: "*",
            func: builtin_variadic::<(NumArgs<'static>,), _>(builtin_mul),
            arity: Arity::Any,
        },
        // Comparison
        comparison("=", builtin_eq),
        comparison("<", builtin_lt),
        comparison(">", builtin_gt),
        comparison("<=", builtin_le),
        comparison(">=", builtin_ge),
        // Pairs and lists
        BuiltinOp {
            id: "cons",
            func: builtin_fixed::<(Value, Value), _>(builtin_cons),
            arity: Arity::Exact(2),
        },
        BuiltinOp {
            id: "list",
            func: builtin_variadic::<(ValueArgs<'static>,), _>(builtin_list),
            arity: Arity::Any,
        },
        BuiltinOp {
            id: "car",
            func: builtin_fixed::<(Value,), _>(builtin_car),
            arity: Arity::Exact(1),
        },
        BuiltinOp {
            id: "cdr",
            func: builtin_fixed::<(Value,), _>(builtin_cdr),
            arity: Arity::Exact(1),
        },
        BuiltinOp {
            id: "pair?",
            func: builtin_fixed::<(Value,), _>(builtin_is_pair),
            arity: Arity::Exact(1),
        },
        BuiltinOp {
            id: "list?",
            func: builtin_fixed::<(Value,), _>(builtin_is_list),
            arity: Arity::Exact(1),
        },
        BuiltinOp {
            id: "null?",
            func: builtin_fixed::<(Value,), _>(builtin_is_null),
            arity: Arity::Exact(1),
        },
        // Logic and equality
        BuiltinOp {
            id: "not",
            func: builtin_fixed::<(Value,), _>(builtin_not),
            arity: Arity::Exact(1),
        },
        BuiltinOp {
            id: "equal?",
            func: builtin_fixed::<(Value, Value), _>(builtin_equal),
            arity: Arity::Exact(2),
        },
        // Output
        BuiltinOp {
            id: "display",
            func: builtin_fixed::<(Value,), _>(builtin_display),
            arity: Arity::Exact(1),
        },
        BuiltinOp {
            id: "newline",
            func: builtin_fixed::<(), _>(builtin_newline),
            arity: Arity::Exact(0),
        },
        // Test harness and errors
        BuiltinOp {
            id: "assert",
            func: builtin_fixed::<(Value,), _>(builtin_assert),
            arity: Arity::Exact(1),
        },
        BuiltinOp {
            id: "assert-eq",
            func: builtin_fixed::<(Value, Value), _>(builtin_assert_eq),
            arity: Arity::Exact(2),
        },
        BuiltinOp {
            id: "error",
            func: builtin_variadic::<(ValueArgs<'static>,), _>(builtin_error),
            arity: Arity::Any,
        },
    ]
});

/// Lazy static map from id to `BuiltinOp` (private - use `find_builtin_op`)
static BUILTIN_BY_ID: LazyLock<HashMap<&'static str, &'static BuiltinOp>> = LazyLock::new(|| {
    let ops: &'static [BuiltinOp] = BUILTIN_OPS.as_slice();
    ops.iter().map(|op| (op.id, op)).collect()
});

/// All builtin operations, in registration order
pub fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS.as_slice()
}

pub fn find_builtin_op(id: &str) -> Option<&'static BuiltinOp> {
    BUILTIN_BY_ID.get(id).copied()
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{nil, sym, val};
    use pretty_assertions::assert_eq;

    fn success<T: Into<Value>>(value: T) -> Option<Value> {
        Some(val(value))
    }

    /// Invoke a builtin through the registry, checking arity the way the
    /// evaluator does before calling the erased function.
    fn call_builtin(name: &str, args: &[Value]) -> Result<Value, Error> {
        let op = find_builtin_op(name).unwrap();
        op.arity.validate(args.len())?;
        (op.func)(args.to_vec())
    }

    #[test]
    fn test_builtin_ops_registry() {
        let not_op = find_builtin_op("not").unwrap();
        assert_eq!(not_op.arity, Arity::Exact(1));

        let add_op = find_builtin_op("+").unwrap();
        assert_eq!(add_op.arity, Arity::Any);
        assert_eq!((add_op.func)(vec![val(1), val(2)]).unwrap(), val(3));

        let all_ops = get_builtin_ops();
        for id in [
            "+", "-", "*", "<", "<=", ">", ">=", "=", "cons", "list", "pair?", "list?", "not",
        ] {
            assert!(all_ops.iter().any(|op| op.id == id), "missing builtin {id}");
        }

        // Special forms are not procedures
        for id in ["if", "cond", "define", "lambda", "quote", "unknown"] {
            assert!(find_builtin_op(id).is_none(), "{id} should not be a builtin");
        }
    }

    /// Macro to create test cases, invoking builtins via the registry.
    macro_rules! test {
        ($name:expr, $args:expr, $expected:expr) => {
            ($name, call_builtin($name, $args), $expected)
        };
    }

    #[test]
    #[expect(clippy::too_many_lines)] // Comprehensive test coverage is intentionally thorough
    fn test_builtin_function_implementations() {
        type TestCase = (&'static str, Result<Value, Error>, Option<Value>);

        let many_ones: Vec<Value> = (0..100).map(|_| val(1)).collect();
        let all_threes: Vec<Value> = (0..6).map(|_| val(3)).collect();
        let mut mostly_threes = all_threes.clone();
        mostly_threes.push(val(4));
        let dotted = Value::cons(1, 2);
        let int_list = val([1, 2, 3]);

        let test_cases: Vec<TestCase> = vec![
            // =================================================================
            // ARITHMETIC
            // =================================================================
            test!("+", &[], success(0)),
            test!("+", &[val(5)], success(5)),
            test!("+", &[val(1), val(2), val(3)], success(6)),
            test!("+", &[val(-5), val(10)], success(5)),
            test!("+", &many_ones, success(100)),
            test!("+", &[val(i64::MAX), val(1)], None),
            test!("+", &[val(1), val(true)], None),
            test!("-", &[val(10)], success(-10)),
            test!("-", &[val(10), val(3), val(2)], success(5)),
            test!("-", &[val(i64::MIN)], None),
            test!("-", &[val(i64::MIN), val(1)], None),
            test!("-", &[], None),
            test!("*", &[], success(1)),
            test!("*", &[val(7)], success(7)),
            test!("*", &[val(2), val(3), val(4)], success(24)),
            test!("*", &[val(i64::MAX), val(2)], None),
            test!("*", &[val("2"), val(3)], None),
            // =================================================================
            // COMPARISON
            // =================================================================
            test!("=", &all_threes, success(true)),
            test!("=", &mostly_threes, success(false)),
            test!("=", &[val(3), val(3), val(4)], success(false)),
            test!("=", &[val(7)], success(true)),
            test!("=", &[], None),
            test!("=", &[val(1), sym("a")], None),
            test!("<", &[val(1), val(2), val(3)], success(true)),
            test!("<", &[val(1), val(3), val(2)], success(false)),
            test!("<", &[val(1), val(1)], success(false)),
            test!("<=", &[val(1), val(1), val(2)], success(true)),
            test!("<=", &[val(2), val(1)], success(false)),
            test!(">", &[val(3), val(2), val(1)], success(true)),
            test!(">", &[val(3), val(3)], success(false)),
            test!(">=", &[val(3), val(3), val(1)], success(true)),
            test!(">=", &[val(1), val(3)], success(false)),
            // =================================================================
            // PAIRS AND LISTS
            // =================================================================
            test!("cons", &[val(1), val(2)], Some(Value::cons(1, 2))),
            test!("cons", &[val(1), nil()], success([1])),
            test!("cons", &[val(1), val([2, 3])], success([1, 2, 3])),
            test!("cons", &[val(1)], None),
            test!("list", &[], Some(nil())),
            test!("list", &[val(1), val(2), val(3)], Some(int_list.clone())),
            test!("car", &[int_list.clone()], success(1)),
            test!("cdr", &[int_list.clone()], success([2, 3])),
            test!("car", &[dotted.clone()], success(1)),
            test!("cdr", &[dotted.clone()], success(2)),
            test!("car", &[nil()], None),
            test!("cdr", &[val(5)], None),
            test!("pair?", &[dotted.clone()], success(true)),
            test!("pair?", &[int_list.clone()], success(true)),
            test!("pair?", &[nil()], success(false)),
            test!("pair?", &[val(1)], success(false)),
            test!("list?", &[dotted.clone()], success(false)),
            test!("list?", &[int_list.clone()], success(true)),
            test!("list?", &[nil()], success(true)),
            test!("list?", &[sym("x")], success(false)),
            test!("null?", &[nil()], success(true)),
            test!("null?", &[int_list.clone()], success(false)),
            // =================================================================
            // LOGIC AND EQUALITY
            // =================================================================
            test!("not", &[val(false)], success(true)),
            test!("not", &[val(true)], success(false)),
            test!("not", &[val(0)], success(false)),
            test!("not", &[nil()], success(false)),
            test!("not", &[], None),
            test!("equal?", &[val([1, 2]), val([1, 2])], success(true)),
            test!("equal?", &[dotted.clone(), Value::cons(1, 2)], success(true)),
            test!("equal?", &[val(1), val("1")], success(false)),
            test!("equal?", &[sym("a"), sym("a")], success(true)),
            test!("equal?", &[Value::Unspecified, Value::Unspecified], success(true)),
            test!("equal?", &[Value::Unspecified, nil()], success(false)),
            // =================================================================
            // HARNESS
            // =================================================================
            test!("assert", &[val(0)], Some(Value::Unspecified)),
            test!("assert", &[val(false)], None),
            test!("assert-eq", &[val(1), val(1)], Some(Value::Unspecified)),
            test!("assert-eq", &[val(1), val(2)], None),
            test!("error", &[val("bad"), val(1)], None),
            test!("newline", &[val(1)], None),
        ];

        for (i, (name, result, expected)) in test_cases.into_iter().enumerate() {
            match (result, expected) {
                (Ok(actual), Some(expected)) => {
                    assert_eq!(actual, expected, "Test #{} ({name}) returned wrong value", i + 1);
                }
                (Err(_), None) => {}
                (Ok(actual), None) => {
                    panic!("Test #{} ({name}): expected error, got {actual:?}", i + 1);
                }
                (Err(err), Some(expected)) => {
                    panic!("Test #{} ({name}): expected {expected:?}, got error {err:?}", i + 1);
                }
            }
        }
    }

    #[test]
    fn test_error_messages() {
        let test_cases = vec![
            (
                call_builtin("+", &[val(1), sym("x")]),
                Error::TypeMismatch {
                    expected: "integer",
                    found: "x".to_owned(),
                },
            ),
            (
                call_builtin("+", &[val(i64::MAX), val(1)]),
                Error::EvalError("Integer overflow in addition".to_owned()),
            ),
            (
                call_builtin("car", &[nil()]),
                Error::TypeMismatch {
                    expected: "pair",
                    found: "()".to_owned(),
                },
            ),
            (
                call_builtin("cons", &[val(1)]),
                Error::ArityError {
                    expected: Arity::Exact(2),
                    got: 1,
                },
            ),
            (
                call_builtin("error", &[val("bad thing:"), val(42), sym("x")]),
                Error::EvalError("bad thing: 42 x".to_owned()),
            ),
            (
                call_builtin("error", &[]),
                Error::EvalError("Error".to_owned()),
            ),
            (
                call_builtin("assert-eq", &[val([1]), val(2)]),
                Error::AssertionFailed("expected 2, got (1)".to_owned()),
            ),
        ];

        for (result, expected) in test_cases {
            assert_eq!(result, Err(expected));
        }
    }

    #[test]
    fn test_display_text() {
        assert_eq!(display_text(&val("hi")), "hi");
        assert_eq!(display_text(&val([1, 2])), "(1 2)");
        assert_eq!(display_text(&val(false)), "#f");
    }
}
