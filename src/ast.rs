//! Core value types shared by the reader, the evaluator and the primitives.
//!
//! [`Value`] is both the program representation and the runtime data: a
//! compound expression is simply a proper list of pairs whose head is an
//! operator. Lists are chains of [`Pair`] cells ending in [`Value::Nil`], so
//! improper (dotted) lists such as `(1 . 2)` are representable.
//!
//! Helper constructors [`val`], [`sym`] and [`nil`] keep test tables short.

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::Error;
use crate::evaluator::intooperation::OperationFn;
use crate::evaluator::{Arity, Environment};
use crate::stack::ensure_sufficient_stack;

/// Type alias for number values in interpreter
pub(crate) type NumberType = i64;

/// Allowed non-alphanumeric characters in symbol names
#[cfg_attr(not(feature = "scheme"), expect(dead_code))]
pub(crate) const SYMBOL_SPECIAL_CHARS: &str = "+-*/<>=!?_$";

/// Valid: non-empty, no leading digit, no "-digit" prefix, alphanumeric + `SYMBOL_SPECIAL_CHARS`
#[cfg_attr(not(feature = "scheme"), expect(dead_code))]
pub(crate) fn is_valid_symbol(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        None => false,
        Some(first_char) => {
            if first_char.is_ascii_digit() {
                return false;
            }

            if first_char == '-'
                && let Some(second_char) = chars.next()
                && second_char.is_ascii_digit()
            {
                return false;
            }

            name.chars()
                .all(|c| c.is_alphanumeric() || SYMBOL_SPECIAL_CHARS.contains(c))
        }
    }
}

/// Core value type in interpreter
///
/// To build values in code and tests, use the helper functions:
/// - `val(42)` for values, `sym("name")` for symbols, `nil()` for the empty list
/// - `val([1, 2, 3])` for homogeneous lists
/// - `val(vec![sym("op"), val(42)])` for mixed lists and compound expressions
#[derive(Clone)]
pub enum Value {
    /// The empty list
    Nil,
    Bool(bool),
    /// Numbers (integers only)
    Number(NumberType),
    Symbol(String),
    String(String),
    /// A cons cell; proper lists are chains of these ending in `Nil`
    Pair(Rc<Pair>),
    Procedure(Procedure),
    /// Result of forms with no useful value (`define`, one-armed `if`, ...)
    /// Equal only to itself
    Unspecified,
}

/// An immutable cons cell.
pub struct Pair {
    car: Value,
    cdr: Value,
}

impl Pair {
    pub fn car(&self) -> &Value {
        &self.car
    }

    pub fn cdr(&self) -> &Value {
        &self.cdr
    }
}

// Deeply nested data (through `car` or `cdr`) would otherwise be freed
// through one nested drop per level.
impl Drop for Pair {
    fn drop(&mut self) {
        if !matches!(self.car, Value::Pair(_)) && !matches!(self.cdr, Value::Pair(_)) {
            return;
        }

        let mut pending = vec![
            std::mem::replace(&mut self.car, Value::Nil),
            std::mem::replace(&mut self.cdr, Value::Nil),
        ];
        while let Some(value) = pending.pop() {
            // Shared pairs are still owned elsewhere; only unique ones are taken apart here.
            if let Value::Pair(rc) = value
                && let Ok(mut pair) = Rc::try_unwrap(rc)
            {
                pending.push(std::mem::replace(&mut pair.car, Value::Nil));
                pending.push(std::mem::replace(&mut pair.cdr, Value::Nil));
            }
        }
    }
}

/// Anything that can appear in operator position and be applied.
#[derive(Clone)]
pub enum Procedure {
    Closure(Rc<Closure>),
    Primitive(Rc<Primitive>),
}

/// A user-defined procedure together with the scope it was created in.
pub struct Closure {
    /// Set when the closure is bound through `define`; display and tracing only
    pub name: Option<String>,
    pub params: Vec<String>,
    /// Receives surplus arguments as a list, for `(lambda args ...)` and `(a . rest)` forms
    pub rest: Option<String>,
    /// Non-empty sequence of body expressions
    pub body: Vec<Value>,
    pub env: Rc<Environment>,
}

/// A native procedure.
pub struct Primitive {
    pub name: String,
    pub arity: Arity,
    // Stored as an Arc so typed Rust functions registered through the adapter
    // layer and entries of the static builtin table can share one representation.
    pub func: Arc<OperationFn>,
}

impl Procedure {
    pub fn name(&self) -> Option<&str> {
        match self {
            Procedure::Closure(closure) => closure.name.as_deref(),
            Procedure::Primitive(primitive) => Some(&primitive.name),
        }
    }

    fn ptr_eq(&self, other: &Procedure) -> bool {
        match (self, other) {
            (Procedure::Closure(a), Procedure::Closure(b)) => Rc::ptr_eq(a, b),
            (Procedure::Primitive(a), Procedure::Primitive(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Value {
    pub fn cons(car: impl Into<Value>, cdr: impl Into<Value>) -> Value {
        Value::Pair(Rc::new(Pair {
            car: car.into(),
            cdr: cdr.into(),
        }))
    }

    /// Build a proper list from the given elements.
    pub fn list<I>(items: I) -> Value
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: DoubleEndedIterator,
    {
        Self::list_with_tail(items, Value::Nil)
    }

    /// Build a list from the given elements ending in `tail` instead of `()`.
    pub fn list_with_tail<I>(items: I, tail: Value) -> Value
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: DoubleEndedIterator,
    {
        items
            .into_iter()
            .rev()
            .fold(tail, |acc, item| Value::cons(item, acc))
    }

    /// Iterate over the elements of a list. Stops at the first non-pair;
    /// [`ListIter::tail`] tells a proper list apart from a dotted one.
    pub fn iter(&self) -> ListIter<'_> {
        ListIter { current: self }
    }

    /// Borrow the elements of a proper list, or `None` for anything else.
    pub fn as_proper_list(&self) -> Option<Vec<&Value>> {
        let mut iter = self.iter();
        let items: Vec<&Value> = iter.by_ref().collect();
        iter.tail().is_nil().then_some(items)
    }

    /// Everything except `#f` counts as true.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Bool(false))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_pair(&self) -> bool {
        matches!(self, Value::Pair(_))
    }

    /// `()` or a chain of pairs ending in `()`
    pub fn is_list(&self) -> bool {
        let mut current = self;
        while let Value::Pair(pair) = current {
            current = &pair.cdr;
        }
        current.is_nil()
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Value::Symbol(name) => Some(name),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "empty list",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "integer",
            Value::Symbol(_) => "symbol",
            Value::String(_) => "string",
            Value::Pair(_) => "pair",
            Value::Procedure(_) => "procedure",
            Value::Unspecified => "unspecified",
        }
    }
}

/// Borrowing iterator over list elements.
pub struct ListIter<'a> {
    current: &'a Value,
}

impl<'a> ListIter<'a> {
    /// What is left once the pairs run out: `()` for a proper list.
    pub fn tail(&self) -> &'a Value {
        self.current
    }
}

impl<'a> Iterator for ListIter<'a> {
    type Item = &'a Value;

    fn next(&mut self) -> Option<&'a Value> {
        match self.current {
            Value::Pair(pair) => {
                self.current = &pair.cdr;
                Some(&pair.car)
            }
            _ => None,
        }
    }
}

impl std::iter::FusedIterator for ListIter<'_> {}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "Nil"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::Symbol(s) => write!(f, "Symbol({s})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Pair(_) => ensure_sufficient_stack(|| {
                write!(f, "List(")?;
                let mut iter = self.iter();
                for (i, v) in iter.by_ref().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v:?}")?;
                }
                if !iter.tail().is_nil() {
                    write!(f, " . {:?}", iter.tail())?;
                }
                write!(f, ")")
            }),
            Value::Procedure(Procedure::Closure(closure)) => write!(
                f,
                "Closure(name={:?}, params={:?}, rest={:?})",
                closure.name, closure.params, closure.rest
            ),
            Value::Procedure(Procedure::Primitive(primitive)) => {
                write!(f, "Primitive({})", primitive.name)
            }
            Value::Unspecified => write!(f, "Unspecified"),
        }
    }
}

impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", Value::Procedure(self.clone()))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "()"),
            Value::Bool(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
            Value::Number(n) => write!(f, "{n}"),
            Value::Symbol(s) => write!(f, "{s}"),
            Value::String(s) => {
                write!(f, "\"")?;
                for ch in s.chars() {
                    match ch {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        '\t' => write!(f, "\\t")?,
                        '\r' => write!(f, "\\r")?,
                        c => write!(f, "{c}")?,
                    }
                }
                write!(f, "\"")
            }
            // Nested elements recurse through `car`; the stack grows on demand
            Value::Pair(_) => ensure_sufficient_stack(|| {
                write!(f, "(")?;
                let mut iter = self.iter();
                for (i, elem) in iter.by_ref().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{elem}")?;
                }
                if !iter.tail().is_nil() {
                    write!(f, " . {}", iter.tail())?;
                }
                write!(f, ")")
            }),
            Value::Procedure(Procedure::Closure(closure)) => match &closure.name {
                Some(name) => write!(f, "#<procedure {name}>"),
                None => write!(f, "#<procedure>"),
            },
            Value::Procedure(Procedure::Primitive(primitive)) => {
                write!(f, "#<builtin-function:{}>", primitive.name)
            }
            Value::Unspecified => write!(f, "#<unspecified>"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        if !(self.is_pair() && other.is_pair()) {
            return shallow_eq(self, other);
        }

        // Explicit work list: nesting through either `car` or `cdr` must not recurse.
        let mut pending = vec![(self, other)];
        while let Some((a, b)) = pending.pop() {
            match (a, b) {
                (Value::Pair(x), Value::Pair(y)) => {
                    if !Rc::ptr_eq(x, y) {
                        pending.push((&x.cdr, &y.cdr));
                        pending.push((&x.car, &y.car));
                    }
                }
                _ => {
                    if !shallow_eq(a, b) {
                        return false;
                    }
                }
            }
        }
        true
    }
}

/// Equality for everything except pair/pair, which `eq` walks itself.
fn shallow_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Nil, Value::Nil) | (Value::Unspecified, Value::Unspecified) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::Symbol(x), Value::Symbol(y)) | (Value::String(x), Value::String(y)) => x == y,
        (Value::Procedure(x), Value::Procedure(y)) => x.ptr_eq(y),
        // Different variants never match; pair/pair is handled by the caller
        _ => false,
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Procedure> for Value {
    fn from(p: Procedure) -> Self {
        Value::Procedure(p)
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

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::list(v.into_iter().map(Into::into))
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(arr: [T; N]) -> Self {
        Value::list(arr.into_iter().map(Into::into))
    }
}

// Fallible conversions from `Value` back into primitive Rust types, used by
// the typed builtin adapters.

impl std::convert::TryInto<NumberType> for Value {
    type Error = Error;

    fn try_into(self) -> Result<NumberType, Error> {
        if let Value::Number(n) = self {
            Ok(n)
        } else {
            Err(Error::type_mismatch("integer", &self))
        }
    }
}

impl std::convert::TryInto<bool> for Value {
    type Error = Error;

    fn try_into(self) -> Result<bool, Error> {
        if let Value::Bool(b) = self {
            Ok(b)
        } else {
            Err(Error::type_mismatch("boolean", &self))
        }
    }
}

/// Helper function for creating symbols - works great in mixed lists!
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn sym<S: AsRef<str>>(name: S) -> Value {
    Value::Symbol(name.as_ref().to_owned())
}

/// Helper function for creating Values - works great in mixed lists!
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

/// The empty list
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn nil() -> Value {
    Value::Nil
}
