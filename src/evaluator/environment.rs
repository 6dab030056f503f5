use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::Error;
use crate::ast::{Primitive, Procedure, Value};
use crate::evaluator::Arity;
use crate::evaluator::intooperation::{IntoOperation, IntoVariadicOperation, OperationFn};

/// A lexical scope: local bindings plus an optional enclosing scope.
///
/// Scopes are shared through `Rc`; a closure keeps the scope it was created
/// in alive, and every closure created in the same call sees the same
/// bindings. The global environment is the only scope without a parent.
#[derive(Default)]
pub struct Environment {
    bindings: RefCell<HashMap<String, Value>>,
    parent: Option<Rc<Environment>>,
}

impl Environment {
    /// A new root scope with no bindings. See [`crate::create_global_env`]
    /// for one populated with the builtin procedures.
    pub fn new() -> Rc<Self> {
        Rc::new(Environment::default())
    }

    pub fn with_parent(parent: &Rc<Environment>) -> Rc<Self> {
        Rc::new(Environment {
            bindings: RefCell::new(HashMap::new()),
            parent: Some(Rc::clone(parent)),
        })
    }

    /// Create the call frame for a procedure invocation.
    ///
    /// Binds `params` positionally; if `rest` is present, surplus
    /// arguments are collected into a proper list bound to it.
    pub fn extend(
        parent: &Rc<Environment>,
        params: &[String],
        rest: Option<&str>,
        args: Vec<Value>,
    ) -> Result<Rc<Self>, Error> {
        let arity = match rest {
            Some(_) => Arity::AtLeast(params.len()),
            None => Arity::Exact(params.len()),
        };
        arity.validate(args.len())?;

        let frame = Environment::with_parent(parent);
        {
            let mut bindings = frame.bindings.borrow_mut();
            let mut args = args.into_iter();
            for (param, arg) in params.iter().zip(args.by_ref()) {
                bindings.insert(param.clone(), arg);
            }
            if let Some(rest) = rest {
                bindings.insert(rest.to_owned(), Value::list(args));
            }
        }
        Ok(frame)
    }

    /// Bind `name` in this scope, replacing any existing local binding.
    /// Enclosing scopes are never touched.
    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.bindings.borrow_mut().insert(name.into(), value);
    }

    /// Resolve `name` through this scope and its ancestors.
    pub fn get(&self, name: &str) -> Option<Value> {
        let mut scope = self;
        loop {
            if let Some(value) = scope.bindings.borrow().get(name) {
                return Some(value.clone());
            }
            scope = scope.parent.as_deref()?;
        }
    }

    pub fn lookup(&self, name: &str) -> Result<Value, Error> {
        self.get(name)
            .ok_or_else(|| Error::UnboundVariable(name.to_owned()))
    }

    pub fn is_bound_locally(&self, name: &str) -> bool {
        self.bindings.borrow().contains_key(name)
    }

    pub fn parent(&self) -> Option<&Rc<Environment>> {
        self.parent.as_ref()
    }

    /// Whether the only strong references left to `frame` are the
    /// caller's own and those of closures bound in it that nothing else holds.
    ///
    /// Such a frame and its local procedures keep each other alive and are
    /// otherwise unreachable. The global scope never qualifies.
    pub(crate) fn is_reclaimable(frame: &Rc<Environment>) -> bool {
        if frame.parent.is_none() {
            return false;
        }
        let internal = frame
            .bindings
            .borrow()
            .values()
            .filter(|value| match value {
                Value::Procedure(Procedure::Closure(closure)) => {
                    Rc::strong_count(closure) == 1 && Rc::ptr_eq(&closure.env, frame)
                }
                _ => false,
            })
            .count();
        Rc::strong_count(frame) == 1 + internal
    }

    /// Drop every binding in this scope.
    ///
    /// Closures defined at top level hold the global environment they live in,
    /// so the global scope and those closures keep each other alive. Clearing
    /// the scope releases them. Call frames are cleared by the evaluator once
    /// they go out of scope.
    pub fn clear(&self) {
        let drained: Vec<Value> = self.bindings.borrow_mut().drain().map(|(_, v)| v).collect();
        // Values are dropped after the borrow ends; a closure being freed may
        // reach back into this scope.
        drop(drained);
    }

    /// Register a native procedure working directly on the evaluated arguments.
    ///
    /// # Example
    /// ```
    /// use scheme_engine::{Arity, create_global_env};
    /// use scheme_engine::ast::Value;
    ///
    /// let env = create_global_env();
    /// env.register_primitive("count-args", Arity::Any, |args| {
    ///     Ok(Value::Number(args.len() as i64))
    /// });
    /// // Now (count-args 1 2 3) evaluates to 3
    /// ```
    pub fn register_primitive<F>(&self, name: &str, arity: Arity, func: F)
    where
        F: Fn(&[Value]) -> Result<Value, Error> + Send + Sync + 'static,
    {
        let wrapped: Arc<OperationFn> = Arc::new(move |args: Vec<Value>| func(&args));
        self.define_primitive(name, arity, wrapped);
    }

    /// Register a strongly-typed Rust function as a builtin operation using
    /// automatic argument extraction and result conversion.
    ///
    /// ```
    /// use scheme_engine::create_global_env;
    ///
    /// fn add(a: i64, b: i64) -> i64 { a + b }
    /// let env = create_global_env();
    /// env.register_builtin_operation::<_, (i64, i64)>("add", add);
    /// ```
    ///
    /// Supported parameter types are `i64`, `bool` and `Value`. Return types
    /// may be anything `Into<Value>`, or `Result<T, Error>` of one.
    /// Arity is derived from the signature; conversion failures yield
    /// [`Error::TypeMismatch`].
    pub fn register_builtin_operation<F, Args>(&self, name: &str, func: F)
    where
        F: IntoOperation<Args> + 'static,
    {
        let arity = F::arity();
        self.define_primitive(name, arity, func.into_operation());
    }

    /// Register a builtin whose last parameter receives the remaining
    /// arguments as an iterator ([`super::intooperation::ValueArgs`] or
    /// [`super::intooperation::NumArgs`]), optionally after a fixed prefix.
    ///
    /// The provided [`Arity`] is checked at call time, since the minimum
    /// or maximum count is not always derivable from the signature alone.
    pub fn register_variadic_builtin_operation<F, Args>(&self, name: &str, arity: Arity, func: F)
    where
        F: IntoVariadicOperation<Args> + 'static,
    {
        self.define_primitive(name, arity, func.into_variadic_operation());
    }

    fn define_primitive(&self, name: &str, arity: Arity, func: Arc<OperationFn>) {
        let primitive = Primitive {
            name: name.to_owned(),
            arity,
            func,
        };
        self.define(name, Value::Procedure(Procedure::Primitive(Rc::new(primitive))));
    }

    /// Get all bindings visible from this scope, sorted by name.
    /// Inner bindings shadow outer ones.
    pub fn get_all_bindings(&self) -> Vec<(String, Value)> {
        let mut chain = vec![self];
        while let Some(parent) = chain.last().copied().and_then(|scope| scope.parent.as_deref()) {
            chain.push(parent);
        }

        let mut bindings = HashMap::new();
        for scope in chain.into_iter().rev() {
            for (name, value) in scope.bindings.borrow().iter() {
                bindings.insert(name.clone(), value.clone());
            }
        }

        let mut result: Vec<_> = bindings.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bindings = self.bindings.borrow();
        let mut names: Vec<&String> = bindings.keys().collect();
        names.sort();
        f.debug_struct("Environment")
            .field("bindings", &names)
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{Closure, val};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_define_and_lookup_through_parents() {
        let global = Environment::new();
        global.define("x", val(1));
        global.define("y", val(2));

        let child = Environment::with_parent(&global);
        child.define("x", val(10));

        assert_eq!(child.lookup("x").unwrap(), val(10));
        assert_eq!(child.lookup("y").unwrap(), val(2));
        assert_eq!(global.lookup("x").unwrap(), val(1));
        assert!(!global.is_bound_locally("z"));
        assert_eq!(
            child.lookup("z"),
            Err(Error::UnboundVariable("z".to_owned()))
        );
    }

    #[test]
    fn test_redefine_replaces_binding() {
        let env = Environment::new();
        env.define("x", val(1));
        env.define("x", val(2));
        assert_eq!(env.lookup("x").unwrap(), val(2));
        assert_eq!(env.get_all_bindings().len(), 1);
    }

    #[test]
    fn test_extend_binds_params_and_rest() {
        let global = Environment::new();
        let params = vec!["a".to_owned(), "b".to_owned()];

        let frame =
            Environment::extend(&global, &params, None, vec![val(1), val(2)]).unwrap();
        assert_eq!(frame.lookup("a").unwrap(), val(1));
        assert_eq!(frame.lookup("b").unwrap(), val(2));
        assert!(frame.parent().is_some_and(|p| Rc::ptr_eq(p, &global)));

        let frame = Environment::extend(
            &global,
            &params,
            Some("rest"),
            vec![val(1), val(2), val(3), val(4)],
        )
        .unwrap();
        assert_eq!(frame.lookup("rest").unwrap(), val([3, 4]));

        let frame = Environment::extend(&global, &params, Some("rest"), vec![val(1), val(2)])
            .unwrap();
        assert_eq!(frame.lookup("rest").unwrap(), Value::Nil);
    }

    #[test]
    fn test_extend_arity_mismatch() {
        let global = Environment::new();
        let params = vec!["a".to_owned()];

        let test_cases = vec![
            (None, vec![], Arity::Exact(1), 0),
            (None, vec![val(1), val(2)], Arity::Exact(1), 2),
            (Some("rest"), vec![], Arity::AtLeast(1), 0),
        ];

        for (rest, args, expected, got) in test_cases {
            let err = Environment::extend(&global, &params, rest, args).unwrap_err();
            assert_eq!(err, Error::ArityError { expected, got });
        }
    }

    #[test]
    fn test_get_all_bindings_shadowing() {
        let global = Environment::new();
        global.define("a", val(1));
        global.define("b", val(2));
        let child = Environment::with_parent(&global);
        child.define("b", val(20));

        let names: Vec<(String, Value)> = child.get_all_bindings();
        assert_eq!(
            names,
            vec![("a".to_owned(), val(1)), ("b".to_owned(), val(20))]
        );
    }

    fn closure_in(env: &Rc<Environment>) -> Value {
        Value::Procedure(Procedure::Closure(Rc::new(Closure {
            name: Some("local".to_owned()),
            params: vec![],
            rest: None,
            body: vec![val(1)],
            env: Rc::clone(env),
        })))
    }

    #[test]
    fn test_reclaimable_frames() {
        let global = Environment::new();
        assert!(!Environment::is_reclaimable(&global));

        let frame = Environment::with_parent(&global);
        frame.define("x", val(1));
        assert!(Environment::is_reclaimable(&frame));

        // Only held by a closure bound inside it
        frame.define("local", closure_in(&frame));
        assert!(Environment::is_reclaimable(&frame));

        // An escaped copy of the closure keeps the frame in use
        let escaped = frame.lookup("local").unwrap();
        assert!(!Environment::is_reclaimable(&frame));
        drop(escaped);
        assert!(Environment::is_reclaimable(&frame));

        // So does a child scope
        let child = Environment::with_parent(&frame);
        assert!(!Environment::is_reclaimable(&frame));
        drop(child);

        let weak = Rc::downgrade(&frame);
        frame.clear();
        drop(frame);
        assert!(weak.upgrade().is_none());
        assert_eq!(Rc::strong_count(&global), 1);
    }

    #[test]
    fn test_clear_releases_bindings() {
        let env = Environment::new();
        env.define("x", val(1));
        env.clear();
        assert!(env.get("x").is_none());
    }
}
