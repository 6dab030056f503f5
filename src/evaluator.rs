use std::borrow::Borrow;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::ast::{Pair, Primitive, Procedure, Value};
use crate::builtinops::get_builtin_ops;
use crate::stack::ensure_sufficient_stack;
use crate::{DEFAULT_MAX_EVAL_DEPTH, Error};

mod environment;
pub mod intooperation;
mod special_forms;

pub use environment::Environment;
pub use intooperation::{NumArgs, ValueArgs};

use special_forms::find_special_form;

/// Accepted argument counts for a procedure or special form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    /// Inclusive bounds
    Range(usize, usize),
    Any,
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exact(n) => count == n,
            Arity::AtLeast(min) => count >= min,
            Arity::Range(min, max) => (min..=max).contains(&count),
            Arity::Any => true,
        }
    }

    pub fn validate(self, count: usize) -> Result<(), Error> {
        if self.accepts(count) {
            Ok(())
        } else {
            Err(Error::arity_error(self, count))
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{n}"),
            Arity::AtLeast(min) => write!(f, "at least {min}"),
            Arity::Range(min, max) => write!(f, "{min} to {max}"),
            Arity::Any => write!(f, "any number of"),
        }
    }
}

/// Evaluation limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalConfig {
    /// Maximum nesting of non-tail evaluations (operator, arguments, tests,
    /// non-final body expressions). Tail calls do not count.
    pub max_depth: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        EvalConfig {
            max_depth: DEFAULT_MAX_EVAL_DEPTH,
        }
    }
}

impl EvalConfig {
    pub fn with_max_depth(max_depth: usize) -> Self {
        EvalConfig { max_depth }
    }
}

/// One step of the trampoline.
pub(crate) enum State {
    Eval {
        expr: Value,
        env: Rc<Environment>,
    },
    Apply {
        procedure: Procedure,
        args: Vec<Value>,
    },
    Return(Value),
}

/// Drives the trampoline and tracks non-tail nesting depth.
pub(crate) struct Evaluator<'c> {
    config: &'c EvalConfig,
    depth: usize,
    /// Innermost call or `let` frame entered by the running trampoline loop
    frame: Option<Rc<Environment>>,
}

impl<'c> Evaluator<'c> {
    pub(crate) fn new(config: &'c EvalConfig) -> Self {
        Evaluator {
            config,
            depth: 0,
            frame: None,
        }
    }

    /// Evaluate `expr` to a value as a nested (non-tail) computation.
    pub(crate) fn eval(&mut self, expr: &Value, env: &Rc<Environment>) -> Result<Value, Error> {
        match expr {
            Value::Symbol(name) => return env.lookup(name),
            Value::Pair(_) | Value::Nil => {}
            _ => return Ok(expr.clone()),
        }

        let limit = self.config.max_depth;
        if self.depth >= limit {
            warn!(limit, "evaluation depth limit exceeded");
            return Err(Error::DepthLimitExceeded { limit });
        }

        self.depth += 1;
        let result = ensure_sufficient_stack(|| {
            self.run(State::Eval {
                expr: expr.clone(),
                env: Rc::clone(env),
            })
        });
        self.depth -= 1;
        result
    }

    /// Run the trampoline to completion. The last frame it entered is
    /// released on the way out, whether or not evaluation succeeded.
    fn run(&mut self, state: State) -> Result<Value, Error> {
        let outer = self.frame.take();
        let result = self.run_states(state);
        if let Some(frame) = std::mem::replace(&mut self.frame, outer) {
            release_frame(frame);
        }
        result
    }

    fn run_states(&mut self, mut state: State) -> Result<Value, Error> {
        loop {
            state = match state {
                State::Return(value) => return Ok(value),
                State::Eval { expr, env } => self.step(&expr, &env)?,
                State::Apply { procedure, args } => self.apply(procedure, args)?,
            };
        }
    }

    fn step(&mut self, expr: &Value, env: &Rc<Environment>) -> Result<State, Error> {
        match expr {
            Value::Symbol(name) => Ok(State::Return(env.lookup(name)?)),
            Value::Pair(pair) => self.step_combination(expr, pair, env),
            Value::Nil => Err(Error::malformed(expr, "empty combination")),
            // Numbers, booleans, strings and procedures evaluate to themselves
            _ => Ok(State::Return(expr.clone())),
        }
    }

    fn step_combination(
        &mut self,
        expr: &Value,
        pair: &Pair,
        env: &Rc<Environment>,
    ) -> Result<State, Error> {
        let operands = pair
            .cdr()
            .as_proper_list()
            .ok_or_else(|| Error::malformed(expr, "improper list in expression"))?;

        if let Value::Symbol(keyword) = pair.car()
            && let Some(form) = find_special_form(keyword)
        {
            form.check_operands(expr, operands.len())?;
            return (form.eval)(self, expr, &operands, env);
        }

        let procedure = match self.eval(pair.car(), env)? {
            Value::Procedure(procedure) => procedure,
            other => return Err(Error::NotCallable(other.to_string())),
        };
        let args = operands
            .iter()
            .map(|operand| self.eval(operand, env))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(State::Apply { procedure, args })
    }

    fn apply(&mut self, procedure: Procedure, args: Vec<Value>) -> Result<State, Error> {
        match procedure {
            Procedure::Primitive(primitive) => {
                trace!(procedure = %primitive.name, args = args.len(), "apply primitive");
                primitive.arity.validate(args.len())?;
                (primitive.func)(args).map(State::Return)
            }
            Procedure::Closure(closure) => {
                trace!(
                    procedure = closure.name.as_deref().unwrap_or("<lambda>"),
                    args = args.len(),
                    "apply closure"
                );
                let frame = Environment::extend(
                    &closure.env,
                    &closure.params,
                    closure.rest.as_deref(),
                    args,
                )?;
                self.enter_frame(&frame);
                self.eval_body(&closure.body, frame)
            }
        }
    }

    /// Make `frame` the current frame. The frame it replaces is no longer
    /// needed by this loop and is released.
    pub(crate) fn enter_frame(&mut self, frame: &Rc<Environment>) {
        if let Some(previous) = self.frame.replace(Rc::clone(frame)) {
            release_frame(previous);
        }
    }

    /// Evaluate all but the last expression; the last one continues in tail position.
    pub(crate) fn eval_body<V: Borrow<Value>>(
        &mut self,
        body: &[V],
        env: Rc<Environment>,
    ) -> Result<State, Error> {
        let Some((last, init)) = body.split_last() else {
            return Ok(State::Return(Value::Unspecified));
        };
        for expr in init {
            let expr: &Value = expr.borrow();
            self.eval(expr, &env)?;
        }
        let last: &Value = last.borrow();
        Ok(State::Eval {
            expr: last.clone(),
            env,
        })
    }
}

/// Drop a frame that has gone out of scope. A frame only its own local
/// closures still point at is cleared, so the cycle between them is broken;
/// its parent is then checked the same way.
fn release_frame(frame: Rc<Environment>) {
    let mut next = Some(frame);
    while let Some(frame) = next.take() {
        if !Environment::is_reclaimable(&frame) {
            break;
        }
        next = frame.parent().cloned();
        frame.clear();
    }
}

/// Evaluate an expression in `env` with the default [`EvalConfig`].
pub fn evaluate(expr: &Value, env: &Rc<Environment>) -> Result<Value, Error> {
    evaluate_with_config(expr, env, &EvalConfig::default())
}

pub fn evaluate_with_config(
    expr: &Value,
    env: &Rc<Environment>,
    config: &EvalConfig,
) -> Result<Value, Error> {
    Evaluator::new(config).eval(expr, env)
}

/// Evaluate top-level forms in order, returning the value of the last one.
#[tracing::instrument(level = "debug", skip_all, fields(forms = exprs.len()))]
pub fn eval_program(exprs: &[Value], env: &Rc<Environment>) -> Result<Value, Error> {
    let config = EvalConfig::default();
    let mut result = Value::Unspecified;
    for expr in exprs {
        result = evaluate_with_config(expr, env, &config)?;
    }
    Ok(result)
}

/// Apply a procedure value to already-evaluated arguments.
pub fn call(procedure: &Procedure, args: Vec<Value>) -> Result<Value, Error> {
    let config = EvalConfig::default();
    Evaluator::new(&config).run(State::Apply {
        procedure: procedure.clone(),
        args,
    })
}

/// Create a global environment with the builtin procedures installed
pub fn create_global_env() -> Rc<Environment> {
    let env = Environment::new();

    for builtin_op in get_builtin_ops() {
        let primitive = Primitive {
            name: builtin_op.id.to_owned(),
            arity: builtin_op.arity,
            func: Arc::clone(&builtin_op.func),
        };
        env.define(
            builtin_op.id,
            Value::Procedure(Procedure::Primitive(Rc::new(primitive))),
        );
    }

    env
}
