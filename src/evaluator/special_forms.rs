//! Syntactic keywords: forms whose operands are not evaluated up front.
//!
//! Every handler returns the next trampoline [`State`]. Handlers hand back
//! `State::Eval` for operands in tail position instead of evaluating them,
//! which is what keeps `if`/`cond` branches and body tails from growing
//! the native stack.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::LazyLock;

use tracing::debug;

use super::{Arity, Environment, Evaluator, State};
use crate::Error;
use crate::ast::{Closure, Procedure, Value};

pub(crate) type SpecialFormFn =
    fn(&mut Evaluator<'_>, &Value, &[&Value], &Rc<Environment>) -> Result<State, Error>;

pub(crate) struct SpecialForm {
    pub(crate) id: &'static str,
    /// Operand count, not counting the keyword itself
    pub(crate) arity: Arity,
    pub(crate) eval: SpecialFormFn,
}

impl SpecialForm {
    pub(crate) fn check_operands(&self, form: &Value, count: usize) -> Result<(), Error> {
        if self.arity.accepts(count) {
            Ok(())
        } else {
            Err(Error::malformed(
                form,
                format!("{} expects {} operand(s), got {count}", self.id, self.arity),
            ))
        }
    }
}

static SPECIAL_FORMS: &[SpecialForm] = &[
    SpecialForm {
        id: "quote",
        arity: Arity::Exact(1),
        eval: eval_quote,
    },
    SpecialForm {
        id: "if",
        arity: Arity::Range(2, 3),
        eval: eval_if,
    },
    SpecialForm {
        id: "cond",
        arity: Arity::Any,
        eval: eval_cond,
    },
    SpecialForm {
        id: "define",
        arity: Arity::AtLeast(2),
        eval: eval_define,
    },
    SpecialForm {
        id: "lambda",
        arity: Arity::AtLeast(2),
        eval: eval_lambda,
    },
    SpecialForm {
        id: "begin",
        arity: Arity::Any,
        eval: eval_begin,
    },
    SpecialForm {
        id: "let",
        arity: Arity::AtLeast(2),
        eval: eval_let,
    },
    SpecialForm {
        id: "and",
        arity: Arity::Any,
        eval: eval_and,
    },
    SpecialForm {
        id: "or",
        arity: Arity::Any,
        eval: eval_or,
    },
];

static SPECIAL_FORM_MAP: LazyLock<HashMap<&'static str, &'static SpecialForm>> =
    LazyLock::new(|| SPECIAL_FORMS.iter().map(|form| (form.id, form)).collect());

pub(crate) fn find_special_form(keyword: &str) -> Option<&'static SpecialForm> {
    SPECIAL_FORM_MAP.get(keyword).copied()
}

fn tail(expr: &Value, env: &Rc<Environment>) -> State {
    State::Eval {
        expr: expr.clone(),
        env: Rc::clone(env),
    }
}

fn eval_quote(
    _ev: &mut Evaluator<'_>,
    form: &Value,
    operands: &[&Value],
    _env: &Rc<Environment>,
) -> Result<State, Error> {
    match operands {
        [datum] => Ok(State::Return((*datum).clone())),
        _ => Err(Error::malformed(form, "quote takes exactly one datum")),
    }
}

fn eval_if(
    ev: &mut Evaluator<'_>,
    form: &Value,
    operands: &[&Value],
    env: &Rc<Environment>,
) -> Result<State, Error> {
    let (test, consequent, alternate) = match operands {
        [test, consequent] => (test, consequent, None),
        [test, consequent, alternate] => (test, consequent, Some(alternate)),
        _ => return Err(Error::malformed(form, "expected (if test consequent [alternate])")),
    };

    if ev.eval(test, env)?.is_truthy() {
        Ok(tail(consequent, env))
    } else {
        Ok(alternate.map_or(State::Return(Value::Unspecified), |alt| tail(alt, env)))
    }
}

fn eval_cond(
    ev: &mut Evaluator<'_>,
    form: &Value,
    clauses: &[&Value],
    env: &Rc<Environment>,
) -> Result<State, Error> {
    // Shape errors are reported whichever clause ends up being taken
    let mut parsed = Vec::with_capacity(clauses.len());
    for clause in clauses {
        let parts = clause
            .as_proper_list()
            .ok_or_else(|| Error::malformed(form, format!("cond clause {clause} is not a list")))?;
        let Some((test, body)) = parts.split_first() else {
            return Err(Error::malformed(form, "empty cond clause"));
        };
        // `else` is only a keyword here; anywhere else it is an ordinary symbol.
        let is_else = test.as_symbol() == Some("else");
        if is_else && body.is_empty() {
            return Err(Error::malformed(form, "else clause has no expressions"));
        }
        parsed.push((is_else, *test, body.to_vec()));
    }

    for (is_else, test, body) in parsed {
        if is_else {
            return ev.eval_body(&body, Rc::clone(env));
        }

        let value = ev.eval(test, env)?;
        if value.is_truthy() {
            if body.is_empty() {
                return Ok(State::Return(value));
            }
            return ev.eval_body(&body, Rc::clone(env));
        }
    }

    Ok(State::Return(Value::Unspecified))
}

fn eval_define(
    ev: &mut Evaluator<'_>,
    form: &Value,
    operands: &[&Value],
    env: &Rc<Environment>,
) -> Result<State, Error> {
    match operands {
        [Value::Symbol(name), expr] => {
            let value = name_procedure(ev.eval(expr, env)?, name);
            debug!(name = %name, "define");
            env.define(name.clone(), value);
            Ok(State::Return(Value::Unspecified))
        }
        [Value::Pair(signature), body @ ..] => {
            let Value::Symbol(name) = signature.car() else {
                return Err(Error::malformed(form, "procedure name must be a symbol"));
            };
            let (params, rest) = parse_formals(form, signature.cdr())?;
            let closure = Closure {
                name: Some(name.clone()),
                params,
                rest,
                body: body.iter().map(|expr| (*expr).clone()).collect(),
                env: Rc::clone(env),
            };
            debug!(name = %name, "define procedure");
            env.define(
                name.clone(),
                Value::Procedure(Procedure::Closure(Rc::new(closure))),
            );
            Ok(State::Return(Value::Unspecified))
        }
        [target, ..] => Err(Error::malformed(
            form,
            format!("cannot define {target}; expected a symbol or (name params...)"),
        )),
        [] => Err(Error::malformed(form, "missing definition target")),
    }
}

/// Attach `name` to a freshly created anonymous closure. Closures that are
/// already named or shared keep their identity untouched.
pub(crate) fn name_procedure(mut value: Value, name: &str) -> Value {
    if let Value::Procedure(Procedure::Closure(closure)) = &mut value
        && let Some(closure) = Rc::get_mut(closure)
        && closure.name.is_none()
    {
        closure.name = Some(name.to_owned());
    }
    value
}

fn eval_lambda(
    _ev: &mut Evaluator<'_>,
    form: &Value,
    operands: &[&Value],
    env: &Rc<Environment>,
) -> Result<State, Error> {
    let [formals, body @ ..] = operands else {
        return Err(Error::malformed(form, "expected (lambda formals body...)"));
    };
    let (params, rest) = parse_formals(form, formals)?;

    let closure = Closure {
        name: None,
        params,
        rest,
        body: body.iter().map(|expr| (*expr).clone()).collect(),
        env: Rc::clone(env),
    };
    Ok(State::Return(Value::Procedure(Procedure::Closure(
        Rc::new(closure),
    ))))
}

/// Accepts `(a b c)`, `(a b . rest)` and a bare `args` symbol.
fn parse_formals(form: &Value, formals: &Value) -> Result<(Vec<String>, Option<String>), Error> {
    let mut params: Vec<String> = Vec::new();
    let check = |name: &str, seen: &[String]| {
        if seen.iter().any(|p| p == name) {
            Err(Error::malformed(form, format!("duplicate parameter name: {name}")))
        } else {
            Ok(name.to_owned())
        }
    };

    let mut iter = formals.iter();
    for param in iter.by_ref() {
        let Value::Symbol(name) = param else {
            return Err(Error::malformed(form, format!("parameter {param} is not a symbol")));
        };
        let name = check(name.as_str(), &params)?;
        params.push(name);
    }

    let rest = match iter.tail() {
        Value::Nil => None,
        Value::Symbol(name) => Some(check(name.as_str(), &params)?),
        other => {
            return Err(Error::malformed(form, format!("parameter {other} is not a symbol")));
        }
    };

    Ok((params, rest))
}

fn eval_begin(
    ev: &mut Evaluator<'_>,
    _form: &Value,
    operands: &[&Value],
    env: &Rc<Environment>,
) -> Result<State, Error> {
    ev.eval_body(operands, Rc::clone(env))
}

fn eval_let(
    ev: &mut Evaluator<'_>,
    form: &Value,
    operands: &[&Value],
    env: &Rc<Environment>,
) -> Result<State, Error> {
    let [bindings, body @ ..] = operands else {
        return Err(Error::malformed(form, "expected (let ((name expr)...) body...)"));
    };
    let bindings = bindings
        .as_proper_list()
        .ok_or_else(|| Error::malformed(form, "let bindings must be a list"))?;

    let frame = Environment::with_parent(env);
    for binding in bindings {
        match binding.as_proper_list().as_deref() {
            Some([Value::Symbol(name), init]) => {
                if frame.is_bound_locally(name) {
                    return Err(Error::malformed(form, format!("duplicate let binding: {name}")));
                }
                // Inits see the enclosing scope, not each other
                let value = name_procedure(ev.eval(init, env)?, name);
                frame.define(name.clone(), value);
            }
            _ => {
                return Err(Error::malformed(
                    form,
                    format!("let binding {binding} must be (name expr)"),
                ));
            }
        }
    }

    ev.enter_frame(&frame);
    ev.eval_body(body, frame)
}

fn eval_and(
    ev: &mut Evaluator<'_>,
    _form: &Value,
    operands: &[&Value],
    env: &Rc<Environment>,
) -> Result<State, Error> {
    let Some((last, init)) = operands.split_last() else {
        return Ok(State::Return(Value::Bool(true)));
    };
    for operand in init {
        let value = ev.eval(operand, env)?;
        if !value.is_truthy() {
            return Ok(State::Return(value));
        }
    }
    Ok(tail(last, env))
}

fn eval_or(
    ev: &mut Evaluator<'_>,
    _form: &Value,
    operands: &[&Value],
    env: &Rc<Environment>,
) -> Result<State, Error> {
    let Some((last, init)) = operands.split_last() else {
        return Ok(State::Return(Value::Bool(false)));
    };
    for operand in init {
        let value = ev.eval(operand, env)?;
        if value.is_truthy() {
            return Ok(State::Return(value));
        }
    }
    Ok(tail(last, env))
}
