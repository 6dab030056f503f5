//! scheme-engine - a small evaluator for a Scheme subset
//!
//! This crate evaluates a compact Scheme dialect with lexically scoped
//! closures, `define`/`lambda`/`if`/`cond`, pairs and lists, and proper
//! tail calls. Programs can be read from text by the [`scheme`] module or
//! built directly as [`ast::Value`] trees.
//!
//! ```scheme
//! (define fib
//!   (lambda (n)
//!     (if (< n 2) n (+ (fib (- n 1)) (fib (- n 2))))))
//! (fib 10)            ; => 55
//! (cons 1 2)          ; => (1 . 2)
//! (if 0 'yes 'no)     ; => yes, only #f is false
//! ```
//!
//! ## Evaluation model
//!
//! The evaluator is a trampoline: every expression in tail position is
//! rewritten in place instead of recursing on the native stack, so a
//! self-recursive loop such as
//!
//! ```scheme
//! (define iter (lambda (n acc) (if (= n 0) acc (iter (- n 1) (+ acc 1)))))
//! (iter 100000 0)
//! ```
//!
//! runs in constant depth. Non-tail nesting is bounded by
//! [`evaluator::EvalConfig::max_depth`] and fails with
//! [`Error::DepthLimitExceeded`] rather than exhausting the stack.
//!
//! ## Modules
//!
//! - `scheme`: S-expression parsing from text
//! - `evaluator`: environments, special forms and the call engine
//! - `builtinops`: the primitive procedures installed in the global environment
//! - `ast`: the value model shared by all of the above

use std::fmt;

/// Maximum parsing depth to prevent stack overflow on hostile input
pub const MAX_PARSE_DEPTH: usize = 256;

/// Default bound on non-tail evaluation nesting.
///
/// Tail calls do not count toward this limit.
pub const DEFAULT_MAX_EVAL_DEPTH: usize = 10_000;

/// Categorizes the different kinds of parsing errors.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ParseErrorKind {
    /// Invalid or unexpected syntax (bad tokens, malformed expressions)
    InvalidSyntax,
    /// Input ended before the expression was complete (unterminated string, unclosed parens)
    Incomplete,
    /// Expression nesting exceeded [`MAX_PARSE_DEPTH`]
    TooDeeplyNested,
    /// Extra input found after a complete, valid expression
    TrailingContent,
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

    pub fn from_message(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message, None, None)
    }

    /// Create a `ParseError` with a context window taken from `input` around `error_offset`
    pub fn with_context(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
    ) -> Self {
        const MAX_CONTEXT: usize = 100;
        const LEAD: usize = 20;

        let start = floor_char_boundary(input, error_offset.saturating_sub(LEAD));
        let window: String = input[start..].chars().take(MAX_CONTEXT).collect();

        let mut context = String::new();
        if start > 0 {
            context.push_str("[...]");
        }
        context.push_str(&window);
        if start + window.len() < input.len() {
            context.push_str("[...]");
        }
        let context = context.replace('\n', "\\n").replace('\r', "");

        let found = input
            .get(error_offset..)
            .and_then(|rest| rest.chars().next())
            .map(|c| c.to_string());

        Self::new(kind, message, Some(context), found)
    }

    pub fn is_incomplete(&self) -> bool {
        self.kind == ParseErrorKind::Incomplete
    }
}

fn floor_char_boundary(input: &str, mut index: usize) -> usize {
    index = index.min(input.len());
    while !input.is_char_boundary(index) {
        index -= 1;
    }
    index
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParseError: {}", self.message)?;
        if let Some(found) = &self.found {
            write!(f, "\nFound: {found}")?;
        }
        if let Some(context) = &self.context {
            write!(f, "\nContext: {context}")?;
        }
        Ok(())
    }
}

/// Error types for the interpreter
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    ParseError(ParseError),
    #[error("Unbound variable: {0}")]
    UnboundVariable(String),
    #[error("ArityError: expected {expected} argument(s), got {got}")]
    ArityError { expected: Arity, got: usize },
    #[error("Type error: expected {expected}, got {found}")]
    TypeMismatch {
        expected: &'static str,
        found: String,
    },
    #[error("Not a procedure: {0}")]
    NotCallable(String),
    #[error("Malformed special form {form}: {reason}")]
    MalformedSpecialForm { form: String, reason: String },
    #[error("Evaluation depth limit exceeded (max: {limit})")]
    DepthLimitExceeded { limit: usize },
    #[error("Assertion failed: {0}")]
    AssertionFailed(String),
    /// Runtime failures that carry only a message: overflow, `(error ...)`, bad accessors
    #[error("EvaluationError: {0}")]
    EvalError(String),
}

impl Error {
    pub fn arity_error(expected: Arity, got: usize) -> Self {
        Error::ArityError { expected, got }
    }

    pub fn type_mismatch(expected: &'static str, found: &ast::Value) -> Self {
        Error::TypeMismatch {
            expected,
            found: found.to_string(),
        }
    }

    pub(crate) fn malformed(form: &ast::Value, reason: impl Into<String>) -> Self {
        Error::MalformedSpecialForm {
            form: form.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        Error::ParseError(err)
    }
}

pub mod ast;
pub mod builtinops;
pub mod evaluator;
mod stack;

#[cfg(feature = "scheme")]
pub mod scheme;

pub use evaluator::{
    Arity, EvalConfig, Environment, call, create_global_env, eval_program, evaluate,
    evaluate_with_config,
};
