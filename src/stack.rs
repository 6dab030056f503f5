//! Stack growth for the evaluator's non-tail recursion.
//!
//! Nested evaluation is bounded by [`crate::EvalConfig::max_depth`]; this
//! module makes sure the native stack can hold that many levels.

#[cfg(not(target_arch = "wasm32"))]
/// Grow when less than this much stack remains.
const RED_ZONE: usize = 128 * 1024;

#[cfg(not(target_arch = "wasm32"))]
/// Size of each newly allocated stack segment.
const STACK_PER_RECURSION: usize = 2 * 1024 * 1024;

#[inline]
#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}

#[inline]
#[cfg(target_arch = "wasm32")]
pub(crate) fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    f()
}
