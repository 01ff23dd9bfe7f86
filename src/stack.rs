//! Stack growth for deeply nested evaluation and parsing.
//!
//! The evaluator and parser recurse once per nesting level. Their depth limits keep
//! runaway programs bounded, and [`ensure_sufficient_stack`] makes sure the limits
//! themselves are reachable on small thread stacks.

/// Grow the stack when less than this remains (100KB).
const RED_ZONE: usize = 100 * 1024;

/// Size of each new stack segment (1MB).
const STACK_PER_RECURSION: usize = 1024 * 1024;

/// Run `f`, first allocating a fresh stack segment if the current one is nearly full.
#[inline]
#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}

/// WASM manages its own stack.
#[inline]
#[cfg(target_arch = "wasm32")]
pub(crate) fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    f()
}
