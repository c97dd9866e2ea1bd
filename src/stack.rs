//! Stack safety for the recursive parser and evaluator.
//!
//! Uses the `stacker` crate to grow the native stack when deeply nested
//! syntax or non-tail recursion in a Vortex program would otherwise
//! overflow it.

/// Grows the stack if less than 256KB remains, allocating 2MB at a time.
pub fn ensure_sufficient_stack<R, F: FnOnce() -> R>(f: F) -> R {
    stacker::maybe_grow(256 * 1024, 2 * 1024 * 1024, f)
}
