//! Scope guard that runs a closure over a value when dropped.
//!
//! The access logger keeps its per-request record in a guard so the record is
//! emitted on every exit path, including cancellation of the request future.

use std::ops::{Deref, DerefMut};

/// A guard that executes a closure when dropped.
pub struct ScopeGuard<T, F: FnOnce(T)> {
    value: Option<T>,
    dropper: Option<F>,
}

impl<T, F: FnOnce(T)> Deref for ScopeGuard<T, F> {
    type Target = T;

    #[allow(clippy::expect_used)]
    fn deref(&self) -> &T {
        // Only `drop` takes the value.
        self.value.as_ref().expect("scope guard value taken before drop")
    }
}

impl<T, F: FnOnce(T)> DerefMut for ScopeGuard<T, F> {
    #[allow(clippy::expect_used)]
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("scope guard value taken before drop")
    }
}

impl<T, F: FnOnce(T)> Drop for ScopeGuard<T, F> {
    fn drop(&mut self) {
        if let (Some(value), Some(dropper)) = (self.value.take(), self.dropper.take()) {
            dropper(value);
        }
    }
}

/// Create a scope guard that will execute `dropper` with `value` when dropped.
pub fn guard<T, F: FnOnce(T)>(value: T, dropper: F) -> ScopeGuard<T, F> {
    ScopeGuard {
        value: Some(value),
        dropper: Some(dropper),
    }
}
