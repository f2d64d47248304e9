//! ObservationScope for automatic begin/complete logging
//!
//! - Logs `{name}.begin` on creation
//! - Logs `{name}.complete` or `{name}.failed` when closed
//! - Logs `{name}.incomplete` on drop if never closed (e.g. the enclosing
//!   future was cancelled)

use std::cell::Cell;

use super::logger::Logger;

/// A scope that logs start and end events for one step
///
/// ```ignore
/// let scope = ObservationScope::new("fcv.cleanup.drain_collection_creations");
/// // ... do work ...
/// scope.complete();
/// ```
pub struct ObservationScope {
    name: String,
    closed: Cell<bool>,
}

impl ObservationScope {
    /// Create a new observation scope; logs `{name}.begin`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Logger::info(&format!("{}.begin", name), &[]);
        Self {
            name,
            closed: Cell::new(false),
        }
    }

    /// Mark the scope as successfully completed.
    pub fn complete(self) {
        self.closed.set(true);
        Logger::info(&format!("{}.complete", self.name), &[]);
    }

    /// Mark the scope as failed with a reason.
    pub fn fail(self, reason: &str) {
        self.closed.set(true);
        Logger::error(&format!("{}.failed", self.name), &[("reason", reason)]);
    }

    /// Check if the scope has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }
}

impl Drop for ObservationScope {
    fn drop(&mut self) {
        if !self.closed.get() {
            Logger::warn(
                &format!("{}.incomplete", self.name),
                &[("reason", "scope dropped without completion")],
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_complete() {
        let scope = ObservationScope::new("fcv.test.scope");
        assert!(!scope.is_closed());
        scope.complete();
    }

    #[test]
    fn test_scope_fail() {
        let scope = ObservationScope::new("fcv.test.scope");
        scope.fail("forced");
    }

    #[test]
    fn test_scope_drop_without_close() {
        let scope = ObservationScope::new("fcv.test.scope");
        drop(scope);
    }
}
