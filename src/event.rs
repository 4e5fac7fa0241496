//! Handler lists with ordered fan-out.

use std::sync::{Arc, Mutex};

use crate::lock;

/// An ordered list of handlers.
///
/// Handlers are invoked in registration order. The list is snapshotted before
/// every fan-out and no lock is held while handlers run, so a handler may
/// register further handlers; those are first called for the next event.
pub struct Multicast<H: ?Sized> {
    handlers: Mutex<Vec<Arc<H>>>,
}

impl<H: ?Sized> Multicast<H> {
    /// Create an empty handler list.
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
        }
    }

    /// Append a handler.
    pub fn add(&self, handler: Arc<H>) {
        lock(&self.handlers).push(handler);
    }

    /// Copy of the current handler list.
    pub fn snapshot(&self) -> Vec<Arc<H>> {
        lock(&self.handlers).clone()
    }

    /// Invoke `f` on every handler registered at the time of the call.
    pub fn for_each(&self, mut f: impl FnMut(&H)) {
        for handler in self.snapshot() {
            f(&handler);
        }
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        lock(&self.handlers).len()
    }

    /// Check if no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every handler.
    pub fn clear(&self) {
        lock(&self.handlers).clear();
    }
}

impl<H: ?Sized> Default for Multicast<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: ?Sized> std::fmt::Debug for Multicast<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multicast").field("handlers", &self.len()).finish()
    }
}
