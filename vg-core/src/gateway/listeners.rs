//! Generic observer sets for arrival dispatch.
//!
//! The gateway keeps two of these over the same capability trait: one for
//! normal deliveries and one for undecryptable items. Dispatch happens under
//! the set lock, so per-set delivery order is stable and registration
//! blocks while a dispatch is in flight.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// An independently lockable collection of listeners.
pub struct ListenerSet<L: ?Sized> {
    listeners: Mutex<Vec<Arc<L>>>,
}

impl<L: ?Sized> ListenerSet<L> {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Registers a listener. One listener may be registered repeatedly and
    /// is then invoked once per registration.
    pub fn add(&self, listener: Arc<L>) {
        self.listeners.lock().push(listener);
    }

    /// Deregisters every registration of the given listener. Returns whether
    /// anything was removed.
    pub fn remove(&self, listener: &Arc<L>) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Whether no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    /// Invokes `deliver` for every listener in registration order, under the
    /// set lock. Returns `true` iff at least one listener reported handling
    /// the event.
    pub fn dispatch<F>(&self, mut deliver: F) -> bool
    where
        F: FnMut(&L) -> bool,
    {
        let listeners = self.listeners.lock();
        let mut handled = false;
        for listener in listeners.iter() {
            handled |= deliver(listener);
        }
        handled
    }
}

impl<L: ?Sized> Default for ListenerSet<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ?Sized> fmt::Debug for ListenerSet<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSet")
            .field("len", &self.len())
            .finish()
    }
}
