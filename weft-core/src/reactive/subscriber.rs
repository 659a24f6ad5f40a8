//! Listener registries and disposers.
//!
//! Several parts of the runtime keep ordered lists of user callbacks:
//! observed/unobserved hooks on atoms, global reaction error handlers,
//! object interceptors and change listeners. They all use [`Listeners`],
//! and hand back a [`Disposer`] to unregister.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Generate a new unique listener ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Ordered registry of callbacks.
///
/// Callers take a [`snapshot`](Listeners::snapshot) before invoking, so a
/// callback may register or unregister listeners without tripping over the
/// registry's borrow.
pub(crate) struct Listeners<F: ?Sized> {
    entries: RefCell<Vec<(ListenerId, Rc<F>)>>,
}

impl<F: ?Sized> Listeners<F> {
    pub(crate) fn new() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, listener: Rc<F>) -> ListenerId {
        let id = ListenerId::new();
        self.entries.borrow_mut().push((id, listener));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|(entry, _)| *entry != id);
        entries.len() != before
    }

    pub(crate) fn snapshot(&self) -> Vec<Rc<F>> {
        self.entries
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.borrow().len()
    }
}

impl<F: ?Sized> Default for Listeners<F> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle that undoes a registration when [`dispose`](Disposer::dispose)
/// is called.
///
/// Dropping a disposer without calling it leaves the registration in place.
#[must_use = "dropping a Disposer keeps the registration alive; call dispose() to undo it"]
pub struct Disposer {
    dispose: Option<Box<dyn FnOnce()>>,
}

impl Disposer {
    /// Wrap an undo action.
    pub fn new<F>(dispose: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        Self {
            dispose: Some(Box::new(dispose)),
        }
    }

    /// Undo the registration.
    pub fn dispose(mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer")
            .field("pending", &self.dispose.is_some())
            .finish()
    }
}
