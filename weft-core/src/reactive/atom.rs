//! Atom Implementation
//!
//! An atom is the smallest unit of observable state. It holds no value of
//! its own: the owner stores the data and tells the atom when it was read
//! ([`report_observed`](Atom::report_observed)) or written
//! ([`report_changed`](Atom::report_changed)). Every other observable type
//! in the crate is built on top of one or more atoms.
//!
//! # Observation Hooks
//!
//! An atom can notify its owner when the first reactive observer subscribes
//! and when the last one leaves. This lets owners attach and detach external
//! resources lazily. The "left" notification is delivered when the batch
//! that removed the last observer ends, so an observer that is swapped out
//! and back in within one batch does not cause a spurious pair of calls.

use std::fmt;
use std::rc::Rc;

use crate::graph::{Node, NodeId};

use super::runtime::Runtime;
use super::subscriber::Disposer;

pub(crate) struct AtomInner {
    runtime: Runtime,
    id: NodeId,
    name: String,
}

impl Drop for AtomInner {
    fn drop(&mut self) {
        self.runtime.release_node(self.id);
    }
}

/// An observable without a value.
///
/// Clones share the same graph node.
#[derive(Clone)]
pub struct Atom {
    inner: Rc<AtomInner>,
}

impl Atom {
    /// Create an atom in the thread's default runtime.
    pub fn new(name: impl Into<String>) -> Self {
        Self::new_in(&Runtime::current(), name)
    }

    /// Create an atom in the given runtime.
    pub fn new_in(runtime: &Runtime, name: impl Into<String>) -> Self {
        let name = name.into();
        let id = runtime.insert_node(Node::atom(name.clone()));
        Self {
            inner: Rc::new(AtomInner {
                runtime: runtime.clone(),
                id,
                name,
            }),
        }
    }

    /// Graph id of this atom.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Debug name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The runtime this atom belongs to.
    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    /// Record a read. Returns whether a derivation was tracking.
    pub fn report_observed(&self) -> bool {
        self.inner.runtime.report_observed(self.inner.id)
    }

    /// Record a write: invalidate all observers and, outside a batch, run
    /// the reactions that became stale.
    pub fn report_changed(&self) {
        self.inner.runtime.report_changed(self.inner.id);
    }

    /// Call `f` whenever this atom gains its first reactive observer.
    pub fn on_become_observed<F>(&self, f: F) -> Disposer
    where
        F: Fn() + 'static,
    {
        self.add_hook(f, true)
    }

    /// Call `f` whenever this atom loses its last reactive observer.
    pub fn on_become_unobserved<F>(&self, f: F) -> Disposer
    where
        F: Fn() + 'static,
    {
        self.add_hook(f, false)
    }

    fn add_hook<F>(&self, f: F, observed: bool) -> Disposer
    where
        F: Fn() + 'static,
    {
        let Some(hooks) = self.inner.runtime.with_node_mut(self.inner.id, Node::hooks_mut) else {
            return Disposer::new(|| {});
        };
        let listeners = if observed { &hooks.observed } else { &hooks.unobserved };
        let id = listeners.add(Rc::new(f));
        Disposer::new(move || {
            if observed {
                hooks.observed.remove(id);
            } else {
                hooks.unobserved.remove(id);
            }
        })
    }

    /// Whether a reaction (directly or through computeds) currently observes
    /// this atom.
    pub fn is_being_observed(&self) -> bool {
        self.inner.runtime.is_being_observed(self.inner.id)
    }

    /// Number of derivations directly observing this atom.
    pub fn observer_count(&self) -> usize {
        self.inner.runtime.observer_count(self.inner.id)
    }
}

impl fmt::Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Atom")
            .field("name", &self.inner.name)
            .field("id", &self.inner.id)
            .field("observer_count", &self.observer_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Reaction;
    use std::cell::Cell;

    fn observe(runtime: &Runtime, atom: &Atom) -> Reaction {
        let atom = atom.clone();
        let reaction = Reaction::new_in(runtime, "observer", move |r| {
            let atom = atom.clone();
            r.track(move || {
                atom.report_observed();
                Ok(())
            });
            Ok(())
        });
        reaction.schedule();
        reaction
    }

    #[test]
    fn report_observed_outside_derivation_is_untracked() {
        let runtime = Runtime::new();
        let atom = Atom::new_in(&runtime, "a");
        assert!(!atom.report_observed());
        assert_eq!(atom.observer_count(), 0);
    }

    #[test]
    fn hooks_fire_on_first_and_last_observer() {
        let runtime = Runtime::new();
        let atom = Atom::new_in(&runtime, "a");
        let observed = Rc::new(Cell::new(0));
        let unobserved = Rc::new(Cell::new(0));

        let o = observed.clone();
        let _on = atom.on_become_observed(move || o.set(o.get() + 1));
        let u = unobserved.clone();
        let _off = atom.on_become_unobserved(move || u.set(u.get() + 1));

        let first = observe(&runtime, &atom);
        let second = observe(&runtime, &atom);
        assert_eq!(observed.get(), 1);
        assert!(atom.is_being_observed());
        assert_eq!(atom.observer_count(), 2);

        first.dispose();
        assert_eq!(unobserved.get(), 0);
        second.dispose();
        assert_eq!(unobserved.get(), 1);
        assert!(!atom.is_being_observed());
    }

    #[test]
    fn disposed_hook_is_not_called() {
        let runtime = Runtime::new();
        let atom = Atom::new_in(&runtime, "a");
        let calls = Rc::new(Cell::new(0));
        let c = calls.clone();
        let hook = atom.on_become_observed(move || c.set(c.get() + 1));
        hook.dispose();

        let _reaction = observe(&runtime, &atom);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn dropping_last_handle_frees_node() {
        let runtime = Runtime::new();
        let atom = Atom::new_in(&runtime, "a");
        let clone = atom.clone();
        assert_eq!(runtime.node_count(), 1);
        drop(atom);
        assert_eq!(runtime.node_count(), 1);
        drop(clone);
        assert_eq!(runtime.node_count(), 0);
    }
}
