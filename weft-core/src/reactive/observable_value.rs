//! Observable Value Implementation
//!
//! An observable value is a box holding one value and the atom that makes
//! reads and writes of that value visible to the graph.
//!
//! # How Observable Values Work
//!
//! 1. Reading the box inside a derivation registers the box's atom as a
//!    dependency of that derivation.
//!
//! 2. Writing the box compares the new value with the current one using the
//!    box's comparer. Equal writes are dropped without touching the graph.
//!
//! 3. A real change replaces the value and reports the atom as changed,
//!    which invalidates every observer and flushes reactions when no batch
//!    is open.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::mem;
use std::rc::Rc;

use crate::error::{ReactiveError, Result};
use crate::graph::NodeId;

use super::atom::Atom;
use super::runtime::{unique_name, Runtime};

/// Equality used to decide whether a write is a change.
pub type Comparer<T> = Rc<dyn Fn(&T, &T) -> bool>;

/// Comparer based on `PartialEq`.
pub fn default_comparer<T: PartialEq + 'static>() -> Comparer<T> {
    Rc::new(|a: &T, b: &T| a == b)
}

struct BoxInner<T> {
    atom: Atom,
    value: RefCell<T>,
    equals: Comparer<T>,
}

/// A reactive box holding a value of type `T`.
///
/// # Example
///
/// ```rust,ignore
/// let count = ObservableValue::new(0);
///
/// // Read the value
/// let value = count.get();
///
/// // Update the value (invalidates observers)
/// count.set(5)?;
/// ```
pub struct ObservableValue<T> {
    inner: Rc<BoxInner<T>>,
}

impl<T> ObservableValue<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Create a box in the thread's default runtime.
    pub fn new(value: T) -> Self {
        Self::new_in(&Runtime::current(), unique_name("ObservableValue"), value)
    }

    /// Create a named box in the given runtime.
    pub fn new_in(runtime: &Runtime, name: impl Into<String>, value: T) -> Self {
        Self::with_equals(runtime, name, value, default_comparer())
    }
}

impl<T> ObservableValue<T>
where
    T: Clone + 'static,
{
    /// Create a box with a custom comparer.
    pub fn with_equals(runtime: &Runtime, name: impl Into<String>, value: T, equals: Comparer<T>) -> Self {
        Self {
            inner: Rc::new(BoxInner {
                atom: Atom::new_in(runtime, name),
                value: RefCell::new(value),
                equals,
            }),
        }
    }

    /// Get the current value.
    ///
    /// If called within a derivation, this also registers the box as one
    /// of its dependencies.
    pub fn get(&self) -> T {
        self.inner.atom.report_observed();
        self.inner.value.borrow().clone()
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Borrow the current value, tracking the read.
    ///
    /// The value stays borrowed while `f` runs: writing this box from inside
    /// `f` fails with [`ReactiveError::ValueBorrowed`].
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.atom.report_observed();
        f(&self.inner.value.borrow())
    }

    /// Set a new value.
    ///
    /// Returns the previous value if the write was a change, `None` if the
    /// comparer found the values equal.
    pub fn set(&self, value: T) -> Result<Option<T>> {
        self.check_state_change()?;
        let unchanged = (self.inner.equals)(&self.inner.value.borrow(), &value);
        if unchanged {
            return Ok(None);
        }
        let mut slot = self
            .inner
            .value
            .try_borrow_mut()
            .map_err(|_| ReactiveError::ValueBorrowed {
                name: self.name().to_string(),
            })?;
        let previous = mem::replace(&mut *slot, value);
        drop(slot);
        self.inner.atom.report_changed();
        Ok(Some(previous))
    }

    /// Update the value using a function of the current value.
    pub fn update<F>(&self, f: F) -> Result<Option<T>>
    where
        F: FnOnce(&T) -> T,
    {
        let next = f(&self.inner.value.borrow());
        self.set(next)
    }

    pub(crate) fn check_state_change(&self) -> Result<()> {
        let runtime = self.inner.atom.runtime();
        if !runtime.state().allow_state_changes.get() && self.inner.atom.observer_count() > 0 {
            return Err(ReactiveError::StateChangeNotAllowed {
                name: self.name().to_string(),
            });
        }
        Ok(())
    }

    /// Graph id of the box's atom.
    pub fn id(&self) -> NodeId {
        self.inner.atom.id()
    }

    pub fn name(&self) -> &str {
        self.inner.atom.name()
    }

    /// The atom behind this box, for hooks and introspection.
    pub fn atom(&self) -> &Atom {
        &self.inner.atom
    }

    pub fn observer_count(&self) -> usize {
        self.inner.atom.observer_count()
    }

    /// Whether two handles refer to the same box.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Clone for ObservableValue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Debug for ObservableValue<T>
where
    T: Clone + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableValue")
            .field("name", &self.name())
            .field("value", &self.get_untracked())
            .field("observer_count", &self.observer_count())
            .finish()
    }
}

impl Runtime {
    /// Create a named observable box in this runtime.
    pub fn observable<T>(&self, name: impl Into<String>, value: T) -> ObservableValue<T>
    where
        T: Clone + PartialEq + 'static,
    {
        ObservableValue::new_in(self, name, value)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Reaction;
    use std::cell::Cell;

    #[test]
    fn box_get_and_set() {
        let runtime = Runtime::new();
        let value = runtime.observable("count", 0);
        assert_eq!(value.get(), 0);

        assert_eq!(value.set(5).unwrap(), Some(0));
        assert_eq!(value.get(), 5);

        assert_eq!(value.set(5).unwrap(), None);
        assert_eq!(value.update(|v| v + 1).unwrap(), Some(5));
        assert_eq!(value.get_untracked(), 6);
    }

    #[test]
    fn writing_inside_with_is_an_error() {
        let runtime = Runtime::new();
        let value = runtime.observable("borrowed", 1);
        let result = value.with(|current| value.set(current + 1));
        assert!(matches!(result, Err(ReactiveError::ValueBorrowed { .. })));
        assert_eq!(value.get_untracked(), 1);
        assert_eq!(value.set(2).unwrap(), Some(1));
    }

    #[test]
    fn clone_shares_state() {
        let runtime = Runtime::new();
        let first = runtime.observable("shared", String::from("a"));
        let second = first.clone();

        first.set("b".to_string()).unwrap();
        assert_eq!(second.get(), "b");
        assert!(first.ptr_eq(&second));
    }

    #[test]
    fn equal_writes_do_not_rerun_observers() {
        let runtime = Runtime::new();
        let value = runtime.observable("v", 1);
        let runs = Rc::new(Cell::new(0));

        let reader = value.clone();
        let counter = runs.clone();
        let reaction = Reaction::new_in(&runtime, "reader", move |r| {
            let reader = reader.clone();
            let counter = counter.clone();
            r.track(move || {
                reader.get();
                counter.set(counter.get() + 1);
                Ok(())
            });
            Ok(())
        });
        reaction.schedule();
        assert_eq!(runs.get(), 1);

        value.set(1).unwrap();
        assert_eq!(runs.get(), 1);
        value.set(2).unwrap();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn custom_comparer() {
        let runtime = Runtime::new();
        let case_insensitive: Comparer<String> = Rc::new(|a, b| a.eq_ignore_ascii_case(b));
        let value = ObservableValue::with_equals(&runtime, "name", "Ada".to_string(), case_insensitive);

        assert_eq!(value.set("ADA".to_string()).unwrap(), None);
        assert_eq!(value.get(), "Ada");
        assert_eq!(value.set("Grace".to_string()).unwrap(), Some("Ada".to_string()));
    }
}
