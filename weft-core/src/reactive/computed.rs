//! Computed Value Implementation
//!
//! A computed value is a cached derivation that is itself observable. It
//! re-evaluates only when one of its dependencies actually changed.
//!
//! # How Computed Values Work
//!
//! 1. On first access, the computed runs its derivation and caches the
//!    result.
//!
//! 2. When accessed again with no dependency changed, it returns the cache.
//!
//! 3. When a dependency changes, the computed is marked possibly stale
//!    (through another computed) or stale (directly).
//!
//! 4. On next access, a possibly-stale computed first pulls its computed
//!    dependencies. If none of them produced a different value it is marked
//!    up to date and the cache is returned without running the derivation.
//!
//! 5. Once the last observer leaves, the computed drops its dependencies and
//!    cache (unless it is keep-alive) and starts from scratch on the next
//!    observed read.
//!
//! # Two Read Paths
//!
//! Outside any batch, with no observers and no keep-alive, a read is a plain
//! function call: the derivation runs in a private batch and nothing is
//! registered in the graph. Any other read registers the computed with the
//! caller and goes through the full tracking machinery.
//!
//! # Errors
//!
//! A derivation returning `Err` has the error cached like a value. Every read
//! returns it until a later run succeeds. Error results always count as a
//! change for the computed's observers.

use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use crate::error::{ReactiveError, Result};
use crate::graph::{ComputedNode, DerivationState, Node, NodeId};

use super::context::{AllowStateChangesScope, BatchGuard, ContextScope, FlagScope};
use super::observable_value::{default_comparer, Comparer};
use super::reaction::Reaction;
use super::runtime::{unique_name, Runtime};
use super::subscriber::Disposer;

/// Setter invoked when a computed value is assigned.
pub type Setter<T> = Rc<dyn Fn(T) -> Result<()>>;

/// Options for creating a [`ComputedValue`].
pub struct ComputedOptions<T> {
    /// Debug name; generated when absent.
    pub name: Option<String>,
    /// Decides whether a recomputed value is a change.
    pub equals: Comparer<T>,
    /// Keep dependencies and cache while unobserved.
    pub keep_alive: bool,
    /// Warn when read outside a reactive context.
    pub requires_reaction: bool,
    pub setter: Option<Setter<T>>,
}

impl<T: PartialEq + 'static> ComputedOptions<T> {
    /// Defaults with `PartialEq` as comparer.
    pub fn new() -> Self {
        Self::with_equals(default_comparer())
    }
}

impl<T: PartialEq + 'static> Default for ComputedOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ComputedOptions<T> {
    /// Defaults with a custom comparer.
    pub fn with_equals(equals: Comparer<T>) -> Self {
        Self {
            name: None,
            equals,
            keep_alive: false,
            requires_reaction: false,
            setter: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn requires_reaction(mut self, requires_reaction: bool) -> Self {
        self.requires_reaction = requires_reaction;
        self
    }

    pub fn setter<F>(mut self, setter: F) -> Self
    where
        F: Fn(T) -> Result<()> + 'static,
    {
        self.setter = Some(Rc::new(setter));
        self
    }
}

/// A value change delivered to [`ComputedValue::observe`] listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedChange<T> {
    /// `None` for the first delivery.
    pub old_value: Option<T>,
    pub new_value: T,
}

pub(crate) struct ComputedInner<T> {
    runtime: Runtime,
    id: NodeId,
    name: String,
    derivation: Box<dyn Fn() -> Result<T>>,
    value: RefCell<Option<Result<T>>>,
    equals: Comparer<T>,
    keep_alive: bool,
    requires_reaction: bool,
    setter: Option<Setter<T>>,
    is_computing: Cell<bool>,
    is_running_setter: Cell<bool>,
}

impl<T: Clone + 'static> ComputedInner<T> {
    fn get(&self) -> Result<T> {
        if self.is_computing.get() {
            return Err(ReactiveError::Cycle {
                name: self.name.clone(),
            });
        }
        let runtime = &self.runtime;
        let state = runtime.state();

        if state.batch_depth.get() == 0 && runtime.observer_count(self.id) == 0 && !self.keep_alive {
            if runtime.should_compute(self.id) {
                self.warn_about_untracked_read();
                let _batch = BatchGuard::enter(runtime);
                let value = self.compute_value(false);
                let result = value.clone();
                *self.value.borrow_mut() = Some(value);
                return result;
            }
        } else {
            runtime.report_observed(self.id);
            if runtime.should_compute(self.id) {
                let _context = (self.keep_alive && state.tracking_context.get().is_none())
                    .then(|| ContextScope::enter(state, self.id));
                if self.track_and_compute() {
                    runtime.propagate_change_confirmed(self.id);
                }
            }
        }

        let cached = self.value.borrow().clone();
        match cached {
            Some(result) => result,
            None => self.compute_value(false),
        }
    }

    fn compute_value(&self, track: bool) -> Result<T> {
        let _computing = FlagScope::enter(&self.is_computing);
        let _deny = AllowStateChangesScope::enter(self.runtime.state(), false);
        if track {
            self.runtime.track(self.id, || (self.derivation)())
        } else {
            (self.derivation)()
        }
    }

    /// Recompute under tracking; returns whether the value changed.
    fn track_and_compute(&self) -> bool {
        let was_suspended = self.runtime.dependencies_state(self.id) == DerivationState::NotTracking;
        let new_value = self.compute_value(true);

        let changed = was_suspended
            || match (self.value.borrow().as_ref(), &new_value) {
                (Some(Ok(old)), Ok(new)) => !(self.equals)(old, new),
                _ => true,
            };

        if changed {
            let previous = self.value.borrow_mut().replace(new_value);
            drop(previous);
        }
        changed
    }

    fn warn_about_untracked_read(&self) {
        if self.requires_reaction || self.runtime.config().computed_requires_reaction {
            tracing::warn!(
                computed = %self.name,
                "computed value is read outside a reactive context and is recomputed on every read"
            );
        }
    }

    fn set(&self, value: T) -> Result<()> {
        let Some(setter) = &self.setter else {
            return Err(ReactiveError::NotWritable {
                name: self.name.clone(),
            });
        };
        if self.is_running_setter.get() {
            return Err(ReactiveError::ReentrantSetter {
                name: self.name.clone(),
            });
        }
        let _setting = FlagScope::enter(&self.is_running_setter);
        self.runtime.run_in_action(&self.name, || setter(value))
    }
}

impl<T: Clone + 'static> ComputedNode for ComputedInner<T> {
    fn refresh(&self) -> Result<()> {
        self.get().map(|_| ())
    }

    fn suspend(&self) {
        if self.keep_alive {
            return;
        }
        tracing::debug!(computed = %self.name, "suspending unobserved computed value");
        self.runtime.clear_observing(self.id);
        let stale = self.value.borrow_mut().take();
        drop(stale);
    }
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        self.runtime.release_node(self.id);
    }
}

/// A memoized derived value.
///
/// # Type Parameters
///
/// - `T`: The type of the computed value. Returned by clone on every read.
///
/// # Example
///
/// ```rust,ignore
/// let price = ObservableValue::new(10);
/// let doubled = ComputedValue::new({
///     let price = price.clone();
///     move || Ok(price.get() * 2)
/// });
/// assert_eq!(doubled.get()?, 20);
/// ```
pub struct ComputedValue<T> {
    inner: Rc<ComputedInner<T>>,
}

impl<T> ComputedValue<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Create a computed value in the thread's default runtime.
    pub fn new<F>(derivation: F) -> Self
    where
        F: Fn() -> Result<T> + 'static,
    {
        Self::with_options(&Runtime::current(), derivation, ComputedOptions::new())
    }

    /// Create a computed value in the given runtime.
    pub fn new_in<F>(runtime: &Runtime, derivation: F) -> Self
    where
        F: Fn() -> Result<T> + 'static,
    {
        Self::with_options(runtime, derivation, ComputedOptions::new())
    }
}

impl<T> ComputedValue<T>
where
    T: Clone + 'static,
{
    /// Create a computed value with explicit options.
    ///
    /// The derivation is not run until the first read.
    pub fn with_options<F>(runtime: &Runtime, derivation: F, options: ComputedOptions<T>) -> Self
    where
        F: Fn() -> Result<T> + 'static,
    {
        let name = options.name.unwrap_or_else(|| unique_name("ComputedValue"));
        let inner = Rc::new_cyclic(|weak: &Weak<ComputedInner<T>>| {
            let node: Weak<dyn ComputedNode> = weak.clone();
            let id = runtime.insert_node(Node::computed(name.clone(), node));
            ComputedInner {
                runtime: runtime.clone(),
                id,
                name,
                derivation: Box::new(derivation),
                value: RefCell::new(None),
                equals: options.equals,
                keep_alive: options.keep_alive,
                requires_reaction: options.requires_reaction,
                setter: options.setter,
                is_computing: Cell::new(false),
                is_running_setter: Cell::new(false),
            }
        });
        Self { inner }
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// Inside a derivation this also registers the computed as a dependency.
    pub fn get(&self) -> Result<T> {
        self.inner.get()
    }

    /// Assign through the setter, run as an action.
    pub fn set(&self, value: T) -> Result<()> {
        self.inner.set(value)
    }

    /// Call `listener` with every new value.
    ///
    /// The listener runs untracked. With `fire_immediately` it also receives
    /// the current value right away.
    pub fn observe<F>(&self, fire_immediately: bool, listener: F) -> Disposer
    where
        F: Fn(&ComputedChange<T>) + 'static,
    {
        let computed = self.clone();
        let previous: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
        let first = Rc::new(Cell::new(true));
        let listener = Rc::new(listener);
        let runtime = self.inner.runtime.clone();

        let reaction = Reaction::new_in(&runtime, format!("{}.observe", self.name()), move |reaction| {
            let computed = computed.clone();
            let previous = previous.clone();
            let first = first.clone();
            let listener = listener.clone();
            let runtime = reaction.runtime().clone();
            reaction.track(move || {
                let new_value = computed.get()?;
                if !first.get() || fire_immediately {
                    let change = ComputedChange {
                        old_value: previous.borrow().clone(),
                        new_value: new_value.clone(),
                    };
                    runtime.untracked(|| listener(&change));
                }
                first.set(false);
                *previous.borrow_mut() = Some(new_value);
                Ok(())
            });
            Ok(())
        });
        reaction.schedule();
        reaction.disposer()
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    /// Whether the derivation is running right now.
    pub fn is_computing(&self) -> bool {
        self.inner.is_computing.get()
    }

    pub fn dependencies_state(&self) -> DerivationState {
        self.inner.runtime.dependencies_state(self.inner.id)
    }

    pub fn observer_count(&self) -> usize {
        self.inner.runtime.observer_count(self.inner.id)
    }

    pub fn is_being_observed(&self) -> bool {
        self.inner.runtime.is_being_observed(self.inner.id)
    }

    pub fn is_keep_alive(&self) -> bool {
        self.inner.keep_alive
    }

    /// Whether a cached value (or cached error) is held.
    pub fn has_value(&self) -> bool {
        self.inner.value.borrow().is_some()
    }

    /// Log every invalidation of this computed.
    pub fn set_tracing(&self, enabled: bool) {
        self.inner.runtime.set_tracing(self.inner.id, enabled);
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Clone for ComputedValue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Debug for ComputedValue<T>
where
    T: Clone + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedValue")
            .field("name", &self.name())
            .field("state", &self.dependencies_state())
            .field("has_value", &self.has_value())
            .field("observer_count", &self.observer_count())
            .finish()
    }
}

impl Runtime {
    /// Create a computed value in this runtime.
    pub fn computed<T, F>(&self, derivation: F) -> ComputedValue<T>
    where
        T: Clone + PartialEq + 'static,
        F: Fn() -> Result<T> + 'static,
    {
        ComputedValue::new_in(self, derivation)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::ObservableValue;

    fn counted<T: Clone + PartialEq + 'static>(
        runtime: &Runtime,
        f: impl Fn() -> Result<T> + 'static,
    ) -> (ComputedValue<T>, Rc<Cell<i32>>) {
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let computed = runtime.computed(move || {
            counter.set(counter.get() + 1);
            f()
        });
        (computed, calls)
    }

    fn keep_observed<T: Clone + 'static>(runtime: &Runtime, computed: &ComputedValue<T>) -> Reaction {
        let computed = computed.clone();
        let reaction = Reaction::new_in(runtime, "keep", move |r| {
            let computed = computed.clone();
            r.track(move || computed.get().map(|_| ()));
            Ok(())
        });
        reaction.schedule();
        reaction
    }

    #[test]
    fn computes_lazily() {
        let runtime = Runtime::new();
        let (computed, calls) = counted(&runtime, || Ok(42));

        // Not computed yet
        assert!(!computed.has_value());
        assert_eq!(calls.get(), 0);

        assert_eq!(computed.get().unwrap(), 42);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn unobserved_reads_recompute_every_time() {
        let runtime = Runtime::new();
        let (computed, calls) = counted(&runtime, || Ok(1));

        computed.get().unwrap();
        computed.get().unwrap();
        assert_eq!(calls.get(), 2);
        assert_eq!(computed.dependencies_state(), DerivationState::NotTracking);
    }

    #[test]
    fn observed_value_is_cached() {
        let runtime = Runtime::new();
        let source = runtime.observable("source", 2);
        let reader = source.clone();
        let (computed, calls) = counted(&runtime, move || Ok(reader.get() * 10));
        let reaction = keep_observed(&runtime, &computed);

        assert_eq!(calls.get(), 1);
        assert_eq!(computed.get().unwrap(), 20);
        assert_eq!(computed.get().unwrap(), 20);
        assert_eq!(calls.get(), 1);

        source.set(3).unwrap();
        assert_eq!(calls.get(), 2);
        assert_eq!(computed.get().unwrap(), 30);
        reaction.dispose();
    }

    #[test]
    fn reads_inside_batch_are_cached_until_batch_ends() {
        let runtime = Runtime::new();
        let (computed, calls) = counted(&runtime, || Ok(5));

        runtime.batch(|| {
            computed.get().unwrap();
            computed.get().unwrap();
            assert_eq!(calls.get(), 1);
            assert!(computed.has_value());
        });
        // The batch ended with no observer left: suspended.
        assert!(!computed.has_value());
        assert_eq!(computed.dependencies_state(), DerivationState::NotTracking);
    }

    #[test]
    fn self_reference_is_a_cycle_error() {
        let runtime = Runtime::new();
        let slot: Rc<RefCell<Option<ComputedValue<i32>>>> = Rc::new(RefCell::new(None));
        let reader = slot.clone();
        let computed = runtime.computed(move || {
            let inner = reader.borrow().clone();
            match inner {
                Some(me) => me.get().map(|v| v + 1),
                None => Ok(0),
            }
        });
        *slot.borrow_mut() = Some(computed.clone());

        let err = computed.get().unwrap_err();
        assert!(matches!(err, ReactiveError::Cycle { .. }));
        assert!(!computed.is_computing());
        slot.borrow_mut().take();
    }

    #[test]
    fn errors_are_cached_and_replaced_by_success() {
        let runtime = Runtime::new();
        let source = runtime.observable("source", -1);
        let reader = source.clone();
        let computed = runtime.computed(move || {
            let v = reader.get();
            if v < 0 {
                Err(ReactiveError::msg("negative"))
            } else {
                Ok(v)
            }
        });
        let reaction = keep_observed(&runtime, &computed);

        assert!(computed.get().is_err());
        assert!(computed.get().is_err());
        source.set(4).unwrap();
        assert_eq!(computed.get().unwrap(), 4);
        reaction.dispose();
    }

    #[test]
    fn setter_runs_as_action() {
        let runtime = Runtime::new();
        let source = runtime.observable("source", 1);
        let reader = source.clone();
        let writer = source.clone();
        let computed = ComputedValue::with_options(
            &runtime,
            move || Ok(reader.get() * 2),
            ComputedOptions::new().name("double").setter(move |v: i32| {
                writer.set(v / 2)?;
                Ok(())
            }),
        );

        computed.set(10).unwrap();
        assert_eq!(source.get(), 5);
        assert_eq!(computed.get().unwrap(), 10);
    }

    #[test]
    fn writing_without_setter_fails() {
        let runtime = Runtime::new();
        let computed = runtime.computed(|| Ok(1));
        assert!(matches!(
            computed.set(2),
            Err(ReactiveError::NotWritable { .. })
        ));
    }

    #[test]
    fn derivation_may_not_write_observed_state() {
        let runtime = Runtime::new();
        let target = runtime.observable("target", 0);
        let _watch = {
            let target = target.clone();
            let reaction = Reaction::new_in(&runtime, "watch", move |r| {
                let target = target.clone();
                r.track(move || {
                    target.get();
                    Ok(())
                });
                Ok(())
            });
            reaction.schedule();
            reaction
        };
        let writer = target.clone();
        let computed = runtime.computed(move || writer.set(1).map(|_| 0));
        assert!(matches!(
            computed.get(),
            Err(ReactiveError::StateChangeNotAllowed { .. })
        ));
    }

    #[test]
    fn keep_alive_keeps_cache_without_observers() {
        let runtime = Runtime::new();
        let source = runtime.observable("source", 1);
        let reader = source.clone();
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let computed = ComputedValue::with_options(
            &runtime,
            move || {
                counter.set(counter.get() + 1);
                Ok(reader.get())
            },
            ComputedOptions::new().keep_alive(true),
        );

        assert_eq!(computed.get().unwrap(), 1);
        assert_eq!(computed.get().unwrap(), 1);
        assert_eq!(calls.get(), 1);
        assert_eq!(source.observer_count(), 1);

        source.set(2).unwrap();
        assert_eq!(computed.get().unwrap(), 2);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn observe_delivers_changes() {
        let runtime = Runtime::new();
        let source = runtime.observable("source", 1);
        let reader = source.clone();
        let computed = runtime.computed(move || Ok(reader.get() % 2));
        let seen: Rc<RefCell<Vec<ComputedChange<i32>>>> = Rc::new(RefCell::new(Vec::new()));

        let sink = seen.clone();
        let disposer = computed.observe(false, move |change| sink.borrow_mut().push(change.clone()));
        source.set(3).unwrap();
        source.set(4).unwrap();
        disposer.dispose();
        source.set(5).unwrap();

        assert_eq!(
            *seen.borrow(),
            vec![ComputedChange {
                old_value: Some(1),
                new_value: 0
            }]
        );
    }

    #[test]
    fn unchanged_value_keeps_observer_fresh() {
        let runtime = Runtime::new();
        let source = runtime.observable("source", 1);
        let reader = source.clone();
        let parity = runtime.computed(move || Ok(reader.get() % 2));
        let parity_reader = parity.clone();
        let (label, label_calls) = counted(&runtime, move || {
            Ok(if parity_reader.get()? == 0 { "even" } else { "odd" })
        });
        let reaction = keep_observed(&runtime, &label);
        assert_eq!(label_calls.get(), 1);

        source.set(3).unwrap();
        assert_eq!(label_calls.get(), 1);
        assert_eq!(label.dependencies_state(), DerivationState::UpToDate);
        reaction.dispose();
    }

    #[test]
    fn is_computing_flag_resets_on_observable_box() {
        let runtime = Runtime::new();
        let value = ObservableValue::new_in(&runtime, "v", 3);
        let reader = value.clone();
        let computed = runtime.computed(move || Ok(reader.get()));
        assert_eq!(computed.get().unwrap(), 3);
        assert!(!computed.is_computing());
    }
}
