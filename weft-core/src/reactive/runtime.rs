//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects atoms, computed
//! values and reactions. It owns the dependency graph and the scheduler
//! state, and implements the transactional batching that keeps observers
//! from ever seeing a partially updated graph.
//!
//! # How It Works
//!
//! 1. Reading an observable inside a derivation calls
//!    [`report_observed`](Runtime::report_observed), which appends the
//!    observable to the derivation's in-progress dependency list.
//!
//! 2. When the derivation finishes, the runtime diffs the new list against
//!    the previous one and updates observer sets.
//!
//! 3. Writing an observable opens a batch, propagates staleness through the
//!    graph and queues every reaction that became stale.
//!
//! 4. When the outermost batch closes, the queued reactions run (possibly
//!    queueing more), and observables that lost their last observer during
//!    the batch are torn down.
//!
//! # Threading
//!
//! A runtime is single-threaded. Each thread gets its own default runtime
//! through [`Runtime::current`]; independent graphs can be created with
//! [`Runtime::new`]. The batch counter is the only mutual exclusion needed:
//! all graph mutation happens synchronously on the owning thread.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::mem;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::{Config, ReactionScheduler};
use crate::error::{ReactiveError, Result};
use crate::graph::{DerivationState, Graph, Node, NodeId};

use super::context::{ActionScope, BatchGuard, FlagScope, TrackingScope, UntrackedScope};
use super::reaction::Reaction;
use super::subscriber::{Disposer, Listeners};

/// Global reaction error handler.
pub type ReactionErrorHandler = dyn Fn(&ReactiveError, &Reaction);

/// Scheduler flags and counters.
///
/// Only ever touched from the owning thread, so plain cells suffice.
pub(crate) struct GlobalState {
    /// Derivation currently collecting dependencies.
    pub(crate) tracking_derivation: Cell<Option<NodeId>>,
    /// Outermost reaction or keep-alive computed driving a track; gates the
    /// observed hooks.
    pub(crate) tracking_context: Cell<Option<NodeId>>,
    pub(crate) batch_depth: Cell<usize>,
    pub(crate) is_running_reactions: Cell<bool>,
    pub(crate) allow_state_changes: Cell<bool>,
    pub(crate) suppress_reaction_errors: Cell<bool>,
    run_id: Cell<u64>,
    pub(crate) current_action_id: Cell<u64>,
    next_action_id: Cell<u64>,
}

impl GlobalState {
    fn new() -> Self {
        Self {
            tracking_derivation: Cell::new(None),
            tracking_context: Cell::new(None),
            batch_depth: Cell::new(0),
            is_running_reactions: Cell::new(false),
            allow_state_changes: Cell::new(true),
            suppress_reaction_errors: Cell::new(false),
            run_id: Cell::new(0),
            current_action_id: Cell::new(0),
            next_action_id: Cell::new(1),
        }
    }

    pub(crate) fn next_action_id(&self) -> u64 {
        let id = self.next_action_id.get();
        self.next_action_id.set(id + 1);
        id
    }
}

pub(crate) struct RuntimeInner {
    pub(crate) graph: RefCell<Graph>,
    pub(crate) state: GlobalState,
    config: RefCell<Config>,
    scheduler: RefCell<Option<ReactionScheduler>>,
    error_handlers: Listeners<ReactionErrorHandler>,
}

/// Counter for generating debug names.
static NAME_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique debug name such as `ComputedValue@7`.
pub(crate) fn unique_name(prefix: &str) -> String {
    format!("{prefix}@{}", NAME_COUNTER.fetch_add(1, Ordering::Relaxed))
}

thread_local! {
    static CURRENT: Runtime = Runtime::new();
}

/// Handle to one reactive graph and its scheduler.
///
/// Cloning is cheap; all clones refer to the same graph.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    /// Create a new, independent graph.
    pub fn new() -> Self {
        Self::from_config(Config::default())
    }

    /// Create a new graph with the given configuration.
    pub fn with_config(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_config(config))
    }

    fn from_config(config: Config) -> Self {
        Self {
            inner: Rc::new(RuntimeInner {
                graph: RefCell::new(Graph::new()),
                state: GlobalState::new(),
                config: RefCell::new(config),
                scheduler: RefCell::new(None),
                error_handlers: Listeners::new(),
            }),
        }
    }

    /// The default runtime of the calling thread.
    pub fn current() -> Self {
        CURRENT.with(Clone::clone)
    }

    /// Whether two handles refer to the same graph.
    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn state(&self) -> &GlobalState {
        &self.inner.state
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Replace the runtime configuration. An invalid configuration leaves
    /// the current one in place.
    pub fn configure(&self, config: Config) -> Result<()> {
        config.validate()?;
        *self.inner.config.borrow_mut() = config;
        Ok(())
    }

    /// Current configuration.
    pub fn config(&self) -> Config {
        self.inner.config.borrow().clone()
    }

    /// Let the host decide when pending reactions are flushed.
    ///
    /// The scheduler receives the flush job each time reactions are pending
    /// outside a batch. It may run the job immediately or defer it (for
    /// example to coalesce flushes into a render tick).
    pub fn set_reaction_scheduler<F>(&self, scheduler: F)
    where
        F: Fn(Box<dyn FnOnce()>) + 'static,
    {
        *self.inner.scheduler.borrow_mut() = Some(Rc::new(scheduler));
    }

    /// Restore synchronous flushing.
    pub fn clear_reaction_scheduler(&self) {
        self.inner.scheduler.borrow_mut().take();
    }

    /// Register a handler for reaction errors that no per-reaction handler
    /// picked up.
    pub fn on_reaction_error<F>(&self, handler: F) -> Disposer
    where
        F: Fn(&ReactiveError, &Reaction) + 'static,
    {
        let id = self.inner.error_handlers.add(Rc::new(handler));
        let runtime = self.clone();
        Disposer::new(move || {
            runtime.inner.error_handlers.remove(id);
        })
    }

    /// Reset scheduler state: drop pending work and clear all flags.
    ///
    /// Live nodes are kept. Meant for tests and for recovering after a
    /// panic escaped a reactive function.
    pub fn reset(&self) {
        let pending = {
            let mut graph = self.inner.graph.borrow_mut();
            graph.pending_unobservations.clear();
            mem::take(&mut graph.pending_reactions)
        };
        for id in pending {
            if let Some(reaction) = self.reaction_node(id) {
                reaction.unschedule();
            }
        }
        let state = &self.inner.state;
        state.tracking_derivation.set(None);
        state.tracking_context.set(None);
        state.batch_depth.set(0);
        state.is_running_reactions.set(false);
        state.allow_state_changes.set(true);
        state.suppress_reaction_errors.set(false);
        state.current_action_id.set(0);
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Whether a derivation is currently collecting dependencies.
    pub fn is_tracking(&self) -> bool {
        self.inner.state.tracking_derivation.get().is_some()
    }

    /// Whether a batch is open.
    pub fn in_batch(&self) -> bool {
        self.inner.state.batch_depth.get() > 0
    }

    /// Current batch nesting depth.
    pub fn batch_depth(&self) -> usize {
        self.inner.state.batch_depth.get()
    }

    /// Number of live graph nodes.
    pub fn node_count(&self) -> usize {
        self.inner.graph.borrow().len()
    }

    /// Number of reactions waiting to run.
    pub fn pending_reaction_count(&self) -> usize {
        self.inner.graph.borrow().pending_reactions.len()
    }

    // ------------------------------------------------------------------
    // Batching
    // ------------------------------------------------------------------

    /// Open a batch. Reactions and unobservation clean-up are deferred
    /// until the matching outermost [`end_batch`](Runtime::end_batch).
    pub fn start_batch(&self) {
        let state = &self.inner.state;
        state.batch_depth.set(state.batch_depth.get() + 1);
    }

    /// Close a batch; closing the outermost one flushes pending work.
    pub fn end_batch(&self) {
        let state = &self.inner.state;
        let depth = state.batch_depth.get();
        debug_assert!(depth > 0, "end_batch without matching start_batch");
        let depth = depth.saturating_sub(1);
        state.batch_depth.set(depth);
        if depth == 0 {
            self.run_reactions();
            self.process_unobservations();
        }
    }

    /// Run `f` inside a batch.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        let _batch = BatchGuard::enter(self);
        f()
    }

    /// Run `f` without registering any dependency for the enclosing
    /// derivation.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _untracked = UntrackedScope::enter(&self.inner.state);
        f()
    }

    /// Run `f` as an action: batched, untracked, with state changes
    /// allowed.
    ///
    /// If `f` fails, reactions flushed while the action closes do not log
    /// their errors (the failure is returned to the caller); error handlers
    /// still run.
    pub fn run_in_action<R, E>(&self, name: &str, f: impl FnOnce() -> Result<R, E>) -> Result<R, E> {
        tracing::trace!(action = name, "action start");
        let mut scope = ActionScope::enter(self);
        let result = f();
        scope.failed = result.is_err();
        drop(scope);
        result
    }

    fn process_unobservations(&self) {
        loop {
            let Some(id) = self.inner.graph.borrow_mut().pending_unobservations.pop_front() else {
                break;
            };
            let (hooks, computed) = {
                let mut graph = self.inner.graph.borrow_mut();
                let Some(node) = graph.get_mut(id) else {
                    continue;
                };
                node.is_pending_unobservation = false;
                if !node.observers.is_empty() {
                    continue;
                }
                let hooks = if node.is_being_observed {
                    node.is_being_observed = false;
                    node.hooks.clone()
                } else {
                    None
                };
                (hooks, node.computed_value())
            };
            if let Some(hooks) = hooks {
                for hook in hooks.unobserved.snapshot() {
                    hook();
                }
            }
            if let Some(computed) = computed {
                computed.suspend();
            }
        }
    }

    // ------------------------------------------------------------------
    // Reaction loop
    // ------------------------------------------------------------------

    pub(crate) fn enqueue_reaction(&self, id: NodeId) {
        self.inner.graph.borrow_mut().pending_reactions.push(id);
        self.run_reactions();
    }

    /// Flush pending reactions unless a batch is open or a flush is already
    /// in progress.
    pub(crate) fn run_reactions(&self) {
        let state = &self.inner.state;
        if state.batch_depth.get() > 0 || state.is_running_reactions.get() {
            return;
        }
        let scheduler = self.inner.scheduler.borrow().clone();
        match scheduler {
            Some(scheduler) => {
                let runtime = self.clone();
                scheduler(Box::new(move || runtime.run_reactions_helper()));
            }
            None => self.run_reactions_helper(),
        }
    }

    fn run_reactions_helper(&self) {
        let state = &self.inner.state;
        // A deferred flush may land while a batch is open; that batch will
        // request another flush when it closes.
        if state.batch_depth.get() > 0 || state.is_running_reactions.get() {
            return;
        }
        let _running = FlagScope::enter(&state.is_running_reactions);
        let max_iterations = self.inner.config.borrow().max_reaction_iterations;
        let mut iterations = 0;

        loop {
            let pass = mem::take(&mut self.inner.graph.borrow_mut().pending_reactions);
            if pass.is_empty() {
                break;
            }
            iterations += 1;
            if iterations >= max_iterations {
                self.discard_runaway(pass, iterations);
                break;
            }
            tracing::trace!(pass = iterations, reactions = pass.len(), "running reactions");
            for id in pass {
                if let Some(reaction) = self.reaction_node(id) {
                    reaction.run();
                }
            }
        }
    }

    fn discard_runaway(&self, pass: Vec<NodeId>, iterations: usize) {
        let name = self.node_name(pass[0]);
        let first = self.reaction_node(pass[0]);
        for id in &pass {
            if let Some(reaction) = self.reaction_node(*id) {
                reaction.unschedule();
            }
        }
        let error = ReactiveError::RunawayReactions { name, iterations };
        match first {
            Some(reaction) => reaction.report_error(error),
            None => tracing::error!(error = %error, "reaction loop aborted"),
        }
    }

    fn reaction_node(&self, id: NodeId) -> Option<Rc<dyn crate::graph::ReactionNode>> {
        self.inner.graph.borrow().get(id).and_then(Node::reaction_value)
    }

    pub(crate) fn schedule_effects(&self, effects: Vec<NodeId>) {
        for id in effects {
            if let Some(reaction) = self.reaction_node(id) {
                reaction.schedule();
            }
        }
    }

    /// Route an uncaught reaction error to the global handlers, logging it
    /// unless logging is suppressed.
    pub(crate) fn report_reaction_error(&self, error: &ReactiveError, reaction: &Reaction) {
        if !self.inner.state.suppress_reaction_errors.get() {
            tracing::error!(reaction = %reaction.name(), error = %error, "uncaught error in reaction");
        }
        for handler in self.inner.error_handlers.snapshot() {
            handler(error, reaction);
        }
    }

    // ------------------------------------------------------------------
    // Graph access
    // ------------------------------------------------------------------

    pub(crate) fn insert_node(&self, node: Node) -> NodeId {
        self.inner.graph.borrow_mut().insert(node)
    }

    /// Free a node. Safe to call from `Drop`: if the graph is busy the node
    /// is leaked rather than panicking.
    pub(crate) fn release_node(&self, id: NodeId) {
        let removed = match self.inner.graph.try_borrow_mut() {
            Ok(mut graph) => graph.remove(id),
            Err(_) => {
                tracing::trace!(node = %id, "graph busy, node leaked");
                None
            }
        };
        drop(removed);
    }

    pub(crate) fn with_node<R>(&self, id: NodeId, f: impl FnOnce(&Node) -> R) -> Option<R> {
        self.inner.graph.borrow().get(id).map(f)
    }

    pub(crate) fn with_node_mut<R>(&self, id: NodeId, f: impl FnOnce(&mut Node) -> R) -> Option<R> {
        self.inner.graph.borrow_mut().get_mut(id).map(f)
    }

    pub(crate) fn dependencies_state(&self, id: NodeId) -> DerivationState {
        self.inner.graph.borrow().state(id)
    }

    pub(crate) fn observer_count(&self, id: NodeId) -> usize {
        self.inner.graph.borrow().observer_count(id)
    }

    pub(crate) fn is_being_observed(&self, id: NodeId) -> bool {
        self.with_node(id, |node| node.is_being_observed).unwrap_or(false)
    }

    pub(crate) fn node_name(&self, id: NodeId) -> String {
        self.inner.graph.borrow().name(id)
    }

    pub(crate) fn set_tracing(&self, id: NodeId, enabled: bool) {
        self.with_node_mut(id, |node| node.is_tracing = enabled);
    }

    // ------------------------------------------------------------------
    // Observation and propagation
    // ------------------------------------------------------------------

    /// Register `observable` as a dependency of the tracking derivation.
    ///
    /// Returns whether a derivation was tracking.
    pub(crate) fn report_observed(&self, observable: NodeId) -> bool {
        let state = &self.inner.state;
        let Some(derivation) = state.tracking_derivation.get() else {
            let mut graph = self.inner.graph.borrow_mut();
            if state.batch_depth.get() > 0 && graph.observer_count(observable) == 0 {
                graph.queue_for_unobservation(observable);
            }
            return false;
        };

        let hooks = {
            let mut graph = self.inner.graph.borrow_mut();
            let Some(run_id) = graph.get(derivation).map(|node| node.run_id) else {
                return true;
            };
            let in_context = state.tracking_context.get().is_some();
            let Some(node) = graph.get_mut(observable) else {
                return true;
            };
            if node.last_accessed_by == run_id {
                return true;
            }
            node.last_accessed_by = run_id;
            let hooks = if !node.is_being_observed && in_context {
                node.is_being_observed = true;
                node.hooks.clone()
            } else {
                None
            };
            if let Some(tracker) = graph.get_mut(derivation) {
                tracker.new_observing.push(observable);
            }
            hooks
        };

        if let Some(hooks) = hooks {
            for hook in hooks.observed.snapshot() {
                hook();
            }
        }
        true
    }

    /// Signal that an observable's value changed.
    pub(crate) fn report_changed(&self, observable: NodeId) {
        let _batch = BatchGuard::enter(self);
        let mut effects = Vec::new();
        self.inner
            .graph
            .borrow_mut()
            .propagate_changed(observable, &mut effects);
        self.schedule_effects(effects);
    }

    pub(crate) fn propagate_change_confirmed(&self, observable: NodeId) {
        self.inner
            .graph
            .borrow_mut()
            .propagate_change_confirmed(observable);
    }

    pub(crate) fn clear_observing(&self, derivation: NodeId) {
        self.inner.graph.borrow_mut().clear_observing(derivation);
    }

    fn next_run_id(&self) -> u64 {
        let state = &self.inner.state;
        let id = state.run_id.get() + 1;
        state.run_id.set(id);
        id
    }

    /// Run `f` as derivation `id`, collecting the observables it reads and
    /// rebinding the derivation's dependencies afterwards.
    ///
    /// Errors returned by `f` are passed through untouched; the dependency
    /// bookkeeping completes either way.
    pub(crate) fn track<R>(&self, id: NodeId, f: impl FnOnce() -> Result<R>) -> Result<R> {
        {
            let run_id = self.next_run_id();
            let mut graph = self.inner.graph.borrow_mut();
            graph.change_dependencies_state_to_0(id);
            if let Some(node) = graph.get_mut(id) {
                node.new_observing.clear();
                node.run_id = run_id;
            }
        }

        let result = {
            let _scope = TrackingScope::enter(&self.inner.state, id);
            f()
        };

        let mut effects = Vec::new();
        self.inner
            .graph
            .borrow_mut()
            .bind_dependencies(id, &mut effects);
        self.schedule_effects(effects);
        result
    }

    /// Decide whether derivation `id` has to run.
    ///
    /// Possibly-stale derivations are resolved by pulling each computed
    /// dependency; if none of them actually changed the derivation is
    /// marked up to date without running.
    pub(crate) fn should_compute(&self, id: NodeId) -> bool {
        match self.dependencies_state(id) {
            DerivationState::UpToDate => false,
            DerivationState::NotTracking | DerivationState::Stale => true,
            DerivationState::PossiblyStale => {
                let _untracked = UntrackedScope::enter(&self.inner.state);
                let observing = self
                    .with_node(id, |node| node.observing.clone())
                    .unwrap_or_default();
                for dependency in observing {
                    let computed = self
                        .inner
                        .graph
                        .borrow()
                        .get(dependency)
                        .and_then(Node::computed_value);
                    let Some(computed) = computed else {
                        continue;
                    };
                    // The value itself is irrelevant here, but an error
                    // always counts as a change.
                    if computed.refresh().is_err() {
                        return true;
                    }
                    if self.dependencies_state(id) == DerivationState::Stale {
                        return true;
                    }
                }
                self.inner
                    .graph
                    .borrow_mut()
                    .change_dependencies_state_to_0(id);
                false
            }
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("nodes", &self.node_count())
            .field("batch_depth", &self.batch_depth())
            .field("pending_reactions", &self.pending_reaction_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Atom, Reaction};
    use std::cell::Cell;

    fn tracking_reaction(runtime: &Runtime, atom: &Atom, runs: Rc<Cell<i32>>) -> Reaction {
        let atom = atom.clone();
        let reaction = Reaction::new_in(runtime, "observer", move |r| {
            let atom = atom.clone();
            let runs = runs.clone();
            r.track(move || {
                atom.report_observed();
                runs.set(runs.get() + 1);
                Ok(())
            });
            Ok(())
        });
        reaction.schedule();
        reaction
    }

    #[test]
    fn batch_depth_is_reentrant() {
        let runtime = Runtime::new();
        assert!(!runtime.in_batch());

        runtime.start_batch();
        runtime.start_batch();
        assert_eq!(runtime.batch_depth(), 2);
        runtime.end_batch();
        assert!(runtime.in_batch());
        runtime.end_batch();
        assert!(!runtime.in_batch());
    }

    #[test]
    fn reactions_wait_for_outermost_batch() {
        let runtime = Runtime::new();
        let atom = Atom::new_in(&runtime, "a");
        let runs = Rc::new(Cell::new(0));
        let _reaction = tracking_reaction(&runtime, &atom, runs.clone());
        assert_eq!(runs.get(), 1);

        runtime.batch(|| {
            atom.report_changed();
            atom.report_changed();
            runtime.batch(|| atom.report_changed());
            assert_eq!(runs.get(), 1);
            assert_eq!(runtime.pending_reaction_count(), 1);
        });
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn untracked_reads_register_nothing() {
        let runtime = Runtime::new();
        let atom = Atom::new_in(&runtime, "a");
        let runs = Rc::new(Cell::new(0));
        let runs_clone = runs.clone();
        let reader = atom.clone();
        let rt = runtime.clone();
        let reaction = Reaction::new_in(&runtime, "untracked", move |r| {
            let reader = reader.clone();
            let rt = rt.clone();
            let runs = runs_clone.clone();
            r.track(move || {
                rt.untracked(|| reader.report_observed());
                runs.set(runs.get() + 1);
                Ok(())
            });
            Ok(())
        });
        reaction.schedule();

        atom.report_changed();
        assert_eq!(runs.get(), 1);
        assert_eq!(atom.observer_count(), 0);
    }

    #[test]
    fn custom_scheduler_defers_flush() {
        let runtime = Runtime::new();
        let queued: Rc<RefCell<Vec<Box<dyn FnOnce()>>>> = Rc::new(RefCell::new(Vec::new()));
        let queue = queued.clone();
        runtime.set_reaction_scheduler(move |job| queue.borrow_mut().push(job));

        let atom = Atom::new_in(&runtime, "a");
        let runs = Rc::new(Cell::new(0));
        let _reaction = tracking_reaction(&runtime, &atom, runs.clone());
        assert_eq!(runs.get(), 0);

        let jobs: Vec<_> = queued.borrow_mut().drain(..).collect();
        for job in jobs {
            job();
        }
        assert_eq!(runs.get(), 1);

        runtime.clear_reaction_scheduler();
        atom.report_changed();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn action_restores_state_and_flushes_once() {
        let runtime = Runtime::new();
        let atom = Atom::new_in(&runtime, "a");
        let runs = Rc::new(Cell::new(0));
        let _reaction = tracking_reaction(&runtime, &atom, runs.clone());

        let result: Result<i32, ReactiveError> = runtime.run_in_action("bump", || {
            assert!(!runtime.is_tracking());
            atom.report_changed();
            atom.report_changed();
            Ok(7)
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(runs.get(), 2);
        assert!(!runtime.in_batch());
        assert_eq!(runtime.state().current_action_id.get(), 0);
    }

    #[test]
    fn reset_clears_pending_work() {
        let runtime = Runtime::new();
        let atom = Atom::new_in(&runtime, "a");
        let runs = Rc::new(Cell::new(0));
        let reaction = tracking_reaction(&runtime, &atom, runs.clone());

        runtime.start_batch();
        atom.report_changed();
        assert!(reaction.is_scheduled());

        runtime.reset();
        assert_eq!(runtime.batch_depth(), 0);
        assert_eq!(runtime.pending_reaction_count(), 0);
        assert!(!reaction.is_scheduled());
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn current_runtime_is_per_thread_singleton() {
        let a = Runtime::current();
        let b = Runtime::current();
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&Runtime::new()));
    }

    #[test]
    fn invalid_configuration_is_not_adopted() {
        let runtime = Runtime::new();
        let rejected = runtime.configure(Config {
            max_reaction_iterations: 1,
            ..Config::default()
        });
        assert!(matches!(rejected, Err(ReactiveError::InvalidConfig(_))));
        assert_eq!(runtime.config(), Config::default());
        assert!(Runtime::with_config(Config {
            max_reaction_iterations: 0,
            ..Config::default()
        })
        .is_err());
    }

    #[test]
    fn smallest_iteration_ceiling_still_runs_reactions() {
        let runtime = Runtime::with_config(Config {
            max_reaction_iterations: 2,
            ..Config::default()
        })
        .unwrap();
        let atom = Atom::new_in(&runtime, "a");
        let runs = Rc::new(Cell::new(0));
        let reaction = tracking_reaction(&runtime, &atom, Rc::clone(&runs));
        assert_eq!(runs.get(), 1);
        atom.report_changed();
        assert_eq!(runs.get(), 2);
        reaction.dispose();
    }

    #[test]
    fn confirmed_change_leaves_the_running_reader_up_to_date() {
        use crate::reactive::{ComputedValue, ObservableValue};
        use std::cell::RefCell;

        let runtime = Runtime::new();
        let a = ObservableValue::new_in(&runtime, "a", 1);
        let source = a.clone();
        let c = ComputedValue::new_in(&runtime, move || Ok(source.get() * 2));

        // Second reader of `c`, registered once it exists.
        let other: Rc<RefCell<Option<NodeId>>> = Rc::new(RefCell::new(None));
        let seen: Rc<RefCell<Vec<(DerivationState, DerivationState)>>> = Rc::default();
        let first_runs = Rc::new(Cell::new(0));

        let (reader_a, reader_c, inspect) = (a.clone(), c.clone(), runtime.clone());
        let (other_id, sink, runs) = (Rc::clone(&other), Rc::clone(&seen), Rc::clone(&first_runs));
        let first = Reaction::new_in(&runtime, "first", move |r| {
            let (reader_a, reader_c) = (reader_a.clone(), reader_c.clone());
            let (inspect, other_id) = (inspect.clone(), Rc::clone(&other_id));
            let (sink, runs) = (Rc::clone(&sink), Rc::clone(&runs));
            r.track(move || {
                runs.set(runs.get() + 1);
                reader_a.get();
                reader_c.get()?;
                if let Some(other) = *other_id.borrow() {
                    let lowest = inspect
                        .with_node(reader_c.id(), |node| node.lowest_observer_state)
                        .unwrap_or(DerivationState::NotTracking);
                    sink.borrow_mut()
                        .push((lowest, inspect.dependencies_state(other)));
                }
                Ok(())
            });
            Ok(())
        });
        first.schedule();

        let second_seen = Rc::new(Cell::new(0));
        let (reader, sink) = (c.clone(), Rc::clone(&second_seen));
        let second = Reaction::new_in(&runtime, "second", move |r| {
            let (reader, sink) = (reader.clone(), Rc::clone(&sink));
            r.track(move || {
                sink.set(reader.get()?);
                Ok(())
            });
            Ok(())
        });
        second.schedule();
        *other.borrow_mut() = Some(second.id());
        assert_eq!(second_seen.get(), 2);

        a.set(5).unwrap();
        // While `first` re-reads `c`, the recomputation confirmed the change:
        // the other reader became stale, but `c` keeps its up-to-date bound
        // because `first` is the reader being computed.
        assert_eq!(
            *seen.borrow(),
            vec![(DerivationState::UpToDate, DerivationState::Stale)]
        );
        assert_eq!(first_runs.get(), 2);
        assert_eq!(second_seen.get(), 10);
        first.dispose();
        second.dispose();
    }
}
