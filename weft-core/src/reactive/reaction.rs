//! Reaction Implementation
//!
//! A reaction is a side-effecting derivation. It is never observed itself:
//! it sits at the end of the graph and runs again, eagerly, whenever one of
//! its dependencies changed.
//!
//! # How Reactions Work
//!
//! 1. [`schedule`](Reaction::schedule) puts the reaction on the pending
//!    queue. The queue is flushed when the outermost batch closes.
//!
//! 2. When it runs, the reaction first checks whether it actually has to:
//!    a possibly-stale reaction whose computed dependencies all produced the
//!    same values is skipped.
//!
//! 3. If it has to run, the owner's `on_invalidate` callback is called. That
//!    callback decides what to do and calls [`track`](Reaction::track)
//!    exactly once to run the tracked part and record its dependencies.
//!
//! 4. A dependency change makes the reaction stale and schedules it again.
//!
//! # Errors
//!
//! Errors returned from `on_invalidate` or from the tracked function never
//! escape into the reaction loop. They go to the reaction's own error
//! handler if it has one; otherwise they are logged and passed to the
//! runtime's global handlers.
//!
//! # Disposal
//!
//! A reaction lives until it is disposed; dropping the handle does not stop
//! it. Disposing a reaction while it runs defers the teardown until the run
//! completes.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::error::{ReactiveError, Result};
use crate::graph::{DerivationState, Node, NodeId, ReactionNode};

use super::context::{BatchGuard, ContextScope, FlagScope};
use super::runtime::{unique_name, Runtime};
use super::subscriber::Disposer;

/// Callback run when a reaction is due.
pub type OnInvalidate = dyn Fn(&Reaction) -> Result<()>;

/// Per-reaction error handler.
pub type ErrorHandler = dyn Fn(&ReactiveError, &Reaction);

/// Options for creating a [`Reaction`].
#[derive(Default)]
pub struct ReactionOptions {
    pub error_handler: Option<Box<ErrorHandler>>,
    /// Warn when a run completes without reading any observable.
    pub requires_observable: bool,
}

impl ReactionOptions {
    pub fn error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ReactiveError, &Reaction) + 'static,
    {
        self.error_handler = Some(Box::new(handler));
        self
    }

    pub fn requires_observable(mut self, requires_observable: bool) -> Self {
        self.requires_observable = requires_observable;
        self
    }
}

struct ReactionInner {
    runtime: Runtime,
    id: Cell<NodeId>,
    name: String,
    on_invalidate: Box<OnInvalidate>,
    error_handler: Option<Box<ErrorHandler>>,
    requires_observable: bool,
    is_disposed: Cell<bool>,
    is_scheduled: Cell<bool>,
    is_running: Cell<bool>,
    is_track_pending: Cell<bool>,
    run_count: Cell<u64>,
}

/// An eager side-effecting derivation.
///
/// # Example
///
/// ```rust,ignore
/// let count = ObservableValue::new(0);
///
/// let reaction = Reaction::new("log", {
///     let count = count.clone();
///     move |r| {
///         let count = count.clone();
///         r.track(move || {
///             println!("Count is: {}", count.get());
///             Ok(())
///         });
///         Ok(())
///     }
/// });
/// reaction.schedule();
///
/// count.set(5)?;  // Prints: "Count is: 5"
/// ```
#[derive(Clone)]
pub struct Reaction {
    inner: Rc<ReactionInner>,
}

impl Reaction {
    /// Create a reaction in the thread's default runtime.
    ///
    /// The reaction does not run until it is scheduled.
    pub fn new<F>(name: impl Into<String>, on_invalidate: F) -> Self
    where
        F: Fn(&Reaction) -> Result<()> + 'static,
    {
        Self::new_in(&Runtime::current(), name, on_invalidate)
    }

    /// Create a reaction in the given runtime.
    pub fn new_in<F>(runtime: &Runtime, name: impl Into<String>, on_invalidate: F) -> Self
    where
        F: Fn(&Reaction) -> Result<()> + 'static,
    {
        Self::with_options(runtime, name, on_invalidate, ReactionOptions::default())
    }

    /// Create a reaction with explicit options.
    pub fn with_options<F>(
        runtime: &Runtime,
        name: impl Into<String>,
        on_invalidate: F,
        options: ReactionOptions,
    ) -> Self
    where
        F: Fn(&Reaction) -> Result<()> + 'static,
    {
        let mut name = name.into();
        if name.is_empty() {
            name = unique_name("Reaction");
        }
        let reaction = Self {
            inner: Rc::new(ReactionInner {
                runtime: runtime.clone(),
                id: Cell::new(NodeId::DANGLING),
                name: name.clone(),
                on_invalidate: Box::new(on_invalidate),
                error_handler: options.error_handler,
                requires_observable: options.requires_observable,
                is_disposed: Cell::new(false),
                is_scheduled: Cell::new(false),
                is_running: Cell::new(false),
                is_track_pending: Cell::new(false),
                run_count: Cell::new(0),
            }),
        };
        let node: Rc<dyn ReactionNode> = Rc::new(reaction.clone());
        let id = runtime.insert_node(Node::reaction(name, node));
        reaction.inner.id.set(id);
        reaction
    }

    /// Queue the reaction; it runs when the outermost batch closes (right
    /// away if no batch is open).
    pub fn schedule(&self) {
        let inner = &self.inner;
        if inner.is_scheduled.get() || inner.is_disposed.get() {
            return;
        }
        inner.is_scheduled.set(true);
        inner.runtime.enqueue_reaction(inner.id.get());
    }

    fn run_reaction(&self) {
        let inner = &self.inner;
        if inner.is_disposed.get() {
            return;
        }
        let runtime = &inner.runtime;
        let _batch = BatchGuard::enter(runtime);
        inner.is_scheduled.set(false);
        let _context = ContextScope::enter(runtime.state(), inner.id.get());
        if runtime.should_compute(inner.id.get()) {
            inner.is_track_pending.set(true);
            tracing::trace!(reaction = %inner.name, "running reaction");
            if let Err(error) = (inner.on_invalidate)(self) {
                self.report_exception(error);
            }
        }
    }

    /// Run `f`, recording every observable it reads as a dependency of
    /// this reaction.
    ///
    /// Errors returned by `f` are routed to the reaction's error handling.
    pub fn track<F>(&self, f: F)
    where
        F: FnOnce() -> Result<()>,
    {
        let inner = &self.inner;
        if inner.is_disposed.get() {
            return;
        }
        let runtime = &inner.runtime;
        let id = inner.id.get();
        let result = {
            let _batch = BatchGuard::enter(runtime);
            let _running = FlagScope::enter(&inner.is_running);
            let _context = ContextScope::enter(runtime.state(), id);
            runtime.track(id, f)
        };
        inner.is_track_pending.set(false);
        inner.run_count.set(inner.run_count.get() + 1);

        if inner.is_disposed.get() {
            self.teardown();
        }
        if let Err(error) = result {
            self.report_exception(error);
        }
        if !inner.is_disposed.get() {
            self.warn_without_dependencies();
        }
    }

    fn warn_without_dependencies(&self) {
        let inner = &self.inner;
        if !inner.requires_observable && !inner.runtime.config().reaction_requires_observable {
            return;
        }
        let observes_nothing = inner
            .runtime
            .with_node(inner.id.get(), |node| node.observing.is_empty())
            .unwrap_or(false);
        if observes_nothing {
            tracing::warn!(
                reaction = %inner.name,
                "reaction is required to observe something but read no observables"
            );
        }
    }

    fn report_exception(&self, error: ReactiveError) {
        if let Some(handler) = &self.inner.error_handler {
            handler(&error, self);
            return;
        }
        self.inner.runtime.report_reaction_error(&error, self);
    }

    /// Stop the reaction and unsubscribe it from all dependencies.
    ///
    /// Idempotent. A reaction disposed from inside its own run is torn down
    /// once that run completes.
    pub fn dispose(&self) {
        let inner = &self.inner;
        if inner.is_disposed.get() {
            return;
        }
        inner.is_disposed.set(true);
        if !inner.is_running.get() {
            self.teardown();
        }
    }

    fn teardown(&self) {
        let runtime = &self.inner.runtime;
        let id = self.inner.id.get();
        {
            let _batch = BatchGuard::enter(runtime);
            runtime.clear_observing(id);
        }
        runtime.release_node(id);
        tracing::debug!(reaction = %self.inner.name, "reaction disposed");
    }

    /// A disposer that disposes this reaction.
    pub fn disposer(&self) -> Disposer {
        let reaction = self.clone();
        Disposer::new(move || reaction.dispose())
    }

    pub fn id(&self) -> NodeId {
        self.inner.id.get()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed.get()
    }

    pub fn is_scheduled(&self) -> bool {
        self.inner.is_scheduled.get()
    }

    /// Whether `on_invalidate` is running but has not called `track` yet.
    pub fn is_track_pending(&self) -> bool {
        self.inner.is_track_pending.get()
    }

    /// Number of completed tracked runs.
    pub fn run_count(&self) -> u64 {
        self.inner.run_count.get()
    }

    pub fn dependencies_state(&self) -> DerivationState {
        self.inner.runtime.dependencies_state(self.inner.id.get())
    }

    /// Number of observables read by the last run.
    pub fn dependency_count(&self) -> usize {
        self.inner
            .runtime
            .with_node(self.inner.id.get(), |node| node.observing.len())
            .unwrap_or(0)
    }

    /// Log every invalidation of this reaction along with its cause.
    pub fn set_tracing(&self, enabled: bool) {
        self.inner.runtime.set_tracing(self.inner.id.get(), enabled);
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl ReactionNode for Reaction {
    fn schedule(&self) {
        Reaction::schedule(self);
    }

    fn run(&self) {
        self.run_reaction();
    }

    fn unschedule(&self) {
        self.inner.is_scheduled.set(false);
    }

    fn report_error(&self, error: ReactiveError) {
        self.report_exception(error);
    }
}

impl fmt::Debug for Reaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reaction")
            .field("name", &self.inner.name)
            .field("id", &self.inner.id.get())
            .field("disposed", &self.is_disposed())
            .field("scheduled", &self.is_scheduled())
            .field("run_count", &self.run_count())
            .finish()
    }
}

impl Runtime {
    /// Create a reaction in this runtime.
    pub fn reaction<F>(&self, name: impl Into<String>, on_invalidate: F) -> Reaction
    where
        F: Fn(&Reaction) -> Result<()> + 'static,
    {
        Reaction::new_in(self, name, on_invalidate)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
