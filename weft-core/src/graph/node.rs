//! Graph Nodes
//!
//! This module defines the node record that lives in the dependency graph
//! arena. A single record shape serves all three node kinds: atoms and
//! computed values use the observable half (observer set, lowest observer
//! state), computed values and reactions use the derivation half
//! (dependency list, staleness state).

use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexSet;
use serde::Serialize;
use smallvec::SmallVec;

use crate::error::Result;
use crate::reactive::subscriber::Listeners;

/// Generation-checked handle to a node in the graph arena.
///
/// The index addresses a slot; the generation distinguishes the current
/// occupant of that slot from earlier, already freed nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    /// An id that never resolves to a live node.
    pub(crate) const DANGLING: NodeId = NodeId {
        index: u32::MAX,
        generation: u32::MAX,
    };

    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index inside the arena.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation of the slot when this id was handed out.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A plain observable. Has observers, never dependencies.
    Atom,

    /// A memoized derivation. Has both dependencies and observers.
    Computed,

    /// An eager side effect. Has dependencies but is never observed.
    Reaction,
}

/// How confident a derivation is that its cached result is still valid.
///
/// The variants are ordered: `NotTracking < UpToDate < PossiblyStale < Stale`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivationState {
    /// Not participating in the graph: never run, or suspended.
    NotTracking,

    /// No dependency changed since the last run.
    UpToDate,

    /// Some deep dependency changed; a shallow dependency may or may not
    /// produce a different value.
    PossiblyStale,

    /// A shallow dependency changed; the derivation must run again.
    Stale,
}

/// Behaviour the graph needs from a computed value without knowing its type.
pub(crate) trait ComputedNode {
    /// Bring the cached value up to date, discarding the value itself.
    fn refresh(&self) -> Result<()>;

    /// Drop the cached value and dependencies after the last observer left.
    fn suspend(&self);
}

/// Behaviour the graph needs from a reaction.
pub(crate) trait ReactionNode {
    /// Put the reaction on the pending queue.
    fn schedule(&self);

    /// Run the reaction if it is still due.
    fn run(&self);

    /// Clear the scheduled flag of a reaction that was dropped from the queue.
    fn unschedule(&self);

    /// Route an error raised on the reaction's behalf.
    fn report_error(&self, error: crate::error::ReactiveError);
}

/// Type-specific half of a node.
pub(crate) enum Behavior {
    Atom,
    Computed(Weak<dyn ComputedNode>),
    Reaction(Rc<dyn ReactionNode>),
}

impl Behavior {
    fn kind(&self) -> NodeKind {
        match self {
            Behavior::Atom => NodeKind::Atom,
            Behavior::Computed(_) => NodeKind::Computed,
            Behavior::Reaction(_) => NodeKind::Reaction,
        }
    }
}

/// Callbacks fired when an observable gains its first or loses its last
/// reactive observer.
#[derive(Default)]
pub(crate) struct ObservationHooks {
    pub(crate) observed: Listeners<dyn Fn()>,
    pub(crate) unobserved: Listeners<dyn Fn()>,
}

/// Dependency list; most derivations read only a handful of observables.
pub(crate) type Dependencies = SmallVec<[NodeId; 4]>;

/// A node in the dependency graph.
pub(crate) struct Node {
    /// Debug name, used in logs and errors.
    pub(crate) name: String,

    pub(crate) behavior: Behavior,

    /// Derivations that read this node, in the order they subscribed.
    pub(crate) observers: IndexSet<NodeId>,
    pub(crate) is_being_observed: bool,
    pub(crate) is_pending_unobservation: bool,
    /// Lower bound of the states of all observers. Lets propagation stop
    /// early when nothing downstream can change state.
    pub(crate) lowest_observer_state: DerivationState,
    /// Run id of the derivation that last reported reading this node.
    pub(crate) last_accessed_by: u64,
    /// Scratch marker for dependency diffing.
    pub(crate) diff_value: u8,
    pub(crate) hooks: Option<Rc<ObservationHooks>>,

    pub(crate) dependencies_state: DerivationState,
    /// Dependencies from the last completed run.
    pub(crate) observing: Dependencies,
    /// Dependencies collected by the run in progress.
    pub(crate) new_observing: Dependencies,
    pub(crate) run_id: u64,
    pub(crate) is_tracing: bool,
}

impl Node {
    fn new(name: impl Into<String>, behavior: Behavior, lowest: DerivationState) -> Self {
        Self {
            name: name.into(),
            behavior,
            observers: IndexSet::new(),
            is_being_observed: false,
            is_pending_unobservation: false,
            lowest_observer_state: lowest,
            last_accessed_by: 0,
            diff_value: 0,
            hooks: None,
            dependencies_state: DerivationState::NotTracking,
            observing: Dependencies::new(),
            new_observing: Dependencies::new(),
            run_id: 0,
            is_tracing: false,
        }
    }

    /// Create an atom node.
    pub(crate) fn atom(name: impl Into<String>) -> Self {
        Self::new(name, Behavior::Atom, DerivationState::NotTracking)
    }

    /// Create a computed node backed by the given value.
    pub(crate) fn computed(name: impl Into<String>, value: Weak<dyn ComputedNode>) -> Self {
        Self::new(name, Behavior::Computed(value), DerivationState::UpToDate)
    }

    /// Create a reaction node.
    pub(crate) fn reaction(name: impl Into<String>, reaction: Rc<dyn ReactionNode>) -> Self {
        Self::new(name, Behavior::Reaction(reaction), DerivationState::NotTracking)
    }

    pub(crate) fn kind(&self) -> NodeKind {
        self.behavior.kind()
    }

    /// The typed computed value behind this node, if it is still alive.
    pub(crate) fn computed_value(&self) -> Option<Rc<dyn ComputedNode>> {
        match &self.behavior {
            Behavior::Computed(weak) => weak.upgrade(),
            _ => None,
        }
    }

    /// The reaction behind this node.
    pub(crate) fn reaction_value(&self) -> Option<Rc<dyn ReactionNode>> {
        match &self.behavior {
            Behavior::Reaction(reaction) => Some(Rc::clone(reaction)),
            _ => None,
        }
    }

    pub(crate) fn hooks_mut(&mut self) -> Rc<ObservationHooks> {
        Rc::clone(self.hooks.get_or_insert_with(Default::default))
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("dependencies_state", &self.dependencies_state)
            .field("lowest_observer_state", &self.lowest_observer_state)
            .field("observers", &self.observers.len())
            .field("observing", &self.observing.len())
            .finish()
    }
}
