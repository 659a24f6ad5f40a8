//! Node Arena
//!
//! All nodes of one runtime live in a single arena and refer to each other
//! through [`NodeId`]s. Edges are stored on both ends: an observable keeps
//! the set of derivations observing it, a derivation keeps the ordered list
//! of observables it read during its last run. Freeing a node removes its
//! id from every peer, so no live node ever points at a freed slot.

use std::collections::VecDeque;

use super::node::{DerivationState, Node, NodeId};

struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// The dependency graph of one runtime plus its pending work queues.
#[derive(Default)]
pub(crate) struct Graph {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,

    /// Reactions waiting for the end of the outermost batch, FIFO.
    pub(crate) pending_reactions: Vec<NodeId>,

    /// Observables that lost their last observer during the current batch.
    pub(crate) pending_unobservations: VecDeque<NodeId>,
}

impl Graph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a node and return its id.
    pub(crate) fn insert(&mut self, node: Node) -> NodeId {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return NodeId::new(index, slot.generation);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeId::new(index, 0)
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&Node> {
        self.slots
            .get(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.node.as_ref())
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.node.as_mut())
    }

    /// Number of live nodes.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Free a node and unlink it from all peers.
    ///
    /// The node is handed back so the caller can drop it (and whatever user
    /// state it owns) after releasing its borrow of the graph.
    pub(crate) fn remove(&mut self, id: NodeId) -> Option<Node> {
        let slot = self
            .slots
            .get_mut(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())?;
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index());
        self.len -= 1;

        for dependency in node.observing.iter().chain(node.new_observing.iter()) {
            self.remove_observer(*dependency, id);
        }
        for observer in &node.observers {
            if let Some(derivation) = self.get_mut(*observer) {
                derivation.observing.retain(|dep| *dep != id);
                derivation.new_observing.retain(|dep| *dep != id);
            }
        }
        Some(node)
    }

    /// Register `derivation` as an observer of `observable`.
    pub(crate) fn add_observer(&mut self, observable: NodeId, derivation: NodeId) {
        let state = match self.get(derivation) {
            Some(node) => node.dependencies_state,
            None => return,
        };
        if let Some(node) = self.get_mut(observable) {
            node.observers.insert(derivation);
            if node.lowest_observer_state > state {
                node.lowest_observer_state = state;
            }
        }
    }

    /// Unregister `derivation` from `observable`, queueing the observable
    /// for unobservation when it just lost its last observer.
    pub(crate) fn remove_observer(&mut self, observable: NodeId, derivation: NodeId) {
        let now_empty = match self.get_mut(observable) {
            Some(node) => node.observers.shift_remove(&derivation) && node.observers.is_empty(),
            None => false,
        };
        if now_empty {
            self.queue_for_unobservation(observable);
        }
    }

    pub(crate) fn queue_for_unobservation(&mut self, observable: NodeId) {
        if let Some(node) = self.get_mut(observable) {
            if !node.is_pending_unobservation {
                node.is_pending_unobservation = true;
                self.pending_unobservations.push_back(observable);
            }
        }
    }

    /// Current staleness of a derivation; freed nodes read as not tracking.
    pub(crate) fn state(&self, id: NodeId) -> DerivationState {
        self.get(id)
            .map(|node| node.dependencies_state)
            .unwrap_or(DerivationState::NotTracking)
    }

    pub(crate) fn observer_count(&self, id: NodeId) -> usize {
        self.get(id).map(|node| node.observers.len()).unwrap_or(0)
    }

    pub(crate) fn name(&self, id: NodeId) -> String {
        self.get(id)
            .map(|node| node.name.clone())
            .unwrap_or_else(|| format!("<freed {id}>"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_remove_nodes() {
        let mut graph = Graph::new();

        let a = graph.insert(Node::atom("a"));
        let b = graph.insert(Node::atom("b"));
        assert_eq!(graph.len(), 2);

        assert!(graph.remove(a).is_some());
        assert_eq!(graph.len(), 1);
        assert!(graph.get(a).is_none());
        assert!(graph.get(b).is_some());
    }

    #[test]
    fn stale_ids_do_not_alias_reused_slots() {
        let mut graph = Graph::new();

        let old = graph.insert(Node::atom("old"));
        graph.remove(old);
        let new = graph.insert(Node::atom("new"));

        assert_eq!(old.index(), new.index());
        assert_ne!(old, new);
        assert!(graph.get(old).is_none());
        assert_eq!(graph.name(new), "new");
    }

    #[test]
    fn observer_edges() {
        let mut graph = Graph::new();
        let source = graph.insert(Node::atom("source"));
        let derived = graph.insert(Node::atom("derived"));
        graph.get_mut(derived).unwrap().dependencies_state = DerivationState::UpToDate;
        graph.get_mut(derived).unwrap().observing.push(source);

        graph.add_observer(source, derived);
        assert!(graph.get(source).unwrap().observers.contains(&derived));

        graph.remove_observer(source, derived);
        assert_eq!(graph.observer_count(source), 0);
        // Losing the last observer queues the observable exactly once.
        graph.queue_for_unobservation(source);
        assert_eq!(graph.pending_unobservations.len(), 1);
        assert!(graph.get(source).unwrap().is_pending_unobservation);
    }

    #[test]
    fn removing_a_node_unlinks_peers() {
        let mut graph = Graph::new();
        let source = graph.insert(Node::atom("source"));
        let derived = graph.insert(Node::atom("derived"));
        graph.get_mut(derived).unwrap().observing.push(source);
        graph.add_observer(source, derived);

        graph.remove(source);
        assert!(graph.get(derived).unwrap().observing.is_empty());
    }
}
