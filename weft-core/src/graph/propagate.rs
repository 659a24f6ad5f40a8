//! Staleness Propagation
//!
//! Pure graph algorithms that move derivations between the four
//! [`DerivationState`]s. None of these call user code: reactions that become
//! stale are appended to an `effects` buffer, and the runtime schedules them
//! once it has released its borrow of the graph.
//!
//! # Algorithm
//!
//! 1. An atom changes: its direct observers become `Stale`, and every
//!    computed among them tells its own observers they are `PossiblyStale`.
//! 2. A possibly-stale derivation is pulled: it asks each computed
//!    dependency for its value, which recomputes that dependency if needed.
//! 3. A computed that recomputed to a different value confirms the change:
//!    its `PossiblyStale` observers become `Stale`.
//! 4. If no dependency confirmed a change, the derivation goes back to
//!    `UpToDate` without running.

use std::mem;

use super::arena::Graph;
use super::node::{Dependencies, DerivationState, NodeId, NodeKind};

impl Graph {
    fn observers_of(&self, id: NodeId) -> Dependencies {
        self.get(id)
            .map(|node| node.observers.iter().copied().collect())
            .unwrap_or_default()
    }

    fn set_state(&mut self, id: NodeId, state: DerivationState) {
        if let Some(node) = self.get_mut(id) {
            node.dependencies_state = state;
        }
    }

    /// An atom's value is known to have changed.
    pub(crate) fn propagate_changed(&mut self, observable: NodeId, effects: &mut Vec<NodeId>) {
        match self.get_mut(observable) {
            Some(node) if node.lowest_observer_state != DerivationState::Stale => {
                node.lowest_observer_state = DerivationState::Stale;
            }
            _ => return,
        }

        for derivation in self.observers_of(observable) {
            if self.state(derivation) == DerivationState::UpToDate {
                self.become_stale(derivation, Some(observable), effects);
            }
            self.set_state(derivation, DerivationState::Stale);
        }
    }

    /// A computed recomputed and its value changed.
    pub(crate) fn propagate_change_confirmed(&mut self, observable: NodeId) {
        match self.get_mut(observable) {
            Some(node) if node.lowest_observer_state != DerivationState::Stale => {
                node.lowest_observer_state = DerivationState::Stale;
            }
            _ => return,
        }

        for derivation in self.observers_of(observable) {
            match self.state(derivation) {
                DerivationState::PossiblyStale => {
                    self.set_state(derivation, DerivationState::Stale);
                }
                // The observer is the one computing right now and re-entered
                // this value; it is not invalidated by its own read.
                DerivationState::UpToDate => {
                    if let Some(node) = self.get_mut(observable) {
                        node.lowest_observer_state = DerivationState::UpToDate;
                    }
                }
                _ => {}
            }
        }
    }

    /// A dependency of a computed might have changed.
    pub(crate) fn propagate_maybe_changed(
        &mut self,
        observable: NodeId,
        effects: &mut Vec<NodeId>,
    ) {
        match self.get_mut(observable) {
            Some(node) if node.lowest_observer_state == DerivationState::UpToDate => {
                node.lowest_observer_state = DerivationState::PossiblyStale;
            }
            _ => return,
        }

        for derivation in self.observers_of(observable) {
            if self.state(derivation) == DerivationState::UpToDate {
                self.set_state(derivation, DerivationState::PossiblyStale);
                self.become_stale(derivation, Some(observable), effects);
            }
        }
    }

    fn become_stale(&mut self, derivation: NodeId, cause: Option<NodeId>, effects: &mut Vec<NodeId>) {
        let Some(node) = self.get(derivation) else {
            return;
        };
        if node.is_tracing {
            let cause = cause.map(|id| self.name(id)).unwrap_or_default();
            tracing::info!(
                derivation = %node.name,
                cause = %cause,
                "derivation invalidated"
            );
        }
        match node.kind() {
            NodeKind::Computed => self.propagate_maybe_changed(derivation, effects),
            NodeKind::Reaction => effects.push(derivation),
            NodeKind::Atom => {}
        }
    }

    /// Mark a derivation up to date and reset the fast-path bound of each of
    /// its dependencies.
    pub(crate) fn change_dependencies_state_to_0(&mut self, derivation: NodeId) {
        let observing = match self.get_mut(derivation) {
            Some(node) if node.dependencies_state != DerivationState::UpToDate => {
                node.dependencies_state = DerivationState::UpToDate;
                node.observing.clone()
            }
            _ => return,
        };
        for dependency in observing {
            if let Some(node) = self.get_mut(dependency) {
                node.lowest_observer_state = DerivationState::UpToDate;
            }
        }
    }

    /// Diff the dependencies collected by the finished run against those of
    /// the previous run and update observer sets accordingly.
    pub(crate) fn bind_dependencies(&mut self, derivation: NodeId, effects: &mut Vec<NodeId>) {
        let (previous, collected) = match self.get_mut(derivation) {
            Some(node) => (
                mem::take(&mut node.observing),
                mem::take(&mut node.new_observing),
            ),
            None => return,
        };

        // Deduplicate the new list and mark its members.
        let mut observing = Dependencies::new();
        let mut lowest = DerivationState::UpToDate;
        for dependency in collected {
            let Some(node) = self.get_mut(dependency) else {
                continue;
            };
            if node.diff_value == 0 {
                node.diff_value = 1;
                observing.push(dependency);
            }
            // Dependencies that turned stale during this run never had a
            // chance to notify us.
            if node.dependencies_state > lowest {
                lowest = node.dependencies_state;
            }
        }

        // Unmarked old dependencies are gone; clear marks of retained ones.
        for dependency in previous.iter().rev() {
            let retained = self
                .get(*dependency)
                .map(|node| node.diff_value != 0)
                .unwrap_or(true);
            if !retained {
                self.remove_observer(*dependency, derivation);
            }
            if let Some(node) = self.get_mut(*dependency) {
                node.diff_value = 0;
            }
        }

        // Still marked means new.
        for dependency in &observing {
            let added = match self.get_mut(*dependency) {
                Some(node) if node.diff_value == 1 => {
                    node.diff_value = 0;
                    true
                }
                _ => false,
            };
            if added {
                self.add_observer(*dependency, derivation);
            }
        }

        if let Some(node) = self.get_mut(derivation) {
            node.observing = observing;
        }

        if lowest != DerivationState::UpToDate {
            self.set_state(derivation, lowest);
            self.become_stale(derivation, None, effects);
        }
    }

    /// Drop all dependencies of a derivation and mark it not tracking.
    pub(crate) fn clear_observing(&mut self, derivation: NodeId) {
        let observing = match self.get_mut(derivation) {
            Some(node) => {
                node.dependencies_state = DerivationState::NotTracking;
                mem::take(&mut node.observing)
            }
            None => return,
        };
        for dependency in observing.iter().rev() {
            self.remove_observer(*dependency, derivation);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::rc::{Rc, Weak};

    use super::*;
    use crate::error::Result;
    use crate::graph::node::{ComputedNode, Node, ReactionNode};

    struct NoopComputed;

    impl ComputedNode for NoopComputed {
        fn refresh(&self) -> Result<()> {
            Ok(())
        }
        fn suspend(&self) {}
    }

    struct NoopReaction;

    impl ReactionNode for NoopReaction {
        fn schedule(&self) {}
        fn run(&self) {}
        fn unschedule(&self) {}
        fn report_error(&self, _error: crate::error::ReactiveError) {}
    }

    fn computed(graph: &mut Graph, name: &str) -> NodeId {
        let weak: Weak<dyn ComputedNode> = Weak::<NoopComputed>::new();
        graph.insert(Node::computed(name, weak))
    }

    fn reaction(graph: &mut Graph, name: &str) -> NodeId {
        graph.insert(Node::reaction(name, Rc::new(NoopReaction)))
    }

    /// Simulate a completed run of `derivation` that read `deps`.
    fn run(graph: &mut Graph, derivation: NodeId, deps: &[NodeId]) {
        graph.change_dependencies_state_to_0(derivation);
        graph.get_mut(derivation).unwrap().new_observing = deps.iter().copied().collect();
        let mut effects = Vec::new();
        graph.bind_dependencies(derivation, &mut effects);
        assert!(effects.is_empty());
    }

    #[test]
    fn change_marks_direct_observers_stale_and_schedules_reactions() {
        let mut graph = Graph::new();
        let atom = graph.insert(Node::atom("a"));
        let memo = computed(&mut graph, "b");
        let effect = reaction(&mut graph, "r");
        run(&mut graph, memo, &[atom]);
        run(&mut graph, effect, &[memo]);

        let mut effects = Vec::new();
        graph.propagate_changed(atom, &mut effects);

        assert_eq!(graph.state(memo), DerivationState::Stale);
        assert_eq!(graph.state(effect), DerivationState::PossiblyStale);
        assert_eq!(effects, vec![effect]);

        // Already stale: a second change is a no-op.
        let mut again = Vec::new();
        graph.propagate_changed(atom, &mut again);
        assert!(again.is_empty());
    }

    #[test]
    fn confirmed_change_promotes_possibly_stale_observers() {
        let mut graph = Graph::new();
        let atom = graph.insert(Node::atom("a"));
        let memo = computed(&mut graph, "b");
        let effect = reaction(&mut graph, "r");
        run(&mut graph, memo, &[atom]);
        run(&mut graph, effect, &[memo]);

        let mut effects = Vec::new();
        graph.propagate_changed(atom, &mut effects);
        run(&mut graph, memo, &[atom]);
        graph.propagate_change_confirmed(memo);

        assert_eq!(graph.state(effect), DerivationState::Stale);
        assert_eq!(
            graph.get(memo).unwrap().lowest_observer_state,
            DerivationState::Stale
        );
    }

    #[test]
    fn confirmed_change_keeps_up_to_date_observer_bound() {
        let mut graph = Graph::new();
        let atom = graph.insert(Node::atom("a"));
        let memo = computed(&mut graph, "b");
        let effect = reaction(&mut graph, "r");
        run(&mut graph, memo, &[atom]);
        run(&mut graph, effect, &[memo]);

        // The observer is mid-run (up to date) when the computed confirms.
        graph.get_mut(memo).unwrap().lowest_observer_state = DerivationState::PossiblyStale;
        graph.propagate_change_confirmed(memo);

        assert_eq!(graph.state(effect), DerivationState::UpToDate);
        assert_eq!(
            graph.get(memo).unwrap().lowest_observer_state,
            DerivationState::UpToDate
        );
    }

    #[test]
    fn bind_dependencies_diffs_old_and_new() {
        let mut graph = Graph::new();
        let a = graph.insert(Node::atom("a"));
        let b = graph.insert(Node::atom("b"));
        let c = graph.insert(Node::atom("c"));
        let effect = reaction(&mut graph, "r");

        run(&mut graph, effect, &[a, b, a]);
        assert_eq!(graph.get(effect).unwrap().observing.as_slice(), &[a, b]);
        assert_eq!(graph.observer_count(a), 1);

        run(&mut graph, effect, &[b, c]);
        assert_eq!(graph.get(effect).unwrap().observing.as_slice(), &[b, c]);
        assert_eq!(graph.observer_count(a), 0);
        assert_eq!(graph.observer_count(b), 1);
        assert_eq!(graph.observer_count(c), 1);
        assert_eq!(graph.pending_unobservations.front(), Some(&a));
    }

    #[test]
    fn clear_observing_suspends_derivation() {
        let mut graph = Graph::new();
        let a = graph.insert(Node::atom("a"));
        let memo = computed(&mut graph, "b");
        run(&mut graph, memo, &[a]);

        graph.clear_observing(memo);
        assert_eq!(graph.state(memo), DerivationState::NotTracking);
        assert_eq!(graph.observer_count(a), 0);
    }
}
