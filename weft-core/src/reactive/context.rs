//! Reactive Context
//!
//! The runtime keeps a handful of ambient flags: which derivation is
//! collecting dependencies, how deep the current batch is, whether state
//! changes are allowed, which action is running. Every piece of code that
//! changes one of them does so through a scope guard defined here.
//!
//! # Implementation
//!
//! Each guard saves the previous value on entry and restores it on drop,
//! so the flags unwind correctly through early returns, `?` and panics.
//! Guards nest the way the computations they wrap nest: a computed read
//! from inside a reaction pushes its own tracking scope on top of the
//! reaction's and pops it before the reaction continues.

use std::cell::Cell;
use std::thread;

use crate::graph::NodeId;

use super::runtime::{GlobalState, Runtime};

/// Marks a derivation as the one collecting dependencies.
///
/// Also holds a raw batch level so nothing flushes while the derivation
/// runs; the enclosing code is responsible for the actual flush.
pub(crate) struct TrackingScope<'a> {
    state: &'a GlobalState,
    derivation: NodeId,
    previous: Option<NodeId>,
}

impl<'a> TrackingScope<'a> {
    pub(crate) fn enter(state: &'a GlobalState, derivation: NodeId) -> Self {
        let previous = state.tracking_derivation.replace(Some(derivation));
        state.batch_depth.set(state.batch_depth.get() + 1);
        Self {
            state,
            derivation,
            previous,
        }
    }
}

impl Drop for TrackingScope<'_> {
    fn drop(&mut self) {
        let current = self.state.tracking_derivation.replace(self.previous);
        debug_assert_eq!(
            current,
            Some(self.derivation),
            "TrackingScope mismatch: expected {:?}, got {:?}",
            self.derivation,
            current
        );
        self.state
            .batch_depth
            .set(self.state.batch_depth.get().saturating_sub(1));
    }
}

/// Suspends dependency collection.
pub(crate) struct UntrackedScope<'a> {
    state: &'a GlobalState,
    previous: Option<NodeId>,
}

impl<'a> UntrackedScope<'a> {
    pub(crate) fn enter(state: &'a GlobalState) -> Self {
        let previous = state.tracking_derivation.take();
        Self { state, previous }
    }
}

impl Drop for UntrackedScope<'_> {
    fn drop(&mut self) {
        self.state.tracking_derivation.set(self.previous);
    }
}

/// Names the outermost tracker (a reaction or keep-alive computed) so that
/// observed hooks fire for what it reads.
pub(crate) struct ContextScope<'a> {
    state: &'a GlobalState,
    previous: Option<NodeId>,
}

impl<'a> ContextScope<'a> {
    pub(crate) fn enter(state: &'a GlobalState, context: NodeId) -> Self {
        let previous = state.tracking_context.replace(Some(context));
        Self { state, previous }
    }
}

impl Drop for ContextScope<'_> {
    fn drop(&mut self) {
        self.state.tracking_context.set(self.previous);
    }
}

/// Sets whether observed state may be written.
pub(crate) struct AllowStateChangesScope<'a> {
    state: &'a GlobalState,
    previous: bool,
}

impl<'a> AllowStateChangesScope<'a> {
    pub(crate) fn enter(state: &'a GlobalState, allow: bool) -> Self {
        let previous = state.allow_state_changes.replace(allow);
        Self { state, previous }
    }
}

impl Drop for AllowStateChangesScope<'_> {
    fn drop(&mut self) {
        self.state.allow_state_changes.set(self.previous);
    }
}

/// Raises a boolean flag (reaction loop running, computed mid-derivation,
/// setter running) for the lifetime of the scope.
pub(crate) struct FlagScope<'a> {
    flag: &'a Cell<bool>,
}

impl<'a> FlagScope<'a> {
    pub(crate) fn enter(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self { flag }
    }
}

impl Drop for FlagScope<'_> {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}

/// Holds a batch open for as long as it lives.
///
/// Closing the outermost batch flushes reactions, unless the thread is
/// unwinding: then the depth is restored but no user code runs.
pub struct BatchGuard<'a> {
    runtime: &'a Runtime,
}

impl<'a> BatchGuard<'a> {
    /// Open a batch on `runtime`.
    pub fn enter(runtime: &'a Runtime) -> Self {
        runtime.start_batch();
        Self { runtime }
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        close_batch(self.runtime);
    }
}

fn close_batch(runtime: &Runtime) {
    if thread::panicking() {
        let state = runtime.state();
        state.batch_depth.set(state.batch_depth.get().saturating_sub(1));
    } else {
        runtime.end_batch();
    }
}

/// Everything an action changes: untracked, batched, state changes allowed.
pub(crate) struct ActionScope<'a> {
    runtime: &'a Runtime,
    previous_derivation: Option<NodeId>,
    previous_allow: bool,
    parent_action: u64,
    action_id: u64,
    /// Set by the caller when the action body failed.
    pub(crate) failed: bool,
}

impl<'a> ActionScope<'a> {
    pub(crate) fn enter(runtime: &'a Runtime) -> Self {
        let state = runtime.state();
        let previous_derivation = state.tracking_derivation.take();
        runtime.start_batch();
        let previous_allow = state.allow_state_changes.replace(true);
        let action_id = state.next_action_id();
        let parent_action = state.current_action_id.replace(action_id);
        Self {
            runtime,
            previous_derivation,
            previous_allow,
            parent_action,
            action_id,
            failed: false,
        }
    }
}

impl Drop for ActionScope<'_> {
    fn drop(&mut self) {
        let state = self.runtime.state();
        let current = state.current_action_id.replace(self.parent_action);
        debug_assert_eq!(
            current, self.action_id,
            "action id mismatch: expected {}, got {}",
            self.action_id, current
        );
        let suppress = self.failed && !state.suppress_reaction_errors.get();
        if suppress {
            state.suppress_reaction_errors.set(true);
        }
        state.allow_state_changes.set(self.previous_allow);
        close_batch(self.runtime);
        state.tracking_derivation.set(self.previous_derivation);
        if suppress {
            state.suppress_reaction_errors.set(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{self, AssertUnwindSafe};

    #[test]
    fn tracking_scopes_nest() {
        let runtime = Runtime::new();
        let state = runtime.state();
        let outer = NodeId::new(1, 0);
        let inner = NodeId::new(2, 0);

        assert!(state.tracking_derivation.get().is_none());
        {
            let _outer = TrackingScope::enter(state, outer);
            assert_eq!(state.tracking_derivation.get(), Some(outer));
            {
                let _inner = TrackingScope::enter(state, inner);
                assert_eq!(state.tracking_derivation.get(), Some(inner));
                assert_eq!(state.batch_depth.get(), 2);
            }
            // After inner scope drops, outer should be current
            assert_eq!(state.tracking_derivation.get(), Some(outer));
        }
        assert!(state.tracking_derivation.get().is_none());
        assert_eq!(state.batch_depth.get(), 0);
    }

    #[test]
    fn untracked_scope_hides_derivation() {
        let runtime = Runtime::new();
        let state = runtime.state();
        let _tracking = TrackingScope::enter(state, NodeId::new(1, 0));
        {
            let _untracked = UntrackedScope::enter(state);
            assert!(state.tracking_derivation.get().is_none());
        }
        assert_eq!(state.tracking_derivation.get(), Some(NodeId::new(1, 0)));
    }

    #[test]
    fn scopes_restore_after_panic() {
        let runtime = Runtime::new();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let _batch = BatchGuard::enter(&runtime);
            let _allow = AllowStateChangesScope::enter(runtime.state(), false);
            let _tracking = TrackingScope::enter(runtime.state(), NodeId::new(4, 0));
            panic!("boom");
        }));
        assert!(result.is_err());

        let state = runtime.state();
        assert_eq!(state.batch_depth.get(), 0);
        assert!(state.allow_state_changes.get());
        assert!(state.tracking_derivation.get().is_none());
    }

    #[test]
    fn action_scope_allows_state_changes() {
        let runtime = Runtime::new();
        let state = runtime.state();
        let _deny = AllowStateChangesScope::enter(state, false);
        {
            let _action = ActionScope::enter(&runtime);
            assert!(state.allow_state_changes.get());
            assert!(runtime.in_batch());
            assert_ne!(state.current_action_id.get(), 0);
        }
        assert!(!state.allow_state_changes.get());
        assert_eq!(state.current_action_id.get(), 0);
    }
}
