//! Dependency Graph
//!
//! This module implements the dependency graph that connects observables
//! to the derivations reading them.
//!
//! # Overview
//!
//! The graph is a directed acyclic graph where:
//!
//! - Nodes are atoms, computed values or reactions
//! - Edges are dependencies: if A read B during its last run, B lists A as
//!   an observer and A lists B in its dependency sequence
//!
//! When an atom changes, staleness is pushed down the edges. Derivations
//! then pull: a possibly-stale derivation checks its computed dependencies
//! before deciding whether it must run.
//!
//! # Design Decisions
//!
//! 1. Nodes live in one arena per runtime and refer to each other by
//!    generation-checked [`NodeId`]. There are no reference cycles between
//!    observers and observables, and freeing a node is a plain removal.
//!
//! 2. Graph operations never call user code. Reactions that become stale are
//!    returned to the caller, which schedules them once the graph is no
//!    longer borrowed.
//!
//! 3. Both edge directions are stored: observer sets for propagation,
//!    ordered dependency lists for diffing and pull-based checks.

mod arena;
mod node;
mod propagate;

pub use node::{DerivationState, NodeId, NodeKind};

pub(crate) use arena::Graph;
pub(crate) use node::{ComputedNode, Node, ReactionNode};
