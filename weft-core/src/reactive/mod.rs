//! Reactive Primitives
//!
//! This module implements the core reactive system: atoms, observable
//! values, computed values and reactions, plus the runtime that schedules
//! them.
//!
//! # Concepts
//!
//! ## Atoms
//!
//! An [`Atom`] is the smallest observable. It carries no value; its owner
//! reports reads and writes. [`ObservableValue`] pairs an atom with a value
//! and a comparer.
//!
//! ## Computed Values
//!
//! A [`ComputedValue`] is a derived value that caches its result. It
//! re-evaluates only when one of its dependencies actually changed, and only
//! when someone reads it.
//!
//! ## Reactions
//!
//! A [`Reaction`] is a side-effecting derivation that runs again whenever
//! its dependencies change. Reactions are the roots that keep computed
//! values alive: a computed nobody observes drops its cache.
//!
//! # Implementation Notes
//!
//! Reads inside a derivation are detected automatically through the
//! runtime's tracking scope. Writes propagate staleness through the graph
//! immediately but reactions only run when the outermost batch closes, so
//! a batch of writes is observed as one consistent change.

mod atom;
mod computed;
mod context;
mod observable_value;
mod reaction;
mod runtime;
pub(crate) mod subscriber;

pub use atom::Atom;
pub use computed::{ComputedChange, ComputedOptions, ComputedValue, Setter};
pub use context::BatchGuard;
pub use observable_value::{default_comparer, Comparer, ObservableValue};
pub use reaction::{ErrorHandler, OnInvalidate, Reaction, ReactionOptions};
pub use runtime::{ReactionErrorHandler, Runtime};
pub use subscriber::{Disposer, ListenerId};

