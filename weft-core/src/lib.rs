//! Weft Core
//!
//! This crate provides a fine-grained reactive runtime. State lives in
//! observables; derived values and side effects subscribe to exactly the
//! observables they read while running, and are re-evaluated only when one
//! of those changes. It implements:
//!
//! - Reactive primitives (atoms, observable values, computed values, reactions)
//! - Glitch-free staleness propagation with transactional batching
//! - Automatic suspension of computed values nobody observes
//! - Observable objects with annotations, interceptors and change listeners
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: Dependency graph arena and staleness propagation
//! - `reactive`: Runtime, batching, and the reactive primitives
//! - `object`: Observable property bags built on the primitives
//! - `config`: Runtime-wide settings
//! - `error`: Error type shared by all fallible operations
//!
//! # Example
//!
//! ```rust
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! use weft_core::reactive::{ComputedValue, ObservableValue, Reaction, Runtime};
//!
//! let runtime = Runtime::new();
//!
//! // Create an observable
//! let count = ObservableValue::new_in(&runtime, "count", 1);
//!
//! // Create a derived value
//! let source = count.clone();
//! let doubled = ComputedValue::new_in(&runtime, move || Ok(source.get() * 2));
//!
//! // Create a reaction
//! let seen = Rc::new(Cell::new(0));
//! let sink = Rc::clone(&seen);
//! let reaction = Reaction::new_in(&runtime, "print", move |reaction: &Reaction| {
//!     let doubled = doubled.clone();
//!     let sink = Rc::clone(&sink);
//!     reaction.track(move || {
//!         sink.set(doubled.get()?);
//!         Ok(())
//!     });
//!     Ok(())
//! });
//! reaction.schedule();
//! assert_eq!(seen.get(), 2);
//!
//! // Update the observable; the reaction runs again
//! count.set(5).unwrap();
//! assert_eq!(seen.get(), 10);
//! reaction.dispose();
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod object;
pub mod reactive;

pub use config::Config;
pub use error::{ReactiveError, Result};
pub use object::{ObservableObject, Value};
pub use reactive::{Atom, ComputedValue, ObservableValue, Reaction, Runtime};
