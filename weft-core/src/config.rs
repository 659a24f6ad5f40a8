//! Runtime Configuration
//!
//! Tunables for a [`Runtime`](crate::reactive::Runtime). The struct is
//! serde-friendly so hosts can keep it next to the rest of their settings;
//! missing fields fall back to their defaults.
//!
//! ```rust,ignore
//! let config: Config = serde_json::from_str(r#"{ "max_reaction_iterations": 20 }"#)?;
//! runtime.configure(config)?;
//! ```

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::{ReactiveError, Result};

/// Default ceiling on reaction loop passes per flush.
pub const MAX_REACTION_ITERATIONS: usize = 100;

/// Smallest usable ceiling. The pass that reaches the ceiling is discarded,
/// so anything lower would never run a reaction.
pub const MIN_REACTION_ITERATIONS: usize = 2;

/// Host hook that decides when pending reactions are flushed.
///
/// The scheduler receives the flush job and must eventually call it. The
/// default (no scheduler) runs it synchronously.
pub type ReactionScheduler = Rc<dyn Fn(Box<dyn FnOnce()>)>;

/// Runtime tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How many passes the reaction loop may take before the remaining
    /// reactions are discarded and reported.
    pub max_reaction_iterations: usize,

    /// Warn when a reaction finishes tracking without reading any observable.
    pub reaction_requires_observable: bool,

    /// Warn when a computed value is read outside any reactive context.
    pub computed_requires_reaction: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_reaction_iterations: MAX_REACTION_ITERATIONS,
            reaction_requires_observable: false,
            computed_requires_reaction: false,
        }
    }
}

impl Config {
    /// Check the tunables before a runtime adopts them.
    pub fn validate(&self) -> Result<()> {
        if self.max_reaction_iterations < MIN_REACTION_ITERATIONS {
            return Err(ReactiveError::InvalidConfig(format!(
                "max_reaction_iterations must be at least {MIN_REACTION_ITERATIONS}, got {}",
                self.max_reaction_iterations
            )));
        }
        Ok(())
    }
}
