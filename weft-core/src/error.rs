//! Error Types
//!
//! Every fallible operation in the crate returns [`ReactiveError`]. The enum
//! is `Clone` because a computed value caches the error produced by its
//! derivation and hands it back on every read until the next successful
//! recomputation.

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

/// Errors raised by the reactive runtime or by user derivations.
#[derive(Debug, Clone, Error)]
pub enum ReactiveError {
    /// A computed value was read while it was already computing.
    #[error("cycle detected in computation '{name}'")]
    Cycle { name: String },

    /// A computed setter tried to assign the same computed value again.
    #[error("the setter of computed value '{name}' is trying to update itself")]
    ReentrantSetter { name: String },

    /// A computed value without a setter was assigned.
    #[error("computed value '{name}' has no setter and cannot be assigned")]
    NotWritable { name: String },

    /// An observed value was modified while a derivation was computing.
    #[error("side effects are not allowed while computing a derivation; tried to modify '{name}'")]
    StateChangeNotAllowed { name: String },

    /// A box was written while its value was borrowed by `with`.
    #[error("observable value '{name}' is borrowed and cannot be written")]
    ValueBorrowed { name: String },

    /// `make` was called for a key the object does not have.
    #[error("property '{object}.{key}' does not exist")]
    MissingKey { object: String, key: String },

    /// A key was annotated twice.
    #[error("property '{object}.{key}' is already annotated")]
    AlreadyAnnotated { object: String, key: String },

    /// The annotation does not fit the property descriptor.
    #[error("cannot apply annotation '{annotation}' to '{object}.{key}': {reason}")]
    InvalidAnnotation {
        annotation: String,
        object: String,
        key: String,
        reason: String,
    },

    /// A computed property outlived the object it was declared on.
    #[error("observable object '{0}' has been dropped")]
    ObjectDropped(String),

    /// The reaction loop did not settle within the iteration ceiling.
    #[error("reaction '{name}' did not converge after {iterations} iterations; probably a cycle in reactive functions")]
    RunawayReactions { name: String, iterations: usize },

    /// A configuration was rejected before being applied.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A plain message raised by user code.
    #[error("{0}")]
    Message(String),

    /// An arbitrary error raised by user code.
    #[error("{0}")]
    Derivation(Arc<dyn StdError + Send + Sync>),
}

impl ReactiveError {
    /// Wrap an arbitrary error raised inside a derivation.
    pub fn derivation<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Derivation(Arc::new(error))
    }

    /// Create an error from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    /// Whether this error is a fatal programming error rather than a value
    /// produced by user code.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Cycle { .. } | Self::ReentrantSetter { .. } | Self::StateChangeNotAllowed { .. }
        )
    }
}

impl From<String> for ReactiveError {
    fn from(message: String) -> Self {
        Self::Message(message)
    }
}

impl From<&str> for ReactiveError {
    fn from(message: &str) -> Self {
        Self::Message(message.to_owned())
    }
}
