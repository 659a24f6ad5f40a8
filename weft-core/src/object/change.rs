//! Change records delivered to object interceptors and listeners.

use serde::Serialize;

use super::administration::ObservableObject;
use super::value::Value;

/// What happened to a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Add,
    Update,
    Remove,
}

/// Result of a structural operation on an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOutcome {
    /// The change was carried out (or there was nothing to do).
    Applied,
    /// An interceptor vetoed the change.
    Cancelled,
    /// The property does not allow the change: not configurable, not
    /// writable, or an accessor without setter.
    Rejected,
}

impl ChangeOutcome {
    pub fn is_applied(self) -> bool {
        self == ChangeOutcome::Applied
    }
}

/// A pending change, offered to interceptors before it is applied.
///
/// Interceptors may return it unchanged, return it with a rewritten
/// `new_value`, or return `None` to cancel.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectWillChange {
    pub kind: ChangeKind,
    pub name: String,
    /// `None` for removals and computed additions.
    pub new_value: Option<Value>,
}

/// A change that was applied, delivered to listeners.
#[derive(Debug, Clone)]
pub struct ObjectChange {
    pub kind: ChangeKind,
    pub object: ObservableObject,
    pub name: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// Callback that may veto or rewrite a pending change.
pub type Interceptor = dyn Fn(ObjectWillChange) -> Option<ObjectWillChange>;

/// Callback notified after a change was applied.
pub type ChangeListener = dyn Fn(&ObjectChange);
