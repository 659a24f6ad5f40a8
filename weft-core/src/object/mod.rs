//! Observable Objects
//!
//! This module layers property bags on top of the reactive primitives.
//! An [`ObservableObject`] keeps one observable box (or computed value) per
//! annotated property, a keys atom for enumeration, and existence boxes for
//! keys that derivations looked for before they were added.
//!
//! # Overview
//!
//! - [`Value`]: property values, either plain JSON or nested objects
//! - [`PropertyDescriptor`]: data or accessor description of a property
//! - [`Annotation`]: what a property becomes when made observable
//! - [`ObjectWillChange`] / [`ObjectChange`]: records for interceptors and
//!   listeners
//!
//! # Example
//!
//! ```rust
//! use weft_core::object::{ObservableObject, PropertyDescriptor, Value};
//! use weft_core::reactive::Runtime;
//!
//! let runtime = Runtime::new();
//! let order = ObservableObject::new_in(&runtime, "order");
//! order.set("price", 3).unwrap();
//! order.set("amount", 2).unwrap();
//! order
//!     .extend(
//!         "total",
//!         PropertyDescriptor::getter(|order| {
//!             let price = order.get("price")?.and_then(|v| v.as_i64()).unwrap_or(0);
//!             let amount = order.get("amount")?.and_then(|v| v.as_i64()).unwrap_or(0);
//!             Ok(Value::from(price * amount))
//!         }),
//!         true,
//!     )
//!     .unwrap();
//! assert_eq!(order.get("total").unwrap().unwrap().as_i64(), Some(6));
//! ```

mod administration;
mod annotation;
mod change;
mod descriptor;
mod value;

pub use administration::ObservableObject;
pub use annotation::{Annotate, Annotation};
pub use change::{ChangeKind, ChangeListener, ChangeOutcome, Interceptor, ObjectChange, ObjectWillChange};
pub use descriptor::{AccessorSetter, DescriptorKind, Getter, PropertyDescriptor};
pub use value::Value;
