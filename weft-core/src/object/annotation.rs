//! Annotations
//!
//! An annotation says what a property becomes when it is made observable.
//! The set is closed: every annotation is handled by a `match` in the
//! administration, never by open-ended dispatch.
//!
//! | Annotation          | Applies to | Stored as                                    |
//! |---------------------|------------|----------------------------------------------|
//! | `Auto`              | both       | `Observable` for data, `Computed` for getters |
//! | `Observable`        | data       | box; JSON objects become deep observables    |
//! | `ObservableShallow` | data       | box; JSON objects become objects of refs     |
//! | `ObservableRef`     | data       | box; value stored as-is                      |
//! | `ObservableStruct`  | data       | box; value as-is, structural comparison      |
//! | `Computed`          | accessor   | computed value                               |
//! | `ComputedStruct`    | accessor   | computed value, structural comparison        |

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::Result;
use crate::reactive::{Comparer, Runtime};

use super::administration::ObservableObject;
use super::descriptor::PropertyDescriptor;
use super::value::Value;

/// What a property becomes when made observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Annotation {
    Auto,
    Observable,
    ObservableShallow,
    ObservableRef,
    ObservableStruct,
    Computed,
    ComputedStruct,
}

impl Annotation {
    pub fn name(self) -> &'static str {
        match self {
            Annotation::Auto => "auto",
            Annotation::Observable => "observable",
            Annotation::ObservableShallow => "observable.shallow",
            Annotation::ObservableRef => "observable.ref",
            Annotation::ObservableStruct => "observable.struct",
            Annotation::Computed => "computed",
            Annotation::ComputedStruct => "computed.struct",
        }
    }

    pub fn is_computed(self) -> bool {
        matches!(self, Annotation::Computed | Annotation::ComputedStruct)
    }

    /// Replace `Auto` by the concrete annotation for `descriptor`.
    pub(crate) fn resolve(self, descriptor: &PropertyDescriptor) -> Annotation {
        match self {
            Annotation::Auto if descriptor.is_accessor() => Annotation::Computed,
            Annotation::Auto => Annotation::Observable,
            other => other,
        }
    }

    /// Enhancer of an observable annotation.
    pub(crate) fn enhancer(self) -> Option<Enhancer> {
        match self {
            Annotation::Auto | Annotation::Observable => Some(Enhancer::Deep),
            Annotation::ObservableShallow => Some(Enhancer::Shallow),
            Annotation::ObservableRef => Some(Enhancer::Ref),
            Annotation::ObservableStruct => Some(Enhancer::Struct),
            Annotation::Computed | Annotation::ComputedStruct => None,
        }
    }

    /// Comparer of a computed annotation.
    pub(crate) fn computed_comparer(self) -> Comparer<Value> {
        match self {
            Annotation::ComputedStruct => Rc::new(Value::structural_eq),
            _ => Rc::new(Value::identity_eq),
        }
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Annotation argument of `make`/`extend`.
///
/// `true` means the object's default annotation, `false` means leave the
/// property plain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Annotate {
    Default,
    Skip,
    With(Annotation),
}

impl From<bool> for Annotate {
    fn from(annotate: bool) -> Self {
        if annotate {
            Annotate::Default
        } else {
            Annotate::Skip
        }
    }
}

impl From<Annotation> for Annotate {
    fn from(annotation: Annotation) -> Self {
        Annotate::With(annotation)
    }
}

/// Transformation applied to values written into an observable property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Enhancer {
    Deep,
    Shallow,
    Ref,
    Struct,
}

impl Enhancer {
    pub(crate) fn comparer(self) -> Comparer<Value> {
        match self {
            Enhancer::Struct => Rc::new(Value::structural_eq),
            _ => Rc::new(Value::identity_eq),
        }
    }

    /// Convert `value` for storage in property `name`.
    pub(crate) fn enhance(self, runtime: &Runtime, name: &str, value: Value) -> Result<Value> {
        let fields = match (self, value) {
            (Enhancer::Deep | Enhancer::Shallow, Value::Json(Json::Object(fields))) => fields,
            (_, value) => return Ok(value),
        };
        let field_enhancer = match self {
            Enhancer::Deep => Enhancer::Deep,
            _ => Enhancer::Ref,
        };
        let object = ObservableObject::new_in(runtime, name);
        for (key, field) in fields {
            object.define_observable_property(&key, Value::Json(field), field_enhancer)?;
        }
        Ok(Value::Object(object))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bools_convert_to_annotate() {
        assert_eq!(Annotate::from(true), Annotate::Default);
        assert_eq!(Annotate::from(false), Annotate::Skip);
        assert_eq!(
            Annotate::from(Annotation::ObservableRef),
            Annotate::With(Annotation::ObservableRef)
        );
    }

    #[test]
    fn auto_resolves_by_descriptor_kind() {
        let data = PropertyDescriptor::value(1);
        let accessor = PropertyDescriptor::getter(|_| Ok(Value::null()));
        assert_eq!(Annotation::Auto.resolve(&data), Annotation::Observable);
        assert_eq!(Annotation::Auto.resolve(&accessor), Annotation::Computed);
        assert_eq!(Annotation::ObservableRef.resolve(&accessor), Annotation::ObservableRef);
    }

    #[test]
    fn deep_enhancer_converts_nested_objects() {
        let runtime = Runtime::new();
        let value = Enhancer::Deep
            .enhance(&runtime, "root.child", Value::from(json!({ "inner": { "x": 1 }, "list": [1] })))
            .unwrap();
        let child = value.as_object().unwrap();
        assert!(child.is_observable_property("inner"));

        let inner = child.get("inner").unwrap().unwrap();
        let inner = inner.as_object().unwrap();
        assert_eq!(inner.get("x").unwrap().unwrap().as_i64(), Some(1));

        // Arrays stay plain JSON.
        assert!(child.get("list").unwrap().unwrap().as_json().is_some());
    }

    #[test]
    fn shallow_enhancer_keeps_nested_values_plain() {
        let runtime = Runtime::new();
        let value = Enhancer::Shallow
            .enhance(&runtime, "root.child", Value::from(json!({ "inner": { "x": 1 } })))
            .unwrap();
        let child = value.as_object().unwrap();
        assert!(child.get("inner").unwrap().unwrap().as_json().is_some());
    }

    #[test]
    fn ref_enhancer_stores_as_is() {
        let runtime = Runtime::new();
        let value = Enhancer::Ref
            .enhance(&runtime, "r", Value::from(json!({ "x": 1 })))
            .unwrap();
        assert_eq!(value, Value::from(json!({ "x": 1 })));
    }

    #[test]
    fn annotation_names() {
        assert_eq!(Annotation::ObservableShallow.to_string(), "observable.shallow");
        assert!(Annotation::ComputedStruct.is_computed());
        assert!(!Annotation::Observable.is_computed());
    }
}
