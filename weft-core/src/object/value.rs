//! Dynamic Property Values
//!
//! Object properties hold a [`Value`]: either plain JSON data or a nested
//! [`ObservableObject`]. Deep observable properties convert JSON objects
//! into nested observable objects when assigned; everything else is kept
//! as JSON.

use std::fmt;

use serde_json::Value as Json;

use super::administration::ObservableObject;

/// A property value.
#[derive(Clone)]
pub enum Value {
    Json(Json),
    Object(ObservableObject),
}

impl Value {
    pub fn null() -> Self {
        Value::Json(Json::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Json(Json::Null))
    }

    pub fn as_json(&self) -> Option<&Json> {
        match self {
            Value::Json(json) => Some(json),
            Value::Object(_) => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObservableObject> {
        match self {
            Value::Object(object) => Some(object),
            Value::Json(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_json().and_then(Json::as_i64)
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_json().and_then(Json::as_f64)
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_json().and_then(Json::as_bool)
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_json().and_then(Json::as_str)
    }

    /// Default change detection for observable properties.
    ///
    /// JSON scalars compare by value. JSON arrays and objects are treated as
    /// fresh references and never compare equal. Nested objects compare by
    /// identity.
    pub fn identity_eq(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Json(Json::Array(_) | Json::Object(_)), _)
            | (_, Value::Json(Json::Array(_) | Json::Object(_))) => false,
            (Value::Json(x), Value::Json(y)) => x == y,
            (Value::Object(x), Value::Object(y)) => x.ptr_eq(y),
            _ => false,
        }
    }

    /// Structural change detection: JSON compared deeply, nested objects by
    /// identity.
    pub fn structural_eq(a: &Value, b: &Value) -> bool {
        a == b
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Json(x), Value::Json(y)) => x == y,
            (Value::Object(x), Value::Object(y)) => x.ptr_eq(y),
            _ => false,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Json(json) => write!(f, "{json}"),
            Value::Object(object) => write!(f, "{object:?}"),
        }
    }
}

impl From<ObservableObject> for Value {
    fn from(object: ObservableObject) -> Self {
        Value::Object(object)
    }
}

macro_rules! impl_from_json {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::Json(Json::from(value))
                }
            }
        )*
    };
}

impl_from_json!(Json, bool, i32, i64, u32, u64, f64, String, &str);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Runtime;
    use serde_json::json;

    #[test]
    fn scalars_compare_by_value() {
        assert!(Value::identity_eq(&Value::from(1), &Value::from(1)));
        assert!(!Value::identity_eq(&Value::from(1), &Value::from(2)));
        assert!(Value::identity_eq(&Value::from("a"), &Value::from("a")));
        assert!(Value::identity_eq(&Value::null(), &Value::default()));
    }

    #[test]
    fn json_containers_are_fresh_references() {
        let a = Value::from(json!([1, 2]));
        let b = Value::from(json!([1, 2]));
        assert!(!Value::identity_eq(&a, &b));
        assert!(!Value::identity_eq(&a, &a));
        assert!(Value::structural_eq(&a, &b));
    }

    #[test]
    fn objects_compare_by_identity() {
        let runtime = Runtime::new();
        let first = ObservableObject::new_in(&runtime, "first");
        let second = ObservableObject::new_in(&runtime, "second");
        let a = Value::from(first.clone());

        assert!(Value::identity_eq(&a, &Value::from(first)));
        assert!(!Value::structural_eq(&a, &Value::from(second)));
    }

    #[test]
    fn accessors() {
        let value = Value::from(json!({ "x": 1 }));
        assert!(value.as_json().is_some());
        assert!(value.as_object().is_none());
        assert_eq!(Value::from(2.5).as_f64(), Some(2.5));
        assert_eq!(Value::from(true).as_bool(), Some(true));
        assert_eq!(Value::from("hi").as_str(), Some("hi"));
    }
}
