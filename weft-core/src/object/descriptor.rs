//! Property Descriptors
//!
//! A descriptor describes a property before it is defined on an object:
//! either a data property holding a value, or an accessor computed from the
//! object. The flags follow the usual object-model meaning:
//!
//! - `enumerable`: listed by [`keys`](super::ObservableObject::keys)
//! - `writable`: data properties only; assignments are rejected when unset
//! - `configurable`: the property can be deleted or redefined

use std::fmt;
use std::rc::Rc;

use crate::error::Result;

use super::administration::ObservableObject;
use super::value::Value;

/// Accessor getter, evaluated with the owning object as context.
pub type Getter = Rc<dyn Fn(&ObservableObject) -> Result<Value>>;

/// Accessor setter, evaluated with the owning object as context.
pub type AccessorSetter = Rc<dyn Fn(&ObservableObject, Value) -> Result<()>>;

#[derive(Clone)]
pub enum DescriptorKind {
    Data { value: Value, writable: bool },
    Accessor { get: Getter, set: Option<AccessorSetter> },
}

/// Shape of a property to define.
#[derive(Clone)]
pub struct PropertyDescriptor {
    pub kind: DescriptorKind,
    pub enumerable: bool,
    pub configurable: bool,
}

impl PropertyDescriptor {
    /// A writable, enumerable, configurable data property.
    pub fn value(value: impl Into<Value>) -> Self {
        Self {
            kind: DescriptorKind::Data {
                value: value.into(),
                writable: true,
            },
            enumerable: true,
            configurable: true,
        }
    }

    /// A read-only accessor property.
    pub fn getter<F>(get: F) -> Self
    where
        F: Fn(&ObservableObject) -> Result<Value> + 'static,
    {
        Self {
            kind: DescriptorKind::Accessor {
                get: Rc::new(get),
                set: None,
            },
            enumerable: true,
            configurable: true,
        }
    }

    /// Add a setter to an accessor descriptor. No effect on data
    /// descriptors.
    pub fn with_setter<F>(mut self, set: F) -> Self
    where
        F: Fn(&ObservableObject, Value) -> Result<()> + 'static,
    {
        if let DescriptorKind::Accessor { set: slot, .. } = &mut self.kind {
            *slot = Some(Rc::new(set));
        }
        self
    }

    pub fn enumerable(mut self, enumerable: bool) -> Self {
        self.enumerable = enumerable;
        self
    }

    pub fn configurable(mut self, configurable: bool) -> Self {
        self.configurable = configurable;
        self
    }

    /// Set the writable flag of a data descriptor.
    pub fn writable(mut self, writable: bool) -> Self {
        if let DescriptorKind::Data { writable: slot, .. } = &mut self.kind {
            *slot = writable;
        }
        self
    }

    pub fn is_accessor(&self) -> bool {
        matches!(self.kind, DescriptorKind::Accessor { .. })
    }

    /// The value of a data descriptor.
    pub fn data_value(&self) -> Option<&Value> {
        match &self.kind {
            DescriptorKind::Data { value, .. } => Some(value),
            DescriptorKind::Accessor { .. } => None,
        }
    }
}

impl fmt::Debug for PropertyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("PropertyDescriptor");
        match &self.kind {
            DescriptorKind::Data { value, writable } => {
                s.field("value", value).field("writable", writable);
            }
            DescriptorKind::Accessor { set, .. } => {
                s.field("get", &"<fn>").field("set", &set.is_some());
            }
        }
        s.field("enumerable", &self.enumerable)
            .field("configurable", &self.configurable)
            .finish()
    }
}
