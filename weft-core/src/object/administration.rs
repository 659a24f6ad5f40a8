//! Observable Object Administration
//!
//! An [`ObservableObject`] is a property bag whose properties can be turned
//! into observables. Each observable property is backed by its own value box
//! (or computed value), so reading `obj.x` inside a derivation subscribes to
//! `x` and nothing else.
//!
//! # How It Works
//!
//! Besides one box per observable property, the object keeps:
//!
//! - a keys atom, changed whenever a property is added or removed, so
//!   derivations enumerating the keys are invalidated;
//! - a lazily created boolean box per key whose existence a derivation
//!   asked about, so code that checked for a missing key re-runs once the
//!   key is added.
//!
//! Every structural change follows the same order: interceptors may veto or
//! rewrite it, the change is applied inside a batch, listeners are notified,
//! the keys atom and the key-existence box are updated. Observers therefore
//! see one consistent change, not one per step.
//!
//! # Plain Properties
//!
//! Properties defined without an annotation stay plain: reads and writes do
//! not touch the graph. They can be made observable later with
//! [`make`](ObservableObject::make).

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::error::{ReactiveError, Result};
use crate::reactive::{
    Atom, BatchGuard, ComputedOptions, ComputedValue, Disposer, ObservableValue, Runtime,
};
use crate::reactive::subscriber::Listeners;

use super::annotation::{Annotate, Annotation, Enhancer};
use super::change::{
    ChangeKind, ChangeListener, ChangeOutcome, Interceptor, ObjectChange, ObjectWillChange,
};
use super::descriptor::{AccessorSetter, DescriptorKind, Getter, PropertyDescriptor};
use super::value::Value;

/// Storage behind one property.
#[derive(Clone)]
enum Slot {
    Plain { value: Value, writable: bool },
    Accessor { get: Getter, set: Option<AccessorSetter> },
    Observable(ObservableValue<Value>, Enhancer),
    Computed(ComputedValue<Value>),
}

impl Slot {
    fn is_reactive(&self) -> bool {
        matches!(self, Slot::Observable(..) | Slot::Computed(_))
    }
}

#[derive(Clone)]
struct Property {
    slot: Slot,
    enumerable: bool,
    configurable: bool,
}

impl Property {
    /// Current descriptor of a plain property; `None` for reactive ones.
    fn descriptor(&self) -> Option<PropertyDescriptor> {
        let kind = match &self.slot {
            Slot::Plain { value, writable } => DescriptorKind::Data {
                value: value.clone(),
                writable: *writable,
            },
            Slot::Accessor { get, set } => DescriptorKind::Accessor {
                get: Rc::clone(get),
                set: set.clone(),
            },
            Slot::Observable(..) | Slot::Computed(_) => return None,
        };
        Some(PropertyDescriptor {
            kind,
            enumerable: self.enumerable,
            configurable: self.configurable,
        })
    }
}

struct ObjectInner {
    runtime: Runtime,
    name: String,
    properties: RefCell<IndexMap<String, Property>>,
    keys_atom: Atom,
    interceptors: Listeners<Interceptor>,
    listeners: Listeners<ChangeListener>,
    pending_keys: RefCell<HashMap<String, ObservableValue<bool>>>,
    default_annotation: Annotation,
}

/// Handle to an object administration.
///
/// Clones share the same object.
#[derive(Clone)]
pub struct ObservableObject {
    inner: Rc<ObjectInner>,
}

impl ObservableObject {
    /// Create an empty object in the thread's default runtime.
    pub fn new(name: impl Into<String>) -> Self {
        Self::new_in(&Runtime::current(), name)
    }

    /// Create an empty object in the given runtime.
    pub fn new_in(runtime: &Runtime, name: impl Into<String>) -> Self {
        Self::with_default_annotation(runtime, name, Annotation::Auto)
    }

    /// Create an empty object whose `make(key, true)` and implicit
    /// additions use `annotation`.
    pub fn with_default_annotation(
        runtime: &Runtime,
        name: impl Into<String>,
        annotation: Annotation,
    ) -> Self {
        let name = name.into();
        Self {
            inner: Rc::new(ObjectInner {
                runtime: runtime.clone(),
                keys_atom: Atom::new_in(runtime, format!("{name}.keys")),
                name,
                properties: RefCell::new(IndexMap::new()),
                interceptors: Listeners::new(),
                listeners: Listeners::new(),
                pending_keys: RefCell::new(HashMap::new()),
                default_annotation: annotation,
            }),
        }
    }

    /// Create an object with plain (not yet observable) properties copied
    /// from a JSON object. Non-object JSON yields an empty object.
    pub fn from_json(runtime: &Runtime, name: impl Into<String>, json: serde_json::Value) -> Self {
        let object = Self::new_in(runtime, name);
        if let serde_json::Value::Object(fields) = json {
            let mut properties = object.inner.properties.borrow_mut();
            for (key, value) in fields {
                properties.insert(
                    key,
                    Property {
                        slot: Slot::Plain {
                            value: Value::Json(value),
                            writable: true,
                        },
                        enumerable: true,
                        configurable: true,
                    },
                );
            }
        }
        object
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    pub fn default_annotation(&self) -> Annotation {
        self.inner.default_annotation
    }

    /// Whether two handles refer to the same object.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn property(&self, key: &str) -> Option<Property> {
        self.inner.properties.borrow().get(key).cloned()
    }

    fn has_own(&self, key: &str) -> bool {
        self.inner.properties.borrow().contains_key(key)
    }

    fn property_name(&self, key: &str) -> String {
        format!("{}.{}", self.inner.name, key)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Read a property.
    ///
    /// Inside a derivation, reading a missing key subscribes to its
    /// existence, so adding the key later re-runs the derivation.
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        if self.inner.runtime.is_tracking() && !self.has_own(key) {
            self.has(key);
        }
        let Some(property) = self.property(key) else {
            return Ok(None);
        };
        match property.slot {
            Slot::Plain { value, .. } => Ok(Some(value)),
            Slot::Accessor { get, .. } => get(self).map(Some),
            Slot::Observable(observable, _) => Ok(Some(observable.get())),
            Slot::Computed(computed) => computed.get().map(Some),
        }
    }

    /// Whether the object has `key`, subscribing to the answer inside a
    /// derivation.
    pub fn has(&self, key: &str) -> bool {
        let runtime = &self.inner.runtime;
        if !runtime.is_tracking() {
            return self.has_own(key);
        }
        let exists = self.has_own(key);
        let entry = {
            let mut pending = self.inner.pending_keys.borrow_mut();
            pending
                .entry(key.to_string())
                .or_insert_with(|| {
                    ObservableValue::new_in(runtime, format!("{}?", self.property_name(key)), exists)
                })
                .clone()
        };
        entry.get()
    }

    /// Enumerable keys in definition order.
    pub fn keys(&self) -> Vec<String> {
        self.inner.keys_atom.report_observed();
        self.inner
            .properties
            .borrow()
            .iter()
            .filter(|(_, property)| property.enumerable)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// All keys in definition order, including non-enumerable ones.
    pub fn own_keys(&self) -> Vec<String> {
        self.inner.keys_atom.report_observed();
        self.inner.properties.borrow().keys().cloned().collect()
    }

    /// Number of observable and computed properties.
    pub fn values_len(&self) -> usize {
        self.inner
            .properties
            .borrow()
            .values()
            .filter(|property| property.slot.is_reactive())
            .count()
    }

    pub fn is_observable_property(&self, key: &str) -> bool {
        matches!(self.property(key).map(|p| p.slot), Some(Slot::Observable(..)))
    }

    pub fn is_computed_property(&self, key: &str) -> bool {
        matches!(self.property(key).map(|p| p.slot), Some(Slot::Computed(_)))
    }

    /// The box behind an observable property.
    pub fn observable_value(&self, key: &str) -> Option<ObservableValue<Value>> {
        match self.property(key)?.slot {
            Slot::Observable(observable, _) => Some(observable),
            _ => None,
        }
    }

    /// The computed value behind a computed property.
    pub fn computed_value(&self, key: &str) -> Option<ComputedValue<Value>> {
        match self.property(key)?.slot {
            Slot::Computed(computed) => Some(computed),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Assign a property. Missing keys are added with the default
    /// annotation.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<ChangeOutcome> {
        let value = value.into();
        let Some(property) = self.property(key) else {
            return self.extend(key, PropertyDescriptor::value(value), Annotate::Default);
        };
        match property.slot {
            Slot::Observable(observable, enhancer) => {
                self.set_observable_value(key, &observable, enhancer, value)
            }
            Slot::Computed(computed) => {
                computed.set(value)?;
                Ok(ChangeOutcome::Applied)
            }
            Slot::Plain { writable: false, .. } => {
                tracing::debug!(object = %self.inner.name, key, "rejected write to read-only property");
                Ok(ChangeOutcome::Rejected)
            }
            Slot::Plain { .. } => {
                if let Some(property) = self.inner.properties.borrow_mut().get_mut(key) {
                    property.slot = Slot::Plain {
                        value,
                        writable: true,
                    };
                }
                Ok(ChangeOutcome::Applied)
            }
            Slot::Accessor { set: Some(set), .. } => {
                set(self, value)?;
                Ok(ChangeOutcome::Applied)
            }
            Slot::Accessor { set: None, .. } => {
                tracing::debug!(object = %self.inner.name, key, "rejected write to accessor without setter");
                Ok(ChangeOutcome::Rejected)
            }
        }
    }

    fn set_observable_value(
        &self,
        key: &str,
        observable: &ObservableValue<Value>,
        enhancer: Enhancer,
        value: Value,
    ) -> Result<ChangeOutcome> {
        let mut value = value;
        if !self.inner.interceptors.is_empty() {
            let change = self.intercept_change(ObjectWillChange {
                kind: ChangeKind::Update,
                name: key.to_string(),
                new_value: Some(value),
            });
            let Some(change) = change else {
                return Ok(ChangeOutcome::Cancelled);
            };
            value = change.new_value.unwrap_or_default();
        }

        let runtime = &self.inner.runtime;
        let _batch = BatchGuard::enter(runtime);
        let value = enhancer.enhance(runtime, &self.property_name(key), value)?;
        let notify = !self.inner.listeners.is_empty();
        let new_value = notify.then(|| value.clone());
        if let Some(old_value) = observable.set(value)? {
            if let Some(new_value) = new_value {
                self.notify_listeners(ObjectChange {
                    kind: ChangeKind::Update,
                    object: self.clone(),
                    name: key.to_string(),
                    old_value: Some(old_value),
                    new_value: Some(new_value),
                });
            }
        }
        Ok(ChangeOutcome::Applied)
    }

    /// Turn an existing property into an observable or computed one.
    pub fn make(&self, key: &str, annotate: impl Into<Annotate>) -> Result<ChangeOutcome> {
        let annotation = match annotate.into() {
            Annotate::Skip => return Ok(ChangeOutcome::Applied),
            Annotate::Default => self.inner.default_annotation,
            Annotate::With(annotation) => annotation,
        };
        let Some(property) = self.property(key) else {
            return Err(ReactiveError::MissingKey {
                object: self.inner.name.clone(),
                key: key.to_string(),
            });
        };
        let Some(descriptor) = property.descriptor() else {
            return Err(ReactiveError::AlreadyAnnotated {
                object: self.inner.name.clone(),
                key: key.to_string(),
            });
        };
        self.apply_annotation(key, descriptor, annotation)
    }

    /// Define a new property (replacing any existing one) with the given
    /// annotation; `false` defines it plain.
    pub fn extend(
        &self,
        key: &str,
        descriptor: PropertyDescriptor,
        annotate: impl Into<Annotate>,
    ) -> Result<ChangeOutcome> {
        let annotation = match annotate.into() {
            Annotate::Skip => return self.define_property(key, descriptor),
            Annotate::Default => self.inner.default_annotation,
            Annotate::With(annotation) => annotation,
        };
        self.apply_annotation(key, descriptor, annotation)
    }

    fn apply_annotation(
        &self,
        key: &str,
        descriptor: PropertyDescriptor,
        annotation: Annotation,
    ) -> Result<ChangeOutcome> {
        let resolved = annotation.resolve(&descriptor);
        let invalid = |reason: &str| ReactiveError::InvalidAnnotation {
            annotation: annotation.to_string(),
            object: self.inner.name.clone(),
            key: key.to_string(),
            reason: reason.to_string(),
        };
        match (resolved.enhancer(), descriptor.kind) {
            (Some(enhancer), DescriptorKind::Data { value, .. }) => {
                self.define_observable_property(key, value, enhancer)
            }
            (Some(_), DescriptorKind::Accessor { .. }) => {
                Err(invalid("observable annotations cannot be used on accessors"))
            }
            (None, DescriptorKind::Accessor { get, set }) => {
                self.define_computed_property(key, get, set, resolved)
            }
            (None, DescriptorKind::Data { .. }) => {
                Err(invalid("computed annotations can only be used on accessors"))
            }
        }
    }

    /// Define a plain property, replacing any existing one.
    pub fn define_property(&self, key: &str, descriptor: PropertyDescriptor) -> Result<ChangeOutcome> {
        let runtime = self.inner.runtime.clone();
        let _batch = BatchGuard::enter(&runtime);

        let removed = self.delete(key)?;
        if !removed.is_applied() {
            return Ok(removed);
        }
        self.check_key_existence_change(key)?;

        let mut descriptor = descriptor;
        if !self.inner.interceptors.is_empty() {
            let change = self.intercept_change(ObjectWillChange {
                kind: ChangeKind::Add,
                name: key.to_string(),
                new_value: descriptor.data_value().cloned(),
            });
            let Some(change) = change else {
                return Ok(ChangeOutcome::Cancelled);
            };
            if let (DescriptorKind::Data { value, .. }, Some(new_value)) =
                (&mut descriptor.kind, change.new_value)
            {
                *value = new_value;
            }
        }

        let added = descriptor.data_value().cloned();
        let slot = match descriptor.kind {
            DescriptorKind::Data { value, writable } => Slot::Plain { value, writable },
            DescriptorKind::Accessor { get, set } => Slot::Accessor { get, set },
        };
        self.insert_property(
            key,
            Property {
                slot,
                enumerable: descriptor.enumerable,
                configurable: descriptor.configurable,
            },
        );
        self.notify_property_addition(key, added)?;
        Ok(ChangeOutcome::Applied)
    }

    /// Define an observable property holding `value`.
    pub(crate) fn define_observable_property(
        &self,
        key: &str,
        value: Value,
        enhancer: Enhancer,
    ) -> Result<ChangeOutcome> {
        let runtime = self.inner.runtime.clone();
        let _batch = BatchGuard::enter(&runtime);

        let removed = self.delete(key)?;
        if !removed.is_applied() {
            return Ok(removed);
        }
        self.check_key_existence_change(key)?;

        let mut value = value;
        if !self.inner.interceptors.is_empty() {
            let change = self.intercept_change(ObjectWillChange {
                kind: ChangeKind::Add,
                name: key.to_string(),
                new_value: Some(value),
            });
            let Some(change) = change else {
                return Ok(ChangeOutcome::Cancelled);
            };
            value = change.new_value.unwrap_or_default();
        }

        let name = self.property_name(key);
        let value = enhancer.enhance(&runtime, &name, value)?;
        let observable = ObservableValue::with_equals(&runtime, name, value.clone(), enhancer.comparer());
        self.insert_property(
            key,
            Property {
                slot: Slot::Observable(observable, enhancer),
                enumerable: true,
                configurable: true,
            },
        );
        self.notify_property_addition(key, Some(value))?;
        Ok(ChangeOutcome::Applied)
    }

    fn define_computed_property(
        &self,
        key: &str,
        get: Getter,
        set: Option<AccessorSetter>,
        annotation: Annotation,
    ) -> Result<ChangeOutcome> {
        let runtime = self.inner.runtime.clone();
        let _batch = BatchGuard::enter(&runtime);

        let removed = self.delete(key)?;
        if !removed.is_applied() {
            return Ok(removed);
        }
        self.check_key_existence_change(key)?;

        if !self.inner.interceptors.is_empty() {
            let change = self.intercept_change(ObjectWillChange {
                kind: ChangeKind::Add,
                name: key.to_string(),
                new_value: None,
            });
            if change.is_none() {
                return Ok(ChangeOutcome::Cancelled);
            }
        }

        let name = self.property_name(key);
        let context = Rc::downgrade(&self.inner);
        let object_name = self.inner.name.clone();
        let mut options = ComputedOptions::with_equals(annotation.computed_comparer()).name(name);
        if let Some(set) = set {
            let context = Weak::clone(&context);
            let object_name = object_name.clone();
            options = options.setter(move |value| set(&upgrade(&context, &object_name)?, value));
        }
        let computed = ComputedValue::with_options(
            &runtime,
            move || get(&upgrade(&context, &object_name)?),
            options,
        );
        self.insert_property(
            key,
            Property {
                slot: Slot::Computed(computed),
                enumerable: false,
                configurable: true,
            },
        );
        self.notify_property_addition(key, None)?;
        Ok(ChangeOutcome::Applied)
    }

    fn insert_property(&self, key: &str, property: Property) {
        let replaced = self
            .inner
            .properties
            .borrow_mut()
            .insert(key.to_string(), property);
        drop(replaced);
    }

    /// Remove a property.
    ///
    /// Readers of an observable property are invalidated even though its box
    /// is gone, so they re-run and see the key missing.
    pub fn delete(&self, key: &str) -> Result<ChangeOutcome> {
        let Some(property) = self.property(key) else {
            return Ok(ChangeOutcome::Applied);
        };

        if !self.inner.interceptors.is_empty() {
            let change = self.intercept_change(ObjectWillChange {
                kind: ChangeKind::Remove,
                name: key.to_string(),
                new_value: None,
            });
            if change.is_none() {
                return Ok(ChangeOutcome::Cancelled);
            }
        }
        if !property.configurable {
            tracing::debug!(object = %self.inner.name, key, "rejected removal of non-configurable property");
            return Ok(ChangeOutcome::Rejected);
        }

        if let Slot::Observable(observable, _) = &property.slot {
            observable.check_state_change()?;
        }
        self.check_key_existence_change(key)?;

        let runtime = self.inner.runtime.clone();
        let _batch = BatchGuard::enter(&runtime);

        let removed = self.inner.properties.borrow_mut().shift_remove(key);
        let old_value = match &property.slot {
            Slot::Plain { value, .. } => Some(value.clone()),
            Slot::Observable(observable, _) => {
                let value = observable.get_untracked();
                observable.atom().report_changed();
                Some(value)
            }
            Slot::Computed(computed) => {
                runtime.report_changed(computed.id());
                None
            }
            Slot::Accessor { .. } => None,
        };
        self.inner.keys_atom.report_changed();

        let pending = self.inner.pending_keys.borrow().get(key).cloned();
        if let Some(pending) = pending {
            pending.set(false)?;
        }

        if !self.inner.listeners.is_empty() {
            self.notify_listeners(ObjectChange {
                kind: ChangeKind::Remove,
                object: self.clone(),
                name: key.to_string(),
                old_value,
                new_value: None,
            });
        }
        drop(removed);
        drop(property);
        Ok(ChangeOutcome::Applied)
    }

    /// Fail before anything is mutated if the key's existence box is
    /// observed and state changes are not allowed here.
    fn check_key_existence_change(&self, key: &str) -> Result<()> {
        let pending = self.inner.pending_keys.borrow().get(key).cloned();
        match pending {
            Some(pending) => pending.check_state_change(),
            None => Ok(()),
        }
    }

    fn notify_property_addition(&self, key: &str, value: Option<Value>) -> Result<()> {
        if !self.inner.listeners.is_empty() {
            self.notify_listeners(ObjectChange {
                kind: ChangeKind::Add,
                object: self.clone(),
                name: key.to_string(),
                old_value: None,
                new_value: value,
            });
        }
        let pending = self.inner.pending_keys.borrow().get(key).cloned();
        if let Some(pending) = pending {
            pending.set(true)?;
        }
        self.inner.keys_atom.report_changed();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Interception and observation
    // ------------------------------------------------------------------

    /// Register a change listener. Listeners run untracked, in registration
    /// order, after the change was applied.
    pub fn observe<F>(&self, listener: F) -> Disposer
    where
        F: Fn(&ObjectChange) + 'static,
    {
        let id = self.inner.listeners.add(Rc::new(listener));
        let context = Rc::downgrade(&self.inner);
        Disposer::new(move || {
            if let Some(inner) = context.upgrade() {
                inner.listeners.remove(id);
            }
        })
    }

    /// Register an interceptor. Interceptors run untracked, in registration
    /// order; the first one returning `None` cancels the change.
    pub fn intercept<F>(&self, interceptor: F) -> Disposer
    where
        F: Fn(ObjectWillChange) -> Option<ObjectWillChange> + 'static,
    {
        let id = self.inner.interceptors.add(Rc::new(interceptor));
        let context = Rc::downgrade(&self.inner);
        Disposer::new(move || {
            if let Some(inner) = context.upgrade() {
                inner.interceptors.remove(id);
            }
        })
    }

    fn intercept_change(&self, change: ObjectWillChange) -> Option<ObjectWillChange> {
        self.inner.runtime.untracked(|| {
            let mut change = change;
            for interceptor in self.inner.interceptors.snapshot() {
                change = interceptor(change)?;
            }
            Some(change)
        })
    }

    fn notify_listeners(&self, change: ObjectChange) {
        self.inner.runtime.untracked(|| {
            for listener in self.inner.listeners.snapshot() {
                listener(&change);
            }
        });
    }
}

fn upgrade(context: &Weak<ObjectInner>, name: &str) -> Result<ObservableObject> {
    context
        .upgrade()
        .map(|inner| ObservableObject { inner })
        .ok_or_else(|| ReactiveError::ObjectDropped(name.to_string()))
}

impl fmt::Debug for ObservableObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.inner.properties.borrow().keys().cloned().collect();
        f.debug_struct("ObservableObject")
            .field("name", &self.inner.name)
            .field("keys", &keys)
            .field("values", &self.values_len())
            .field("listeners", &self.inner.listeners.len())
            .field("interceptors", &self.inner.interceptors.len())
            .finish()
    }
}

impl Runtime {
    /// Create an empty observable object in this runtime.
    pub fn object(&self, name: impl Into<String>) -> ObservableObject {
        ObservableObject::new_in(self, name)
    }
}
