#![forbid(unsafe_code)]

//! Observed properties: owning, one-way derived, and two-way derived.
//!
//! An [`ObservedProperty<T>`] holds (or proxies) a value and notifies its
//! subscribers when the value changes. Every property is itself a registered
//! subscriber, which is how derived properties hear about their source.
//!
//! # Binding modes
//!
//! | Mode     | Storage          | `set` behavior                                |
//! |----------|------------------|-----------------------------------------------|
//! | `Owned`  | own value        | store, notify subscribers                     |
//! | `Nested` | own object value | as `Owned`; cannot be linked or propped       |
//! | `OneWay` | local copy       | store locally, never written upstream         |
//! | `TwoWay` | reads through    | write to source, source notifies everyone     |
//!
//! # Design
//!
//! ## Propagation token
//!
//! A write made through a two-way link carries the link's id as the *writer*
//! of the propagation. The source notifies every subscriber except the
//! writer, and the writer then notifies its own subscribers. Each party
//! therefore sees a given change exactly once and two-way chains cannot loop,
//! without any global mutable flag.
//!
//! ## Object values
//!
//! When the value refers to a wrapped object, the property registers itself
//! as one of the object's owners and re-broadcasts field changes of that
//! object to its subscribers. Replacing the value moves ownership from the
//! old handle to the new one. Two-way links never own the source's object;
//! nested changes reach them through the source's notification.
//!
//! # Failure Modes
//!
//! | Condition                              | Behavior                                |
//! |----------------------------------------|-----------------------------------------|
//! | subscribed id unknown at fan-out time  | `warn!`, skipped, fan-out continues     |
//! | subscriber removed mid fan-out         | not called for the rest of that pass    |
//! | `set` on a deleted property            | `warn!`, ignored                        |
//! | link/prop of a nested or deleted prop  | `None`                                  |

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;
use tracing::{debug, error, trace, warn};

use crate::config::ReadAttribution;
use crate::object::{ObjectError, ObjectHandle};
use crate::runtime::Runtime;
use crate::subscriber::{Capabilities, Change, ChangeSource, Subscriber, SubscriberId};
use crate::value::{FieldKey, StateValue, Value};

/// How a property is bound to its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Holds its own value.
    Owned,
    /// Holds an object that is a field of another object.
    Nested,
    /// Holds a local copy that follows its source.
    OneWay,
    /// Reads and writes through to its source.
    TwoWay,
}

/// Whether the current value is a plain value or a wrapped object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Simple,
    Object,
}

enum Binding<T: StateValue> {
    Owned {
        value: RefCell<T>,
        nested: bool,
    },
    OneWay {
        source: Option<ObservedProperty<T>>,
        value: RefCell<T>,
    },
    TwoWay {
        source: ObservedProperty<T>,
    },
}

struct PropertyInner<T: StateValue> {
    id: SubscriberId,
    runtime: Runtime,
    info: RefCell<Option<String>>,
    subscribers: RefCell<SmallVec<[SubscriberId; 4]>>,
    binding: Binding<T>,
    deleted: Cell<bool>,
}

/// A value that notifies its subscribers when it changes.
///
/// Clones share the same property.
pub struct ObservedProperty<T: StateValue> {
    inner: Rc<PropertyInner<T>>,
}

impl<T: StateValue> Clone for ObservedProperty<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: StateValue> ObservedProperty<T> {
    /// Create an owning property with no subscribers.
    pub fn new(runtime: &Runtime, value: T) -> Self {
        Self::with_owner(runtime, value, None, None)
    }

    /// Create an owning property, subscribing `owner` and naming it `info`.
    pub fn with_owner(
        runtime: &Runtime,
        value: T,
        owner: Option<SubscriberId>,
        info: Option<&str>,
    ) -> Self {
        let value = value.observe(runtime);
        Self::build(
            runtime,
            owner,
            info,
            Binding::Owned {
                value: RefCell::new(value),
                nested: false,
            },
        )
    }

    /// Create a property for an object held as a field of another object.
    ///
    /// It owns the object like an owning property but cannot be linked or
    /// propped.
    pub fn nested(
        runtime: &Runtime,
        value: T,
        owner: Option<SubscriberId>,
        info: Option<&str>,
    ) -> Self {
        let value = value.observe(runtime);
        Self::build(
            runtime,
            owner,
            info,
            Binding::Owned {
                value: RefCell::new(value),
                nested: true,
            },
        )
    }

    /// Create a one-way property with no source, seeded with `default`.
    ///
    /// Used when a one-way derivation is requested from a source that does
    /// not exist: the result is usable but never receives upstream changes.
    pub fn unbound_prop(
        runtime: &Runtime,
        default: T,
        owner: Option<SubscriberId>,
        info: Option<&str>,
    ) -> Self {
        let value = default.observe(runtime);
        Self::build(
            runtime,
            owner,
            info,
            Binding::OneWay {
                source: None,
                value: RefCell::new(value),
            },
        )
    }

    fn build(
        runtime: &Runtime,
        owner: Option<SubscriberId>,
        info: Option<&str>,
        binding: Binding<T>,
    ) -> Self {
        let inner = Rc::new(PropertyInner {
            id: runtime.make_id(),
            runtime: runtime.clone(),
            info: RefCell::new(info.map(str::to_string)),
            subscribers: RefCell::new(SmallVec::new()),
            binding,
            deleted: Cell::new(false),
        });
        let subscriber: Rc<dyn Subscriber> = inner.clone();
        if let Err(err) = runtime.register(&subscriber) {
            error!(property = %inner.id, error = %err, "property registration failed");
        }
        if let Some(handle) = inner.held_handle() {
            inner.attach(handle);
        }
        if let Some(owner) = owner {
            inner.subscribe(owner);
        }
        trace!(property = %inner.id, info = ?info, "property created");
        Self { inner }
    }

    /// The property's subscriber id.
    pub fn id(&self) -> SubscriberId {
        self.inner.id
    }

    /// The runtime this property belongs to.
    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    /// Diagnostic name, also reported as the change name to subscribers.
    pub fn info(&self) -> Option<String> {
        self.inner.info.borrow().clone()
    }

    /// Rename the property.
    pub fn set_info(&self, info: impl Into<String>) {
        *self.inner.info.borrow_mut() = Some(info.into());
    }

    pub fn mode(&self) -> SyncMode {
        match &self.inner.binding {
            Binding::Owned { nested: false, .. } => SyncMode::Owned,
            Binding::Owned { nested: true, .. } => SyncMode::Nested,
            Binding::OneWay { .. } => SyncMode::OneWay,
            Binding::TwoWay { .. } => SyncMode::TwoWay,
        }
    }

    pub fn kind(&self) -> PropertyKind {
        if self.object_handle().is_some() {
            PropertyKind::Object
        } else {
            PropertyKind::Simple
        }
    }

    /// Id of the property this one derives from, if any.
    pub fn source_id(&self) -> Option<SubscriberId> {
        match &self.inner.binding {
            Binding::OneWay {
                source: Some(source),
                ..
            }
            | Binding::TwoWay { source } => Some(source.id()),
            _ => None,
        }
    }

    /// Current value; reported to read-tracking subscribers.
    pub fn get(&self) -> T {
        let info = self.info();
        self.inner.notify_property_read(info.as_deref());
        self.peek()
    }

    /// Current value without read tracking.
    pub fn peek(&self) -> T {
        self.inner.with(T::clone)
    }

    /// Borrow the current value without cloning or read tracking.
    ///
    /// The closure must not write to this property.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.with(f)
    }

    /// Replace the value. Equal values change nothing and notify no one.
    pub fn set(&self, value: T) {
        self.inner.write(value, None);
    }

    /// Modify the value in place through a copy, then `set` it.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let mut value = self.peek();
        f(&mut value);
        self.set(value);
    }

    /// Subscribe a registered subscriber. Returns `false` if the id is not
    /// registered. Subscribing twice keeps a single entry.
    pub fn subscribe(&self, id: SubscriberId) -> bool {
        self.inner.subscribe(id)
    }

    /// Remove a subscriber. Returns `false` if it was not subscribed.
    pub fn unlink(&self, id: SubscriberId) -> bool {
        self.inner.unlink(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.borrow().len()
    }

    pub fn has_subscriber(&self, id: SubscriberId) -> bool {
        self.inner.has_subscriber(id)
    }

    /// Subscribers in notification order.
    pub fn subscribers(&self) -> Vec<SubscriberId> {
        self.inner.subscribers.borrow().to_vec()
    }

    /// Create a two-way derived property. Writes to the link update this
    /// property; changes here reach the link's subscribers.
    ///
    /// Returns `None` for nested, one-way, and deleted properties.
    pub fn create_link(&self, owner: Option<SubscriberId>, info: Option<&str>) -> Option<Self> {
        if !self.derivable("link") {
            return None;
        }
        if matches!(self.inner.binding, Binding::OneWay { .. }) {
            warn!(property = %self.id(), "cannot link a one-way property");
            return None;
        }
        let link = Self::build(
            &self.inner.runtime,
            owner,
            info,
            Binding::TwoWay {
                source: self.clone(),
            },
        );
        self.subscribe(link.id());
        debug!(source = %self.id(), link = %link.id(), "two-way link created");
        Some(link)
    }

    /// Create a one-way derived property holding a copy of the current value.
    /// Upstream changes overwrite the copy; local writes stay local.
    ///
    /// Returns `None` for nested and deleted properties.
    pub fn create_prop(&self, owner: Option<SubscriberId>, info: Option<&str>) -> Option<Self> {
        if !self.derivable("prop") {
            return None;
        }
        let prop = Self::build(
            &self.inner.runtime,
            owner,
            info,
            Binding::OneWay {
                source: Some(self.clone()),
                value: RefCell::new(self.peek()),
            },
        );
        self.subscribe(prop.id());
        debug!(source = %self.id(), prop = %prop.id(), "one-way prop created");
        Some(prop)
    }

    fn derivable(&self, what: &'static str) -> bool {
        if self.is_deleted() {
            warn!(property = %self.id(), what, "cannot derive from a deleted property");
            return false;
        }
        if self.mode() == SyncMode::Nested {
            warn!(property = %self.id(), what, "cannot derive from a nested object property");
            return false;
        }
        true
    }

    /// Tear the property down: stop following its source, release its
    /// object, and unregister. Idempotent.
    pub fn about_to_be_deleted(&self) {
        let inner = &self.inner;
        if inner.deleted.replace(true) {
            return;
        }
        if let Some(handle) = inner.held_handle() {
            inner.detach(handle);
        }
        if let Some(source) = match &inner.binding {
            Binding::OneWay { source, .. } => source.as_ref(),
            Binding::TwoWay { source } => Some(source),
            Binding::Owned { .. } => None,
        } {
            source.unlink(inner.id);
        }
        inner.runtime.unregister(inner.id);
        debug!(property = %inner.id, "property deleted");
    }

    pub fn is_deleted(&self) -> bool {
        self.inner.deleted.get()
    }

    /// Handle of the wrapped object the value refers to, if any.
    pub fn object_handle(&self) -> Option<ObjectHandle> {
        self.inner.with(T::object_handle)
    }

    /// Read a field of the held object with read tracking.
    ///
    /// The name reported to read-tracking subscribers follows the runtime's
    /// [`ReadAttribution`].
    pub fn read_field(&self, key: impl Into<FieldKey>) -> Option<Value> {
        let key = key.into();
        let handle = self.object_handle()?;
        let name = match self.inner.runtime.config().read_attribution {
            ReadAttribution::OwningProperty => self.info(),
            ReadAttribution::Field => Some(key.to_string()),
        };
        self.inner.notify_property_read(name.as_deref());
        self.inner.runtime.read_field(handle, key)
    }

    /// Write a field of the held object; its owners are notified.
    pub fn write_field(
        &self,
        key: impl Into<FieldKey>,
        value: impl Into<Value>,
    ) -> Result<bool, ObjectError> {
        let handle = self.object_handle().ok_or(ObjectError::NotAnObject)?;
        self.inner.runtime.write_field(handle, key, value)
    }
}

impl<T: StateValue> fmt::Debug for ObservedProperty<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.with(|value| {
            f.debug_struct("ObservedProperty")
                .field("id", &self.inner.id)
                .field("info", &self.inner.info.borrow())
                .field("mode", &self.mode())
                .field("subscribers", &self.subscriber_count())
                .field("value", value)
                .finish()
        })
    }
}

impl<T: StateValue> PropertyInner<T> {
    fn stored(&self) -> Option<&RefCell<T>> {
        match &self.binding {
            Binding::Owned { value, .. } | Binding::OneWay { value, .. } => Some(value),
            Binding::TwoWay { .. } => None,
        }
    }

    fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        match &self.binding {
            Binding::Owned { value, .. } | Binding::OneWay { value, .. } => f(&value.borrow()),
            Binding::TwoWay { source } => source.inner.with(f),
        }
    }

    /// Handle of the object this property owns. Two-way links own nothing.
    fn held_handle(&self) -> Option<ObjectHandle> {
        self.stored().and_then(|cell| cell.borrow().object_handle())
    }

    fn attach(&self, handle: ObjectHandle) {
        if let Err(err) = self.runtime.add_owner(handle, self.id) {
            warn!(property = %self.id, error = %err, "cannot own object");
        }
    }

    fn detach(&self, handle: ObjectHandle) {
        if let Err(err) = self.runtime.remove_owner(handle, self.id) {
            warn!(property = %self.id, error = %err, "cannot release object");
        }
    }

    fn store(&self, cell: &RefCell<T>, value: T) {
        let new_handle = value.object_handle();
        let old = cell.replace(value);
        let old_handle = old.object_handle();
        if old_handle == new_handle {
            return;
        }
        if let Some(handle) = old_handle {
            self.detach(handle);
        }
        if let Some(handle) = new_handle {
            self.attach(handle);
        }
    }

    /// Store `value` and notify. Returns `false` when nothing changed.
    fn write(&self, value: T, writer: Option<SubscriberId>) -> bool {
        if self.deleted.get() {
            warn!(property = %self.id, "write to deleted property ignored");
            return false;
        }
        match &self.binding {
            Binding::Owned { value: cell, .. } | Binding::OneWay { value: cell, .. } => {
                if *cell.borrow() == value {
                    trace!(property = %self.id, "set to equal value, no-op");
                    return false;
                }
                let value = value.observe(&self.runtime);
                self.store(cell, value);
            }
            Binding::TwoWay { source } => {
                if source.inner.with(|current| *current == value) {
                    trace!(property = %self.id, "set to equal value, no-op");
                    return false;
                }
                if !source.inner.write(value, Some(self.id)) {
                    return false;
                }
            }
        }
        self.notify_has_changed(writer);
        true
    }

    fn has_subscriber(&self, id: SubscriberId) -> bool {
        self.subscribers.borrow().contains(&id)
    }

    fn subscribe(&self, id: SubscriberId) -> bool {
        if !self.runtime.is_registered(id) {
            warn!(property = %self.id, subscriber = %id, "refusing unregistered subscriber");
            return false;
        }
        let mut subscribers = self.subscribers.borrow_mut();
        if !subscribers.contains(&id) {
            subscribers.push(id);
        }
        true
    }

    fn unlink(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.borrow_mut();
        match subscribers.iter().position(|&s| s == id) {
            Some(pos) => {
                subscribers.remove(pos);
                true
            }
            None => false,
        }
    }

    fn notify_has_changed(&self, writer: Option<SubscriberId>) {
        let snapshot: SmallVec<[SubscriberId; 8]> =
            self.subscribers.borrow().iter().copied().collect();
        if snapshot.is_empty() {
            return;
        }
        let value = self.with(T::clone);
        let info = self.info.borrow().clone();
        debug!(
            property = %self.id,
            info = info.as_deref().unwrap_or("-"),
            subscribers = snapshot.len(),
            "property changed"
        );
        let change = Change::new(ChangeSource::Property(self.id), info.as_deref(), &value)
            .with_writer(writer);
        for id in snapshot {
            if Some(id) == writer {
                continue;
            }
            // Unsubscribed earlier in this pass.
            if !self.has_subscriber(id) {
                continue;
            }
            let subscriber = match self.runtime.resolve(id) {
                Ok(subscriber) => subscriber,
                Err(err) => {
                    self.runtime.report_unknown("property fan-out", err);
                    continue;
                }
            };
            let caps = subscriber.capabilities();
            if caps.contains(Capabilities::VALUE_CHANGED) {
                subscriber.value_changed(&change);
            }
            if caps.contains(Capabilities::PROPERTY_CHANGED)
                && self.has_subscriber(id)
                && self.runtime.is_registered(id)
            {
                subscriber.property_changed(&change);
            }
        }
    }

    fn notify_property_read(&self, name: Option<&str>) {
        let snapshot: SmallVec<[SubscriberId; 8]> =
            self.subscribers.borrow().iter().copied().collect();
        for id in snapshot {
            let Some(subscriber) = self.runtime.lookup(id) else {
                continue;
            };
            if subscriber.capabilities().contains(Capabilities::PROPERTY_READ) {
                subscriber.property_read(name);
            }
        }
    }
}

impl<T: StateValue> Subscriber for PropertyInner<T> {
    fn subscriber_id(&self) -> SubscriberId {
        self.id
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::VALUE_CHANGED | Capabilities::PROPERTY_CHANGED
    }

    fn value_changed(&self, change: &Change<'_>) {
        if self.deleted.get() {
            return;
        }
        let ChangeSource::Property(from) = change.source() else {
            return;
        };
        match &self.binding {
            Binding::OneWay {
                source: Some(source),
                value,
            } if source.id() == from => {
                let Some(incoming) = change.value_as::<T>() else {
                    warn!(property = %self.id, source = %from, "source value has unexpected type");
                    return;
                };
                if *value.borrow() == *incoming {
                    return;
                }
                self.store(value, incoming.clone());
                self.notify_has_changed(change.writer());
            }
            Binding::TwoWay { source } if source.id() == from => {
                self.notify_has_changed(change.writer());
            }
            _ => {}
        }
    }

    fn property_changed(&self, change: &Change<'_>) {
        if self.deleted.get() {
            return;
        }
        let ChangeSource::Object(handle) = change.source() else {
            return;
        };
        if self.held_handle() == Some(handle) {
            trace!(property = %self.id, field = ?change.name(), "held object changed");
            self.notify_has_changed(None);
        }
    }

    fn info(&self) -> Option<String> {
        self.info.borrow().clone()
    }
}
