#![forbid(unsafe_code)]

//! Subscriber identity, capabilities, and change payloads.
//!
//! Every participant in change propagation is a [`Subscriber`]: observed
//! properties, scope mirrors, dependency trackers, and plain closures. A
//! subscriber is addressed by its [`SubscriberId`] and declares which
//! notifications it can receive through a [`Capabilities`] set. Fan-out only
//! invokes the callbacks a subscriber has declared.
//!
//! # Notification kinds
//!
//! | Capability          | Callback              | Raised by                         |
//! |---------------------|-----------------------|-----------------------------------|
//! | `VALUE_CHANGED`     | `value_changed`       | a property's value was replaced   |
//! | `PROPERTY_CHANGED`  | `property_changed`    | a property or object field changed|
//! | `PROPERTY_READ`     | `property_read`       | a tracked read of a property      |

use std::any::Any;
use std::fmt;

use bitflags::bitflags;

use crate::object::ObjectHandle;

/// Unique identifier of a subscriber within one runtime.
///
/// Ids are issued by the registry in strictly increasing order and are never
/// reused. Each id also carries the tag of the registry that issued it, so an
/// id from another runtime is never mistaken for a local one.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId {
    registry: u32,
    seq: u64,
}

impl SubscriberId {
    /// Reconstruct an untagged id from its raw value. Untagged ids are never
    /// accepted for registration.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self {
            registry: 0,
            seq: raw,
        }
    }

    pub(crate) const fn issued(registry: u32, seq: u64) -> Self {
        Self { registry, seq }
    }

    /// The raw numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.seq
    }

    /// Tag of the issuing registry; `0` for untagged ids.
    #[must_use]
    pub const fn registry(self) -> u32 {
        self.registry
    }
}

impl fmt::Debug for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.registry == 0 {
            write!(f, "SubscriberId({})", self.seq)
        } else {
            write!(f, "SubscriberId({}@{})", self.seq, self.registry)
        }
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.seq)
    }
}

bitflags! {
    /// Notification kinds a subscriber accepts.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Capabilities: u8 {
        /// Receives `value_changed` when a watched property's value changes.
        const VALUE_CHANGED = 1 << 0;
        /// Receives `property_changed` for property and object field changes.
        const PROPERTY_CHANGED = 1 << 1;
        /// Receives `property_read` for tracked reads.
        const PROPERTY_READ = 1 << 2;
    }
}

/// Where a change originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeSource {
    /// An observed property replaced its value.
    Property(SubscriberId),
    /// A field of a wrapped object was written.
    Object(ObjectHandle),
}

/// Payload delivered with every change notification.
///
/// The value is type-erased so one subscriber can watch properties of
/// different value types; use [`Change::value_as`] to recover it.
#[derive(Clone, Copy)]
pub struct Change<'a> {
    source: ChangeSource,
    name: Option<&'a str>,
    value: &'a dyn Any,
    writer: Option<SubscriberId>,
}

impl<'a> Change<'a> {
    /// Create a change with no propagation token.
    #[must_use]
    pub fn new(source: ChangeSource, name: Option<&'a str>, value: &'a dyn Any) -> Self {
        Self {
            source,
            name,
            value,
            writer: None,
        }
    }

    /// Attach the id of the subscriber whose write started this propagation.
    #[must_use]
    pub fn with_writer(mut self, writer: Option<SubscriberId>) -> Self {
        self.writer = writer;
        self
    }

    /// Origin of the change.
    #[must_use]
    pub fn source(&self) -> ChangeSource {
        self.source
    }

    /// Property info or field name of the change, if any.
    #[must_use]
    pub fn name(&self) -> Option<&'a str> {
        self.name
    }

    /// The new value, type-erased.
    #[must_use]
    pub fn value(&self) -> &'a dyn Any {
        self.value
    }

    /// The new value, if it is a `T`.
    #[must_use]
    pub fn value_as<T: Any>(&self) -> Option<&'a T> {
        self.value.downcast_ref::<T>()
    }

    /// The subscriber that initiated this propagation, if it came through a
    /// two-way link. Receivers must not echo the change back to it.
    #[must_use]
    pub fn writer(&self) -> Option<SubscriberId> {
        self.writer
    }
}

impl fmt::Debug for Change<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Change")
            .field("source", &self.source)
            .field("name", &self.name)
            .field("writer", &self.writer)
            .finish_non_exhaustive()
    }
}

/// A participant in change propagation.
///
/// Only the callbacks named by [`Subscriber::capabilities`] are invoked; the
/// defaults are no-ops.
pub trait Subscriber {
    /// The id this subscriber was issued by the registry.
    fn subscriber_id(&self) -> SubscriberId;

    /// Notification kinds this subscriber accepts.
    fn capabilities(&self) -> Capabilities;

    /// A watched property replaced its value.
    fn value_changed(&self, _change: &Change<'_>) {}

    /// A watched property, or a field of an owned object, changed.
    fn property_changed(&self, _change: &Change<'_>) {}

    /// A watched property was read through a tracking read.
    fn property_read(&self, _name: Option<&str>) {}

    /// Human-readable description used in diagnostics.
    fn info(&self) -> Option<String> {
        None
    }
}
