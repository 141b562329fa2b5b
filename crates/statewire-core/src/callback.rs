#![forbid(unsafe_code)]

//! Closure-backed subscribers.
//!
//! [`FnSubscriber`] adapts plain closures to the [`Subscriber`] trait. Its
//! capabilities are exactly the callbacks that were supplied.
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use statewire_core::{FnSubscriber, ObservedProperty, Runtime};
//!
//! let rt = Runtime::new();
//! let seen = Rc::new(Cell::new(0_i64));
//! let sink = Rc::clone(&seen);
//! let sub = FnSubscriber::builder(&rt)
//!     .on_value_changed(move |change| {
//!         if let Some(v) = change.value_as::<i64>() {
//!             sink.set(*v);
//!         }
//!     })
//!     .register();
//!
//! let count = ObservedProperty::with_owner(&rt, 0_i64, Some(sub.id()), None);
//! count.set(7);
//! assert_eq!(seen.get(), 7);
//! ```

use std::fmt;
use std::rc::Rc;

use tracing::error;

use crate::runtime::Runtime;
use crate::subscriber::{Capabilities, Change, Subscriber, SubscriberId};

type ChangeCallback = Box<dyn Fn(&Change<'_>)>;
type ReadCallback = Box<dyn Fn(Option<&str>)>;

/// A subscriber whose callbacks are closures.
pub struct FnSubscriber {
    id: SubscriberId,
    info: Option<String>,
    on_value: Option<ChangeCallback>,
    on_property: Option<ChangeCallback>,
    on_read: Option<ReadCallback>,
}

impl FnSubscriber {
    /// Start building a subscriber for `runtime`.
    pub fn builder(runtime: &Runtime) -> FnSubscriberBuilder {
        FnSubscriberBuilder {
            runtime: runtime.clone(),
            info: None,
            on_value: None,
            on_property: None,
            on_read: None,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }
}

impl Subscriber for FnSubscriber {
    fn subscriber_id(&self) -> SubscriberId {
        self.id
    }

    fn capabilities(&self) -> Capabilities {
        let mut caps = Capabilities::empty();
        caps.set(Capabilities::VALUE_CHANGED, self.on_value.is_some());
        caps.set(Capabilities::PROPERTY_CHANGED, self.on_property.is_some());
        caps.set(Capabilities::PROPERTY_READ, self.on_read.is_some());
        caps
    }

    fn value_changed(&self, change: &Change<'_>) {
        if let Some(f) = &self.on_value {
            f(change);
        }
    }

    fn property_changed(&self, change: &Change<'_>) {
        if let Some(f) = &self.on_property {
            f(change);
        }
    }

    fn property_read(&self, name: Option<&str>) {
        if let Some(f) = &self.on_read {
            f(name);
        }
    }

    fn info(&self) -> Option<String> {
        self.info.clone()
    }
}

impl fmt::Debug for FnSubscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSubscriber")
            .field("id", &self.id)
            .field("info", &self.info)
            .field("capabilities", &self.capabilities())
            .finish()
    }
}

/// Builder for [`FnSubscriber`].
#[must_use]
pub struct FnSubscriberBuilder {
    runtime: Runtime,
    info: Option<String>,
    on_value: Option<ChangeCallback>,
    on_property: Option<ChangeCallback>,
    on_read: Option<ReadCallback>,
}

impl FnSubscriberBuilder {
    pub fn info(mut self, info: impl Into<String>) -> Self {
        self.info = Some(info.into());
        self
    }

    pub fn on_value_changed(mut self, f: impl Fn(&Change<'_>) + 'static) -> Self {
        self.on_value = Some(Box::new(f));
        self
    }

    pub fn on_property_changed(mut self, f: impl Fn(&Change<'_>) + 'static) -> Self {
        self.on_property = Some(Box::new(f));
        self
    }

    pub fn on_property_read(mut self, f: impl Fn(Option<&str>) + 'static) -> Self {
        self.on_read = Some(Box::new(f));
        self
    }

    /// Issue an id and register the subscriber.
    ///
    /// The registry holds a weak reference; keep the returned `Rc` alive for
    /// as long as notifications should arrive.
    pub fn register(self) -> Rc<FnSubscriber> {
        let subscriber = Rc::new(FnSubscriber {
            id: self.runtime.make_id(),
            info: self.info,
            on_value: self.on_value,
            on_property: self.on_property,
            on_read: self.on_read,
        });
        let erased: Rc<dyn Subscriber> = subscriber.clone();
        if let Err(err) = self.runtime.register(&erased) {
            error!(error = %err, "closure subscriber registration failed");
        }
        subscriber
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn capabilities_follow_callbacks() {
        let rt = Runtime::new();
        let sub = FnSubscriber::builder(&rt)
            .on_property_read(|_| {})
            .register();
        assert_eq!(sub.capabilities(), Capabilities::PROPERTY_READ);
        let none = FnSubscriber::builder(&rt).register();
        assert!(none.capabilities().is_empty());
    }

    #[test]
    fn registration_is_weak() {
        let rt = Runtime::new();
        let sub = FnSubscriber::builder(&rt).info("status-bar").register();
        let id = sub.id();
        assert_eq!(rt.lookup(id).and_then(|s| s.info()), Some("status-bar".into()));
        drop(sub);
        assert!(rt.lookup(id).is_none());
    }

    #[test]
    fn read_callback_receives_name() {
        let rt = Runtime::new();
        let hits = Rc::new(Cell::new(0));
        let sink = Rc::clone(&hits);
        let sub = FnSubscriber::builder(&rt)
            .on_property_read(move |name| {
                if name == Some("x") {
                    sink.set(sink.get() + 1);
                }
            })
            .register();
        sub.property_read(Some("x"));
        sub.property_read(None);
        assert_eq!(hits.get(), 1);
    }
}
