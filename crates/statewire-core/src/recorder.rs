#![forbid(unsafe_code)]

//! A subscriber that records every notification it receives.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::error;

use crate::runtime::Runtime;
use crate::subscriber::{Capabilities, Change, ChangeSource, Subscriber, SubscriberId};
use crate::value::Value;

/// One recorded callback.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification<V> {
    ValueChanged {
        source: ChangeSource,
        name: Option<String>,
        /// `None` when the payload was not a `V`.
        value: Option<V>,
    },
    PropertyChanged {
        source: ChangeSource,
        name: Option<String>,
        value: Option<V>,
    },
    PropertyRead {
        name: Option<String>,
    },
}

/// Records notifications, downcasting payloads to `V`.
pub struct RecordingSubscriber<V = Value> {
    id: SubscriberId,
    capabilities: Capabilities,
    events: RefCell<Vec<Notification<V>>>,
}

impl<V: Clone + 'static> RecordingSubscriber<V> {
    /// Register a recorder accepting every notification kind.
    pub fn register(runtime: &Runtime) -> Rc<Self> {
        Self::register_with(runtime, Capabilities::all())
    }

    /// Register a recorder accepting only `capabilities`.
    pub fn register_with(runtime: &Runtime, capabilities: Capabilities) -> Rc<Self> {
        let recorder = Rc::new(Self {
            id: runtime.make_id(),
            capabilities,
            events: RefCell::new(Vec::new()),
        });
        let erased: Rc<dyn Subscriber> = recorder.clone();
        if let Err(err) = runtime.register(&erased) {
            error!(error = %err, "recording subscriber registration failed");
        }
        recorder
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Every notification in arrival order.
    pub fn events(&self) -> Vec<Notification<V>> {
        self.events.borrow().clone()
    }

    /// Values delivered through `value_changed`.
    pub fn values(&self) -> Vec<V> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Notification::ValueChanged { value, .. } => value.clone(),
                _ => None,
            })
            .collect()
    }

    /// Names of object fields delivered through `property_changed`.
    pub fn changed_fields(&self) -> Vec<String> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Notification::PropertyChanged {
                    source: ChangeSource::Object(_),
                    name,
                    ..
                } => name.clone(),
                _ => None,
            })
            .collect()
    }

    /// Names delivered through `property_read`.
    pub fn reads(&self) -> Vec<Option<String>> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Notification::PropertyRead { name } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn value_changed_count(&self) -> usize {
        self.count(|e| matches!(e, Notification::ValueChanged { .. }))
    }

    pub fn property_changed_count(&self) -> usize {
        self.count(|e| matches!(e, Notification::PropertyChanged { .. }))
    }

    pub fn read_count(&self) -> usize {
        self.count(|e| matches!(e, Notification::PropertyRead { .. }))
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }

    fn count(&self, pred: impl Fn(&Notification<V>) -> bool) -> usize {
        self.events.borrow().iter().filter(|e| pred(e)).count()
    }
}

impl<V: Clone + 'static> Subscriber for RecordingSubscriber<V> {
    fn subscriber_id(&self) -> SubscriberId {
        self.id
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn value_changed(&self, change: &Change<'_>) {
        self.events.borrow_mut().push(Notification::ValueChanged {
            source: change.source(),
            name: change.name().map(str::to_string),
            value: change.value_as::<V>().cloned(),
        });
    }

    fn property_changed(&self, change: &Change<'_>) {
        self.events.borrow_mut().push(Notification::PropertyChanged {
            source: change.source(),
            name: change.name().map(str::to_string),
            value: change.value_as::<V>().cloned(),
        });
    }

    fn property_read(&self, name: Option<&str>) {
        self.events.borrow_mut().push(Notification::PropertyRead {
            name: name.map(str::to_string),
        });
    }

    fn info(&self) -> Option<String> {
        Some(format!("recorder {}", self.id))
    }
}
