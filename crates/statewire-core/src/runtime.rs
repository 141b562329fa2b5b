#![forbid(unsafe_code)]

//! The runtime: composition root for one propagation domain.
//!
//! A [`Runtime`] owns the subscriber registry and the object arena and
//! carries the [`RuntimeConfig`]. It is a cheap, clonable handle; every
//! property, scope, and helper subscriber created against it shares the same
//! state. Nothing here is global: independent runtimes never see each other's
//! subscribers or objects.
//!
//! # Re-entrancy
//!
//! Internal borrows are never held across subscriber callbacks, so callbacks
//! may freely register, unregister, create properties, or write other
//! properties while a fan-out is in progress.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::config::RuntimeConfig;
use crate::object::ObjectArena;
use crate::registry::{RegistryError, SubscriberRegistry};
use crate::subscriber::{Subscriber, SubscriberId};

struct RuntimeInner {
    config: RuntimeConfig,
    registry: RefCell<SubscriberRegistry>,
    objects: RefCell<ObjectArena>,
}

/// Shared handle to a registry, an object arena, and their policies.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    /// Create a runtime with default policies.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a runtime with the given policies.
    #[must_use]
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            inner: Rc::new(RuntimeInner {
                config,
                registry: RefCell::new(SubscriberRegistry::new()),
                objects: RefCell::new(ObjectArena::default()),
            }),
        }
    }

    /// Policies of this runtime.
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Whether both handles refer to the same runtime.
    pub fn same_runtime(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn objects(&self) -> &RefCell<ObjectArena> {
        &self.inner.objects
    }

    /// Issue a fresh subscriber id.
    pub fn make_id(&self) -> SubscriberId {
        self.inner.registry.borrow().make_id()
    }

    /// Register a subscriber under its id.
    pub fn register(&self, subscriber: &Rc<dyn Subscriber>) -> Result<(), RegistryError> {
        self.inner.registry.borrow_mut().register(subscriber)
    }

    /// Remove a registration. Returns `false` if none existed.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        self.inner.registry.borrow_mut().unregister(id)
    }

    /// Find a live subscriber.
    pub fn lookup(&self, id: SubscriberId) -> Option<Rc<dyn Subscriber>> {
        self.inner.registry.borrow().lookup(id)
    }

    /// Find a live subscriber or report it as unknown.
    pub fn resolve(&self, id: SubscriberId) -> Result<Rc<dyn Subscriber>, RegistryError> {
        self.inner.registry.borrow().resolve(id)
    }

    /// Whether a registration exists for `id`.
    pub fn is_registered(&self, id: SubscriberId) -> bool {
        self.inner.registry.borrow().is_registered(id)
    }

    /// Number of registrations.
    pub fn subscriber_count(&self) -> usize {
        self.inner.registry.borrow().count()
    }

    /// Drop registrations of subscribers that no longer exist.
    pub fn prune(&self) -> usize {
        self.inner.registry.borrow_mut().prune()
    }

    /// Log every registration at debug level.
    pub fn dump_subscribers(&self) {
        let ids = self.inner.registry.borrow().ids();
        debug!(count = ids.len(), "subscriber registry dump");
        for id in ids {
            match self.lookup(id) {
                Some(subscriber) => {
                    let info = subscriber.info();
                    debug!(id = %id, info = info.as_deref().unwrap_or("-"), "registered");
                }
                None => debug!(id = %id, "registered, subscriber dropped"),
            }
        }
    }

    pub(crate) fn report_unknown(&self, context: &'static str, err: RegistryError) {
        if self.inner.config.warn_on_unknown_subscriber {
            warn!(context, error = %err, "skipping notification");
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("subscribers", &self.subscriber_count())
            .field("objects", &self.object_count())
            .finish()
    }
}
