#![forbid(unsafe_code)]

//! Subscriber registry.
//!
//! The `SubscriberRegistry` issues [`SubscriberId`]s and maps them to live
//! subscribers. It stores weak references only: the registry never keeps a
//! subscriber alive, and a lookup of a dropped subscriber behaves like a
//! lookup of an id that was never registered.
//!
//! # Invariants
//!
//! 1. Issued ids are strictly increasing and never reused, even after
//!    `unregister`.
//! 2. At most one registration exists per id.
//! 3. Only ids issued by this registry can be registered.
//!
//! # Usage
//!
//! ```
//! use statewire_core::registry::SubscriberRegistry;
//!
//! let registry = SubscriberRegistry::new();
//! let a = registry.make_id();
//! let b = registry.make_id();
//! assert!(a < b);
//! assert_eq!(registry.count(), 0);
//! ```

use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU32, Ordering};

use rustc_hash::FxHashMap;

use crate::subscriber::{Subscriber, SubscriberId};

/// Errors reported by registry operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// No live subscriber is registered under the id.
    UnknownSubscriber(SubscriberId),
    /// The id was not issued by this registry.
    NotIssued(SubscriberId),
    /// A subscriber is already registered under the id.
    AlreadyRegistered(SubscriberId),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownSubscriber(id) => write!(f, "unknown subscriber {id}"),
            Self::NotIssued(id) => write!(f, "subscriber id {id} was not issued by this registry"),
            Self::AlreadyRegistered(id) => write!(f, "subscriber {id} is already registered"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Registry tags start at 1; 0 marks untagged ids.
static NEXT_TAG: AtomicU32 = AtomicU32::new(1);

/// Maps subscriber ids to weak subscriber references.
pub struct SubscriberRegistry {
    tag: u32,
    /// Next id to issue. Interior mutability so ids can be issued while the
    /// table is shared.
    next_id: Cell<u64>,
    by_id: FxHashMap<SubscriberId, Weak<dyn Subscriber>>,
}

impl SubscriberRegistry {
    /// Create an empty registry. The first issued id is 1.
    pub fn new() -> Self {
        Self {
            tag: NEXT_TAG.fetch_add(1, Ordering::Relaxed),
            next_id: Cell::new(1),
            by_id: FxHashMap::default(),
        }
    }

    /// Issue a fresh id, strictly greater than every id issued before.
    pub fn make_id(&self) -> SubscriberId {
        let id = self.next_id.get();
        assert!(id < u64::MAX, "subscriber id space exhausted");
        self.next_id.set(id + 1);
        SubscriberId::issued(self.tag, id)
    }

    /// Whether `id` was issued by this registry.
    pub fn was_issued(&self, id: SubscriberId) -> bool {
        id.registry() == self.tag && id.get() != 0 && id.get() < self.next_id.get()
    }

    /// Register a subscriber under its own id.
    pub fn register(&mut self, subscriber: &Rc<dyn Subscriber>) -> Result<(), RegistryError> {
        let id = subscriber.subscriber_id();
        if !self.was_issued(id) {
            return Err(RegistryError::NotIssued(id));
        }
        if self.by_id.contains_key(&id) {
            return Err(RegistryError::AlreadyRegistered(id));
        }
        self.by_id.insert(id, Rc::downgrade(subscriber));
        Ok(())
    }

    /// Remove a registration. Returns `false` if `id` was not registered.
    pub fn unregister(&mut self, id: SubscriberId) -> bool {
        self.by_id.remove(&id).is_some()
    }

    /// Find the live subscriber registered under `id`.
    pub fn lookup(&self, id: SubscriberId) -> Option<Rc<dyn Subscriber>> {
        self.by_id.get(&id).and_then(Weak::upgrade)
    }

    /// Like [`lookup`](Self::lookup) but reports why nothing was found.
    pub fn resolve(&self, id: SubscriberId) -> Result<Rc<dyn Subscriber>, RegistryError> {
        self.lookup(id).ok_or(RegistryError::UnknownSubscriber(id))
    }

    /// Whether a registration exists for `id`, live or not.
    pub fn is_registered(&self, id: SubscriberId) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Number of registrations, including entries whose subscriber was
    /// dropped without unregistering.
    pub fn count(&self) -> usize {
        self.by_id.len()
    }

    /// Number of registrations whose subscriber is still alive.
    pub fn live_count(&self) -> usize {
        self.by_id.values().filter(|w| w.strong_count() > 0).count()
    }

    /// Drop registrations whose subscriber no longer exists. Returns how many
    /// were removed.
    pub fn prune(&mut self) -> usize {
        let before = self.by_id.len();
        self.by_id.retain(|_, weak| weak.strong_count() > 0);
        before - self.by_id.len()
    }

    /// Registered ids in ascending order.
    pub fn ids(&self) -> Vec<SubscriberId> {
        let mut ids: Vec<_> = self.by_id.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("tag", &self.tag)
            .field("next_id", &self.next_id.get())
            .field("registered", &self.by_id.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriber::Capabilities;

    struct Stub(SubscriberId);

    impl Subscriber for Stub {
        fn subscriber_id(&self) -> SubscriberId {
            self.0
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::VALUE_CHANGED
        }
    }

    fn stub(registry: &SubscriberRegistry) -> Rc<dyn Subscriber> {
        Rc::new(Stub(registry.make_id()))
    }

    #[test]
    fn ids_are_strictly_increasing() {
        let registry = SubscriberRegistry::new();
        let ids: Vec<_> = (0..100).map(|_| registry.make_id()).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = SubscriberRegistry::new();
        let sub = stub(&registry);
        let id = sub.subscriber_id();
        registry.register(&sub).unwrap();
        assert_eq!(registry.lookup(id).unwrap().subscriber_id(), id);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn unregister_is_reported_once() {
        let mut registry = SubscriberRegistry::new();
        let sub = stub(&registry);
        let id = sub.subscriber_id();
        registry.register(&sub).unwrap();
        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(registry.lookup(id).is_none());
        assert_eq!(registry.resolve(id).err(), Some(RegistryError::UnknownSubscriber(id)));
    }

    #[test]
    fn ids_not_reused_after_unregister() {
        let mut registry = SubscriberRegistry::new();
        let sub = stub(&registry);
        let old = sub.subscriber_id();
        registry.register(&sub).unwrap();
        registry.unregister(old);
        assert!(registry.make_id() > old);
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut registry = SubscriberRegistry::new();
        let sub = stub(&registry);
        registry.register(&sub).unwrap();
        assert_eq!(
            registry.register(&sub),
            Err(RegistryError::AlreadyRegistered(sub.subscriber_id()))
        );
    }

    #[test]
    fn foreign_id_rejected() {
        let mut registry = SubscriberRegistry::new();
        let sub: Rc<dyn Subscriber> = Rc::new(Stub(SubscriberId::from_raw(500)));
        assert_eq!(
            registry.register(&sub),
            Err(RegistryError::NotIssued(SubscriberId::from_raw(500)))
        );
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn id_from_another_registry_rejected() {
        let mut ours = SubscriberRegistry::new();
        let theirs = SubscriberRegistry::new();
        let local = ours.make_id();
        let stranger: Rc<dyn Subscriber> = Rc::new(Stub(theirs.make_id()));
        assert_eq!(local.get(), stranger.subscriber_id().get());
        assert!(!ours.was_issued(stranger.subscriber_id()));
        assert_eq!(
            ours.register(&stranger),
            Err(RegistryError::NotIssued(stranger.subscriber_id()))
        );
        assert!(!ours.is_registered(local));

        let owner: Rc<dyn Subscriber> = Rc::new(Stub(local));
        assert_eq!(ours.register(&owner), Ok(()));
    }

    #[test]
    fn dropped_subscriber_behaves_as_unknown() {
        let mut registry = SubscriberRegistry::new();
        let sub = stub(&registry);
        let id = sub.subscriber_id();
        registry.register(&sub).unwrap();
        drop(sub);
        assert!(registry.lookup(id).is_none());
        assert!(registry.is_registered(id));
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.live_count(), 0);
        assert_eq!(registry.prune(), 1);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn ids_listed_in_order() {
        let mut registry = SubscriberRegistry::new();
        let subs: Vec<_> = (0..5).map(|_| stub(&registry)).collect();
        for sub in subs.iter().rev() {
            registry.register(sub).unwrap();
        }
        let ids = registry.ids();
        assert_eq!(ids.len(), 5);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }
}
