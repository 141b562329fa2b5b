#![forbid(unsafe_code)]

//! Durable mirroring of process-wide entries.
//!
//! [`PersistentStorage`] keeps selected keys of the process-wide scope in
//! sync with a [`DurableBackend`]. For each persisted key it holds a two-way
//! link to the entry, subscribed with its own id, so every change of the
//! entry (including nested object writes) arrives as a change of that link
//! and is written through.
//!
//! The backend is consulted only when a key is first persisted and the entry
//! does not exist yet; afterwards the process-wide entry is the source of
//! truth.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, error, trace, warn};

use statewire_core::{
    Capabilities, Change, ChangeSource, ObservedProperty, Subscriber, SubscriberId, Value,
};

use crate::backend::DurableBackend;
use crate::codec;
use crate::storage::AppStorage;

/// Write policy of the durable scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistenceConfig {
    /// Write every change to the backend as it happens. When off, only
    /// [`force_save`](PersistentStorage::force_save) and
    /// [`flush_all`](PersistentStorage::flush_all) write.
    pub write_through: bool,
    /// Remove the durable record when a key is unpersisted.
    pub delete_on_unpersist: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            write_through: true,
            delete_on_unpersist: true,
        }
    }
}

impl PersistenceConfig {
    #[must_use]
    pub fn with_write_through(mut self, enabled: bool) -> Self {
        self.write_through = enabled;
        self
    }

    #[must_use]
    pub fn with_delete_on_unpersist(mut self, enabled: bool) -> Self {
        self.delete_on_unpersist = enabled;
        self
    }
}

struct PersistentInner {
    id: SubscriberId,
    app: AppStorage,
    backend: Rc<dyn DurableBackend>,
    config: PersistenceConfig,
    links: RefCell<BTreeMap<String, ObservedProperty<Value>>>,
    deleted: Cell<bool>,
}

impl PersistentInner {
    fn link(&self, key: &str) -> Option<ObservedProperty<Value>> {
        self.links.borrow().get(key).cloned()
    }

    fn key_of(&self, link_id: SubscriberId) -> Option<String> {
        self.links
            .borrow()
            .iter()
            .find(|(_, link)| link.id() == link_id)
            .map(|(key, _)| key.clone())
    }

    /// Write the current value of `key`. Returns whether the backend
    /// accepted it.
    fn save(&self, key: &str) -> bool {
        let Some(link) = self.link(key) else {
            return false;
        };
        let json = codec::to_json(self.app.runtime(), &link.peek());
        match self.backend.set(key, json) {
            Ok(()) => {
                trace!(key, "durable write");
                true
            }
            Err(err) => {
                error!(key, error = %err, "durable write failed");
                false
            }
        }
    }
}

impl Subscriber for PersistentInner {
    fn subscriber_id(&self) -> SubscriberId {
        self.id
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::PROPERTY_CHANGED
    }

    fn property_changed(&self, change: &Change<'_>) {
        if self.deleted.get() || !self.config.write_through {
            return;
        }
        let ChangeSource::Property(from) = change.source() else {
            return;
        };
        match self.key_of(from) {
            Some(key) => {
                self.save(&key);
            }
            None => warn!(source = %from, "change from a link that is not persisted"),
        }
    }

    fn info(&self) -> Option<String> {
        Some("persistent storage".to_string())
    }
}

/// Mirrors process-wide entries into a durable backend. Clones share state.
#[derive(Clone)]
pub struct PersistentStorage {
    inner: Rc<PersistentInner>,
}

impl PersistentStorage {
    /// Create the durable scope over `app` and register it with the runtime.
    pub fn new(
        app: &AppStorage,
        backend: Rc<dyn DurableBackend>,
        config: PersistenceConfig,
    ) -> Self {
        let runtime = app.runtime();
        let inner = Rc::new(PersistentInner {
            id: runtime.make_id(),
            app: app.clone(),
            backend,
            config,
            links: RefCell::new(BTreeMap::new()),
            deleted: Cell::new(false),
        });
        let erased: Rc<dyn Subscriber> = inner.clone();
        if let Err(err) = runtime.register(&erased) {
            error!(error = %err, "persistent storage registration failed");
        }
        Self { inner }
    }

    pub fn id(&self) -> SubscriberId {
        self.inner.id
    }

    pub fn config(&self) -> PersistenceConfig {
        self.inner.config
    }

    pub fn backend(&self) -> &Rc<dyn DurableBackend> {
        &self.inner.backend
    }

    /// Start mirroring `key`.
    ///
    /// An existing process-wide entry keeps its value. Otherwise the entry is
    /// created from the stored record, or from `default` when there is none.
    /// Returns `false` if the entry cannot be created (a `Null` default with
    /// no record) or the scope has been torn down.
    pub fn persist(&self, key: &str, default: impl Into<Value>) -> bool {
        let inner = &self.inner;
        if inner.deleted.get() {
            warn!(key, "persist on a deleted durable scope");
            return false;
        }
        if inner.links.borrow().contains_key(key) {
            debug!(key, "key already persisted");
            return true;
        }
        if !inner.app.has(key) {
            let initial = inner
                .backend
                .get(key)
                .map(|json| codec::from_json(&json))
                .filter(|value| !value.is_null())
                .unwrap_or_else(|| default.into());
            if !inner.app.set_or_create(key, initial) {
                return false;
            }
        }
        let link = match inner.app.link(key, Some(inner.id), Some(key)) {
            Ok(link) => link,
            Err(err) => {
                error!(key, error = %err, "cannot mirror entry");
                return false;
            }
        };
        inner.links.borrow_mut().insert(key.to_string(), link);
        debug!(key, "key persisted");
        if inner.config.write_through {
            inner.save(key);
        }
        true
    }

    /// Persist several keys. Returns how many are now mirrored.
    pub fn persist_many<K, V>(&self, entries: impl IntoIterator<Item = (K, V)>) -> usize
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        entries
            .into_iter()
            .map(|(key, default)| self.persist(key.as_ref(), default))
            .filter(|persisted| *persisted)
            .count()
    }

    /// Stop mirroring `key`. The process-wide entry stays.
    pub fn unpersist(&self, key: &str) -> bool {
        let inner = &self.inner;
        let Some(link) = inner.links.borrow_mut().remove(key) else {
            return false;
        };
        link.about_to_be_deleted();
        if inner.config.delete_on_unpersist {
            if let Err(err) = inner.backend.delete(key) {
                error!(key, error = %err, "durable delete failed");
            }
        }
        debug!(key, "key unpersisted");
        true
    }

    /// Write the current value of `key` regardless of the write policy.
    pub fn force_save(&self, key: &str) -> bool {
        self.inner.save(key)
    }

    /// Write every persisted key. Returns how many writes succeeded.
    pub fn flush_all(&self) -> usize {
        self.keys()
            .iter()
            .filter(|key| self.inner.save(key))
            .count()
    }

    pub fn is_persisted(&self, key: &str) -> bool {
        self.inner.links.borrow().contains_key(key)
    }

    /// Persisted keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.inner.links.borrow().keys().cloned().collect()
    }

    /// Drop every mirror link and unregister. The durable records stay.
    pub fn about_to_be_deleted(&self) {
        let inner = &self.inner;
        if inner.deleted.replace(true) {
            return;
        }
        let links = std::mem::take(&mut *inner.links.borrow_mut());
        for link in links.values() {
            link.about_to_be_deleted();
        }
        inner.app.runtime().unregister(inner.id);
        debug!(keys = links.len(), "durable scope deleted");
    }

    pub fn is_deleted(&self) -> bool {
        self.inner.deleted.get()
    }
}

impl fmt::Debug for PersistentStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentStorage")
            .field("id", &self.inner.id)
            .field("keys", &self.keys())
            .field("config", &self.inner.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use serde_json::json;
    use statewire_core::{RawObject, Runtime};

    fn setup(
        backend: &Rc<MemoryBackend>,
        config: PersistenceConfig,
    ) -> (AppStorage, PersistentStorage) {
        let app = AppStorage::new(&Runtime::new());
        let persistent = PersistentStorage::new(&app, backend.clone(), config);
        (app, persistent)
    }

    #[test]
    fn persist_seeds_from_backend() {
        let backend = Rc::new(MemoryBackend::with_entries([("theme", json!("dark"))]));
        let (app, persistent) = setup(&backend, PersistenceConfig::default());
        assert!(persistent.persist("theme", "light"));
        assert_eq!(app.get("theme"), Some(Value::from("dark")));
    }

    #[test]
    fn persist_uses_default_without_record() {
        let backend = Rc::new(MemoryBackend::new());
        let (app, persistent) = setup(&backend, PersistenceConfig::default());
        assert!(persistent.persist("size", 12));
        assert_eq!(app.get("size"), Some(Value::Int(12)));
        assert_eq!(backend.get("size"), Some(json!(12)));
    }

    #[test]
    fn existing_entry_wins_over_record() {
        let backend = Rc::new(MemoryBackend::with_entries([("k", json!(1))]));
        let (app, persistent) = setup(&backend, PersistenceConfig::default());
        app.set_or_create("k", 5);
        assert!(persistent.persist("k", 0));
        assert_eq!(app.get("k"), Some(Value::Int(5)));
        assert_eq!(backend.get("k"), Some(json!(5)));
    }

    #[test]
    fn changes_are_written_through() {
        let backend = Rc::new(MemoryBackend::new());
        let (app, persistent) = setup(&backend, PersistenceConfig::default());
        persistent.persist("count", 0);
        app.set("count", 3);
        assert_eq!(backend.get("count"), Some(json!(3)));
        let link = app.link("count", None, None).unwrap();
        link.set(Value::Int(4));
        assert_eq!(backend.get("count"), Some(json!(4)));
    }

    #[test]
    fn nested_writes_are_written_through() {
        let backend = Rc::new(MemoryBackend::new());
        let (app, persistent) = setup(&backend, PersistenceConfig::default());
        persistent.persist("prefs", RawObject::map().with_field("volume", 1));
        let prop = app.property("prefs").unwrap();
        prop.write_field("volume", 9).unwrap();
        assert_eq!(backend.get("prefs"), Some(json!({ "volume": 9 })));
    }

    #[test]
    fn write_through_off_needs_force_save() {
        let backend = Rc::new(MemoryBackend::new());
        let config = PersistenceConfig::default().with_write_through(false);
        let (app, persistent) = setup(&backend, config);
        persistent.persist("k", 1);
        assert_eq!(backend.get("k"), None);
        app.set("k", 2);
        assert_eq!(backend.get("k"), None);
        assert!(persistent.force_save("k"));
        assert_eq!(backend.get("k"), Some(json!(2)));
        app.set("k", 3);
        assert_eq!(persistent.flush_all(), 1);
        assert_eq!(backend.get("k"), Some(json!(3)));
    }

    #[test]
    fn unpersist_removes_record_and_stops_mirroring() {
        let backend = Rc::new(MemoryBackend::new());
        let (app, persistent) = setup(&backend, PersistenceConfig::default());
        persistent.persist("k", 1);
        assert!(persistent.unpersist("k"));
        assert!(!persistent.unpersist("k"));
        assert_eq!(backend.get("k"), None);
        app.set("k", 2);
        assert_eq!(backend.get("k"), None);
        assert_eq!(app.number_of_subscribers_to("k"), Some(0));
        assert!(app.delete("k"));
    }

    #[test]
    fn unpersist_can_keep_record() {
        let backend = Rc::new(MemoryBackend::new());
        let config = PersistenceConfig::default().with_delete_on_unpersist(false);
        let (_app, persistent) = setup(&backend, config);
        persistent.persist("k", 1);
        persistent.unpersist("k");
        assert_eq!(backend.get("k"), Some(json!(1)));
    }

    #[test]
    fn persist_many_and_teardown() {
        let backend = Rc::new(MemoryBackend::new());
        let (app, persistent) = setup(&backend, PersistenceConfig::default());
        assert_eq!(persistent.persist_many([("a", 1), ("b", 2)]), 2);
        assert_eq!(persistent.keys(), vec!["a".to_string(), "b".to_string()]);
        persistent.about_to_be_deleted();
        assert!(persistent.is_deleted());
        assert!(!app.runtime().is_registered(persistent.id()));
        assert!(app.clear());
        assert!(!persistent.persist("c", 3));
    }
}
