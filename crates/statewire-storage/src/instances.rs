#![forbid(unsafe_code)]

//! Named-instance scopes.
//!
//! Each instance is an independent [`Storage`] identified by a path string.
//! `get_or_create` is idempotent: a second call with the same path returns
//! the existing scope and ignores the initial content.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::{debug, warn};

use statewire_core::{Runtime, Value};

use crate::storage::Storage;

/// Registry of named-instance scopes. Clones share the same registry.
#[derive(Clone, Debug)]
pub struct InstanceRegistry {
    runtime: Runtime,
    instances: Rc<RefCell<BTreeMap<String, Storage>>>,
}

impl InstanceRegistry {
    pub fn new(runtime: &Runtime) -> Self {
        Self {
            runtime: runtime.clone(),
            instances: Rc::new(RefCell::new(BTreeMap::new())),
        }
    }

    /// The scope at `path`, created with `initial` if it does not exist.
    pub fn get_or_create<K, V>(
        &self,
        path: &str,
        initial: impl IntoIterator<Item = (K, V)>,
    ) -> Storage
    where
        K: Into<String>,
        V: Into<Value>,
    {
        if let Some(existing) = self.get(path) {
            return existing;
        }
        let storage = Storage::with_entries(&self.runtime, path, initial);
        debug!(path, keys = storage.size(), "instance scope created");
        self.instances
            .borrow_mut()
            .insert(path.to_string(), storage.clone());
        storage
    }

    /// Register an externally built scope under `path`. Returns `false` if
    /// the path is taken.
    pub fn add(&self, path: &str, storage: Storage) -> bool {
        let mut instances = self.instances.borrow_mut();
        if instances.contains_key(path) {
            warn!(path, "instance path already in use");
            return false;
        }
        instances.insert(path.to_string(), storage);
        true
    }

    pub fn has(&self, path: &str) -> bool {
        self.instances.borrow().contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<Storage> {
        self.instances.borrow().get(path).cloned()
    }

    /// Delete the scope at `path`. Refused while any of its entries has
    /// subscribers.
    pub fn delete(&self, path: &str) -> bool {
        let Some(storage) = self.get(path) else {
            return false;
        };
        if !storage.clear() {
            warn!(
                path,
                blocking = ?storage.blocking_keys(),
                "instance scope still in use"
            );
            return false;
        }
        self.instances.borrow_mut().remove(path);
        debug!(path, "instance scope deleted");
        true
    }

    /// Registered paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.instances.borrow().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.instances.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.borrow().is_empty()
    }
}
