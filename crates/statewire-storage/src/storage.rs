#![forbid(unsafe_code)]

//! Keyed storage scopes.
//!
//! A [`Storage`] maps string keys to owning properties of dynamic
//! [`Value`]s. Consumers do not hold entries directly: they derive two-way
//! links ([`Storage::link`]) or one-way props ([`Storage::prop`]) from them,
//! or subscribe to an entry by id. The same type backs the process-wide scope
//! ([`AppStorage`]) and every named instance scope.
//!
//! # Invariants
//!
//! 1. An entry never holds `Null`; `set` and `set_or_create` refuse it.
//! 2. An entry with subscribers (links, props, or direct subscriptions) is
//!    never deleted; `delete` and `clear` report the refusal instead.
//! 3. `clear` removes either every entry or none.
//!
//! # Failure Modes
//!
//! | Condition                 | Behavior                                       |
//! |---------------------------|------------------------------------------------|
//! | `set` of a missing key    | `false`, nothing created                       |
//! | `link` of a missing key   | `Err(StorageError::MissingKey)`                |
//! | `prop` of a missing key   | unbound prop seeded with the caller's default  |
//! | `delete` of a watched key | `false`, `warn!` naming the key                |

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use tracing::{debug, warn};

use statewire_core::{ObservedProperty, Runtime, SubscriberId, Value};

/// Errors reported by storage scopes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// No entry exists under the key.
    MissingKey(String),
    /// `Null` cannot be stored.
    UndefinedValue(String),
    /// The entry refused derivation (it is being torn down).
    Detached(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingKey(key) => write!(f, "no storage entry for key '{key}'"),
            Self::UndefinedValue(key) => write!(f, "cannot store an undefined value for '{key}'"),
            Self::Detached(key) => write!(f, "storage entry '{key}' cannot be derived from"),
        }
    }
}

impl std::error::Error for StorageError {}

struct StorageInner {
    runtime: Runtime,
    label: String,
    entries: RefCell<BTreeMap<String, ObservedProperty<Value>>>,
}

/// A keyed collection of observed entries. Clones share the same scope.
#[derive(Clone)]
pub struct Storage {
    inner: Rc<StorageInner>,
}

impl Storage {
    /// Create an empty scope. `label` names it in logs.
    pub fn new(runtime: &Runtime, label: impl Into<String>) -> Self {
        Self {
            inner: Rc::new(StorageInner {
                runtime: runtime.clone(),
                label: label.into(),
                entries: RefCell::new(BTreeMap::new()),
            }),
        }
    }

    /// Create a scope seeded with `entries`. `Null` values are skipped.
    pub fn with_entries<K, V>(
        runtime: &Runtime,
        label: impl Into<String>,
        entries: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let storage = Self::new(runtime, label);
        for (key, value) in entries {
            storage.set_or_create(key.into(), value.into());
        }
        storage
    }

    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Whether both handles refer to the same scope.
    pub fn same_as(&self, other: &Storage) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn entry(&self, key: &str) -> Option<ObservedProperty<Value>> {
        self.inner.entries.borrow().get(key).cloned()
    }

    /// The owning property behind `key`.
    pub fn property(&self, key: &str) -> Option<ObservedProperty<Value>> {
        self.entry(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.inner.entries.borrow().contains_key(key)
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.inner.entries.borrow().keys().cloned().collect()
    }

    pub fn size(&self) -> usize {
        self.inner.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.borrow().is_empty()
    }

    /// Current value of `key`, reported as a tracked read.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entry(key).map(|prop| prop.get())
    }

    /// Update an existing entry. Returns `false` if the key is missing or the
    /// value is `Null`.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> bool {
        let value = value.into();
        if value.is_null() {
            warn!(scope = self.label(), key, "refusing to store an undefined value");
            return false;
        }
        let Some(prop) = self.entry(key) else {
            warn!(scope = self.label(), key, "set of missing key ignored");
            return false;
        };
        prop.set(value);
        true
    }

    /// Update `key`, creating it if missing. Returns `false` only for `Null`.
    pub fn set_or_create(&self, key: impl Into<String>, value: impl Into<Value>) -> bool {
        let key = key.into();
        let value = value.into();
        if value.is_null() {
            warn!(scope = self.label(), key = %key, "refusing to store an undefined value");
            return false;
        }
        if let Some(prop) = self.entry(&key) {
            prop.set(value);
            return true;
        }
        let prop = ObservedProperty::with_owner(self.runtime(), value, None, Some(&key));
        debug!(scope = self.label(), key = %key, property = %prop.id(), "entry created");
        self.inner.entries.borrow_mut().insert(key, prop);
        true
    }

    /// Derive a two-way link to `key`. Writes to the link update the entry.
    ///
    /// `name` becomes the link's info; it defaults to the key.
    pub fn link(
        &self,
        key: &str,
        owner: Option<SubscriberId>,
        name: Option<&str>,
    ) -> Result<ObservedProperty<Value>, StorageError> {
        let prop = self
            .entry(key)
            .ok_or_else(|| StorageError::MissingKey(key.to_string()))?;
        prop.create_link(owner, Some(name.unwrap_or(key)))
            .ok_or_else(|| StorageError::Detached(key.to_string()))
    }

    /// Create `key` with `default` if missing, then link to it.
    pub fn set_and_link(
        &self,
        key: &str,
        default: impl Into<Value>,
        owner: Option<SubscriberId>,
        name: Option<&str>,
    ) -> Result<ObservedProperty<Value>, StorageError> {
        if !self.has(key) && !self.set_or_create(key, default) {
            return Err(StorageError::UndefinedValue(key.to_string()));
        }
        self.link(key, owner, name)
    }

    /// Derive a one-way prop of `key`.
    ///
    /// A missing key yields a prop seeded with `default` that follows
    /// nothing; it never fails.
    pub fn prop(
        &self,
        key: &str,
        default: impl Into<Value>,
        owner: Option<SubscriberId>,
        name: Option<&str>,
    ) -> ObservedProperty<Value> {
        let info = Some(name.unwrap_or(key));
        match self.entry(key).and_then(|prop| prop.create_prop(owner, info)) {
            Some(prop) => prop,
            None => {
                debug!(scope = self.label(), key, "prop of missing key, using default");
                ObservedProperty::unbound_prop(self.runtime(), default.into(), owner, info)
            }
        }
    }

    /// Create `key` with `default` if missing, then derive a one-way prop.
    ///
    /// Only plain defaults create entries: a missing key with a structured
    /// or `Null` default returns `None`.
    pub fn set_and_prop(
        &self,
        key: &str,
        default: impl Into<Value>,
        owner: Option<SubscriberId>,
        name: Option<&str>,
    ) -> Option<ObservedProperty<Value>> {
        let default = default.into();
        if !self.has(key) {
            if default.is_structured() {
                warn!(scope = self.label(), key, "set_and_prop only creates plain values");
                return None;
            }
            if !self.set_or_create(key, default.clone()) {
                return None;
            }
        }
        Some(self.prop(key, default, owner, name))
    }

    /// Delete `key` unless something still watches it.
    pub fn delete(&self, key: &str) -> bool {
        let Some(prop) = self.entry(key) else {
            return false;
        };
        if prop.subscriber_count() > 0 {
            warn!(
                scope = self.label(),
                key,
                subscribers = prop.subscriber_count(),
                "refusing to delete an entry that has subscribers"
            );
            return false;
        }
        self.inner.entries.borrow_mut().remove(key);
        prop.about_to_be_deleted();
        debug!(scope = self.label(), key, "entry deleted");
        true
    }

    /// Keys whose entries still have subscribers.
    pub fn blocking_keys(&self) -> Vec<String> {
        self.inner
            .entries
            .borrow()
            .iter()
            .filter(|(_, prop)| prop.subscriber_count() > 0)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Delete every entry, or nothing if any entry has subscribers.
    pub fn clear(&self) -> bool {
        let blocking = self.blocking_keys();
        if !blocking.is_empty() {
            warn!(
                scope = self.label(),
                blocking = ?blocking,
                "refusing to clear a scope with watched entries"
            );
            return false;
        }
        let entries = std::mem::take(&mut *self.inner.entries.borrow_mut());
        for prop in entries.values() {
            prop.about_to_be_deleted();
        }
        debug!(scope = self.label(), removed = entries.len(), "scope cleared");
        true
    }

    /// Release the scope. Same as [`clear`](Self::clear).
    pub fn about_to_be_deleted(&self) -> bool {
        self.clear()
    }

    /// Subscribe a registered subscriber directly to `key`.
    pub fn subscribe_to_changes_of(&self, key: &str, id: SubscriberId) -> bool {
        self.entry(key).is_some_and(|prop| prop.subscribe(id))
    }

    /// Undo [`subscribe_to_changes_of`](Self::subscribe_to_changes_of).
    pub fn unsubscribe_from_changes_of(&self, key: &str, id: SubscriberId) -> bool {
        self.entry(key).is_some_and(|prop| prop.unlink(id))
    }

    /// Number of subscribers of `key`; `None` if it does not exist.
    pub fn number_of_subscribers_to(&self, key: &str) -> Option<usize> {
        self.entry(key).map(|prop| prop.subscriber_count())
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("label", &self.inner.label)
            .field("keys", &self.keys())
            .finish()
    }
}

/// The process-wide scope. One exists per [`StateRoot`](crate::StateRoot).
#[derive(Clone, Debug)]
pub struct AppStorage {
    storage: Storage,
}

impl AppStorage {
    pub(crate) fn new(runtime: &Runtime) -> Self {
        Self {
            storage: Storage::new(runtime, "app"),
        }
    }

    /// The underlying scope.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }
}

impl Deref for AppStorage {
    type Target = Storage;

    fn deref(&self) -> &Storage {
        &self.storage
    }
}
