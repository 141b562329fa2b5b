#![forbid(unsafe_code)]

//! Environment scope: host-provided values mirrored into the process-wide
//! scope.
//!
//! The host (window size, color mode, locale, ...) is abstracted as an
//! [`EnvironmentBackend`]. [`Environment::env_prop`] seeds a process-wide
//! entry from it and keeps a one-way prop of that entry; the host pushes
//! later changes with [`Environment::on_value_changed`].

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, warn};

use statewire_core::{ObservedProperty, Value};

use crate::storage::AppStorage;

/// Source of environment values.
pub trait EnvironmentBackend {
    /// Current host value for `key`, if the host knows it.
    fn value(&self, key: &str) -> Option<Value>;
}

/// Fixed set of environment values.
#[derive(Debug, Clone, Default)]
pub struct StaticEnvironment {
    values: BTreeMap<String, Value>,
}

impl StaticEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl EnvironmentBackend for StaticEnvironment {
    fn value(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }
}

struct EnvironmentInner {
    app: AppStorage,
    backend: Rc<dyn EnvironmentBackend>,
    props: RefCell<BTreeMap<String, ObservedProperty<Value>>>,
    deleted: Cell<bool>,
}

/// Environment values exposed through the process-wide scope.
#[derive(Clone)]
pub struct Environment {
    inner: Rc<EnvironmentInner>,
}

impl Environment {
    pub fn new(app: &AppStorage, backend: Rc<dyn EnvironmentBackend>) -> Self {
        Self {
            inner: Rc::new(EnvironmentInner {
                app: app.clone(),
                backend,
                props: RefCell::new(BTreeMap::new()),
                deleted: Cell::new(false),
            }),
        }
    }

    /// Create the process-wide entry `key` from the host value, or from
    /// `default` when the host has none.
    ///
    /// Returns `false` if the entry already exists or cannot be created.
    pub fn env_prop(&self, key: &str, default: impl Into<Value>) -> bool {
        let inner = &self.inner;
        if inner.deleted.get() {
            return false;
        }
        if inner.app.has(key) {
            warn!(key, "environment key already exists in app storage");
            return false;
        }
        let value = inner
            .backend
            .value(key)
            .filter(|value| !value.is_null())
            .unwrap_or_else(|| default.into());
        let Some(prop) = inner.app.set_and_prop(key, value, None, Some(key)) else {
            return false;
        };
        inner.props.borrow_mut().insert(key.to_string(), prop);
        debug!(key, "environment property created");
        true
    }

    /// Create several entries. Returns how many were created.
    pub fn env_props<K, V>(&self, entries: impl IntoIterator<Item = (K, V)>) -> usize
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        entries
            .into_iter()
            .map(|(key, default)| self.env_prop(key.as_ref(), default))
            .filter(|created| *created)
            .count()
    }

    /// Keys created through this scope, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.inner.props.borrow().keys().cloned().collect()
    }

    /// Current environment value of `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        let prop = self.inner.props.borrow().get(key).cloned()?;
        Some(prop.get())
    }

    /// Push a host change of `key` into the process-wide scope.
    pub fn on_value_changed(&self, key: &str, value: impl Into<Value>) -> bool {
        if !self.inner.props.borrow().contains_key(key) {
            warn!(key, "change of an unknown environment key");
            return false;
        }
        self.inner.app.set(key, value)
    }

    /// Release every environment prop and delete the entries it created.
    pub fn about_to_be_deleted(&self) {
        let inner = &self.inner;
        if inner.deleted.replace(true) {
            return;
        }
        let props = std::mem::take(&mut *inner.props.borrow_mut());
        for (key, prop) in &props {
            prop.about_to_be_deleted();
            if !inner.app.delete(key) {
                debug!(key, "environment entry kept, still in use");
            }
        }
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use statewire_core::Runtime;

    fn setup() -> (AppStorage, Environment) {
        let app = AppStorage::new(&Runtime::new());
        let host = StaticEnvironment::new().with("colorMode", "dark");
        let env = Environment::new(&app, Rc::new(host));
        (app, env)
    }

    #[test]
    fn env_prop_prefers_host_value() {
        let (app, env) = setup();
        assert!(env.env_prop("colorMode", "light"));
        assert!(env.env_prop("fontScale", 1.0));
        assert_eq!(app.get("colorMode"), Some(Value::from("dark")));
        assert_eq!(env.get("fontScale"), Some(Value::Float(1.0)));
        assert_eq!(env.keys(), vec!["colorMode".to_string(), "fontScale".to_string()]);
    }

    #[test]
    fn env_prop_refuses_existing_key() {
        let (app, env) = setup();
        app.set_or_create("colorMode", "custom");
        assert!(!env.env_prop("colorMode", "light"));
        assert_eq!(app.get("colorMode"), Some(Value::from("custom")));
    }

    #[test]
    fn host_changes_reach_the_prop() {
        let (_app, env) = setup();
        env.env_prop("colorMode", "light");
        assert!(env.on_value_changed("colorMode", "light"));
        assert_eq!(env.get("colorMode"), Some(Value::from("light")));
        assert!(!env.on_value_changed("unknown", 1));
    }

    #[test]
    fn teardown_deletes_entries() {
        let (app, env) = setup();
        assert_eq!(env.env_props([("a", 1), ("b", 2)]), 2);
        env.about_to_be_deleted();
        assert!(app.is_empty());
        assert!(!env.env_prop("c", 3));
    }
}
