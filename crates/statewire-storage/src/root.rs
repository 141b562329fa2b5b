#![forbid(unsafe_code)]

//! Composition root wiring every scope to one runtime.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, warn};

use statewire_core::{Runtime, RuntimeConfig};

use crate::backend::DurableBackend;
use crate::environment::{Environment, EnvironmentBackend};
use crate::instances::InstanceRegistry;
use crate::persistent::{PersistenceConfig, PersistentStorage};
use crate::storage::AppStorage;

/// Owns the runtime, the process-wide scope, the named-instance registry,
/// and the optional durable and environment scopes.
///
/// Construct one per process (or per test); nothing here is global.
#[derive(Debug)]
pub struct StateRoot {
    runtime: Runtime,
    app: AppStorage,
    instances: InstanceRegistry,
    persistent: RefCell<Option<PersistentStorage>>,
    environment: RefCell<Option<Environment>>,
}

impl Default for StateRoot {
    fn default() -> Self {
        Self::new()
    }
}

impl StateRoot {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let runtime = Runtime::with_config(config);
        Self {
            app: AppStorage::new(&runtime),
            instances: InstanceRegistry::new(&runtime),
            runtime,
            persistent: RefCell::new(None),
            environment: RefCell::new(None),
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// The process-wide scope.
    pub fn app(&self) -> &AppStorage {
        &self.app
    }

    pub fn instances(&self) -> &InstanceRegistry {
        &self.instances
    }

    /// Attach a durable backend. Replaces (and tears down) a previously
    /// configured durable scope.
    pub fn configure_backend(
        &self,
        backend: Rc<dyn DurableBackend>,
        config: PersistenceConfig,
    ) -> PersistentStorage {
        let persistent = PersistentStorage::new(&self.app, backend, config);
        if let Some(previous) = self.persistent.replace(Some(persistent.clone())) {
            warn!("durable backend reconfigured, previous mirrors dropped");
            previous.about_to_be_deleted();
        }
        persistent
    }

    /// The durable scope, if a backend was configured.
    pub fn persistent(&self) -> Option<PersistentStorage> {
        self.persistent.borrow().clone()
    }

    /// Attach an environment backend, replacing any previous one.
    pub fn configure_environment(&self, backend: Rc<dyn EnvironmentBackend>) -> Environment {
        let environment = Environment::new(&self.app, backend);
        if let Some(previous) = self.environment.replace(Some(environment.clone())) {
            previous.about_to_be_deleted();
        }
        environment
    }

    pub fn environment(&self) -> Option<Environment> {
        self.environment.borrow().clone()
    }

    /// Tear down the durable and environment scopes, then clear the
    /// process-wide scope. Returns whether the process-wide scope could be
    /// cleared.
    pub fn shutdown(&self) -> bool {
        if let Some(persistent) = self.persistent.take() {
            persistent.about_to_be_deleted();
        }
        if let Some(environment) = self.environment.take() {
            environment.about_to_be_deleted();
        }
        let cleared = self.app.about_to_be_deleted();
        debug!(
            cleared,
            instances = self.instances.len(),
            subscribers = self.runtime.subscriber_count(),
            "state root shut down"
        );
        cleared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::environment::StaticEnvironment;
    use serde_json::json;
    use statewire_core::Value;

    #[test]
    fn scopes_share_one_runtime() {
        let root = StateRoot::new();
        assert!(root.app().runtime().same_runtime(root.runtime()));
        let scope = root.instances().get_or_create("p", [("x", 1)]);
        assert!(scope.runtime().same_runtime(root.runtime()));
        assert!(root.persistent().is_none());
        assert!(root.environment().is_none());
    }

    #[test]
    fn reconfiguring_backend_drops_old_mirrors() {
        let root = StateRoot::new();
        let first = Rc::new(MemoryBackend::new());
        let old = root.configure_backend(first.clone(), PersistenceConfig::default());
        old.persist("k", 1);
        let second = Rc::new(MemoryBackend::new());
        let new = root.configure_backend(second.clone(), PersistenceConfig::default());
        assert!(old.is_deleted());
        assert!(new.persist("k", 0));
        root.app().set("k", 2);
        assert_eq!(first.get("k"), Some(json!(1)));
        assert_eq!(second.get("k"), Some(json!(2)));
    }

    #[test]
    fn shutdown_releases_everything() {
        let root = StateRoot::new();
        let persistent = root.configure_backend(
            Rc::new(MemoryBackend::new()),
            PersistenceConfig::default(),
        );
        persistent.persist("saved", "yes");
        let env = root.configure_environment(Rc::new(StaticEnvironment::new()));
        env.env_prop("mode", "light");
        assert_eq!(root.app().size(), 2);
        assert!(root.shutdown());
        assert!(root.app().is_empty());
        assert_eq!(root.app().get("mode"), None::<Value>);
    }
}
