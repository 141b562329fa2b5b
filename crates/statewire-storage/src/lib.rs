#![forbid(unsafe_code)]

//! Storage scopes for statewire.
//!
//! # Scopes
//!
//! - [`AppStorage`]: the process-wide scope, one per [`StateRoot`].
//! - [`InstanceRegistry`]: independent [`Storage`] instances addressed by
//!   path.
//! - [`PersistentStorage`]: mirrors selected process-wide keys into a
//!   [`DurableBackend`].
//! - [`Environment`]: seeds process-wide keys from host values.
//!
//! Entries are owning properties of [`statewire_core::Value`]. Consumers
//! derive two-way links or one-way props from them rather than holding the
//! entries.
//!
//! # Example
//!
//! ```
//! use statewire_storage::StateRoot;
//! use statewire_core::{RecordingSubscriber, Value};
//!
//! let root = StateRoot::new();
//! let page = root.instances().get_or_create("p1", [("count", 0)]);
//! let watcher = RecordingSubscriber::<Value>::register(root.runtime());
//! page.subscribe_to_changes_of("count", watcher.id());
//!
//! page.set("count", 5);
//! assert_eq!(watcher.values(), vec![Value::Int(5)]);
//! assert!(!page.delete("count"));
//! page.unsubscribe_from_changes_of("count", watcher.id());
//! assert!(page.delete("count"));
//! ```

pub mod backend;
pub mod codec;
pub mod environment;
pub mod instances;
pub mod persistent;
pub mod root;
pub mod storage;

#[cfg(feature = "json-file")]
pub use backend::JsonFileBackend;
pub use backend::{BackendError, DurableBackend, MemoryBackend};
pub use codec::{from_json, to_json};
pub use environment::{Environment, EnvironmentBackend, StaticEnvironment};
pub use instances::InstanceRegistry;
pub use persistent::{PersistenceConfig, PersistentStorage};
pub use root::StateRoot;
pub use storage::{AppStorage, Storage, StorageError};
