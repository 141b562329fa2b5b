#![forbid(unsafe_code)]

//! Reactive state propagation for Rust applications.
//!
//! This crate re-exports:
//! - [`core`]: the runtime, observed properties, object observation, and
//!   helper subscribers
//! - [`storage`]: the process-wide, named-instance, durable, and environment
//!   scopes
//!
//! Most programs only need the [`prelude`].
//!
//! ```
//! use statewire::prelude::*;
//!
//! let root = StateRoot::new();
//! root.app().set_or_create("title", "untitled");
//! let title = root.app().link("title", None, Some("title")).unwrap();
//! title.set(Value::from("draft"));
//! assert_eq!(root.app().get("title"), Some(Value::from("draft")));
//! ```

/// Runtime, properties, and object observation.
pub use statewire_core as core;
/// Storage scopes and durable backends.
pub use statewire_storage as storage;

/// Commonly used types.
pub mod prelude {
    pub use statewire_core::{
        Capabilities, Change, ChangeSource, DependencyTracker, FnSubscriber, ObservedProperty,
        RawObject, RecordingSubscriber, Runtime, RuntimeConfig, StateValue, Subscriber,
        SubscriberId, Value,
    };
    #[cfg(feature = "json-file")]
    pub use statewire_storage::JsonFileBackend;
    pub use statewire_storage::{
        AppStorage, DurableBackend, Environment, MemoryBackend, PersistenceConfig,
        PersistentStorage, StateRoot, StaticEnvironment, Storage, StorageError,
    };
}
