#![forbid(unsafe_code)]

//! Reactive state propagation core for statewire.
//!
//! # Architecture
//!
//! - [`Runtime`]: composition root holding the subscriber registry and the
//!   object arena. Clone it freely; clones share state.
//! - [`SubscriberRegistry`]: issues monotonic [`SubscriberId`]s and maps them
//!   to weakly held [`Subscriber`]s.
//! - [`ObservedProperty`]: a value that notifies subscribers on change, with
//!   two-way ([`create_link`](ObservedProperty::create_link)) and one-way
//!   ([`create_prop`](ObservedProperty::create_prop)) derivations.
//! - Object observation: structured [`Value`]s are wrapped into the arena;
//!   field writes notify every owning property.
//! - Helper subscribers: [`FnSubscriber`], [`RecordingSubscriber`],
//!   [`DependencyTracker`].
//!
//! # Invariants
//!
//! 1. A `set` with a value equal to the current one notifies no one.
//! 2. A change is delivered at most once to each subscriber of a property,
//!    in subscription order.
//! 3. A write through a two-way link is never echoed back to the link.
//! 4. A one-way derived property never writes to its source.
//! 5. An object is destroyed exactly when its last owner is removed.
//!
//! # Example
//!
//! ```
//! use statewire_core::{ObservedProperty, RecordingSubscriber, Runtime};
//!
//! let rt = Runtime::new();
//! let source = ObservedProperty::new(&rt, 1_i64);
//! let watcher = RecordingSubscriber::<i64>::register(&rt);
//! let link = source.create_link(Some(watcher.id()), Some("count")).unwrap();
//!
//! source.set(2);
//! link.set(3);
//! assert_eq!(source.get(), 3);
//! assert_eq!(watcher.values(), vec![2, 3]);
//! ```

pub mod callback;
pub mod config;
pub mod object;
pub mod property;
pub mod recorder;
pub mod registry;
pub mod runtime;
pub mod subscriber;
pub mod tracker;
pub mod value;

pub use callback::{FnSubscriber, FnSubscriberBuilder};
pub use config::{OwnerRemovalPolicy, ReadAttribution, RuntimeConfig};
pub use object::{ObjectError, ObjectHandle, OwningSet};
pub use property::{ObservedProperty, PropertyKind, SyncMode};
pub use recorder::{Notification, RecordingSubscriber};
pub use registry::{RegistryError, SubscriberRegistry};
pub use runtime::Runtime;
pub use subscriber::{Capabilities, Change, ChangeSource, Subscriber, SubscriberId};
pub use tracker::DependencyTracker;
pub use value::{FieldKey, RawObject, StateValue, Value};
