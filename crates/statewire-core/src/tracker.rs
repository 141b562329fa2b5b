#![forbid(unsafe_code)]

//! Read tracking: learn which properties a computation depends on.
//!
//! A [`DependencyTracker`] is subscribed to the properties a computation may
//! read. Between [`begin_pass`](DependencyTracker::begin_pass) and
//! [`end_pass`](DependencyTracker::end_pass) it records the names reported by
//! tracked reads. A later change of any recorded name marks the tracker as
//! needing an update; changes of names that were not read are ignored.
//!
//! Watch callbacks fire for changes of a given name regardless of reads.

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use tracing::{error, trace};

use crate::runtime::Runtime;
use crate::subscriber::{Capabilities, Change, Subscriber, SubscriberId};

type WatchCallback = Rc<dyn Fn(&str)>;

/// Records tracked reads and flags when a dependency changes.
pub struct DependencyTracker {
    id: SubscriberId,
    tracking: Cell<bool>,
    dependencies: RefCell<BTreeSet<String>>,
    needs_update: Cell<bool>,
    watchers: RefCell<Vec<(String, WatchCallback)>>,
}

impl DependencyTracker {
    /// Create and register a tracker.
    pub fn register(runtime: &Runtime) -> Rc<Self> {
        let tracker = Rc::new(Self {
            id: runtime.make_id(),
            tracking: Cell::new(false),
            dependencies: RefCell::new(BTreeSet::new()),
            needs_update: Cell::new(false),
            watchers: RefCell::new(Vec::new()),
        });
        let erased: Rc<dyn Subscriber> = tracker.clone();
        if let Err(err) = runtime.register(&erased) {
            error!(error = %err, "dependency tracker registration failed");
        }
        tracker
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Start a fresh pass: forget previous dependencies and record reads.
    pub fn begin_pass(&self) {
        self.dependencies.borrow_mut().clear();
        self.needs_update.set(false);
        self.tracking.set(true);
    }

    /// Stop recording reads. Recorded dependencies are kept.
    pub fn end_pass(&self) {
        self.tracking.set(false);
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking.get()
    }

    /// Names read during the last pass, sorted.
    pub fn dependencies(&self) -> Vec<String> {
        self.dependencies.borrow().iter().cloned().collect()
    }

    /// Whether a recorded dependency changed since the last pass began.
    pub fn needs_update(&self) -> bool {
        self.needs_update.get()
    }

    /// Clear the update flag and return its previous value.
    pub fn take_update(&self) -> bool {
        self.needs_update.replace(false)
    }

    /// Call `callback` whenever a change named `name` arrives.
    pub fn watch(&self, name: impl Into<String>, callback: impl Fn(&str) + 'static) {
        self.watchers
            .borrow_mut()
            .push((name.into(), Rc::new(callback)));
    }
}

impl Subscriber for DependencyTracker {
    fn subscriber_id(&self) -> SubscriberId {
        self.id
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::PROPERTY_CHANGED | Capabilities::PROPERTY_READ
    }

    fn property_changed(&self, change: &Change<'_>) {
        let Some(name) = change.name() else {
            return;
        };
        if self.dependencies.borrow().contains(name) {
            trace!(tracker = %self.id, name, "dependency changed");
            self.needs_update.set(true);
        }
        let matching: Vec<WatchCallback> = self
            .watchers
            .borrow()
            .iter()
            .filter(|(watched, _)| watched == name)
            .map(|(_, cb)| Rc::clone(cb))
            .collect();
        for callback in matching {
            callback(name);
        }
    }

    fn property_read(&self, name: Option<&str>) {
        if !self.tracking.get() {
            return;
        }
        if let Some(name) = name {
            self.dependencies.borrow_mut().insert(name.to_string());
        }
    }

    fn info(&self) -> Option<String> {
        Some(format!("dependency tracker {}", self.id))
    }
}

impl fmt::Debug for DependencyTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyTracker")
            .field("id", &self.id)
            .field("tracking", &self.tracking.get())
            .field("dependencies", &self.dependencies.borrow())
            .field("needs_update", &self.needs_update.get())
            .finish_non_exhaustive()
    }
}
