#![forbid(unsafe_code)]

//! Smoke tests through the facade prelude.

use std::cell::Cell;
use std::rc::Rc;

use statewire::prelude::*;

#[test]
fn tracker_sees_reads_through_storage_links() {
    let root = StateRoot::new();
    root.app().set_or_create("width", 80);
    let tracker = DependencyTracker::register(root.runtime());
    let width = root
        .app()
        .link("width", Some(tracker.id()), Some("width"))
        .unwrap();

    tracker.begin_pass();
    let _ = width.get();
    tracker.end_pass();
    assert_eq!(tracker.dependencies(), vec!["width".to_string()]);

    root.app().set("width", 120);
    assert!(tracker.needs_update());
}

#[test]
fn closure_subscriber_on_named_instance() {
    let root = StateRoot::new();
    let page = root.instances().get_or_create("page", [("clicks", 0)]);
    let total = Rc::new(Cell::new(0_i64));
    let sink = Rc::clone(&total);
    let counter = FnSubscriber::builder(root.runtime())
        .on_value_changed(move |change| {
            if let Some(Value::Int(n)) = change.value_as::<Value>() {
                sink.set(*n);
            }
        })
        .register();
    assert!(page.subscribe_to_changes_of("clicks", counter.id()));
    page.set("clicks", 3);
    assert_eq!(total.get(), 3);
}

#[cfg(feature = "json-file")]
#[test]
fn json_file_persistence_through_facade() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prefs.json");
    let root = StateRoot::new();
    let backend = Rc::new(JsonFileBackend::open(&path).unwrap());
    let persistent = root.configure_backend(backend, PersistenceConfig::default());
    assert!(persistent.persist("lang", "en"));
    root.app().set("lang", "fr");

    let reopened = JsonFileBackend::open(&path).unwrap();
    let stored = reopened.get("lang").map(|json| statewire::storage::from_json(&json));
    assert_eq!(stored, Some(Value::from("fr")));
}
