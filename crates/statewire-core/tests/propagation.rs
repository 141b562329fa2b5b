#![forbid(unsafe_code)]

//! Integration tests for change propagation across properties, links, and
//! wrapped objects.
//!
//! These tests validate that:
//! - Two-way chains deliver each change once per party and never loop
//! - One-way props dedup equal upstream values
//! - Nested object writes reach every owner and their subscribers
//! - Fan-out survives unknown ids and re-entrant mutation

use std::cell::RefCell;
use std::rc::Rc;

use statewire_core::{
    Capabilities, ChangeSource, DependencyTracker, FnSubscriber, ObjectError, ObservedProperty,
    OwnerRemovalPolicy, RawObject, ReadAttribution, RecordingSubscriber, Runtime, RuntimeConfig,
    SyncMode, Value,
};
use tracing::Level;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(Level::DEBUG)
        .try_init();
}

fn object(fields: &[(&str, i64)]) -> Value {
    let raw = fields
        .iter()
        .fold(RawObject::map(), |raw, (k, v)| raw.with_field(*k, *v));
    Value::Raw(raw)
}

#[test]
fn link_of_link_delivers_once_per_party() {
    init_tracing();
    let rt = Runtime::new();
    let source = ObservedProperty::new(&rt, 0_i64);
    let s_rec = RecordingSubscriber::<i64>::register(&rt);
    source.subscribe(s_rec.id());

    let d1_rec = RecordingSubscriber::<i64>::register(&rt);
    let d1 = source.create_link(Some(d1_rec.id()), Some("d1")).unwrap();
    let d2_rec = RecordingSubscriber::<i64>::register(&rt);
    let d2 = d1.create_link(Some(d2_rec.id()), Some("d2")).unwrap();

    d2.set(5);
    assert_eq!(source.get(), 5);
    assert_eq!(d1.get(), 5);
    assert_eq!(s_rec.values(), vec![5]);
    assert_eq!(d1_rec.values(), vec![5]);
    assert_eq!(d2_rec.values(), vec![5]);

    source.set(6);
    assert_eq!(d2.get(), 6);
    assert_eq!(d1_rec.values(), vec![5, 6]);
    assert_eq!(d2_rec.values(), vec![5, 6]);
}

#[test]
fn sibling_links_see_each_others_writes() {
    let rt = Runtime::new();
    let source = ObservedProperty::new(&rt, String::from("a"));
    let a_rec = RecordingSubscriber::<String>::register(&rt);
    let b_rec = RecordingSubscriber::<String>::register(&rt);
    let a = source.create_link(Some(a_rec.id()), None).unwrap();
    let _b = source.create_link(Some(b_rec.id()), None).unwrap();

    a.set("b".into());
    assert_eq!(a_rec.values(), vec!["b".to_string()]);
    assert_eq!(b_rec.values(), vec!["b".to_string()]);
}

#[test]
fn writer_token_reaches_subscribers() {
    let rt = Runtime::new();
    let source = ObservedProperty::new(&rt, 0_i64);
    let writers = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&writers);
    let observer = FnSubscriber::builder(&rt)
        .on_value_changed(move |change| sink.borrow_mut().push(change.writer()))
        .register();
    source.subscribe(observer.id());
    let link = source.create_link(None, None).unwrap();

    source.set(1);
    link.set(2);
    assert_eq!(*writers.borrow(), vec![None, Some(link.id())]);
}

#[test]
fn one_way_prop_dedups_equal_upstream_values() {
    let rt = Runtime::new();
    let source = ObservedProperty::new(&rt, 1_i64);
    let rec = RecordingSubscriber::<i64>::register(&rt);
    let prop = source.create_prop(Some(rec.id()), None).unwrap();

    prop.set(7);
    assert_eq!(rec.values(), vec![7]);
    // equal to the local copy: no notification
    source.set(7);
    assert_eq!(rec.values(), vec![7]);
    source.set(8);
    assert_eq!(prop.get(), 8);
    assert_eq!(rec.values(), vec![7, 8]);
}

#[test]
fn nested_write_reaches_owners_and_links() {
    let rt = Runtime::new();
    let source = ObservedProperty::new(&rt, object(&[("n", 1)]));
    let link_rec = RecordingSubscriber::<Value>::register(&rt);
    let prop_rec = RecordingSubscriber::<Value>::register(&rt);
    let _link = source.create_link(Some(link_rec.id()), None).unwrap();
    let prop = source.create_prop(Some(prop_rec.id()), None).unwrap();

    let handle = source.object_handle().unwrap();
    assert_eq!(rt.owners(handle), vec![source.id(), prop.id()]);

    rt.write_field(handle, "n", 2).unwrap();
    assert_eq!(link_rec.value_changed_count(), 1);
    assert_eq!(prop_rec.value_changed_count(), 1);
    assert_eq!(prop.read_field("n"), Some(Value::Int(2)));
}

#[test]
fn object_fan_out_reports_field_name() {
    let rt = Runtime::new();
    let owner = RecordingSubscriber::<Value>::register_with(&rt, Capabilities::PROPERTY_CHANGED);
    let handle = rt.wrap(object(&[]), Some(owner.id())).unwrap();
    rt.write_field(handle, "x", 1).unwrap();
    rt.write_field(handle, "y", 2).unwrap();
    rt.write_field(handle, "y", 2).unwrap();
    assert_eq!(owner.changed_fields(), vec!["x".to_string(), "y".to_string()]);
}

#[test]
fn list_push_notifies_with_index() {
    let rt = Runtime::new();
    let rec = RecordingSubscriber::<Value>::register_with(&rt, Capabilities::PROPERTY_CHANGED);
    let handle = rt.wrap_raw(RawObject::list(), Some(rec.id()));
    rt.push(handle, "a").unwrap();
    rt.push(handle, "b").unwrap();
    assert_eq!(rec.changed_fields(), vec!["0".to_string(), "1".to_string()]);
}

#[test]
fn unknown_subscriber_does_not_stop_fan_out() {
    init_tracing();
    let rt = Runtime::new();
    let prop = ObservedProperty::new(&rt, 0_i64);
    let first = RecordingSubscriber::<i64>::register(&rt);
    let gone = RecordingSubscriber::<i64>::register(&rt);
    let last = RecordingSubscriber::<i64>::register(&rt);
    for id in [first.id(), gone.id(), last.id()] {
        prop.subscribe(id);
    }
    rt.unregister(gone.id());
    prop.set(1);
    assert_eq!(first.values(), vec![1]);
    assert!(gone.events().is_empty());
    assert_eq!(last.values(), vec![1]);
}

#[test]
fn subscriber_may_write_during_fan_out() {
    let rt = Runtime::new();
    let a = ObservedProperty::new(&rt, 0_i64);
    let b = ObservedProperty::new(&rt, 0_i64);
    let b_writer = b.clone();
    let mirror = FnSubscriber::builder(&rt)
        .on_value_changed(move |change| {
            if let Some(v) = change.value_as::<i64>() {
                b_writer.set(*v * 10);
            }
        })
        .register();
    a.subscribe(mirror.id());
    a.set(3);
    assert_eq!(b.get(), 30);
}

#[test]
fn subscriber_may_create_properties_during_fan_out() {
    let rt = Runtime::new();
    let created = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&created);
    let rt_inner = rt.clone();
    let spawner = FnSubscriber::builder(&rt)
        .on_value_changed(move |_| {
            sink.borrow_mut().push(ObservedProperty::new(&rt_inner, 0_u8));
        })
        .register();
    let prop = ObservedProperty::with_owner(&rt, 0_i64, Some(spawner.id()), None);
    prop.set(1);
    prop.set(2);
    assert_eq!(created.borrow().len(), 2);
}

#[test]
fn deleting_all_holders_destroys_object() {
    let rt = Runtime::new();
    let source = ObservedProperty::new(&rt, object(&[("n", 1)]));
    let prop = source.create_prop(None, None).unwrap();
    let handle = source.object_handle().unwrap();
    assert_eq!(rt.owner_count(handle), 2);

    prop.about_to_be_deleted();
    assert_eq!(rt.owner_count(handle), 1);
    source.about_to_be_deleted();
    assert!(!rt.is_alive(handle));
    assert_eq!(rt.object_count(), 0);
}

#[test]
fn strict_runtime_reports_foreign_owner() {
    let rt = Runtime::with_config(
        RuntimeConfig::default().with_owner_removal(OwnerRemovalPolicy::Strict),
    );
    let prop = ObservedProperty::new(&rt, object(&[]));
    let handle = prop.object_handle().unwrap();
    let stranger = rt.make_id();
    assert!(matches!(
        rt.remove_owner(handle, stranger),
        Err(ObjectError::NotAnOwner { .. })
    ));
    assert!(rt.is_alive(handle));
}

#[test]
fn read_attribution_by_field() {
    let rt = Runtime::with_config(
        RuntimeConfig::default().with_read_attribution(ReadAttribution::Field),
    );
    let tracker = DependencyTracker::register(&rt);
    let prop = ObservedProperty::with_owner(
        &rt,
        object(&[("w", 1)]),
        Some(tracker.id()),
        Some("size"),
    );
    tracker.begin_pass();
    let _ = prop.read_field("w");
    tracker.end_pass();
    assert_eq!(tracker.dependencies(), vec!["w".to_string()]);
}

#[test]
fn read_attribution_by_owning_property() {
    let rt = Runtime::new();
    let tracker = DependencyTracker::register(&rt);
    let prop = ObservedProperty::with_owner(
        &rt,
        object(&[("w", 1)]),
        Some(tracker.id()),
        Some("size"),
    );
    tracker.begin_pass();
    let _ = prop.read_field("w");
    tracker.end_pass();
    assert_eq!(tracker.dependencies(), vec!["size".to_string()]);

    prop.write_field("w", 2).unwrap();
    assert!(tracker.needs_update());
}

#[test]
fn two_way_read_is_tracked_on_the_link() {
    let rt = Runtime::new();
    let source = ObservedProperty::new(&rt, 0_i64);
    let rec = RecordingSubscriber::<i64>::register(&rt);
    let link = source.create_link(Some(rec.id()), Some("count")).unwrap();
    assert_eq!(link.mode(), SyncMode::TwoWay);
    let _ = link.get();
    assert_eq!(rec.reads(), vec![Some("count".to_string())]);
}

#[test]
fn property_change_source_is_the_notifying_property() {
    let rt = Runtime::new();
    let source = ObservedProperty::new(&rt, 0_i64);
    let rec = RecordingSubscriber::<i64>::register(&rt);
    let link = source.create_link(Some(rec.id()), None).unwrap();
    source.set(1);
    let sources: Vec<_> = rec
        .events()
        .into_iter()
        .filter_map(|e| match e {
            statewire_core::Notification::ValueChanged { source, .. } => Some(source),
            _ => None,
        })
        .collect();
    assert_eq!(sources, vec![ChangeSource::Property(link.id())]);
}
