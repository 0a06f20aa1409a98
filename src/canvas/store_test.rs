use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;

use super::*;

fn fields(value: Value) -> FieldMap {
    value.as_object().cloned().unwrap_or_default()
}

fn rect(id: &str, data: Value) -> CanvasObjectContent {
    CanvasObjectContent::new("rectangle", id, fields(data))
}

fn drain_local(rx: &mut UnboundedReceiver<StoreEvent>) -> Vec<Mutation> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let StoreEvent::Mutated { origin: Origin::Local, mutation } = event {
            out.push(mutation);
        }
    }
    out
}

// =============================================================================
// add / remove
// =============================================================================

#[test]
fn add_then_get() {
    let mut store = CanvasObjectStore::new();
    store.add("o1", rect("o1", json!({"left": 10}))).unwrap();
    assert_eq!(store.len(), 1);
    assert_eq!(store.get("o1").unwrap().data.left(), Some(10.0));
}

#[test]
fn add_duplicate_id_fails() {
    let mut store = CanvasObjectStore::new();
    store.add("o1", rect("o1", json!({}))).unwrap();
    let err = store.add("o1", rect("o1", json!({"left": 1}))).unwrap_err();
    assert!(matches!(err, StoreError::DuplicateId(id) if id == "o1"));
    assert!(store.get("o1").unwrap().data.fields.is_empty());
}

#[test]
fn add_with_mismatched_id_fails() {
    let mut store = CanvasObjectStore::new();
    let err = store.add("o1", rect("o2", json!({}))).unwrap_err();
    assert!(matches!(err, StoreError::IdMismatch { .. }));
    assert!(store.is_empty());
}

#[test]
fn remove_unknown_id_is_not_found() {
    let mut store = CanvasObjectStore::new();
    assert!(matches!(store.remove("ghost"), Err(StoreError::NotFound(_))));
}

#[test]
fn repeated_remove_is_a_noop() {
    let mut store = CanvasObjectStore::new();
    store.add("o1", rect("o1", json!({"left": 10}))).unwrap();

    let removed = store.remove("o1").unwrap();
    assert_eq!(removed.unwrap().data.left(), Some(10.0));
    assert!(store.remove("o1").unwrap().is_none());
    assert!(store.is_empty());
}

#[test]
fn re_adding_a_removed_id_is_allowed() {
    let mut store = CanvasObjectStore::new();
    store.add("o1", rect("o1", json!({}))).unwrap();
    store.remove("o1").unwrap();
    store.add("o1", rect("o1", json!({"top": 4}))).unwrap();
    assert!(store.contains("o1"));
    // Tombstone cleared: the next removal is a real one.
    assert!(store.remove("o1").unwrap().is_some());
}

// =============================================================================
// set_fields
// =============================================================================

#[test]
fn set_fields_merges_partial_data() {
    let mut store = CanvasObjectStore::new();
    store.add("o1", rect("o1", json!({"left": 10, "top": 10}))).unwrap();
    store.set_fields("o1", &fields(json!({"left": 50}))).unwrap();
    assert_eq!(store.get("o1").unwrap().data.fields, fields(json!({"left": 50, "top": 10})));
}

#[test]
fn set_fields_null_removes_field() {
    let mut store = CanvasObjectStore::new();
    store.add("o1", rect("o1", json!({"left": 10, "fill": "red"}))).unwrap();
    store.set_fields("o1", &fields(json!({"fill": null}))).unwrap();
    assert_eq!(store.get("o1").unwrap().data.fields, fields(json!({"left": 10})));
}

#[test]
fn set_fields_on_missing_object_fails() {
    let mut store = CanvasObjectStore::new();
    let err = store.set_fields("nope", &fields(json!({"a": 1}))).unwrap_err();
    assert!(matches!(err, StoreError::NotFound(id) if id == "nope"));
}

#[test]
fn set_fields_ignores_id_and_skips_empty_event() {
    let mut store = CanvasObjectStore::new();
    store.add("o1", rect("o1", json!({}))).unwrap();
    let mut rx = store.subscribe();

    store.set_fields("o1", &fields(json!({"id": "o2"}))).unwrap();
    assert_eq!(store.get("o1").unwrap().id(), "o1");
    assert!(rx.try_recv().is_err());
}

#[test]
fn same_field_last_arrival_wins() {
    let mut store = CanvasObjectStore::new();
    store.add("o1", rect("o1", json!({}))).unwrap();

    store.apply_remote(Mutation::SetFields { id: "o1".into(), fields: fields(json!({"a": 1})) });
    store.apply_remote(Mutation::SetFields { id: "o1".into(), fields: fields(json!({"a": 2})) });
    assert_eq!(store.get("o1").unwrap().data.get("a"), Some(json!(2)));

    // Reordered arrival at another replica.
    let mut other = CanvasObjectStore::new();
    other.add("o1", rect("o1", json!({}))).unwrap();
    other.apply_remote(Mutation::SetFields { id: "o1".into(), fields: fields(json!({"a": 2})) });
    other.apply_remote(Mutation::SetFields { id: "o1".into(), fields: fields(json!({"a": 1})) });
    assert_eq!(other.get("o1").unwrap().data.get("a"), Some(json!(1)));
}

#[test]
fn concurrent_disjoint_fields_converge_on_both_replicas() {
    let seed = rect("o1", json!({}));
    let mut a = CanvasObjectStore::new();
    let mut b = CanvasObjectStore::new();
    a.add("o1", seed.clone()).unwrap();
    b.add("o1", seed).unwrap();
    let mut a_rx = a.subscribe();
    let mut b_rx = b.subscribe();

    // Both edit before either sees the other's message.
    a.set_fields("o1", &fields(json!({"a": 1}))).unwrap();
    b.set_fields("o1", &fields(json!({"b": 2}))).unwrap();

    for m in drain_local(&mut a_rx) {
        b.apply_remote(m);
    }
    for m in drain_local(&mut b_rx) {
        a.apply_remote(m);
    }

    let expected = fields(json!({"a": 1, "b": 2}));
    assert_eq!(a.get("o1").unwrap().data.fields, expected);
    assert_eq!(b.get("o1").unwrap().data.fields, expected);
}

// =============================================================================
// remote application
// =============================================================================

#[test]
fn remote_add_replaces_existing_object() {
    let mut store = CanvasObjectStore::new();
    store.add("o1", rect("o1", json!({"left": 1}))).unwrap();
    assert!(store.apply_remote(Mutation::Add { id: "o1".into(), content: rect("o1", json!({"left": 9})) }));
    assert_eq!(store.get("o1").unwrap().data.left(), Some(9.0));
}

#[test]
fn remote_mutations_for_absent_objects_are_dropped() {
    let mut store = CanvasObjectStore::new();
    let mut rx = store.subscribe();
    assert!(!store.apply_remote(Mutation::Remove { id: "x".into() }));
    assert!(!store.apply_remote(Mutation::SetFields { id: "x".into(), fields: fields(json!({"a": 1})) }));
    assert!(rx.try_recv().is_err());
}

#[test]
fn remote_remove_tombstones_for_later_local_remove() {
    let mut store = CanvasObjectStore::new();
    store.add("o1", rect("o1", json!({}))).unwrap();
    store.apply_remote(Mutation::Remove { id: "o1".into() });
    assert!(store.remove("o1").unwrap().is_none());
}

// =============================================================================
// events
// =============================================================================

#[test]
fn events_carry_origin() {
    let mut store = CanvasObjectStore::new();
    let mut rx = store.subscribe();

    store.add("o1", rect("o1", json!({}))).unwrap();
    store.apply_remote(Mutation::SetFields { id: "o1".into(), fields: fields(json!({"a": 1})) });
    store.remove("o1").unwrap();

    let events: Vec<StoreEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
    assert_eq!(events.len(), 3);
    assert!(matches!(&events[0], StoreEvent::Mutated { origin: Origin::Local, mutation: Mutation::Add { .. } }));
    assert!(matches!(&events[1], StoreEvent::Mutated { origin: Origin::Remote, mutation: Mutation::SetFields { .. } }));
    assert!(matches!(&events[2], StoreEvent::Mutated { origin: Origin::Local, mutation: Mutation::Remove { .. } }));
}

#[test]
fn dropped_subscribers_are_pruned() {
    let mut store = CanvasObjectStore::new();
    let rx = store.subscribe();
    drop(rx);
    store.add("o1", rect("o1", json!({}))).unwrap();
    assert!(store.subscribers.is_empty());
}

#[test]
fn failed_operations_emit_nothing() {
    let mut store = CanvasObjectStore::new();
    let mut rx = store.subscribe();
    let _ = store.remove("ghost");
    let _ = store.set_fields("ghost", &fields(json!({"a": 1})));
    assert!(rx.try_recv().is_err());
}

// =============================================================================
// snapshot / restore
// =============================================================================

#[test]
fn snapshot_restore_on_empty_store_is_noop() {
    let mut store = CanvasObjectStore::new();
    let snap = store.snapshot().unwrap();
    assert_eq!(snap, json!({}));
    store.restore(snap).unwrap();
    assert!(store.is_empty());
}

#[test]
fn snapshot_restore_reproduces_mapping() {
    let mut store = CanvasObjectStore::new();
    store.add("o1", rect("o1", json!({"left": 10, "custom": {"x": [1, 2]}}))).unwrap();
    store
        .add("t1", CanvasObjectContent::new("text", "t1", fields(json!({"text": "hi", "fontSize": 18}))))
        .unwrap();

    let snap = store.snapshot().unwrap();
    let mut fresh = CanvasObjectStore::new();
    fresh.restore(snap.clone()).unwrap();
    assert_eq!(fresh.snapshot().unwrap(), snap);

    store.restore(store.snapshot().unwrap()).unwrap();
    assert_eq!(store.snapshot().unwrap(), snap);
}

#[test]
fn snapshot_shape_is_keyed_by_id() {
    let mut store = CanvasObjectStore::new();
    store.add("o1", rect("o1", json!({"left": 10}))).unwrap();
    assert_eq!(
        store.snapshot().unwrap(),
        json!({"o1": {"type": "rectangle", "data": {"id": "o1", "left": 10}}})
    );
}

#[test]
fn restore_null_yields_empty_store() {
    let mut store = CanvasObjectStore::new();
    store.add("o1", rect("o1", json!({}))).unwrap();
    store.restore(Value::Null).unwrap();
    assert!(store.is_empty());
}

#[test]
fn restore_rejects_malformed_snapshot_and_keeps_state() {
    let mut store = CanvasObjectStore::new();
    store.add("o1", rect("o1", json!({}))).unwrap();

    assert!(matches!(store.restore(json!([1, 2, 3])), Err(StoreError::Serialization(_))));
    let mismatched = json!({"a": {"type": "rectangle", "data": {"id": "b"}}});
    assert!(matches!(store.restore(mismatched), Err(StoreError::IdMismatch { .. })));
    assert!(store.contains("o1"));
}

#[test]
fn restore_clears_tombstones_and_notifies() {
    let mut store = CanvasObjectStore::new();
    store.add("o1", rect("o1", json!({}))).unwrap();
    store.remove("o1").unwrap();
    let mut rx = store.subscribe();

    store.restore(json!({})).unwrap();
    assert!(matches!(store.remove("o1"), Err(StoreError::NotFound(_))));
    assert_eq!(rx.try_recv().unwrap(), StoreEvent::Restored { count: 0 });
}

#[test]
fn ids_are_sorted() {
    let mut store = CanvasObjectStore::new();
    for id in ["c", "a", "b"] {
        store.add(id, rect(id, json!({}))).unwrap();
    }
    assert_eq!(store.ids(), vec!["a", "b", "c"]);
}
