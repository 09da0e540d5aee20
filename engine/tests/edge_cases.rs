//! Edge case tests for tandem-engine
//!
//! These tests cover boundary conditions and unusual inputs.

use serde_json::json;
use tandem_engine::{
    CodecOptions, ContainerId, ContainerKind, Doc, DocSnapshot, Error, OpId, Prelim, Proxy,
    SharedValue, Store, Value,
};

fn exchange(a: &Store, b: &Store) {
    b.doc()
        .apply_update(a.doc().ops_since(&b.doc().state_vector()));
    a.doc()
        .apply_update(b.doc().ops_since(&a.doc().state_vector()));
}

// ============================================================================
// Offline edits
// ============================================================================

#[test]
fn offline_conflicting_writes_converge_deterministically() {
    // same scenario, replayed with the client ids swapped
    for (left, right) in [(10, 20), (20, 10)] {
        let a = Store::new(Doc::with_client(left));
        let b = Store::new(Doc::with_client(right));
        a.map("states-r").unwrap().set("count", 1);
        b.map("states-r").unwrap().set("count", 2);

        exchange(&a, &b);

        let winner = if left > right { 1.0 } else { 2.0 };
        assert_eq!(a.doc().to_json(), b.doc().to_json());
        assert_eq!(
            a.map("states-r").unwrap().get("count"),
            Some(Value::Number(winner))
        );
        assert_eq!(
            b.map("states-r").unwrap().get("count"),
            Some(Value::Number(winner))
        );
    }
}

#[test]
fn later_write_beats_earlier_concurrent_history() {
    let a = Store::new(Doc::with_client(1));
    let b = Store::new(Doc::with_client(2));
    let ma = a.map("states-r").unwrap();
    let mb = b.map("states-r").unwrap();

    // a has seen more history, so its next write carries a higher counter
    for i in 0..5 {
        ma.set("count", i);
    }
    mb.set("count", 100);
    exchange(&a, &b);

    assert_eq!(ma.get("count"), Some(Value::Number(4.0)));
    assert_eq!(mb.get("count"), Some(Value::Number(4.0)));
}

// ============================================================================
// Idempotence
// ============================================================================

#[test]
fn applying_a_batch_twice_changes_nothing() {
    let a = Store::new(Doc::with_client(1));
    let list = a.array("refs-r").unwrap();
    list.push(Value::object([("id", Value::from("l1"))]));
    list.push("two");

    let b = Doc::with_client(2);
    b.apply_update(a.doc().ops());
    let once = b.to_json();
    let stats = b.apply_update(a.doc().ops());

    assert_eq!(stats.applied, 0);
    assert_eq!(b.to_json(), once);
}

#[test]
fn snapshot_reload_into_live_document_is_a_no_op() {
    let store = Store::new(Doc::with_client(1));
    store.map("states-r").unwrap().set("x", "y");
    let snapshot = DocSnapshot::capture(store.doc());
    assert_eq!(snapshot.load_into(store.doc()), 0);
}

// ============================================================================
// Proxy identity
// ============================================================================

#[test]
fn assigning_a_proxy_references_the_container() {
    let store = Store::new(Doc::with_client(1));
    let state = store.map("states-r").unwrap();
    let layer = state.set("layer", Value::object([("name", Value::from("bg"))]));

    let alias = state.set("selected", layer.clone());

    assert_eq!(alias, layer);
    let doc_json = store.doc().to_json();
    assert_eq!(doc_json["states-r"]["selected"], json!({"name": "bg"}));

    // writes through one path are visible through the other
    layer
        .as_proxy()
        .and_then(Proxy::as_map)
        .unwrap()
        .set("name", "fg");
    let selected = state.get("selected").unwrap();
    assert_eq!(
        selected.as_proxy().and_then(Proxy::as_map).unwrap().get("name"),
        Some(Value::from("fg"))
    );
}

#[test]
fn repeated_reads_return_the_same_proxy() {
    let store = Store::new(Doc::with_client(1));
    let state = store.map("states-r").unwrap();
    state.set("list", Value::Array(vec![Value::from(1)]));

    let first = state.get("list").unwrap();
    let second = state.get("list").unwrap();
    assert_eq!(first, second);

    let id = first.as_proxy().unwrap().container_id().clone();
    assert_eq!(store.wrap(&id).map(Value::Proxy), Some(first));
}

#[test]
fn proxies_from_another_document_are_copied() {
    let source = Store::new(Doc::with_client(1));
    let target = Store::new(Doc::with_client(2));
    let layer = source
        .map("states-src")
        .unwrap()
        .set("layer", Value::object([("name", Value::from("bg"))]));

    let copied = target.map("states-dst").unwrap().set("layer", layer.clone());

    assert_ne!(copied, layer);
    assert_eq!(copied.to_plain(), layer.to_plain());
}

// ============================================================================
// Unusual values
// ============================================================================

#[test]
fn cyclic_native_graph_is_written_with_null_back_edge() {
    let store = Store::new(Doc::with_client(1));
    let node = SharedValue::new(Value::Null);
    node.set(Value::object([
        ("name", Value::from("root")),
        ("parent", Value::Shared(node.clone())),
    ]));

    store
        .map("states-r")
        .unwrap()
        .set("tree", Value::Shared(node.clone()));
    node.set(Value::Null);

    assert_eq!(
        store.doc().to_json(),
        json!({"states-r": {"tree": {"name": "root", "parent": null}}})
    );
}

#[test]
fn special_numbers_survive_replication() {
    let a = Store::new(Doc::with_client(1));
    let b = Store::new(Doc::with_client(2));
    a.map("states-r").unwrap().set("max", f64::INFINITY);
    exchange(&a, &b);
    assert_eq!(
        b.map("states-r").unwrap().get("max"),
        Some(Value::Number(f64::INFINITY))
    );
}

#[test]
fn revival_can_be_disabled() {
    let doc = Doc::with_client(1);
    let store = Store::with_options(
        doc,
        CodecOptions {
            revive_special_strings: false,
        },
    );
    let state = store.map("states-r").unwrap();
    state.set("label", "Infinity");
    assert_eq!(state.get("label"), Some(Value::from("Infinity")));
}

#[test]
fn unicode_text_and_keys() {
    let store = Store::new(Doc::with_client(1));
    let state = store.map("states-r").unwrap();
    state.set("名前", "テスト");
    state.set("", "empty key");
    let note = state.set_text("note", "🎉🚀").unwrap();
    note.insert(1, "💯");

    assert_eq!(state.get("名前"), Some(Value::from("テスト")));
    assert_eq!(state.get(""), Some(Value::from("empty key")));
    assert_eq!(note.to_string(), "🎉💯🚀");
    assert_eq!(note.len(), 3);
}

#[test]
fn deeply_nested_values() {
    let store = Store::new(Doc::with_client(1));
    let mut value = Value::from("leaf");
    for _ in 0..50 {
        value = Value::object([("child", value)]);
    }
    store.map("states-r").unwrap().set("deep", value.clone());

    let replica = Doc::with_client(2);
    replica.apply_update(store.doc().ops());
    assert_eq!(replica.to_json()["states-r"]["deep"], value.to_json());
}

// ============================================================================
// Malformed state
// ============================================================================

#[test]
fn reading_a_missing_container_is_empty() {
    let doc = Doc::with_client(1);
    let id = doc.root("states-r", ContainerKind::Map).unwrap();
    assert!(doc.is_empty(&id));
    assert_eq!(doc.map_entries(&id), Some(vec![]));
    assert_eq!(doc.seq_values(&id), None);
}

#[test]
fn dangling_container_reference_is_rejected() {
    let doc = Doc::with_client(1);
    let map = doc.root("states-r", ContainerKind::Map).unwrap();
    let missing = ContainerId::Created(OpId::new(99, 99));

    let result = doc.transact(|txn| txn.map_set(&map, "x", Prelim::Existing(missing.clone())));

    assert_eq!(result, Err(Error::ContainerNotFound(missing)));
    assert!(doc.is_empty(&map));
}
