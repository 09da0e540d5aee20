//! Property tests: replicas converge regardless of edit interleaving,
//! delivery order and duplication.

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tandem_engine::{ArrayProxy, Doc, MapProxy, Store, TextProxy, Value};

#[derive(Debug, Clone)]
enum Edit {
    Set(u8, i32),
    Delete(u8),
    SetNested(u8, i32),
    Push(i32),
    Insert(usize, i32),
    Remove(usize),
    Type(usize, char),
    Erase(usize),
}

fn edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        (0u8..4, any::<i32>()).prop_map(|(k, v)| Edit::Set(k, v)),
        (0u8..4).prop_map(Edit::Delete),
        (0u8..4, any::<i32>()).prop_map(|(k, v)| Edit::SetNested(k, v)),
        any::<i32>().prop_map(Edit::Push),
        (0usize..8, any::<i32>()).prop_map(|(i, v)| Edit::Insert(i, v)),
        (0usize..8).prop_map(Edit::Remove),
        (0usize..8, proptest::char::range('a', 'z')).prop_map(|(i, c)| Edit::Type(i, c)),
        (0usize..8).prop_map(Edit::Erase),
    ]
}

/// A replica plus live proxies over its three root containers.
struct Replica {
    store: Store,
    state: MapProxy,
    list: ArrayProxy,
    text: TextProxy,
}

fn apply(replica: &Replica, edit: &Edit) {
    let Replica {
        state, list, text, ..
    } = replica;
    match edit {
        Edit::Set(k, v) => {
            state.set(&format!("k{k}"), *v);
        }
        Edit::Delete(k) => {
            state.delete(&format!("k{k}"));
        }
        Edit::SetNested(k, v) => {
            state.set(
                &format!("k{k}"),
                Value::object([("v", Value::from(*v)), ("tags", Value::Array(vec![]))]),
            );
        }
        Edit::Push(v) => {
            list.push(*v);
        }
        Edit::Insert(i, v) => {
            list.insert((*i).min(list.len()), *v);
        }
        Edit::Remove(i) => {
            list.remove(*i);
        }
        Edit::Type(i, c) => text.insert(*i, &c.to_string()),
        Edit::Erase(i) => text.delete(*i, 1),
    }
}

fn replicas(count: u64) -> Vec<Replica> {
    (1..=count)
        .map(|client| {
            let store = Store::new(Doc::with_client(client));
            Replica {
                state: store.map("states-p").unwrap(),
                list: store.array("refs-p").unwrap(),
                text: store.text("notes-p").unwrap(),
                store,
            }
        })
        .collect()
}

fn sync_all(replicas: &[Replica]) {
    for a in replicas {
        for b in replicas {
            if !a.store.doc().ptr_eq(b.store.doc()) {
                b.store
                    .doc()
                    .apply_update(a.store.doc().ops_since(&b.store.doc().state_vector()));
            }
        }
    }
}

proptest! {
    #[test]
    fn replicas_converge(
        edits in prop::collection::vec((0usize..3, edit(), any::<bool>()), 1..40)
    ) {
        let stores = replicas(3);
        for (replica, edit, sync_after) in &edits {
            apply(&stores[*replica], edit);
            if *sync_after {
                sync_all(&stores);
            }
        }
        sync_all(&stores);

        let expected = stores[0].store.doc().to_json();
        for replica in &stores {
            prop_assert_eq!(replica.store.doc().to_json(), expected.clone());
            // mirrors agree with the documents they front
            prop_assert_eq!(replica.state.to_json(), expected["states-p"].clone());
            prop_assert_eq!(replica.list.to_json(), expected["refs-p"].clone());
            prop_assert_eq!(
                serde_json::Value::String(replica.text.to_string()),
                expected["notes-p"].clone()
            );
        }
    }

    #[test]
    fn delivery_order_and_duplication_do_not_matter(
        edits in prop::collection::vec((0usize..2, edit()), 1..30),
        seed in any::<u64>(),
    ) {
        let stores = replicas(2);
        for (replica, edit) in &edits {
            apply(&stores[*replica], edit);
        }

        let mut ops: Vec<_> = stores.iter().flat_map(|r| r.store.doc().ops()).collect();
        let in_order = Doc::with_client(10);
        in_order.apply_update(ops.clone());

        let mut rng = StdRng::seed_from_u64(seed);
        ops.shuffle(&mut rng);
        let duplicated: Vec<_> = ops.iter().chain(ops.iter().take(5)).cloned().collect();
        let shuffled = Doc::with_client(11);
        let stats = shuffled.apply_update(duplicated);

        prop_assert_eq!(stats.pending, 0);
        prop_assert_eq!(shuffled.to_json(), in_order.to_json());
    }
}
