//! Local writes racing remote updates on separate threads.
//!
//! A proxy mirror must always end up reading exactly what its container
//! holds, whichever thread integrated last.

use std::thread;

use tandem_engine::{Doc, NodeState, Op, Proxy, Store, Value};

const ROUNDS: usize = 150;
const WRITES: usize = 200;

/// One batch of remote operations per write, as a peer would send them.
fn remote_batches(write: impl Fn(&Store, usize)) -> Vec<Vec<Op>> {
    let remote = Store::new(Doc::with_client(2));
    (0..WRITES)
        .map(|i| {
            let before = remote.doc().state_vector();
            write(&remote, i);
            remote.doc().ops_since(&before)
        })
        .collect()
}

fn race(local: &Store, batches: &[Vec<Op>], write: impl Fn(usize) + Send + Sync) {
    thread::scope(|scope| {
        scope.spawn(|| {
            for i in 0..WRITES {
                write(i);
            }
        });
        for batch in batches {
            local.doc().apply_update(batch.clone());
        }
    });
}

#[test]
fn map_mirror_matches_document_after_racing_writes() {
    let batches = remote_batches(|remote, i| {
        remote
            .map("states-r")
            .unwrap()
            .set("k", Value::from((100_000 + i) as f64));
    });

    for round in 0..ROUNDS {
        let local = Store::new(Doc::with_client(1));
        let map = local.map("states-r").unwrap();
        race(&local, &batches, |i| {
            map.set("k", i as f64);
        });

        assert_eq!(
            map.to_json(),
            local.doc().container_json(map.id()),
            "round {round}"
        );
        assert_eq!(Proxy::Map(map).state(), NodeState::Observing);
    }
}

#[test]
fn array_mirror_matches_document_after_racing_pushes() {
    let batches = remote_batches(|remote, i| {
        remote.array("log").unwrap().push(format!("remote-{i}"));
    });

    for round in 0..ROUNDS / 3 {
        let local = Store::new(Doc::with_client(1));
        let list = local.array("log").unwrap();
        race(&local, &batches, |i| {
            list.push(format!("local-{i}"));
        });

        assert_eq!(list.len(), 2 * WRITES, "round {round}");
        assert_eq!(
            list.to_json(),
            local.doc().container_json(list.id()),
            "round {round}"
        );
    }
}

#[test]
fn text_mirror_matches_document_after_racing_edits() {
    let batches = remote_batches(|remote, _| {
        remote.text("notes").unwrap().push_str("r");
    });

    for round in 0..ROUNDS / 3 {
        let local = Store::new(Doc::with_client(1));
        let text = local.text("notes").unwrap();
        race(&local, &batches, |i| {
            if i % 4 == 3 {
                text.delete(0, 1);
            } else {
                text.insert(0, "l");
            }
        });

        assert_eq!(
            serde_json::Value::String(text.to_string()),
            local.doc().container_json(text.id()),
            "round {round}"
        );
    }
}

#[test]
fn nested_proxy_seeded_mid_race_is_not_double_applied() {
    let remote = Store::new(Doc::with_client(2));
    let before = remote.doc().state_vector();
    remote
        .map("states-r")
        .unwrap()
        .set("list", Value::Array(vec![]));
    let create = remote.doc().ops_since(&before);
    let list = remote
        .map("states-r")
        .unwrap()
        .get("list")
        .and_then(|v| v.as_proxy().and_then(Proxy::as_array).cloned())
        .unwrap();
    let pushes: Vec<Vec<Op>> = (0..WRITES)
        .map(|i| {
            let before = remote.doc().state_vector();
            list.push(i as f64);
            remote.doc().ops_since(&before)
        })
        .collect();

    for round in 0..ROUNDS / 3 {
        let local = Store::new(Doc::with_client(1));
        let map = local.map("states-r").unwrap();
        local.doc().apply_update(create.clone());
        thread::scope(|scope| {
            scope.spawn(|| {
                for batch in &pushes {
                    local.doc().apply_update(batch.clone());
                }
            });
            // wrapping the list while pushes integrate seeds it mid-stream
            for _ in 0..WRITES {
                local.clear();
                let _ = map.get("list");
                let _ = local.wrap(list.id());
            }
        });

        let mirrored = local
            .wrap(list.id())
            .and_then(|p| p.as_array().cloned())
            .unwrap();
        assert_eq!(mirrored.len(), WRITES, "round {round}");
        assert_eq!(
            mirrored.to_json(),
            local.doc().container_json(list.id()),
            "round {round}"
        );
    }
}
