//! Property-based tests for the actors.
//!
//! Whatever sequence of requests arrives:
//!  - a tree's stored edges form a DAG whose only source is the root
//!  - an entity's timeline is strictly increasing, and each snapshot's
//!    `validTo` is the next snapshot's `validFrom`, the last one open

use bts_actor::{ActorRuntime, Request, WriteArgs, EDGES_KEY};
use bts_core::{
    ActorId, ManualClock, Registry, Snapshot, Status, Timestamp, TypeVersion, TypeVersionConfig,
};
use bts_storage::{KeyValueStore, MemoryStorageProvider, SnapshotStore, StorageProvider};
use proptest::prelude::*;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

const T0: i64 = 1_704_067_200_000;

fn runtime() -> (ActorRuntime, Arc<ManualClock>, Arc<MemoryStorageProvider>) {
    let registry = Registry::builder()
        .register("page", "v1", "*", TypeVersionConfig::builder().build())
        .register(
            "folder",
            "v1",
            "*",
            TypeVersionConfig::builder()
                .tree(TypeVersion::new("page", "v1"))
                .build(),
        )
        .build()
        .unwrap();
    let clock = Arc::new(ManualClock::new(Timestamp::from_millis(T0)));
    let provider = Arc::new(MemoryStorageProvider::new());
    let runtime = ActorRuntime::builder()
        .registry(registry)
        .storage(provider.clone())
        .clock(clock.clone())
        .build()
        .unwrap();
    (runtime, clock, provider)
}

// ============================================================================
// Trees
// ============================================================================

#[derive(Clone, Debug)]
enum TreeOp {
    Add(u64),
    Branch(u64, u64),
    Unbranch(u64, u64),
    Move(u64, u64, u64),
}

fn tree_op() -> impl Strategy<Value = TreeOp> {
    prop_oneof![
        (0u64..8).prop_map(TreeOp::Add),
        (0u64..8, 0u64..8).prop_map(|(p, c)| TreeOp::Branch(p, c)),
        (0u64..8, 0u64..8).prop_map(|(p, c)| TreeOp::Unbranch(p, c)),
        (0u64..8, 0u64..8, 0u64..8).prop_map(|(c, from, to)| TreeOp::Move(c, from, to)),
    ]
}

fn tree_request(op: &TreeOp) -> Request {
    let write = WriteArgs::by("prop");
    match *op {
        TreeOp::Add(parent) => Request::add_node(parent, json!({"label": "n"}), write),
        TreeOp::Branch(parent, child) => Request::add_branch(parent, child, write),
        TreeOp::Unbranch(parent, child) => Request::delete_branch(parent, child, write),
        TreeOp::Move(child, from, to) => Request::move_branch(child, from, to, write),
    }
}

/// Depth-first search for a back edge.
fn has_cycle(edges: &BTreeMap<u64, BTreeSet<u64>>) -> bool {
    fn visit(
        node: u64,
        edges: &BTreeMap<u64, BTreeSet<u64>>,
        on_path: &mut BTreeSet<u64>,
        done: &mut BTreeSet<u64>,
    ) -> bool {
        if done.contains(&node) {
            return false;
        }
        if !on_path.insert(node) {
            return true;
        }
        for child in edges.get(&node).into_iter().flatten() {
            if visit(*child, edges, on_path, done) {
                return true;
            }
        }
        on_path.remove(&node);
        done.insert(node);
        false
    }

    let mut done = BTreeSet::new();
    edges
        .keys()
        .any(|node| visit(*node, edges, &mut BTreeSet::new(), &mut done))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn tree_edges_stay_acyclic(ops in prop::collection::vec(tree_op(), 1..40)) {
        tokio_test::block_on(async {
            let (runtime, _clock, provider) = runtime();
            let tree = ActorId::from_string("tree");
            let created = runtime
                .call(
                    &tree,
                    Request::tree_create(json!({"label": "root"}), WriteArgs::by("prop"))
                        .with_type(TypeVersion::new("folder", "v1")),
                )
                .await;
            prop_assert_eq!(created.status, Status::Created);

            for op in &ops {
                let response = runtime.call(&tree, tree_request(op)).await;
                prop_assert!(
                    matches!(
                        response.status,
                        Status::Ok
                            | Status::Created
                            | Status::Conflict
                            | Status::NotFound
                            | Status::ValidationError
                    ),
                    "{:?} -> {:?}",
                    op,
                    response
                );

                let store = provider.store(&tree).unwrap();
                let edges: BTreeMap<u64, BTreeSet<u64>> = match store.get(EDGES_KEY).await.unwrap() {
                    Some(raw) => serde_json::from_value(raw).unwrap(),
                    None => BTreeMap::new(),
                };
                prop_assert!(!has_cycle(&edges), "cycle after {:?}: {:?}", op, edges);
                prop_assert!(edges.values().all(|children| !children.contains(&0)));
            }
            Ok(())
        })?;
    }
}

// ============================================================================
// Entities
// ============================================================================

#[derive(Clone, Debug)]
enum EntityOp {
    Replace { n: u8, user: u8, wait: i64 },
    Delete { wait: i64 },
    Undelete { wait: i64 },
}

fn entity_op() -> impl Strategy<Value = EntityOp> {
    prop_oneof![
        4 => (0u8..4, 0u8..3, 0i64..7_200_000)
            .prop_map(|(n, user, wait)| EntityOp::Replace { n, user, wait }),
        1 => (0i64..10_000).prop_map(|wait| EntityOp::Delete { wait }),
        1 => (0i64..10_000).prop_map(|wait| EntityOp::Undelete { wait }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn entity_timeline_is_a_chain(ops in prop::collection::vec(entity_op(), 1..30)) {
        tokio_test::block_on(async {
            let (runtime, clock, provider) = runtime();
            let id = ActorId::new();
            let created = runtime
                .call(
                    &id,
                    Request::create(json!({"n": 0}), WriteArgs::by("user0"))
                        .with_type(TypeVersion::new("page", "v1")),
                )
                .await;
            prop_assert_eq!(created.status, Status::Created);
            let mut token = created.token.unwrap();

            for op in &ops {
                let request = match op {
                    EntityOp::Replace { n, user, wait } => {
                        clock.advance(*wait);
                        Request::replace(
                            json!({"n": n}),
                            WriteArgs::by(format!("user{}", user)).token(token.clone()),
                        )
                    }
                    EntityOp::Delete { wait } => {
                        clock.advance(*wait);
                        Request::delete(WriteArgs::by("user0"))
                    }
                    EntityOp::Undelete { wait } => {
                        clock.advance(*wait);
                        Request::undelete(WriteArgs::by("user0"))
                    }
                };
                let response = runtime.call(&id, request).await;
                prop_assert!(
                    matches!(response.status, Status::Ok | Status::Conflict),
                    "{:?} -> {:?}",
                    op,
                    response
                );
                if response.status == Status::Ok {
                    token = response.token.unwrap();
                }
            }

            let store = SnapshotStore::new(provider.open(&id));
            let meta = store.meta().await.unwrap().unwrap();
            prop_assert!(meta.timeline.windows(2).all(|w| w[0] < w[1]));
            prop_assert_eq!(meta.latest().map(|t| t.to_string()), Some(token));

            let history: Vec<Snapshot> = store.history(&meta).await.unwrap();
            prop_assert_eq!(history.len(), meta.timeline.len());
            for pair in history.windows(2) {
                prop_assert_eq!(pair[0].meta.valid_to, pair[1].meta.valid_from);
            }
            prop_assert!(history.last().unwrap().is_open());
            Ok(())
        })?;
    }
}
