//! Integration tests for tree actors.
//!
//! These tests verify:
//! - Node creation delegates to node entities and records stubs
//! - Branch edits keep the graph acyclic while allowing shared children
//! - The derived tree shares nodes reachable along several paths
//! - Node edits flow through to the node entities and the tree's labels

use bts_actor::{ActorRuntime, Body, DerivedTree, Operation, Request, Response, WriteArgs};
use bts_core::{
    ActorId, Delta, ManualClock, Registry, Status, Timestamp, TypeVersion, TypeVersionConfig,
};
use bts_storage::MemoryStorageProvider;
use serde_json::{json, Value};
use std::sync::Arc;

/// 2024-01-01T00:00:00.000Z
const T0: i64 = 1_704_067_200_000;

struct Harness {
    runtime: ActorRuntime,
    clock: Arc<ManualClock>,
    provider: Arc<MemoryStorageProvider>,
    tree: ActorId,
}

fn harness() -> Harness {
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
    Harness {
        runtime,
        clock,
        provider,
        tree: ActorId::from_string("tree-1"),
    }
}

fn by(user: &str) -> WriteArgs {
    WriteArgs::by(user)
}

impl Harness {
    async fn send(&self, request: Request) -> Response {
        self.runtime.call(&self.tree, request).await
    }

    async fn create_root(&self, label: &str) -> Response {
        self.send(
            Request::tree_create(json!({ "label": label }), by("alice"))
                .with_type(TypeVersion::new("folder", "v1")),
        )
        .await
    }

    async fn add(&self, parent: u64, label: &str) -> Response {
        self.send(Request::add_node(parent, json!({ "label": label }), by("alice")))
            .await
    }

    async fn timeline_len(&self) -> usize {
        self.send(Request::get_meta(None))
            .await
            .meta()
            .map(|m| m.timeline.len())
            .unwrap_or(0)
    }

    async fn tree_json(&self) -> Value {
        match self.send(Request::get_tree(None)).await.body {
            Body::Tree { tree, .. } => tree,
            other => panic!("expected a tree, got {:?}", other),
        }
    }

    /// Root, node1 under root, node2 under node1.
    async fn chain(&self) {
        assert_eq!(self.create_root("root").await.status, Status::Created);
        assert_eq!(self.add(0, "node1").await.status, Status::Created);
        assert_eq!(self.add(1, "node2").await.status, Status::Created);
    }
}

fn node_key(response: &Response) -> u64 {
    match &response.body {
        Body::Node { key, .. } => key.0,
        other => panic!("expected a node, got {:?}", other),
    }
}

// ============================================================================
// Creation
// ============================================================================

#[tokio::test]
async fn test_create_root_spawns_node_entity() {
    let h = harness();
    let created = h.create_root("root").await;
    assert_eq!(created.status, Status::Created);
    assert_eq!(node_key(&created), 0);
    assert_eq!(created.token.as_deref(), Some("2024-01-01T00:00:00.000Z"));

    // Tree plus its root entity.
    assert_eq!(h.provider.live_ids().len(), 2);
    let tree = h.tree_json().await;
    assert_eq!(tree["root"]["label"], "root");
    assert_eq!(tree["root"]["$id"], 0);

    let again = h.create_root("other").await;
    assert_eq!(again.status, Status::Conflict);
    assert_eq!(h.provider.live_ids().len(), 2);
}

#[tokio::test]
async fn test_add_node_assigns_sequential_keys() {
    let h = harness();
    h.create_root("root").await;
    assert_eq!(node_key(&h.add(0, "a").await), 1);
    assert_eq!(node_key(&h.add(0, "b").await), 2);
    assert_eq!(node_key(&h.add(1, "c").await), 3);
    assert_eq!(h.timeline_len().await, 4);

    let tree = h.tree_json().await;
    let labels: Vec<&str> = tree["root"]["children"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["label"].as_str().unwrap())
        .collect();
    assert_eq!(labels, vec!["a", "b"]);
    assert_eq!(tree["root"]["children"][0]["children"][0]["label"], "c");
}

#[tokio::test]
async fn test_add_node_under_missing_parent() {
    let h = harness();
    h.create_root("root").await;
    let response = h.add(9, "lost").await;
    assert_eq!(response.status, Status::NotFound);
    assert_eq!(h.timeline_len().await, 1);
    // No node entity was spawned.
    assert_eq!(h.provider.live_ids().len(), 2);
}

#[tokio::test]
async fn test_operations_before_create() {
    let h = harness();
    let response = h
        .send(
            Request::add_node(0u64, json!({"label": "x"}), by("alice"))
                .with_type(TypeVersion::new("folder", "v1")),
        )
        .await;
    assert_eq!(response.status, Status::NotFound);
    assert!(h.provider.committed_keys(&h.tree).is_empty());
    assert_eq!(h.runtime.slot_count(), 0);
}

// ============================================================================
// Branches
// ============================================================================

#[tokio::test]
async fn test_diamond_allowed_cycle_rejected() {
    let h = harness();
    h.chain().await;

    let diamond = h.send(Request::add_branch(0u64, 2u64, by("alice"))).await;
    assert_eq!(diamond.status, Status::Ok);
    let len = h.timeline_len().await;

    let cycle = h.send(Request::add_branch(2u64, 1u64, by("alice"))).await;
    assert_eq!(cycle.status, Status::Conflict);
    assert_eq!(h.timeline_len().await, len);

    let tree = h.tree_json().await;
    assert_eq!(tree["root"]["children"][1], json!({"$ref": 2}));

    let decoded = DerivedTree::decode(&tree).unwrap();
    let root = decoded.root.unwrap();
    assert!(Arc::ptr_eq(&root.children[0].children[0], &root.children[1]));
    assert_eq!(root.children[1].label, "node2");
}

#[tokio::test]
async fn test_existing_branch_is_a_no_op() {
    let h = harness();
    h.chain().await;
    let before = h.timeline_len().await;
    let response = h.send(Request::add_branch(0u64, 1u64, by("alice"))).await;
    assert_eq!(response.status, Status::Ok);
    assert_eq!(h.timeline_len().await, before);

    let missing = h.send(Request::delete_branch(0u64, 2u64, by("alice"))).await;
    assert_eq!(missing.status, Status::Ok);
    assert_eq!(h.timeline_len().await, before);
}

#[tokio::test]
async fn test_root_cannot_be_a_child() {
    let h = harness();
    h.chain().await;
    let response = h.send(Request::add_branch(1u64, 0u64, by("alice"))).await;
    assert_eq!(response.status, Status::ValidationError);

    let moved = h
        .send(Request::move_branch(0u64, 0u64, 1u64, by("alice")))
        .await;
    assert_eq!(moved.status, Status::ValidationError);
}

#[tokio::test]
async fn test_delete_branch_orphans_subtree() {
    let h = harness();
    h.chain().await;
    let response = h.send(Request::delete_branch(0u64, 1u64, by("alice"))).await;
    assert_eq!(response.status, Status::Ok);
    assert_eq!(h.timeline_len().await, 4);

    let tree = h.tree_json().await;
    assert_eq!(tree["root"]["children"], json!([]));
    assert_eq!(tree["orphaned"][0]["label"], "node1");
    assert_eq!(tree["orphaned"][0]["children"][0]["label"], "node2");
}

#[tokio::test]
async fn test_move_branch() {
    let h = harness();
    h.chain().await;

    let moved = h
        .send(Request::move_branch(2u64, 1u64, 0u64, by("alice")))
        .await;
    assert_eq!(moved.status, Status::Ok);
    let tree = h.tree_json().await;
    assert_eq!(tree["root"]["children"][0]["children"], json!([]));
    assert_eq!(tree["root"]["children"][1]["label"], "node2");

    // Now 0 -> 2 -> 1.
    let reparented = h
        .send(Request::move_branch(1u64, 0u64, 2u64, by("alice")))
        .await;
    assert_eq!(reparented.status, Status::Ok);
    let cyclic = h
        .send(Request::move_branch(2u64, 0u64, 1u64, by("alice")))
        .await;
    assert_eq!(cyclic.status, Status::Conflict);
}

#[tokio::test]
async fn test_string_node_ids_are_accepted() {
    let h = harness();
    h.chain().await;
    let operation: Operation = serde_json::from_value(json!({
        "op": "add_branch",
        "parent": "0",
        "child": "2",
        "userID": "alice",
    }))
    .unwrap();
    let response = h.send(Request::new(operation)).await;
    assert_eq!(response.status, Status::Ok);
    let tree = h.tree_json().await;
    assert_eq!(tree["root"]["children"][1], json!({"$ref": 2}));
}

// ============================================================================
// Reads
// ============================================================================

#[tokio::test]
async fn test_get_tree_not_modified() {
    let h = harness();
    h.chain().await;
    let current = h.send(Request::get_tree(None)).await;
    let tail = Timestamp::parse(current.token.as_deref().unwrap()).unwrap();

    let fresh = h.send(Request::get_tree(Some(tail))).await;
    assert_eq!(fresh.status, Status::NotModified);

    h.clock.advance(1_000);
    h.add(0, "late").await;
    let stale = h.send(Request::get_tree(Some(tail))).await;
    assert_eq!(stale.status, Status::Ok);
}

#[tokio::test]
async fn test_entity_write_on_tree_rejected() {
    let h = harness();
    h.create_root("root").await;
    let response = h
        .send(Request::replace(json!({"label": "x"}), by("alice")))
        .await;
    assert_eq!(response.status, Status::ValidationError);

    let as_get = h.send(Request::get(None)).await;
    assert!(matches!(as_get.body, Body::Tree { .. }));
}

// ============================================================================
// Node operations
// ============================================================================

#[tokio::test]
async fn test_get_and_patch_node() {
    let h = harness();
    h.chain().await;

    let node = h.send(Request::get_node(1u64)).await;
    assert_eq!(node.status, Status::Ok);
    assert_eq!(node.snapshot().unwrap().value, json!({"label": "node1"}));
    let node_token = node.token.clone().unwrap();
    let before = h.timeline_len().await;

    h.clock.advance(1_000);
    let renamed = h
        .send(Request::patch_node(
            1u64,
            Delta::new().with_set("label", json!("renamed")),
            by("bob").token(node_token),
        ))
        .await;
    assert_eq!(renamed.status, Status::Ok);
    assert_eq!(h.timeline_len().await, before + 1);
    let tree = h.tree_json().await;
    assert_eq!(tree["root"]["children"][0]["label"], "renamed");

    // The patch response's token is good for the next patch.
    assert_eq!(
        renamed.token,
        Some(renamed.snapshot().unwrap().concurrency_token())
    );
    h.clock.advance(1_000);
    let other_field = h
        .send(Request::patch_node(
            1u64,
            Delta::new().with_set("color", json!("red")),
            by("carol").token(renamed.token.clone().unwrap()),
        ))
        .await;
    assert_eq!(other_field.status, Status::Ok);
    assert_eq!(
        other_field.snapshot().unwrap().value,
        json!({"label": "renamed", "color": "red"})
    );
    assert_eq!(h.timeline_len().await, before + 1);

    let node = h.send(Request::get_node(1u64)).await;
    assert_eq!(node.token, other_field.token);
}

#[tokio::test]
async fn test_patch_node_needs_node_token() {
    let h = harness();
    h.chain().await;
    let response = h
        .send(Request::patch_node(
            1u64,
            Delta::new().with_set("label", json!("x")),
            by("bob"),
        ))
        .await;
    assert_eq!(response.status, Status::PreconditionRequired);
}

#[tokio::test]
async fn test_delete_and_undelete_node() {
    let h = harness();
    h.chain().await;

    let deleted = h.send(Request::delete_node(1u64, by("bob"))).await;
    assert_eq!(deleted.status, Status::Ok);
    assert!(deleted.snapshot().unwrap().meta.deleted);

    let tree = h.tree_json().await;
    assert_eq!(tree["root"]["children"], json!([]));
    assert_eq!(tree["deleted"][0]["label"], "node1");
    assert_eq!(tree["deleted"][0]["deleted"], true);
    assert_eq!(tree["deleted"][0]["children"][0]["label"], "node2");

    let gone = h.send(Request::get_node(1u64)).await;
    assert_eq!(gone.status, Status::NotFound);

    let again = h.send(Request::delete_node(1u64, by("bob"))).await;
    assert_eq!(again.status, Status::Conflict);

    let restored = h.send(Request::undelete_node(1u64, by("bob"))).await;
    assert_eq!(restored.status, Status::Ok);
    let tree = h.tree_json().await;
    assert_eq!(tree["root"]["children"][0]["label"], "node1");
    assert_eq!(tree["deleted"], json!([]));
}

#[tokio::test]
async fn test_root_node_cannot_be_deleted() {
    let h = harness();
    h.create_root("root").await;
    let response = h.send(Request::delete_node(0u64, by("bob"))).await;
    assert_eq!(response.status, Status::ValidationError);
}

#[tokio::test]
async fn test_hard_delete_tree_keeps_node_entities() {
    let h = harness();
    h.chain().await;
    let response = h.send(Request::hard_delete()).await;
    assert_eq!(response.status, Status::Ok);
    assert!(h.provider.committed_keys(&h.tree).is_empty());
    assert_eq!(h.provider.live_ids().len(), 3);
}
