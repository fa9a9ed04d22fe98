//! The hierarchical-graph engine.
//!
//! A tree is a DAG rooted at node 0. Each node's payload is a separate
//! temporal entity; the tree itself stores only:
//! - `nodes`: node key to [`NodeStub`] (denormalized label, entity id);
//! - `edges`: parent key to the ordered set of child keys;
//! - `treeMeta`: the tree's timeline and the count of keys ever allocated.
//!
//! Reverse edges and the derived presentation tree are rebuilt from those
//! and never persisted.

use crate::actor::{Actor, ActorContext, Delegate};
use crate::derived::DerivedTree;
use crate::message::{Body, Operation, Request, Response, WriteArgs};
use crate::protocol::{open_gate_recheck, Precondition, RemoteEffect};
use async_trait::async_trait;
use bts_core::{
    require_user_id, ActorId, Delta, EntityMeta, Error, NodeKey, Result, Snapshot, Status,
    Timestamp,
};
use bts_storage::ActorStorage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

pub const TREE_META_KEY: &str = "treeMeta";
pub const NODES_KEY: &str = "nodes";
pub const EDGES_KEY: &str = "edges";

/// What the tree remembers about one node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeStub {
    pub label: String,
    #[serde(rename = "nodeIDString")]
    pub node_id: ActorId,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

impl NodeStub {
    fn for_snapshot(node_id: ActorId, snapshot: &Snapshot) -> Self {
        Self {
            label: label_of(snapshot),
            node_id,
            deleted: false,
        }
    }
}

fn label_of(snapshot: &Snapshot) -> String {
    snapshot
        .value
        .get("label")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

type Edges = BTreeMap<u64, BTreeSet<u64>>;

#[derive(Debug)]
struct TreeState {
    meta: EntityMeta,
    nodes: BTreeMap<u64, NodeStub>,
    edges: Edges,
}

impl TreeState {
    fn token(&self) -> Option<String> {
        self.meta.latest().map(|t| t.to_string())
    }

    fn node_count(&self) -> u64 {
        self.meta.node_count.unwrap_or(0)
    }

    fn stub(&self, key: NodeKey) -> Result<&NodeStub> {
        if key.0 >= self.node_count() {
            return Err(Error::NotFound(format!("node {} does not exist", key)));
        }
        self.nodes
            .get(&key.0)
            .ok_or_else(|| Error::NotFound(format!("node {} does not exist", key)))
    }

    fn has_edge(&self, parent: NodeKey, child: NodeKey) -> bool {
        self.edges
            .get(&parent.0)
            .is_some_and(|children| children.contains(&child.0))
    }

    fn insert_edge(&mut self, parent: NodeKey, child: NodeKey) {
        self.edges.entry(parent.0).or_default().insert(child.0);
    }

    fn remove_edge(&mut self, parent: NodeKey, child: NodeKey) {
        if let Some(children) = self.edges.get_mut(&parent.0) {
            children.remove(&child.0);
            if children.is_empty() {
                self.edges.remove(&parent.0);
            }
        }
    }

    /// Whether a new edge `parent -> child` would close a cycle.
    ///
    /// Stored edges are acyclic, so that happens only when `child` is
    /// `parent` or one of its ancestors. Walks reverse edges up from
    /// `parent`, visiting each node once, and returns the cycle as
    /// `child, .., parent, child`.
    fn cycle_through(&self, parent: NodeKey, child: NodeKey) -> Option<Vec<u64>> {
        if parent == child {
            return Some(vec![child.0, child.0]);
        }
        let mut reverse: HashMap<u64, Vec<u64>> = HashMap::new();
        for (from, children) in &self.edges {
            for to in children {
                reverse.entry(*to).or_default().push(*from);
            }
        }

        // ancestor -> the node it was reached from
        let mut came_from: HashMap<u64, u64> = HashMap::new();
        let mut visited = HashSet::from([parent.0]);
        let mut stack = vec![parent.0];
        while let Some(node) = stack.pop() {
            for up in reverse.get(&node).into_iter().flatten() {
                if !visited.insert(*up) {
                    continue;
                }
                came_from.insert(*up, node);
                if *up == child.0 {
                    let mut path = vec![child.0];
                    let mut at = child.0;
                    while let Some(next) = came_from.get(&at) {
                        path.push(*next);
                        at = *next;
                    }
                    path.push(child.0);
                    return Some(path);
                }
                stack.push(*up);
            }
        }
        None
    }
}

/// The tree's timeline tail, read straight from storage.
struct TimelineTail<'a> {
    storage: &'a ActorStorage,
}

#[async_trait]
impl Precondition for TimelineTail<'_> {
    type Observation = Option<Timestamp>;

    async fn observe(&self) -> Result<Option<Timestamp>> {
        let meta: Option<EntityMeta> = self.storage.get(TREE_META_KEY).await?;
        Ok(meta.and_then(|m| m.latest()))
    }
}

/// Creating the entity that will hold a node's payload.
struct SpawnNode<'a> {
    delegate: &'a dyn Delegate,
    node_id: ActorId,
    request: Request,
}

#[async_trait]
impl RemoteEffect for SpawnNode<'_> {
    type Output = Snapshot;

    async fn perform(&self) -> Result<Snapshot> {
        self.delegate
            .call_expecting(&self.node_id, self.request.clone(), Status::Created)
            .await?
            .into_snapshot()
            .ok_or_else(|| Error::Storage(format!("node {} returned no snapshot", self.node_id)))
    }

    async fn compensate(&self) -> Result<()> {
        info!(node = %self.node_id, "Hard-deleting node entity");
        self.delegate
            .call_expecting(&self.node_id, Request::hard_delete(), Status::Ok)
            .await
            .map(|_| ())
    }
}

/// Tree actor. Holds only the derived-tree cache between requests.
#[derive(Default)]
pub struct Tree {
    derived: Option<(Timestamp, Arc<DerivedTree>)>,
}

fn require_value(value: Option<&Value>) -> Result<&Value> {
    value.ok_or_else(|| Error::Validation("value is required".to_string()))
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    async fn load(&self, ctx: &ActorContext) -> Result<TreeState> {
        let storage = &ctx.storage;
        Ok(TreeState {
            meta: storage
                .get(TREE_META_KEY)
                .await?
                .unwrap_or_else(EntityMeta::for_tree),
            nodes: storage.get(NODES_KEY).await?.unwrap_or_default(),
            edges: storage.get(EDGES_KEY).await?.unwrap_or_default(),
        })
    }

    /// Append `valid_from` to the timeline and write everything back.
    async fn commit(
        &mut self,
        ctx: &ActorContext,
        state: &mut TreeState,
        valid_from: Timestamp,
    ) -> Result<()> {
        self.derived = None;
        if !state.meta.push(valid_from) {
            return Err(Error::Storage(format!(
                "tree timeline would not stay increasing at {}",
                valid_from
            )));
        }
        let storage = &ctx.storage;
        storage.put(NODES_KEY, &state.nodes).await?;
        storage.put(EDGES_KEY, &state.edges).await?;
        storage.put(TREE_META_KEY, &state.meta).await?;
        Ok(())
    }

    fn meta_response(state: &TreeState) -> Response {
        Response::ok(Body::Meta(state.meta.clone()), state.token())
    }

    /// Create a node entity under the open-gate/recheck/compensate protocol.
    async fn spawn_node(
        &self,
        ctx: &ActorContext,
        value: &Value,
        write: &WriteArgs,
    ) -> Result<(ActorId, Snapshot)> {
        let node_type = ctx.config.node_type().ok_or_else(|| {
            Error::Config(format!("tree type {} has no node type", ctx.identity))
        })?;
        let node_id = ctx.delegate.allocate_id();
        let write = WriteArgs {
            token: None,
            ..write.clone()
        };
        let effect = SpawnNode {
            delegate: ctx.delegate.as_ref(),
            node_id: node_id.clone(),
            request: Request::create(value.clone(), write)
                .with_type(node_type.clone())
                .in_environment(ctx.identity.environment.clone()),
        };
        let tail = TimelineTail {
            storage: &ctx.storage,
        };
        let snapshot = open_gate_recheck(&tail, &effect).await?;
        Ok((node_id, snapshot))
    }

    pub async fn create(
        &mut self,
        ctx: &ActorContext,
        value: Option<&Value>,
        write: &WriteArgs,
    ) -> Result<Response> {
        require_user_id(&write.user_id)?;
        let value = require_value(value)?;
        let mut state = self.load(ctx).await?;
        if state.node_count() > 0 {
            return Err(Error::StateConflict(format!("tree {} already has a root", ctx.id)));
        }
        let valid_from = state.meta.next_valid_from(write.valid_from, ctx.clock.now())?;

        let (node_id, snapshot) = self.spawn_node(ctx, value, write).await?;
        state
            .nodes
            .insert(NodeKey::ROOT.0, NodeStub::for_snapshot(node_id, &snapshot));
        state.meta.node_count = Some(1);
        self.commit(ctx, &mut state, valid_from).await?;

        debug!(tree = %ctx.id, "Created tree root");
        Ok(Response::created(
            Body::Node {
                key: NodeKey::ROOT,
                snapshot,
            },
            state.token(),
        ))
    }

    pub async fn add_node(
        &mut self,
        ctx: &ActorContext,
        parent: NodeKey,
        value: Option<&Value>,
        write: &WriteArgs,
    ) -> Result<Response> {
        require_user_id(&write.user_id)?;
        let value = require_value(value)?;
        let mut state = self.load(ctx).await?;
        state.stub(parent)?;
        let valid_from = state.meta.next_valid_from(write.valid_from, ctx.clock.now())?;

        let (node_id, snapshot) = self.spawn_node(ctx, value, write).await?;
        let key = NodeKey(state.node_count());
        state
            .nodes
            .insert(key.0, NodeStub::for_snapshot(node_id, &snapshot));
        state.meta.node_count = Some(key.0 + 1);
        state.insert_edge(parent, key);
        self.commit(ctx, &mut state, valid_from).await?;

        debug!(tree = %ctx.id, %parent, node = %key, "Added node");
        Ok(Response::created(Body::Node { key, snapshot }, state.token()))
    }

    pub async fn add_branch(
        &mut self,
        ctx: &ActorContext,
        parent: NodeKey,
        child: NodeKey,
        write: &WriteArgs,
    ) -> Result<Response> {
        require_user_id(&write.user_id)?;
        let mut state = self.load(ctx).await?;
        state.stub(parent)?;
        state.stub(child)?;
        if child.is_root() {
            return Err(Error::Validation("the root cannot be a child".to_string()));
        }
        if state.has_edge(parent, child) {
            return Ok(Self::meta_response(&state));
        }
        if let Some(path) = state.cycle_through(parent, child) {
            info!(tree = %ctx.id, %parent, %child, ?path, "Rejected cyclic branch");
            return Err(Error::StateConflict(format!(
                "branch {} -> {} would create a cycle",
                parent, child
            )));
        }

        let valid_from = state.meta.next_valid_from(write.valid_from, ctx.clock.now())?;
        state.insert_edge(parent, child);
        self.commit(ctx, &mut state, valid_from).await?;
        Ok(Self::meta_response(&state))
    }

    pub async fn delete_branch(
        &mut self,
        ctx: &ActorContext,
        parent: NodeKey,
        child: NodeKey,
        write: &WriteArgs,
    ) -> Result<Response> {
        require_user_id(&write.user_id)?;
        let mut state = self.load(ctx).await?;
        state.stub(parent)?;
        state.stub(child)?;
        if !state.has_edge(parent, child) {
            return Ok(Self::meta_response(&state));
        }

        let valid_from = state.meta.next_valid_from(write.valid_from, ctx.clock.now())?;
        state.remove_edge(parent, child);
        self.commit(ctx, &mut state, valid_from).await?;
        Ok(Self::meta_response(&state))
    }

    pub async fn move_branch(
        &mut self,
        ctx: &ActorContext,
        child: NodeKey,
        current_parent: NodeKey,
        new_parent: NodeKey,
        write: &WriteArgs,
    ) -> Result<Response> {
        require_user_id(&write.user_id)?;
        let mut state = self.load(ctx).await?;
        state.stub(child)?;
        state.stub(current_parent)?;
        state.stub(new_parent)?;
        if child.is_root() {
            return Err(Error::Validation("the root cannot be moved".to_string()));
        }

        let removes = current_parent != new_parent && state.has_edge(current_parent, child);
        let adds = !state.has_edge(new_parent, child);
        if !removes && !adds {
            return Ok(Self::meta_response(&state));
        }
        if adds && state.cycle_through(new_parent, child).is_some() {
            info!(tree = %ctx.id, %new_parent, %child, "Rejected cyclic move");
            return Err(Error::StateConflict(format!(
                "moving {} under {} would create a cycle",
                child, new_parent
            )));
        }

        let valid_from = state.meta.next_valid_from(write.valid_from, ctx.clock.now())?;
        if removes {
            state.remove_edge(current_parent, child);
        }
        if adds {
            state.insert_edge(new_parent, child);
        }
        self.commit(ctx, &mut state, valid_from).await?;
        Ok(Self::meta_response(&state))
    }

    /// The derived tree for `state`, rebuilt only when the timeline moved.
    fn derive(&mut self, state: &TreeState) -> Arc<DerivedTree> {
        if let (Some((tail, tree)), Some(latest)) = (&self.derived, state.meta.latest()) {
            if *tail == latest {
                return tree.clone();
            }
        }
        let tree = Arc::new(DerivedTree::derive(&state.nodes, &state.edges));
        if let Some(latest) = state.meta.latest() {
            self.derived = Some((latest, tree.clone()));
        }
        tree
    }

    pub async fn get_tree(
        &mut self,
        ctx: &ActorContext,
        since: Option<Timestamp>,
    ) -> Result<Response> {
        let state = self.load(ctx).await?;
        if state.meta.timeline.is_empty() {
            return Err(Error::NotFound(format!("tree {} has no root", ctx.id)));
        }
        if !state.meta.modified_since(since) {
            return Ok(Response::not_modified(state.token()));
        }
        let tree = self.derive(&state).encode();
        let token = state.token();
        Ok(Response::ok(
            Body::Tree {
                meta: state.meta,
                tree,
            },
            token,
        ))
    }

    pub async fn get_meta(
        &mut self,
        ctx: &ActorContext,
        since: Option<Timestamp>,
    ) -> Result<Response> {
        let state = self.load(ctx).await?;
        if state.meta.timeline.is_empty() {
            return Err(Error::NotFound(format!("tree {} has no root", ctx.id)));
        }
        if !state.meta.modified_since(since) {
            return Ok(Response::not_modified(state.token()));
        }
        Ok(Self::meta_response(&state))
    }

    pub async fn get_node(&mut self, ctx: &ActorContext, key: NodeKey) -> Result<Response> {
        let state = self.load(ctx).await?;
        let stub = state.stub(key)?;
        let response = ctx
            .delegate
            .call_expecting(&stub.node_id, Request::get(None), Status::Ok)
            .await?;
        let token = response.token.clone();
        let snapshot = response
            .into_snapshot()
            .ok_or_else(|| Error::Storage(format!("node {} returned no snapshot", key)))?;
        Ok(Response::ok(Body::Node { key, snapshot }, token))
    }

    /// Patch a node's entity. The tree timeline only moves when the label
    /// it keeps a copy of changes; the response carries the node's token.
    pub async fn patch_node(
        &mut self,
        ctx: &ActorContext,
        key: NodeKey,
        delta: &Delta,
        write: &WriteArgs,
    ) -> Result<Response> {
        require_user_id(&write.user_id)?;
        let mut state = self.load(ctx).await?;
        let node_id = state.stub(key)?.node_id.clone();
        let valid_from = state.meta.next_valid_from(write.valid_from, ctx.clock.now())?;

        let snapshot = ctx
            .delegate
            .call_expecting(&node_id, Request::patch(delta.clone(), write.clone()), Status::Ok)
            .await?
            .into_snapshot()
            .ok_or_else(|| Error::Storage(format!("node {} returned no snapshot", key)))?;

        let label = label_of(&snapshot);
        if let Some(stub) = state.nodes.get_mut(&key.0) {
            if stub.label != label {
                stub.label = label;
                self.commit(ctx, &mut state, valid_from).await?;
            }
        }
        // The next patch needs the node's token, not the tree's.
        let token = snapshot.concurrency_token();
        Ok(Response::ok(Body::Node { key, snapshot }, Some(token)))
    }

    async fn set_node_deleted(
        &mut self,
        ctx: &ActorContext,
        key: NodeKey,
        write: &WriteArgs,
        deleted: bool,
    ) -> Result<Response> {
        require_user_id(&write.user_id)?;
        if key.is_root() {
            return Err(Error::Validation(
                "the root node cannot be deleted".to_string(),
            ));
        }
        let mut state = self.load(ctx).await?;
        let node_id = state.stub(key)?.node_id.clone();
        let valid_from = state.meta.next_valid_from(write.valid_from, ctx.clock.now())?;

        let request = if deleted {
            Request::delete(write.clone())
        } else {
            Request::undelete(write.clone())
        };
        let snapshot = ctx
            .delegate
            .call_expecting(&node_id, request, Status::Ok)
            .await?
            .into_snapshot()
            .ok_or_else(|| Error::Storage(format!("node {} returned no snapshot", key)))?;

        if let Some(stub) = state.nodes.get_mut(&key.0) {
            stub.deleted = deleted;
        }
        self.commit(ctx, &mut state, valid_from).await?;
        Ok(Response::ok(Body::Node { key, snapshot }, state.token()))
    }

    pub async fn hard_delete(&mut self, ctx: &ActorContext) -> Result<Response> {
        let storage = &ctx.storage;
        if storage.get::<EntityMeta>(TREE_META_KEY).await?.is_none() {
            return Err(Error::NotFound(format!("tree {} has no root", ctx.id)));
        }
        storage.delete_all().await?;
        self.derived = None;
        info!(tree = %ctx.id, "Wiped tree storage");
        Ok(Response::ok(Body::Empty, None))
    }
}

#[async_trait]
impl Actor for Tree {
    async fn handle(&mut self, request: &Request, ctx: &ActorContext) -> Result<Response> {
        match &request.operation {
            Operation::TreeCreate { value, write } => self.create(ctx, value.as_ref(), write).await,
            Operation::AddNode {
                value,
                parent,
                write,
            } => self.add_node(ctx, *parent, value.as_ref(), write).await,
            Operation::AddBranch {
                parent,
                child,
                write,
            } => self.add_branch(ctx, *parent, *child, write).await,
            Operation::DeleteBranch {
                parent,
                child,
                write,
            } => self.delete_branch(ctx, *parent, *child, write).await,
            Operation::MoveBranch {
                child,
                current_parent,
                new_parent,
                write,
            } => {
                self.move_branch(ctx, *child, *current_parent, *new_parent, write)
                    .await
            }
            Operation::GetTree { if_modified_since } | Operation::Get { if_modified_since } => {
                self.get_tree(ctx, *if_modified_since).await
            }
            Operation::GetMeta { if_modified_since } => {
                self.get_meta(ctx, *if_modified_since).await
            }
            Operation::GetNode { node } => self.get_node(ctx, *node).await,
            Operation::PatchNode { node, delta, write } => {
                self.patch_node(ctx, *node, delta, write).await
            }
            Operation::DeleteNode { node, write } => {
                self.set_node_deleted(ctx, *node, write, true).await
            }
            Operation::UndeleteNode { node, write } => {
                self.set_node_deleted(ctx, *node, write, false).await
            }
            Operation::HardDelete => self.hard_delete(ctx).await,
            other => Err(Error::Validation(format!(
                "{} is not a tree operation",
                other.name()
            ))),
        }
    }
}
