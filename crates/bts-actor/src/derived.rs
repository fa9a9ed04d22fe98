//! The presentation form of a tree.
//!
//! Stubs and edges are flattened into [`TreeNode`]s. A node reachable along
//! several paths is built once and shared through `Arc`, and the `$id`/`$ref`
//! encoding keeps that sharing on the wire.

use crate::tree::NodeStub;
use bts_core::{ActorId, Error, NodeKey, RefEncoder, Result, ID_KEY, REF_KEY};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

#[derive(Debug, PartialEq)]
pub struct TreeNode {
    pub key: NodeKey,
    pub label: String,
    pub node_id: ActorId,
    pub deleted: bool,
    pub children: Vec<Arc<TreeNode>>,
}

/// Every stub of a tree, split three ways.
#[derive(Debug, Default)]
pub struct DerivedTree {
    /// Nodes reachable from the root through live stubs.
    pub root: Option<Arc<TreeNode>>,
    /// Subtrees hanging under a deleted stub.
    pub deleted: Vec<Arc<TreeNode>>,
    /// Everything neither walk reached.
    pub orphaned: Vec<Arc<TreeNode>>,
}

struct Builder<'a> {
    nodes: &'a BTreeMap<u64, NodeStub>,
    edges: &'a BTreeMap<u64, BTreeSet<u64>>,
    built: Built,
}

type Built = HashMap<u64, Arc<TreeNode>>;

impl Builder<'_> {
    /// Children under deleted stubs are cut off and picked up later as
    /// roots of the deleted bucket.
    fn build(&mut self, key: u64) -> Option<Arc<TreeNode>> {
        if let Some(node) = self.built.get(&key) {
            return Some(node.clone());
        }
        let (nodes, edges) = (self.nodes, self.edges);
        let stub = nodes.get(&key)?;
        let mut children = Vec::new();
        for child in edges.get(&key).into_iter().flatten() {
            if nodes.get(child).is_some_and(|c| !c.deleted) {
                children.extend(self.build(*child));
            }
        }
        let node = Arc::new(TreeNode {
            key: NodeKey(key),
            label: stub.label.clone(),
            node_id: stub.node_id.clone(),
            deleted: stub.deleted,
            children,
        });
        self.built.insert(key, node.clone());
        Some(node)
    }

    /// Build, round by round, every unvisited stub accepted by `is_root`
    /// until a round finds none.
    fn sweep<F>(&mut self, is_root: F) -> Vec<Arc<TreeNode>>
    where
        F: Fn(&Built, u64, &NodeStub) -> bool,
    {
        let nodes = self.nodes;
        let mut roots = Vec::new();
        loop {
            let round: Vec<u64> = nodes
                .iter()
                .filter(|(key, stub)| {
                    !self.built.contains_key(*key) && is_root(&self.built, **key, *stub)
                })
                .map(|(key, _)| *key)
                .collect();
            if round.is_empty() {
                return roots;
            }
            for key in round {
                if !self.built.contains_key(&key) {
                    roots.extend(self.build(key));
                }
            }
        }
    }
}

impl DerivedTree {
    pub fn derive(
        nodes: &BTreeMap<u64, NodeStub>,
        edges: &BTreeMap<u64, BTreeSet<u64>>,
    ) -> Self {
        let mut parents: HashMap<u64, Vec<u64>> = HashMap::new();
        for (parent, children) in edges {
            for child in children {
                parents.entry(*child).or_default().push(*parent);
            }
        }

        let mut builder = Builder {
            nodes,
            edges,
            built: HashMap::new(),
        };
        let root = builder.build(NodeKey::ROOT.0);

        let deleted = builder.sweep(|built, key, stub| {
            stub.deleted
                && parents
                    .get(&key)
                    .is_some_and(|ps| ps.iter().any(|p| built.contains_key(p)))
        });
        // In an acyclic graph some unvisited stub always has every parent
        // visited, so each round makes progress.
        let orphaned = builder.sweep(|built, key, _| {
            parents
                .get(&key)
                .map_or(true, |ps| ps.iter().all(|p| built.contains_key(p)))
        });

        Self {
            root,
            deleted,
            orphaned,
        }
    }

    /// Total distinct nodes across all three parts.
    pub fn node_count(&self) -> usize {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&Arc<TreeNode>> = self
            .root
            .iter()
            .chain(&self.deleted)
            .chain(&self.orphaned)
            .collect();
        while let Some(node) = stack.pop() {
            if seen.insert(node.key) {
                stack.extend(&node.children);
            }
        }
        seen.len()
    }

    pub fn encode(&self) -> Value {
        let mut encoder = RefEncoder::new();
        let root = match &self.root {
            Some(node) => encode_node(&mut encoder, node),
            None => Value::Null,
        };
        let deleted: Vec<Value> = self
            .deleted
            .iter()
            .map(|n| encode_node(&mut encoder, n))
            .collect();
        let orphaned: Vec<Value> = self
            .orphaned
            .iter()
            .map(|n| encode_node(&mut encoder, n))
            .collect();

        let mut out = Map::new();
        out.insert("root".to_string(), root);
        out.insert("deleted".to_string(), Value::Array(deleted));
        out.insert("orphaned".to_string(), Value::Array(orphaned));
        Value::Object(out)
    }

    /// Rebuild from [`encode`](Self::encode) output, restoring shared nodes.
    pub fn decode(value: &Value) -> Result<Self> {
        let mut decoder = Decoder::default();
        let root = match value.get("root") {
            None | Some(Value::Null) => None,
            Some(node) => Some(decoder.node(node)?),
        };
        let deleted = decoder.list(value.get("deleted"))?;
        let orphaned = decoder.list(value.get("orphaned"))?;
        Ok(Self {
            root,
            deleted,
            orphaned,
        })
    }
}

fn encode_node(encoder: &mut RefEncoder, node: &Arc<TreeNode>) -> Value {
    encoder.encode_node(node.key.0, |encoder| {
        let mut fields = Map::new();
        fields.insert("label".to_string(), Value::from(node.label.clone()));
        fields.insert("nodeID".to_string(), Value::from(node.node_id.as_str()));
        if node.deleted {
            fields.insert("deleted".to_string(), Value::Bool(true));
        }
        let children = node
            .children
            .iter()
            .map(|child| encode_node(encoder, child))
            .collect();
        fields.insert("children".to_string(), Value::Array(children));
        fields
    })
}

#[derive(Default)]
struct Decoder {
    seen: HashMap<u64, Arc<TreeNode>>,
}

fn malformed(what: &str) -> Error {
    Error::Serialization(format!("malformed tree: {}", what))
}

impl Decoder {
    fn list(&mut self, value: Option<&Value>) -> Result<Vec<Arc<TreeNode>>> {
        match value {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => items.iter().map(|item| self.node(item)).collect(),
            Some(_) => Err(malformed("expected an array of nodes")),
        }
    }

    fn node(&mut self, value: &Value) -> Result<Arc<TreeNode>> {
        let map = value.as_object().ok_or_else(|| malformed("node is not an object"))?;
        if let Some(target) = map.get(REF_KEY) {
            let target = target.as_u64().ok_or_else(|| malformed("bad $ref"))?;
            return self
                .seen
                .get(&target)
                .cloned()
                .ok_or_else(|| malformed("$ref before its $id"));
        }

        let key = map
            .get(ID_KEY)
            .and_then(Value::as_u64)
            .ok_or_else(|| malformed("node without $id"))?;
        let label = map.get("label").and_then(Value::as_str).unwrap_or_default();
        let node_id = map
            .get("nodeID")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("node without nodeID"))?;
        let children = self.list(map.get("children"))?;

        let node = Arc::new(TreeNode {
            key: NodeKey(key),
            label: label.to_string(),
            node_id: ActorId::from_string(node_id),
            deleted: map.get("deleted").and_then(Value::as_bool).unwrap_or(false),
            children,
        });
        self.seen.insert(key, node.clone());
        Ok(node)
    }
}
