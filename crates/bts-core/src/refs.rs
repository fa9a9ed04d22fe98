//! Shared-reference encoding for DAG-shaped values.
//!
//! A node that is reachable along several paths is written in full once,
//! tagged with `"$id": n`. Every later occurrence is the stub
//! `{"$ref": n}`. Values written this way can describe graphs, so anything
//! accepted into an entity is checked to be acyclic first.

use crate::error::{Error, Result};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

pub const ID_KEY: &str = "$id";
pub const REF_KEY: &str = "$ref";

/// Emits each node once and back-references afterwards.
#[derive(Debug, Default)]
pub struct RefEncoder {
    emitted: HashSet<u64>,
}

impl RefEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode the node `id`, building its fields only on first sight.
    pub fn encode_node<F>(&mut self, id: u64, build: F) -> Value
    where
        F: FnOnce(&mut Self) -> Map<String, Value>,
    {
        if !self.emitted.insert(id) {
            let mut stub = Map::new();
            stub.insert(REF_KEY.to_string(), Value::from(id));
            return Value::Object(stub);
        }
        let mut fields = build(self);
        fields.insert(ID_KEY.to_string(), Value::from(id));
        Value::Object(fields)
    }
}

fn tag(map: &Map<String, Value>, key: &str) -> Result<Option<u64>> {
    match map.get(key) {
        None => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| Error::Validation(format!("{} must be a non-negative integer", key))),
    }
}

#[derive(Default)]
struct RefGraph {
    ids: HashSet<u64>,
    edges: HashMap<u64, Vec<u64>>,
    refs: Vec<u64>,
}

impl RefGraph {
    fn walk(&mut self, value: &Value, owner: Option<u64>) -> Result<()> {
        match value {
            Value::Array(items) => {
                for item in items {
                    self.walk(item, owner)?;
                }
                Ok(())
            }
            Value::Object(map) => {
                if let Some(target) = tag(map, REF_KEY)? {
                    self.refs.push(target);
                    if let Some(owner) = owner {
                        self.edges.entry(owner).or_default().push(target);
                    }
                    return Ok(());
                }
                let mut owner = owner;
                if let Some(id) = tag(map, ID_KEY)? {
                    if !self.ids.insert(id) {
                        return Err(Error::Validation(format!("duplicate {} {}", ID_KEY, id)));
                    }
                    if let Some(parent) = owner {
                        self.edges.entry(parent).or_default().push(id);
                    }
                    owner = Some(id);
                }
                for (key, child) in map {
                    if key != ID_KEY {
                        self.walk(child, owner)?;
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Iterative three-colour DFS.
    fn find_cycle(&self) -> Option<u64> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Active,
            Done,
        }
        let mut marks: HashMap<u64, Mark> = HashMap::new();
        let mut starts: Vec<u64> = self.ids.iter().copied().collect();
        starts.sort_unstable();

        for start in starts {
            if marks.contains_key(&start) {
                continue;
            }
            let mut stack: Vec<(u64, usize)> = vec![(start, 0)];
            marks.insert(start, Mark::Active);
            while let Some((node, next)) = stack.pop() {
                let children = self.edges.get(&node).map(Vec::as_slice).unwrap_or(&[]);
                if next < children.len() {
                    stack.push((node, next + 1));
                    let child = children[next];
                    match marks.get(&child) {
                        Some(Mark::Active) => return Some(child),
                        Some(Mark::Done) => {}
                        None => {
                            marks.insert(child, Mark::Active);
                            stack.push((child, 0));
                        }
                    }
                } else {
                    marks.insert(node, Mark::Done);
                }
            }
        }
        None
    }
}

/// Reject values whose `$id`/`$ref` graph has a cycle or a dangling reference.
pub fn check_acyclic(value: &Value) -> Result<()> {
    let mut graph = RefGraph::default();
    graph.walk(value, None)?;

    if let Some(missing) = graph.refs.iter().find(|r| !graph.ids.contains(r)) {
        return Err(Error::Validation(format!(
            "{} {} does not name any {}",
            REF_KEY, missing, ID_KEY
        )));
    }
    if let Some(node) = graph.find_cycle() {
        return Err(Error::Validation(format!(
            "value is not a DAG: cycle through {} {}",
            ID_KEY, node
        )));
    }
    Ok(())
}
