//! Structural deltas between entity values.
//!
//! A [`Delta`] maps top-level keys to one of three operations:
//! - [`DeltaOp::Remove`] deletes the key,
//! - [`DeltaOp::Merge`] recurses into a nested object,
//! - [`DeltaOp::Set`] replaces the value wholesale.
//!
//! Only JSON objects are diffed recursively. Arrays and scalars always
//! replace, so a one-element change inside an array shows up as the whole
//! new array.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A single change to one key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaOp {
    Remove,
    Set(Value),
    Merge(Delta),
}

/// A set of key-level changes that turns one object into another.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Delta(BTreeMap<String, DeltaOp>);

impl Delta {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, key: &str) -> Option<&DeltaOp> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DeltaOp)> + '_ {
        self.0.iter()
    }

    pub fn insert(&mut self, key: impl Into<String>, op: DeltaOp) {
        self.0.insert(key.into(), op);
    }

    pub fn with_remove(mut self, key: impl Into<String>) -> Self {
        self.insert(key, DeltaOp::Remove);
        self
    }

    pub fn with_set(mut self, key: impl Into<String>, value: Value) -> Self {
        self.insert(key, DeltaOp::Set(value));
        self
    }

    pub fn with_merge(mut self, key: impl Into<String>, nested: Delta) -> Self {
        self.insert(key, DeltaOp::Merge(nested));
        self
    }

    /// Read a delta from a JSON merge patch (RFC 7396).
    ///
    /// `null` removes a key, objects merge, everything else replaces.
    pub fn from_merge_patch(patch: &Value) -> Result<Self> {
        let map = patch
            .as_object()
            .ok_or_else(|| Error::Validation("delta must be an object".to_string()))?;
        Ok(Self::from_patch_map(map))
    }

    fn from_patch_map(map: &Map<String, Value>) -> Self {
        let mut delta = Delta::new();
        for (key, value) in map {
            let op = match value {
                Value::Null => DeltaOp::Remove,
                Value::Object(nested) => DeltaOp::Merge(Self::from_patch_map(nested)),
                other => DeltaOp::Set(other.clone()),
            };
            delta.insert(key.clone(), op);
        }
        delta
    }

    /// Render as a JSON merge patch. Lossy for `Set(null)`.
    pub fn to_merge_patch(&self) -> Value {
        let mut map = Map::new();
        for (key, op) in &self.0 {
            let value = match op {
                DeltaOp::Remove => Value::Null,
                DeltaOp::Set(v) => v.clone(),
                DeltaOp::Merge(nested) => nested.to_merge_patch(),
            };
            map.insert(key.clone(), value);
        }
        Value::Object(map)
    }
}

/// Compute the delta that turns `from` into `to`.
pub fn diff(from: &Map<String, Value>, to: &Map<String, Value>) -> Delta {
    let mut delta = Delta::new();

    for key in from.keys() {
        if !to.contains_key(key) {
            delta.insert(key.clone(), DeltaOp::Remove);
        }
    }

    for (key, new_value) in to {
        match from.get(key) {
            None => delta.insert(key.clone(), DeltaOp::Set(new_value.clone())),
            Some(old_value) if old_value == new_value => {}
            Some(Value::Object(old_map)) => match new_value {
                Value::Object(new_map) => {
                    delta.insert(key.clone(), DeltaOp::Merge(diff(old_map, new_map)))
                }
                _ => delta.insert(key.clone(), DeltaOp::Set(new_value.clone())),
            },
            Some(_) => delta.insert(key.clone(), DeltaOp::Set(new_value.clone())),
        }
    }

    delta
}

/// Apply `delta` to `target`, returning the new object.
pub fn apply(target: &Map<String, Value>, delta: &Delta) -> Map<String, Value> {
    let mut result = target.clone();
    for (key, op) in delta.iter() {
        match op {
            DeltaOp::Remove => {
                result.remove(key);
            }
            DeltaOp::Set(value) => {
                result.insert(key.clone(), value.clone());
            }
            DeltaOp::Merge(nested) => {
                let merged = match result.get(key) {
                    Some(Value::Object(existing)) => apply(existing, nested),
                    _ => apply(&Map::new(), nested),
                };
                result.insert(key.clone(), Value::Object(merged));
            }
        }
    }
    result
}
