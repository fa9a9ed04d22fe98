//! Identifiers for actors and tree nodes.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use ulid::Ulid;

/// Opaque address of an actor.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(pub String);

impl ActorId {
    /// Allocate a fresh, time-ordered id.
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ActorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ActorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A tree-local node id.
///
/// Requests may carry node ids as numbers or as strings; both normalise
/// through their string form, so `"7"` and `7` name the same node and `"0"`
/// is always the root.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(pub u64);

impl NodeKey {
    pub const ROOT: NodeKey = NodeKey(0);

    pub fn is_root(&self) -> bool {
        self.0 == 0
    }

    pub fn parse(s: &str) -> Option<Self> {
        s.trim().parse::<u64>().ok().map(NodeKey)
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeKey {
    fn from(id: u64) -> Self {
        NodeKey(id)
    }
}

impl Serialize for NodeKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for NodeKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct NodeKeyVisitor;

        impl Visitor<'_> for NodeKeyVisitor {
            type Value = NodeKey;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a non-negative integer node id, as a number or a string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<NodeKey, E> {
                NodeKey::parse(&v.to_string()).ok_or_else(|| E::custom("invalid node id"))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<NodeKey, E> {
                NodeKey::parse(&v.to_string())
                    .ok_or_else(|| E::custom(format!("invalid node id {}", v)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<NodeKey, E> {
                NodeKey::parse(v).ok_or_else(|| E::custom(format!("invalid node id {:?}", v)))
            }
        }

        deserializer.deserialize_any(NodeKeyVisitor)
    }
}
