//! Snapshots and per-actor timeline metadata.

use crate::delta::Delta;
use crate::error::{Error, Result};
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Timeline bookkeeping for one actor.
///
/// `timeline` holds one `validFrom` per snapshot, strictly increasing. The
/// backing store has no ordered scan, so this list is the only index.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMeta {
    pub timeline: Vec<Timestamp>,
    /// Number of node ids ever allocated. Trees only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_count: Option<u64>,
}

impl EntityMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_tree() -> Self {
        Self {
            timeline: Vec::new(),
            node_count: Some(0),
        }
    }

    pub fn latest(&self) -> Option<Timestamp> {
        self.timeline.last().copied()
    }

    /// Returns false when the caller's token already covers the latest write.
    pub fn modified_since(&self, token: Option<Timestamp>) -> bool {
        match (token, self.latest()) {
            (Some(token), Some(latest)) => latest > token,
            _ => true,
        }
    }

    /// Pick the `validFrom` of the next write.
    ///
    /// A requested time must lie after the timeline tail. Without one, `now`
    /// is used, bumped to one millisecond past the tail when it would not be.
    pub fn next_valid_from(
        &self,
        requested: Option<Timestamp>,
        now: Timestamp,
    ) -> Result<Timestamp> {
        let valid_from = match (requested, self.latest()) {
            (Some(t), Some(last)) if t <= last => {
                return Err(Error::Validation(format!(
                    "validFrom {} must be after {}",
                    t, last
                )));
            }
            (Some(t), _) => t,
            (None, Some(last)) if now <= last => last.plus_millis(1),
            (None, _) => now,
        };
        if valid_from >= Timestamp::end_of_time() {
            return Err(Error::Validation(format!(
                "validFrom {} is not before the end of time",
                valid_from
            )));
        }
        Ok(valid_from)
    }

    /// Append a timestamp, keeping the timeline strictly increasing.
    pub fn push(&mut self, valid_from: Timestamp) -> bool {
        if self.latest().is_some_and(|last| valid_from <= last) {
            return false;
        }
        self.timeline.push(valid_from);
        true
    }
}

/// Metadata recorded with every snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMeta {
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(rename = "impersonatorID", default, skip_serializing_if = "Option::is_none")]
    pub impersonator_id: Option<String>,
    pub valid_from: Timestamp,
    pub valid_to: Timestamp,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
    /// Delta that turns this snapshot's value back into the prior one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_values: Option<Delta>,
    #[serde(rename = "type")]
    pub type_name: String,
    pub version: String,
}

/// One immutable version of an entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub value: Value,
    pub meta: SnapshotMeta,
}

impl Snapshot {
    /// Whether this is the current version (its `validTo` is end-of-time).
    pub fn is_open(&self) -> bool {
        self.meta.valid_to.is_end_of_time()
    }

    /// The opaque token a writer must echo back to replace this version.
    pub fn concurrency_token(&self) -> String {
        self.meta.valid_from.to_string()
    }

    pub fn covers(&self, t: Timestamp) -> bool {
        self.meta.valid_from <= t && t < self.meta.valid_to
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_timeline_push_is_strict() {
        let mut meta = EntityMeta::new();
        assert!(meta.push(Timestamp::from_millis(10)));
        assert!(!meta.push(Timestamp::from_millis(10)));
        assert!(!meta.push(Timestamp::from_millis(9)));
        assert!(meta.push(Timestamp::from_millis(11)));
        assert_eq!(meta.timeline.len(), 2);
    }

    #[test]
    fn test_modified_since() {
        let mut meta = EntityMeta::new();
        meta.push(Timestamp::from_millis(10));
        assert!(meta.modified_since(None));
        assert!(meta.modified_since(Some(Timestamp::from_millis(9))));
        assert!(!meta.modified_since(Some(Timestamp::from_millis(10))));
        assert!(!meta.modified_since(Some(Timestamp::from_millis(11))));
    }

    #[test]
    fn test_next_valid_from() {
        let mut meta = EntityMeta::new();
        let now = Timestamp::from_millis(100);
        assert_eq!(meta.next_valid_from(None, now).unwrap(), now);

        meta.push(Timestamp::from_millis(100));
        // Clock has not moved: bump past the tail.
        assert_eq!(
            meta.next_valid_from(None, now).unwrap(),
            Timestamp::from_millis(101)
        );
        assert!(matches!(
            meta.next_valid_from(Some(Timestamp::from_millis(100)), now),
            Err(Error::Validation(_))
        ));
        assert_eq!(
            meta.next_valid_from(Some(Timestamp::from_millis(150)), now)
                .unwrap(),
            Timestamp::from_millis(150)
        );
        assert!(meta
            .next_valid_from(Some(Timestamp::end_of_time()), now)
            .is_err());
    }

    #[test]
    fn test_snapshot_wire_names() {
        let snapshot = Snapshot {
            value: json!({"a": 1}),
            meta: SnapshotMeta {
                user_id: "u1".to_string(),
                impersonator_id: None,
                valid_from: Timestamp::from_millis(1_704_067_200_000),
                valid_to: Timestamp::end_of_time(),
                deleted: false,
                previous_values: None,
                type_name: "widget".to_string(),
                version: "v1".to_string(),
            },
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["meta"]["userID"], "u1");
        assert_eq!(json["meta"]["validFrom"], "2024-01-01T00:00:00.000Z");
        assert_eq!(json["meta"]["validTo"], "9999-01-01T00:00:00.000Z");
        assert_eq!(json["meta"]["type"], "widget");
        assert!(json["meta"].get("deleted").is_none());
        assert!(snapshot.is_open());
        assert_eq!(snapshot.concurrency_token(), "2024-01-01T00:00:00.000Z");
    }
}
