//! Timeline-indexed snapshot persistence.
//!
//! Each snapshot lives under `snapshot-<validFrom>`; the entity meta record
//! holds the timeline that indexes them. The backing store cannot scan keys
//! in order, so every lookup goes through the timeline.

use crate::store::ActorStorage;
use bts_core::{EntityMeta, Error, Result, Snapshot, Timestamp};

/// Key of the [`EntityMeta`] record.
pub const META_KEY: &str = "entityMeta";

fn snapshot_key(valid_from: Timestamp) -> String {
    format!("snapshot-{}", valid_from)
}

/// Append-only snapshot storage for one entity.
#[derive(Clone, Debug)]
pub struct SnapshotStore {
    storage: ActorStorage,
}

impl SnapshotStore {
    pub fn new(storage: ActorStorage) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &ActorStorage {
        &self.storage
    }

    pub async fn meta(&self) -> Result<Option<EntityMeta>> {
        Ok(self.storage.get(META_KEY).await?)
    }

    pub async fn put_meta(&self, meta: &EntityMeta) -> Result<()> {
        Ok(self.storage.put(META_KEY, meta).await?)
    }

    /// Load the snapshot a timeline entry points at.
    pub async fn snapshot(&self, valid_from: Timestamp) -> Result<Snapshot> {
        self.storage
            .get(&snapshot_key(valid_from))
            .await?
            .ok_or_else(|| {
                Error::Storage(format!("timeline names missing snapshot {}", valid_from))
            })
    }

    /// Write a snapshot under its own `validFrom`, replacing any previous
    /// occupant of that slot.
    pub async fn put_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let key = snapshot_key(snapshot.meta.valid_from);
        Ok(self.storage.put(&key, snapshot).await?)
    }

    /// The snapshot at the timeline tail.
    pub async fn current(&self, meta: &EntityMeta) -> Result<Option<Snapshot>> {
        match meta.latest() {
            Some(latest) => Ok(Some(self.snapshot(latest).await?)),
            None => Ok(None),
        }
    }

    /// The snapshot whose validity interval contains `t`.
    pub async fn as_of(&self, meta: &EntityMeta, t: Timestamp) -> Result<Option<Snapshot>> {
        let idx = meta.timeline.partition_point(|valid_from| *valid_from <= t);
        if idx == 0 {
            return Ok(None);
        }
        Ok(Some(self.snapshot(meta.timeline[idx - 1]).await?))
    }

    /// Every snapshot, oldest first.
    pub async fn history(&self, meta: &EntityMeta) -> Result<Vec<Snapshot>> {
        let mut snapshots = Vec::with_capacity(meta.timeline.len());
        for valid_from in &meta.timeline {
            snapshots.push(self.snapshot(*valid_from).await?);
        }
        Ok(snapshots)
    }
}
