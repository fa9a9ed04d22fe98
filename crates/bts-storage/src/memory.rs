//! In-memory storage backend.

use crate::error::{Result, StorageError};
use crate::store::{ActorStorage, KeyValueStore, StorageProvider};
use async_trait::async_trait;
use bts_core::ActorId;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::trace;

/// Uncommitted writes. `None` marks a deletion.
#[derive(Debug, Default)]
struct Overlay {
    writes: HashMap<String, Option<Value>>,
    cleared: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    committed: HashMap<String, Value>,
    pending: Option<Overlay>,
}

impl MemoryState {
    fn visible(&self, key: &str) -> Option<&Value> {
        if let Some(overlay) = &self.pending {
            if let Some(write) = overlay.writes.get(key) {
                return write.as_ref();
            }
            if overlay.cleared {
                return None;
            }
        }
        self.committed.get(key)
    }

    fn visible_keys(&self) -> BTreeSet<&str> {
        let mut keys: BTreeSet<&str> = BTreeSet::new();
        let cleared = self.pending.as_ref().is_some_and(|o| o.cleared);
        if !cleared {
            keys.extend(self.committed.keys().map(String::as_str));
        }
        if let Some(overlay) = &self.pending {
            for (key, write) in &overlay.writes {
                match write {
                    Some(_) => keys.insert(key.as_str()),
                    None => keys.remove(key.as_str()),
                };
            }
        }
        keys
    }
}

/// A single actor's storage held in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed keys, sorted. Uncommitted writes are not included.
    pub fn committed_keys(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut keys: Vec<_> = state.committed.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.state.lock().visible(key).cloned())
    }

    async fn put(&self, key: &str, value: Value) -> Result<()> {
        let mut state = self.state.lock();
        match state.pending.as_mut() {
            Some(overlay) => {
                overlay.writes.insert(key.to_string(), Some(value));
            }
            None => {
                state.committed.insert(key.to_string(), value);
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut state = self.state.lock();
        let existed = state.visible(key).is_some();
        match state.pending.as_mut() {
            Some(overlay) => {
                overlay.writes.insert(key.to_string(), None);
            }
            None => {
                state.committed.remove(key);
            }
        }
        Ok(existed)
    }

    async fn delete_all(&self) -> Result<()> {
        let mut state = self.state.lock();
        match state.pending.as_mut() {
            Some(overlay) => {
                overlay.writes.clear();
                overlay.cleared = true;
            }
            None => state.committed.clear(),
        }
        Ok(())
    }

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.state.lock().visible_keys().is_empty())
    }

    async fn begin(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.pending.is_some() {
            return Err(StorageError::Transaction(
                "a transaction is already open".to_string(),
            ));
        }
        state.pending = Some(Overlay::default());
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let mut state = self.state.lock();
        let overlay = state
            .pending
            .take()
            .ok_or_else(|| StorageError::Transaction("no open transaction".to_string()))?;
        trace!(
            writes = overlay.writes.len(),
            cleared = overlay.cleared,
            "Committing overlay"
        );
        if overlay.cleared {
            state.committed.clear();
        }
        for (key, write) in overlay.writes {
            match write {
                Some(value) => {
                    state.committed.insert(key, value);
                }
                None => {
                    state.committed.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let mut state = self.state.lock();
        match state.pending.take() {
            Some(overlay) => {
                trace!(writes = overlay.writes.len(), "Discarding overlay");
                Ok(())
            }
            None => Err(StorageError::Transaction("no open transaction".to_string())),
        }
    }

    fn in_transaction(&self) -> bool {
        self.state.lock().pending.is_some()
    }
}

/// Keeps one [`MemoryStore`] per actor id for the life of the process.
#[derive(Debug, Default)]
pub struct MemoryStorageProvider {
    stores: Mutex<HashMap<ActorId, Arc<MemoryStore>>>,
}

impl MemoryStorageProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct access to an actor's backing store, if it was ever opened.
    pub fn store(&self, id: &ActorId) -> Option<Arc<MemoryStore>> {
        self.stores.lock().get(id).cloned()
    }

    /// Committed keys of `id`, empty when it has no store.
    pub fn committed_keys(&self, id: &ActorId) -> Vec<String> {
        self.store(id)
            .map(|store| store.committed_keys())
            .unwrap_or_default()
    }

    /// Number of stores currently held.
    pub fn store_count(&self) -> usize {
        self.stores.lock().len()
    }

    /// Ids whose committed storage is non-empty.
    pub fn live_ids(&self) -> Vec<ActorId> {
        let stores = self.stores.lock();
        let mut ids: Vec<_> = stores
            .iter()
            .filter(|(_, store)| !store.committed_keys().is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

impl StorageProvider for MemoryStorageProvider {
    fn open(&self, id: &ActorId) -> ActorStorage {
        let store = self
            .stores
            .lock()
            .entry(id.clone())
            .or_insert_with(|| Arc::new(MemoryStore::new()))
            .clone();
        ActorStorage::from_arc(store)
    }

    /// Drops the store for `id` once it is empty and nobody else holds it.
    fn release(&self, id: &ActorId) {
        let mut stores = self.stores.lock();
        let idle = stores.get(id).is_some_and(|store| {
            Arc::strong_count(store) == 1
                && !store.in_transaction()
                && store.committed_keys().is_empty()
        });
        if idle {
            stores.remove(id);
            trace!(%id, "Released empty store");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_autocommit_outside_transaction() {
        let store = MemoryStore::new();
        store.put("a", json!(1)).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(json!(1)));
        assert_eq!(store.committed_keys(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = MemoryStore::new();
        store.put("keep", json!(true)).await.unwrap();

        store.begin().await.unwrap();
        store.put("a", json!(1)).await.unwrap();
        assert!(store.delete("keep").await.unwrap());
        assert_eq!(store.get("a").await.unwrap(), Some(json!(1)));
        assert_eq!(store.get("keep").await.unwrap(), None);
        store.rollback().await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), None);
        assert_eq!(store.get("keep").await.unwrap(), Some(json!(true)));
    }

    #[tokio::test]
    async fn test_commit_applies_clear_then_writes() {
        let store = MemoryStore::new();
        store.put("old", json!(1)).await.unwrap();

        store.begin().await.unwrap();
        store.delete_all().await.unwrap();
        assert!(store.is_empty().await.unwrap());
        store.put("new", json!(2)).await.unwrap();
        assert!(!store.is_empty().await.unwrap());
        store.commit().await.unwrap();

        assert_eq!(store.committed_keys(), vec!["new".to_string()]);
    }

    #[tokio::test]
    async fn test_nested_begin_rejected() {
        let store = MemoryStore::new();
        store.begin().await.unwrap();
        assert!(matches!(
            store.begin().await,
            Err(StorageError::Transaction(_))
        ));
        assert!(store.in_transaction());
        store.commit().await.unwrap();
        assert!(store.commit().await.is_err());
        assert!(store.rollback().await.is_err());
    }

    #[tokio::test]
    async fn test_provider_returns_same_store() {
        let provider = MemoryStorageProvider::new();
        let id = ActorId::from_string("a1");
        provider.open(&id).put("k", &json!("v")).await.unwrap();
        let again: Option<String> = provider.open(&id).get("k").await.unwrap();
        assert_eq!(again.as_deref(), Some("v"));
        assert_eq!(provider.live_ids(), vec![id]);
    }

    #[tokio::test]
    async fn test_release_drops_only_idle_empty_stores() {
        let provider = MemoryStorageProvider::new();
        let full = ActorId::from_string("full");
        let empty = ActorId::from_string("empty");
        let held = ActorId::from_string("held");

        provider.open(&full).put("k", &json!(1)).await.unwrap();
        provider.open(&empty);
        let handle = provider.open(&held);
        assert_eq!(provider.store_count(), 3);

        for id in [&full, &empty, &held] {
            provider.release(id);
        }
        assert_eq!(provider.store_count(), 2);
        assert!(provider.store(&empty).is_none());
        assert!(provider.committed_keys(&empty).is_empty());

        drop(handle);
        provider.release(&held);
        assert_eq!(provider.store_count(), 1);
        assert_eq!(provider.committed_keys(&full), vec!["k".to_string()]);
    }
}
