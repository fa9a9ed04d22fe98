//! Storage trait and the typed handle actors use.

use crate::error::{Result, StorageError};
use async_trait::async_trait;
use bts_core::ActorId;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Trait for one actor's durable key-value storage.
///
/// Every call is a suspension point. Writes made between [`begin`] and
/// [`commit`] are visible to reads on the same store and vanish on
/// [`rollback`]. Outside a transaction each write is applied immediately.
///
/// [`begin`]: KeyValueStore::begin
/// [`commit`]: KeyValueStore::commit
/// [`rollback`]: KeyValueStore::rollback
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn put(&self, key: &str, value: Value) -> Result<()>;

    /// Remove a key, returning whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every key.
    async fn delete_all(&self) -> Result<()>;

    /// Whether no key is visible.
    async fn is_empty(&self) -> Result<bool>;

    async fn begin(&self) -> Result<()>;

    async fn commit(&self) -> Result<()>;

    async fn rollback(&self) -> Result<()>;

    fn in_transaction(&self) -> bool;
}

/// Hands out the storage belonging to an actor id.
///
/// Opening the same id twice must yield the same underlying data.
pub trait StorageProvider: Send + Sync + 'static {
    fn open(&self, id: &ActorId) -> ActorStorage;

    /// Hint that the host no longer holds `id`. Providers may drop
    /// bookkeeping for an id with no committed data.
    fn release(&self, _id: &ActorId) {}
}

/// Cloneable, typed handle over a [`KeyValueStore`].
#[derive(Clone)]
pub struct ActorStorage {
    inner: Arc<dyn KeyValueStore>,
}

impl ActorStorage {
    pub fn new(store: impl KeyValueStore) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }

    pub fn from_arc(store: Arc<dyn KeyValueStore>) -> Self {
        Self { inner: store }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.inner.get(key).await? {
            None => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| StorageError::Corrupt {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    pub async fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.inner.put(key, value).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(key).await
    }

    pub async fn delete_all(&self) -> Result<()> {
        self.inner.delete_all().await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        self.inner.is_empty().await
    }

    pub async fn begin(&self) -> Result<()> {
        self.inner.begin().await
    }

    pub async fn commit(&self) -> Result<()> {
        self.inner.commit().await
    }

    pub async fn rollback(&self) -> Result<()> {
        self.inner.rollback().await
    }

    pub fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }
}

impl std::fmt::Debug for ActorStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorStorage")
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}
