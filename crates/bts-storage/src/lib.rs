//! # bts-storage
//!
//! Durable per-actor storage for the bitemporal entity store.
//!
//! This crate provides:
//! - [`KeyValueStore`]: the transactional key-value contract every actor
//!   persists through (no ordered scans)
//! - [`MemoryStore`] and [`MemoryStorageProvider`]: in-process backends
//! - [`ActorStorage`]: a typed, cloneable handle over a store
//! - [`SnapshotStore`]: timeline-indexed, append-only snapshot persistence
//!
//! ## Example
//!
//! ```rust
//! use bts_storage::{ActorStorage, MemoryStore};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let storage = ActorStorage::new(MemoryStore::new());
//!
//! storage.begin().await.unwrap();
//! storage.put("k", &json!({"a": 1})).await.unwrap();
//! storage.rollback().await.unwrap();
//!
//! assert!(storage.is_empty().await.unwrap());
//! # });
//! ```

mod error;
mod memory;
mod snapshot_store;
mod store;

pub use error::{Result, StorageError};
pub use memory::{MemoryStorageProvider, MemoryStore};
pub use snapshot_store::{SnapshotStore, META_KEY};
pub use store::{ActorStorage, KeyValueStore, StorageProvider};
