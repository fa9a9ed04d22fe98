//! # bts-actor
//!
//! Actors for the bitemporal entity store.
//!
//! This crate provides:
//! - [`TemporalEntity`]: one entity's versioned snapshots with optimistic
//!   concurrency, debouncing and soft delete
//! - [`Tree`]: a DAG of nodes whose payloads live in temporal entities
//! - [`Wrapper`]: the transactional shell that resolves an actor's type and
//!   keeps failed requests from leaving partial writes
//! - [`ActorRuntime`]: an in-process host that serialises requests per id
//! - [`open_gate_recheck`]: the compensate-on-interleave protocol used for
//!   cross-actor effects
//!
//! ## Example
//!
//! ```rust
//! use bts_actor::{ActorRuntime, Request, WriteArgs};
//! use bts_core::{ActorId, Registry, Status, TypeVersion, TypeVersionConfig};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let registry = Registry::builder()
//!     .register("widget", "v1", "*", TypeVersionConfig::builder().build())
//!     .build()
//!     .unwrap();
//! let runtime = ActorRuntime::new(registry);
//! let id = ActorId::new();
//!
//! let created = runtime
//!     .call(
//!         &id,
//!         Request::create(json!({"a": 1}), WriteArgs::by("alice"))
//!             .with_type(TypeVersion::new("widget", "v1")),
//!     )
//!     .await;
//! assert_eq!(created.status, Status::Created);
//!
//! let current = runtime.call(&id, Request::get(None)).await;
//! assert_eq!(current.snapshot().unwrap().value, json!({"a": 1}));
//! # });
//! ```

pub mod actor;
pub mod derived;
pub mod message;
pub mod protocol;
pub mod runtime;
pub mod temporal_entity;
pub mod tree;
pub mod wrapper;

pub use actor::{Actor, ActorContext, Delegate};
pub use derived::{DerivedTree, TreeNode};
pub use message::{Body, Operation, Request, Response, WriteArgs};
pub use protocol::{open_gate_recheck, Precondition, RemoteEffect};
pub use runtime::{ActorRuntime, ActorRuntimeBuilder, RuntimeConfig};
pub use temporal_entity::TemporalEntity;
pub use tree::{NodeStub, Tree, EDGES_KEY, NODES_KEY, TREE_META_KEY};
pub use wrapper::{Host, Wrapper, IDENTITY_KEY};
