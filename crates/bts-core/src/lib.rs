//! # bts-core
//!
//! Core types for the bitemporal entity store.
//!
//! This crate provides:
//! - Millisecond ISO-8601 timestamps and a pluggable clock
//! - Entity snapshots and timeline metadata
//! - The structural delta codec behind `previousValues` and PATCH
//! - The validation gate (schema, custom predicates, DAG cycle check)
//! - The immutable (type, version, environment) registry
//! - The engine error taxonomy and response status classes
//!
//! ## Example
//!
//! ```rust
//! use bts_core::delta::{apply, diff};
//! use serde_json::json;
//!
//! let before = json!({"a": 1, "b": {"c": 2}});
//! let after = json!({"b": {"c": 3}, "d": true});
//!
//! let before = before.as_object().unwrap();
//! let after = after.as_object().unwrap();
//!
//! let delta = diff(before, after);
//! assert_eq!(&apply(before, &delta), after);
//! ```

pub mod delta;
pub mod entity;
pub mod error;
pub mod ids;
pub mod refs;
pub mod registry;
pub mod schema;
pub mod status;
pub mod time;
pub mod validation;

pub use delta::{apply, diff, Delta, DeltaOp};
pub use entity::{EntityMeta, Snapshot, SnapshotMeta};
pub use error::{Error, Result};
pub use ids::{ActorId, NodeKey};
pub use refs::{check_acyclic, RefEncoder, ID_KEY, REF_KEY};
pub use registry::{
    ActorKind, Registry, RegistryBuilder, TypeVersion, TypeVersionConfig,
    TypeVersionConfigBuilder, TypeVersionEnvironment, WILDCARD,
};
pub use schema::{FieldKind, Schema};
pub use status::Status;
pub use time::{Clock, ManualClock, SystemClock, Timestamp};
pub use validation::{require_user_id, validate_value, CustomValidator};
