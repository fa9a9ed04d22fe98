//! The validation gate run before any write is accepted.

use crate::error::{Error, Result};
use crate::refs::check_acyclic;
use crate::registry::TypeVersionConfig;
use serde_json::Value;
use std::sync::Arc;

/// A per-type predicate over the whole value. `Err` carries the reason.
pub type CustomValidator = Arc<dyn Fn(&Value) -> std::result::Result<(), String> + Send + Sync>;

pub fn require_user_id(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(Error::Validation("userID is required".to_string()));
    }
    Ok(())
}

/// Schema, custom predicate, then DAG shape, in that order.
pub fn validate_value(config: &TypeVersionConfig, value: &Value) -> Result<()> {
    let map = value
        .as_object()
        .ok_or_else(|| Error::Validation("value must be an object".to_string()))?;

    if let Some(schema) = config.schema() {
        let violations = schema.violations(map);
        if !violations.is_empty() {
            return Err(Error::Validation(violations.join("; ")));
        }
    }

    if let Some(validator) = config.validator() {
        validator(value).map_err(Error::Validation)?;
    }

    check_acyclic(value)
}
