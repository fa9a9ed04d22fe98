//! Minimal structural schemas for entity values.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// The JSON kind a field must have.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Any,
    Null,
    Bool,
    Number,
    Integer,
    String,
    Array,
    Object,
}

impl FieldKind {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            FieldKind::Any => true,
            FieldKind::Null => value.is_null(),
            FieldKind::Bool => value.is_boolean(),
            FieldKind::Number => value.is_number(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::String => value.is_string(),
            FieldKind::Array => value.is_array(),
            FieldKind::Object => value.is_object(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
struct FieldRule {
    kind: FieldKind,
    required: bool,
}

/// Field-level rules applied to the top level of a value.
#[derive(Clone, Debug, PartialEq)]
pub struct Schema {
    fields: BTreeMap<String, FieldRule>,
    allow_unknown: bool,
}

impl Default for Schema {
    fn default() -> Self {
        Self {
            fields: BTreeMap::new(),
            allow_unknown: true,
        }
    }
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.insert(name.into(), FieldRule { kind, required: true });
        self
    }

    pub fn optional(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.insert(name.into(), FieldRule { kind, required: false });
        self
    }

    /// Reject fields the schema does not name.
    pub fn closed(mut self) -> Self {
        self.allow_unknown = false;
        self
    }

    /// Every violation, in field order. Empty means valid.
    pub fn violations(&self, value: &Map<String, Value>) -> Vec<String> {
        let mut errors = Vec::new();

        for (name, rule) in &self.fields {
            match value.get(name) {
                None if rule.required => errors.push(format!("missing required field {:?}", name)),
                None => {}
                Some(v) if !rule.kind.matches(v) => {
                    errors.push(format!("field {:?} must be {:?}", name, rule.kind))
                }
                Some(_) => {}
            }
        }

        if !self.allow_unknown {
            for name in value.keys() {
                if !self.fields.contains_key(name) {
                    errors.push(format!("unexpected field {:?}", name));
                }
            }
        }

        errors
    }
}
