//! The (type, version, environment) configuration table.
//!
//! Built once at startup with [`RegistryBuilder`] and shared read-only by
//! every actor. Each axis of a key may be registered as [`WILDCARD`]; lookups
//! prefer exact matches and fall back axis by axis, type first.

use crate::error::{Error, Result};
use crate::schema::Schema;
use crate::validation::CustomValidator;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const WILDCARD: &str = "*";

/// Default debounce window: one hour.
const DEFAULT_GRANULARITY: Duration = Duration::from_secs(60 * 60);

/// A business type at a given schema version.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeVersion {
    #[serde(rename = "type")]
    pub type_name: String,
    pub version: String,
}

impl TypeVersion {
    pub fn new(type_name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            version: version.into(),
        }
    }

    pub fn in_environment(&self, environment: impl Into<String>) -> TypeVersionEnvironment {
        TypeVersionEnvironment {
            type_name: self.type_name.clone(),
            version: self.version.clone(),
            environment: environment.into(),
        }
    }
}

impl fmt::Display for TypeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.type_name, self.version)
    }
}

/// The record an actor keeps about what it is.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeVersionEnvironment {
    #[serde(rename = "type")]
    pub type_name: String,
    pub version: String,
    pub environment: String,
}

impl TypeVersionEnvironment {
    pub fn type_version(&self) -> TypeVersion {
        TypeVersion::new(self.type_name.clone(), self.version.clone())
    }
}

impl fmt::Display for TypeVersionEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.type_name, self.version, self.environment)
    }
}

/// Which engine implements a registered type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorKind {
    TemporalEntity,
    Tree,
}

/// Behaviour of one (type, version).
#[derive(Clone)]
pub struct TypeVersionConfig {
    kind: ActorKind,
    schema: Option<Schema>,
    validator: Option<CustomValidator>,
    granularity: Duration,
    suppress_previous_values: bool,
    transactional: bool,
    node_type: Option<TypeVersion>,
}

impl TypeVersionConfig {
    pub fn builder() -> TypeVersionConfigBuilder {
        TypeVersionConfigBuilder::new()
    }

    pub fn kind(&self) -> ActorKind {
        self.kind
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    pub fn validator(&self) -> Option<&CustomValidator> {
        self.validator.as_ref()
    }

    pub fn granularity(&self) -> Duration {
        self.granularity
    }

    pub fn granularity_millis(&self) -> i64 {
        i64::try_from(self.granularity.as_millis()).unwrap_or(i64::MAX)
    }

    pub fn suppress_previous_values(&self) -> bool {
        self.suppress_previous_values
    }

    pub fn transactional(&self) -> bool {
        self.transactional
    }

    /// Type of the entities holding a tree's node payloads.
    pub fn node_type(&self) -> Option<&TypeVersion> {
        self.node_type.as_ref()
    }
}

impl fmt::Debug for TypeVersionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeVersionConfig")
            .field("kind", &self.kind)
            .field("schema", &self.schema)
            .field("validator", &self.validator.as_ref().map(|_| "<fn>"))
            .field("granularity", &self.granularity)
            .field("suppress_previous_values", &self.suppress_previous_values)
            .field("transactional", &self.transactional)
            .field("node_type", &self.node_type)
            .finish()
    }
}

impl Default for TypeVersionConfig {
    fn default() -> Self {
        Self {
            kind: ActorKind::TemporalEntity,
            schema: None,
            validator: None,
            granularity: DEFAULT_GRANULARITY,
            suppress_previous_values: false,
            transactional: true,
            node_type: None,
        }
    }
}

/// Builder for [`TypeVersionConfig`].
pub struct TypeVersionConfigBuilder {
    config: TypeVersionConfig,
}

impl TypeVersionConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: TypeVersionConfig::default(),
        }
    }

    pub fn schema(mut self, schema: Schema) -> Self {
        self.config.schema = Some(schema);
        self
    }

    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.config.validator = Some(Arc::new(validator));
        self
    }

    pub fn granularity(mut self, granularity: Duration) -> Self {
        self.config.granularity = granularity;
        self
    }

    pub fn suppress_previous_values(mut self, suppress: bool) -> Self {
        self.config.suppress_previous_values = suppress;
        self
    }

    pub fn transactional(mut self, enabled: bool) -> Self {
        self.config.transactional = enabled;
        self
    }

    /// Make this type a tree whose node payloads are `node_type` entities.
    pub fn tree(mut self, node_type: TypeVersion) -> Self {
        self.config.kind = ActorKind::Tree;
        self.config.node_type = Some(node_type);
        self
    }

    pub fn build(self) -> TypeVersionConfig {
        self.config
    }
}

impl Default for TypeVersionConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

type RegistryKey = (String, String, String);

/// Immutable lookup table from (type, version, environment) to config.
#[derive(Clone, Debug)]
pub struct Registry {
    entries: HashMap<RegistryKey, Arc<TypeVersionConfig>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Find the most specific entry for `key`.
    pub fn resolve(&self, key: &TypeVersionEnvironment) -> Result<Arc<TypeVersionConfig>> {
        for type_name in [key.type_name.as_str(), WILDCARD] {
            for version in [key.version.as_str(), WILDCARD] {
                for environment in [key.environment.as_str(), WILDCARD] {
                    let probe = (
                        type_name.to_string(),
                        version.to_string(),
                        environment.to_string(),
                    );
                    if let Some(config) = self.entries.get(&probe) {
                        return Ok(config.clone());
                    }
                }
            }
        }
        Err(Error::NotFound(format!("no implementation registered for {}", key)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Collects registrations and checks them once, at startup.
#[derive(Default)]
pub struct RegistryBuilder {
    entries: HashMap<RegistryKey, Arc<TypeVersionConfig>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        mut self,
        type_name: impl Into<String>,
        version: impl Into<String>,
        environment: impl Into<String>,
        config: TypeVersionConfig,
    ) -> Self {
        self.entries.insert(
            (type_name.into(), version.into(), environment.into()),
            Arc::new(config),
        );
        self
    }

    /// Fails on an empty table or a tree whose node type cannot be resolved.
    pub fn build(self) -> Result<Registry> {
        if self.entries.is_empty() {
            return Err(Error::Config("registry has no entries".to_string()));
        }
        let registry = Registry {
            entries: self.entries,
        };

        for ((type_name, version, environment), config) in &registry.entries {
            if config.kind() != ActorKind::Tree {
                continue;
            }
            let node_type = config.node_type().ok_or_else(|| {
                Error::Config(format!("tree {}/{} has no node type", type_name, version))
            })?;
            let node_config = registry
                .resolve(&node_type.in_environment(environment.clone()))
                .map_err(|_| {
                    Error::Config(format!(
                        "tree {}/{} names unregistered node type {}",
                        type_name, version, node_type
                    ))
                })?;
            if node_config.kind() != ActorKind::TemporalEntity {
                return Err(Error::Config(format!(
                    "node type {} of tree {}/{} is not an entity type",
                    node_type, type_name, version
                )));
            }
        }

        Ok(registry)
    }
}
