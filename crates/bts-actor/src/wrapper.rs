//! The transactional shell around every actor.
//!
//! A [`Wrapper`] sits between the runtime and the concrete actor. For each
//! request it works out what the actor is, runs the handler inside a storage
//! transaction, and decides whether the instance survives.

use crate::actor::{Actor, ActorContext, Delegate};
use crate::message::{Request, Response};
use crate::temporal_entity::TemporalEntity;
use crate::tree::Tree;
use bts_core::{
    ActorId, ActorKind, Clock, Error, Registry, Result, TypeVersionConfig, TypeVersionEnvironment,
};
use bts_storage::ActorStorage;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Storage key of the wrapper's own `{type, version, environment}` record.
pub const IDENTITY_KEY: &str = "typeVersionEnvironment";

/// Process-wide services every wrapper needs.
#[derive(Clone)]
pub struct Host {
    pub registry: Arc<Registry>,
    pub clock: Arc<dyn Clock>,
    pub delegate: Arc<dyn Delegate>,
    pub default_environment: String,
}

fn instantiate(config: &TypeVersionConfig, storage: &ActorStorage) -> Box<dyn Actor> {
    match config.kind() {
        ActorKind::TemporalEntity => Box::new(TemporalEntity::new(storage.clone())),
        ActorKind::Tree => Box::new(Tree::new()),
    }
}

pub struct Wrapper {
    id: ActorId,
    storage: ActorStorage,
    identity: Option<TypeVersionEnvironment>,
    identity_loaded: bool,
    instance: Option<Box<dyn Actor>>,
}

impl Wrapper {
    pub fn new(id: ActorId, storage: ActorStorage) -> Self {
        Self {
            id,
            storage,
            identity: None,
            identity_loaded: false,
            instance: None,
        }
    }

    pub fn id(&self) -> &ActorId {
        &self.id
    }

    /// The persisted identity, once known.
    pub fn identity(&self) -> Option<&TypeVersionEnvironment> {
        self.identity.as_ref()
    }

    /// Whether a live instance is cached.
    pub fn is_active(&self) -> bool {
        self.instance.is_some()
    }

    /// No identity and no instance: the id has nothing worth keeping.
    pub fn is_vacant(&self) -> bool {
        self.identity.is_none() && self.instance.is_none()
    }

    pub async fn handle(&mut self, request: Request, host: &Host) -> Response {
        match self.dispatch(&request, host).await {
            Ok(response) => response,
            Err(err) => Response::from_error(&err),
        }
    }

    /// Returns the identity for this request and whether it is already stored.
    async fn resolve_identity(
        &mut self,
        request: &Request,
        host: &Host,
    ) -> Result<(TypeVersionEnvironment, bool)> {
        if !self.identity_loaded {
            self.identity = self.storage.get(IDENTITY_KEY).await?;
            self.identity_loaded = true;
        }

        match (&self.identity, &request.target) {
            (Some(stored), Some(declared)) if *declared != stored.type_version() => {
                Err(Error::StateConflict(format!(
                    "actor {} is a {}, not {}",
                    self.id, stored, declared
                )))
            }
            (Some(stored), _) => Ok((stored.clone(), true)),
            (None, Some(declared)) => {
                let environment = request
                    .environment
                    .clone()
                    .unwrap_or_else(|| host.default_environment.clone());
                Ok((declared.in_environment(environment), false))
            }
            (None, None) => Err(Error::NotFound(format!(
                "actor {} does not exist and the request names no type",
                self.id
            ))),
        }
    }

    async fn dispatch(&mut self, request: &Request, host: &Host) -> Result<Response> {
        let (identity, persisted) = self.resolve_identity(request, host).await?;
        let config = host.registry.resolve(&identity)?;
        let transactional = config.transactional();

        if transactional {
            self.storage.begin().await?;
        }
        let mut instance = match self.instance.take() {
            Some(instance) => instance,
            None => {
                debug!(id = %self.id, %identity, "Activating actor");
                instantiate(&config, &self.storage)
            }
        };
        let ctx = ActorContext {
            id: self.id.clone(),
            storage: self.storage.clone(),
            identity: identity.clone(),
            config,
            clock: host.clock.clone(),
            delegate: host.delegate.clone(),
        };

        let outcome = match instance.handle(request, &ctx).await {
            Ok(response) if !response.status.is_error() => {
                match self.settle(identity, persisted, transactional).await {
                    Ok(keep) => Ok((response, keep)),
                    Err(err) => Err(Response::from_error(&err)),
                }
            }
            Ok(response) => Err(response),
            Err(err) => Err(Response::from_error(&err)),
        };

        match outcome {
            Ok((response, keep)) => {
                if keep {
                    self.instance = Some(instance);
                }
                Ok(response)
            }
            Err(response) => {
                debug!(
                    id = %self.id,
                    op = request.operation.name(),
                    status = %response.status,
                    error = response.error_message().unwrap_or_default(),
                    "Request failed, discarding instance"
                );
                if transactional && self.storage.in_transaction() {
                    if let Err(err) = self.storage.rollback().await {
                        warn!(id = %self.id, error = %err, "Rollback failed");
                    }
                }
                Ok(response)
            }
        }
    }

    /// Record the identity on first persistence, forget the actor when its
    /// storage ended up empty, then commit. Returns whether to keep the
    /// instance.
    async fn settle(
        &mut self,
        identity: TypeVersionEnvironment,
        persisted: bool,
        transactional: bool,
    ) -> Result<bool> {
        let keep = if self.storage.is_empty().await? {
            if persisted {
                info!(id = %self.id, "Storage emptied, forgetting actor");
            }
            self.identity = None;
            false
        } else {
            if !persisted {
                self.storage.put(IDENTITY_KEY, &identity).await?;
                self.identity = Some(identity);
            }
            true
        };

        if transactional {
            if let Err(err) = self.storage.commit().await {
                // The identity was never durably written.
                if !persisted {
                    self.identity = None;
                }
                return Err(err.into());
            }
        }
        Ok(keep)
    }
}

impl std::fmt::Debug for Wrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wrapper")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("active", &self.is_active())
            .finish()
    }
}
