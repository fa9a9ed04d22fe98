//! In-process actor host.
//!
//! Routes requests by id, runs at most one request per id at a time, and
//! gives actors a way to call each other.

use crate::actor::Delegate;
use crate::message::{Request, Response};
use crate::wrapper::{Host, Wrapper};
use async_trait::async_trait;
use bts_core::{ActorId, Clock, Error, Registry, Result, SystemClock};
use bts_storage::{MemoryStorageProvider, StorageProvider};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as Gate;
use tracing::trace;

/// Runtime configuration.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Environment assumed when a creating request names none.
    pub default_environment: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_environment: "production".to_string(),
        }
    }
}

/// Builder for [`ActorRuntime`].
#[derive(Default)]
pub struct ActorRuntimeBuilder {
    registry: Option<Registry>,
    storage: Option<Arc<dyn StorageProvider>>,
    clock: Option<Arc<dyn Clock>>,
    config: RuntimeConfig,
}

impl ActorRuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn StorageProvider>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn default_environment(mut self, environment: impl Into<String>) -> Self {
        self.config.default_environment = environment.into();
        self
    }

    /// Fails when no registry was given.
    pub fn build(self) -> Result<ActorRuntime> {
        let registry = self
            .registry
            .ok_or_else(|| Error::Config("actor runtime needs a registry".to_string()))?;
        Ok(ActorRuntime {
            inner: Arc::new(RuntimeInner {
                registry: Arc::new(registry),
                storage: self
                    .storage
                    .unwrap_or_else(|| Arc::new(MemoryStorageProvider::new())),
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                config: self.config,
                slots: Mutex::new(HashMap::new()),
            }),
        })
    }
}

struct RuntimeInner {
    registry: Arc<Registry>,
    storage: Arc<dyn StorageProvider>,
    clock: Arc<dyn Clock>,
    config: RuntimeConfig,
    slots: Mutex<HashMap<ActorId, Arc<Gate<Wrapper>>>>,
}

/// Cheaply cloneable handle to the actor host.
#[derive(Clone)]
pub struct ActorRuntime {
    inner: Arc<RuntimeInner>,
}

impl ActorRuntime {
    pub fn builder() -> ActorRuntimeBuilder {
        ActorRuntimeBuilder::new()
    }

    /// A runtime over in-memory storage and the system clock.
    pub fn new(registry: Registry) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                registry: Arc::new(registry),
                storage: Arc::new(MemoryStorageProvider::new()),
                clock: Arc::new(SystemClock),
                config: RuntimeConfig::default(),
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.inner.clock.clone()
    }

    /// Slot for `id`, created on demand.
    fn slot(&self, id: &ActorId) -> Arc<Gate<Wrapper>> {
        let mut slots = self.inner.slots.lock();
        slots
            .entry(id.clone())
            .or_insert_with(|| {
                Arc::new(Gate::new(Wrapper::new(
                    id.clone(),
                    self.inner.storage.open(id),
                )))
            })
            .clone()
    }

    /// Deliver a request, waiting for any request already running on `id`.
    pub async fn call(&self, id: &ActorId, request: Request) -> Response {
        let slot = self.slot(id);
        let mut wrapper = slot.lock().await;
        let host = Host {
            registry: self.inner.registry.clone(),
            clock: self.inner.clock.clone(),
            delegate: Arc::new(self.clone()),
            default_environment: self.inner.config.default_environment.clone(),
        };
        trace!(%id, op = request.operation.name(), "Dispatching request");
        let response = wrapper.handle(request, &host).await;
        let vacant = wrapper.is_vacant();
        drop(wrapper);
        if vacant {
            self.evict(id, slot);
        }
        response
    }

    /// Forget a slot whose wrapper holds nothing, unless another caller
    /// got hold of it in the meantime.
    fn evict(&self, id: &ActorId, slot: Arc<Gate<Wrapper>>) {
        let mut slots = self.inner.slots.lock();
        // One reference in the map, one here.
        if Arc::strong_count(&slot) != 2 {
            return;
        }
        let still_vacant = slot
            .try_lock()
            .map(|wrapper| wrapper.is_vacant())
            .unwrap_or(false);
        if !still_vacant {
            return;
        }
        slots.remove(id);
        drop(slot);
        self.inner.storage.release(id);
        trace!(%id, "Evicted vacant slot");
    }

    /// Number of ids currently holding a slot.
    pub fn slot_count(&self) -> usize {
        self.inner.slots.lock().len()
    }
}

#[async_trait]
impl Delegate for ActorRuntime {
    async fn call(&self, id: &ActorId, request: Request) -> Response {
        ActorRuntime::call(self, id, request).await
    }

    fn allocate_id(&self) -> ActorId {
        ActorId::new()
    }
}

impl std::fmt::Debug for ActorRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorRuntime")
            .field("config", &self.inner.config)
            .field("registry_entries", &self.inner.registry.len())
            .field("slots", &self.slot_count())
            .finish()
    }
}
