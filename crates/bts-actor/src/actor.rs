//! The actor contract and the context each request runs in.

use crate::message::{Request, Response};
use async_trait::async_trait;
use bts_core::{ActorId, Clock, Result, Status, TypeVersionConfig, TypeVersionEnvironment};
use bts_storage::ActorStorage;
use std::sync::Arc;

/// Calls into other actors.
///
/// The tree uses this to reach the entities holding its node payloads.
#[async_trait]
pub trait Delegate: Send + Sync {
    /// Deliver `request` to the actor `id` and wait for its response.
    async fn call(&self, id: &ActorId, request: Request) -> Response;

    /// Pick an id no actor has used yet.
    fn allocate_id(&self) -> ActorId;

    /// Like [`call`](Delegate::call), but any status other than `expected`
    /// becomes the error the response reports.
    async fn call_expecting(
        &self,
        id: &ActorId,
        request: Request,
        expected: Status,
    ) -> Result<Response> {
        let response = self.call(id, request).await;
        if response.status == expected {
            Ok(response)
        } else {
            Err(response.into_error())
        }
    }
}

/// Everything an actor may touch while handling one request.
#[derive(Clone)]
pub struct ActorContext {
    pub id: ActorId,
    pub storage: ActorStorage,
    pub identity: TypeVersionEnvironment,
    pub config: Arc<TypeVersionConfig>,
    pub clock: Arc<dyn Clock>,
    pub delegate: Arc<dyn Delegate>,
}

impl std::fmt::Debug for ActorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorContext")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .finish()
    }
}

/// A single-threaded unit of behaviour over one actor's storage.
///
/// The runtime never runs two requests for the same id at once, so
/// implementations can keep caches in `self` without locking.
#[async_trait]
pub trait Actor: Send + Sync {
    async fn handle(&mut self, request: &Request, ctx: &ActorContext) -> Result<Response>;
}
