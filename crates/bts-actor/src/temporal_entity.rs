//! The versioned-snapshot entity engine.
//!
//! A `TemporalEntity` owns one entity's timeline. Every accepted write
//! closes the open snapshot (its `validTo` becomes the new `validFrom`) and
//! appends a new open one, except for:
//! - writes that change nothing, which return the current snapshot untouched;
//! - repeat writes by the same user inside the type's granularity window,
//!   which replace the open snapshot in place.
//!
//! Deleting and undeleting append metadata-only snapshots, so the full
//! history stays readable through [`Operation::GetMeta`] and
//! [`Operation::GetAsOf`].

use crate::actor::{Actor, ActorContext};
use crate::message::{Body, Operation, Request, Response, WriteArgs};
use async_trait::async_trait;
use bts_core::{
    apply, diff, require_user_id, validate_value, Delta, EntityMeta, Error, Result, Snapshot,
    SnapshotMeta, Timestamp,
};
use bts_storage::{ActorStorage, SnapshotStore};
use serde_json::{Map, Value};
use tracing::{debug, info};

/// Check the caller's token against the open snapshot.
fn check_token(token: Option<&str>, current: &Snapshot) -> Result<()> {
    let Some(token) = token else {
        return Err(Error::PreconditionRequired {
            message: "a concurrency token is required to modify an existing entity".to_string(),
            current: Box::new(current.clone()),
        });
    };
    match Timestamp::parse(token) {
        Ok(t) if t == current.meta.valid_from => Ok(()),
        _ => Err(Error::PreconditionFailed {
            token: token.to_string(),
            current: Box::new(current.clone()),
        }),
    }
}

fn object_or_empty(value: &Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn latest_token(meta: &EntityMeta) -> Option<String> {
    meta.latest().map(|t| t.to_string())
}

pub struct TemporalEntity {
    store: SnapshotStore,
}

impl TemporalEntity {
    pub fn new(storage: ActorStorage) -> Self {
        Self {
            store: SnapshotStore::new(storage),
        }
    }

    fn not_found(ctx: &ActorContext) -> Error {
        Error::NotFound(format!("entity {} has no history", ctx.id))
    }

    async fn existing(&self, ctx: &ActorContext) -> Result<(EntityMeta, Snapshot)> {
        let meta = self.store.meta().await?.ok_or_else(|| Self::not_found(ctx))?;
        let current = self
            .store
            .current(&meta)
            .await?
            .ok_or_else(|| Self::not_found(ctx))?;
        Ok((meta, current))
    }

    fn build_snapshot(
        ctx: &ActorContext,
        value: Value,
        write: &WriteArgs,
        valid_from: Timestamp,
        deleted: bool,
        previous_values: Delta,
    ) -> Snapshot {
        Snapshot {
            value,
            meta: SnapshotMeta {
                user_id: write.user_id.clone(),
                impersonator_id: write.impersonator_id.clone(),
                valid_from,
                valid_to: Timestamp::end_of_time(),
                deleted,
                previous_values: (!ctx.config.suppress_previous_values()).then_some(previous_values),
                type_name: ctx.identity.type_name.clone(),
                version: ctx.identity.version.clone(),
            },
        }
    }

    /// Close `current` at `valid_from` and append `next` after it.
    async fn append(
        &self,
        meta: &mut EntityMeta,
        current: Option<Snapshot>,
        next: &Snapshot,
    ) -> Result<()> {
        if let Some(mut current) = current {
            current.meta.valid_to = next.meta.valid_from;
            self.store.put_snapshot(&current).await?;
        }
        self.store.put_snapshot(next).await?;
        if !meta.push(next.meta.valid_from) {
            return Err(Error::Storage(format!(
                "timeline would not stay increasing at {}",
                next.meta.valid_from
            )));
        }
        self.store.put_meta(meta).await
    }

    pub async fn create_or_replace(
        &self,
        ctx: &ActorContext,
        value: Option<&Value>,
        write: &WriteArgs,
    ) -> Result<Response> {
        require_user_id(&write.user_id)?;
        let value = value.ok_or_else(|| Error::Validation("value is required".to_string()))?;
        validate_value(&ctx.config, value)?;
        let next_map = object_or_empty(value);

        let mut meta = self.store.meta().await?.unwrap_or_default();
        let Some(current) = self.store.current(&meta).await? else {
            let valid_from = meta.next_valid_from(write.valid_from, ctx.clock.now())?;
            let previous = diff(&next_map, &Map::new());
            let snapshot =
                Self::build_snapshot(ctx, value.clone(), write, valid_from, false, previous);
            self.append(&mut meta, None, &snapshot).await?;
            let token = snapshot.concurrency_token();
            return Ok(Response::created(Body::Snapshot(snapshot), Some(token)));
        };

        check_token(write.token.as_deref(), &current)?;
        if current.meta.deleted {
            return Err(Error::StateConflict(format!(
                "entity {} is deleted; undelete it before writing",
                ctx.id
            )));
        }

        let prior_map = object_or_empty(&current.value);
        if diff(&prior_map, &next_map).is_empty() {
            debug!(id = %ctx.id, "Unchanged value, keeping current snapshot");
            let token = current.concurrency_token();
            return Ok(Response::ok(Body::Snapshot(current), Some(token)));
        }

        let valid_from = meta.next_valid_from(write.valid_from, ctx.clock.now())?;
        let elapsed = valid_from.millis() - current.meta.valid_from.millis();
        if current.meta.user_id == write.user_id && elapsed < ctx.config.granularity_millis() {
            // Replace in place. previousValues must point past the write
            // being replaced, at the snapshot before it.
            let before = match meta.timeline.len().checked_sub(2) {
                Some(idx) => object_or_empty(&self.store.snapshot(meta.timeline[idx]).await?.value),
                None => Map::new(),
            };
            let snapshot = Self::build_snapshot(
                ctx,
                value.clone(),
                write,
                current.meta.valid_from,
                false,
                diff(&next_map, &before),
            );
            debug!(id = %ctx.id, user = %write.user_id, elapsed, "Debounced write");
            self.store.put_snapshot(&snapshot).await?;
            let token = snapshot.concurrency_token();
            return Ok(Response::ok(Body::Snapshot(snapshot), Some(token)));
        }

        let snapshot = Self::build_snapshot(
            ctx,
            value.clone(),
            write,
            valid_from,
            false,
            diff(&next_map, &prior_map),
        );
        self.append(&mut meta, Some(current), &snapshot).await?;
        let token = snapshot.concurrency_token();
        Ok(Response::ok(Body::Snapshot(snapshot), Some(token)))
    }

    pub async fn patch(
        &self,
        ctx: &ActorContext,
        delta: &Delta,
        write: &WriteArgs,
    ) -> Result<Response> {
        require_user_id(&write.user_id)?;
        let (_, current) = self.existing(ctx).await?;
        let next = Value::Object(apply(&object_or_empty(&current.value), delta));
        self.create_or_replace(ctx, Some(&next), write).await
    }

    /// Append a metadata-only snapshot flipping the deleted flag.
    async fn set_deleted(
        &self,
        ctx: &ActorContext,
        write: &WriteArgs,
        deleted: bool,
    ) -> Result<Response> {
        require_user_id(&write.user_id)?;
        let (mut meta, current) = self.existing(ctx).await?;
        if current.meta.deleted == deleted {
            let state = if deleted { "already deleted" } else { "not deleted" };
            return Err(Error::StateConflict(format!("entity {} is {}", ctx.id, state)));
        }

        let valid_from = meta.next_valid_from(write.valid_from, ctx.clock.now())?;
        let snapshot = Self::build_snapshot(
            ctx,
            current.value.clone(),
            write,
            valid_from,
            deleted,
            Delta::new(),
        );
        self.append(&mut meta, Some(current), &snapshot).await?;
        let token = snapshot.concurrency_token();
        Ok(Response::ok(Body::Snapshot(snapshot), Some(token)))
    }

    pub async fn delete(&self, ctx: &ActorContext, write: &WriteArgs) -> Result<Response> {
        self.set_deleted(ctx, write, true).await
    }

    pub async fn undelete(&self, ctx: &ActorContext, write: &WriteArgs) -> Result<Response> {
        self.set_deleted(ctx, write, false).await
    }

    pub async fn get(&self, ctx: &ActorContext, since: Option<Timestamp>) -> Result<Response> {
        let meta = self.store.meta().await?.ok_or_else(|| Self::not_found(ctx))?;
        if !meta.modified_since(since) {
            return Ok(Response::not_modified(latest_token(&meta)));
        }
        let current = self
            .store
            .current(&meta)
            .await?
            .ok_or_else(|| Self::not_found(ctx))?;
        if current.meta.deleted {
            return Err(Error::NotFound(format!("entity {} is deleted", ctx.id)));
        }
        let token = current.concurrency_token();
        Ok(Response::ok(Body::Snapshot(current), Some(token)))
    }

    pub async fn get_meta(
        &self,
        ctx: &ActorContext,
        since: Option<Timestamp>,
    ) -> Result<Response> {
        let meta = self.store.meta().await?.ok_or_else(|| Self::not_found(ctx))?;
        let token = latest_token(&meta);
        if !meta.modified_since(since) {
            return Ok(Response::not_modified(token));
        }
        Ok(Response::ok(Body::Meta(meta), token))
    }

    pub async fn get_as_of(&self, ctx: &ActorContext, valid_time: Timestamp) -> Result<Response> {
        let meta = self.store.meta().await?.ok_or_else(|| Self::not_found(ctx))?;
        let snapshot = self
            .store
            .as_of(&meta, valid_time)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("entity {} did not exist at {}", ctx.id, valid_time))
            })?;
        if snapshot.meta.deleted {
            return Err(Error::NotFound(format!(
                "entity {} was deleted at {}",
                ctx.id, valid_time
            )));
        }
        Ok(Response::ok(Body::Snapshot(snapshot), latest_token(&meta)))
    }

    pub async fn hard_delete(&self, ctx: &ActorContext) -> Result<Response> {
        if self.store.meta().await?.is_none() {
            return Err(Self::not_found(ctx));
        }
        self.store.storage().delete_all().await?;
        info!(id = %ctx.id, "Wiped entity storage");
        Ok(Response::ok(Body::Empty, None))
    }
}

#[async_trait]
impl Actor for TemporalEntity {
    async fn handle(&mut self, request: &Request, ctx: &ActorContext) -> Result<Response> {
        match &request.operation {
            Operation::Create { value, write } | Operation::Replace { value, write } => {
                self.create_or_replace(ctx, value.as_ref(), write).await
            }
            Operation::Patch { delta, write } => self.patch(ctx, delta, write).await,
            Operation::Delete { write } => self.delete(ctx, write).await,
            Operation::Undelete { write } => self.undelete(ctx, write).await,
            Operation::Get { if_modified_since } => self.get(ctx, *if_modified_since).await,
            Operation::GetMeta { if_modified_since } => {
                self.get_meta(ctx, *if_modified_since).await
            }
            Operation::GetAsOf { valid_time } => self.get_as_of(ctx, *valid_time).await,
            Operation::HardDelete => self.hard_delete(ctx).await,
            other => Err(Error::Validation(format!(
                "{} is not an entity operation",
                other.name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn open_snapshot(valid_from: i64) -> Snapshot {
        Snapshot {
            value: json!({}),
            meta: SnapshotMeta {
                user_id: "u".to_string(),
                impersonator_id: None,
                valid_from: Timestamp::from_millis(valid_from),
                valid_to: Timestamp::end_of_time(),
                deleted: false,
                previous_values: None,
                type_name: "t".to_string(),
                version: "v1".to_string(),
            },
        }
    }

    #[test]
    fn test_missing_token_is_precondition_required() {
        let current = open_snapshot(1_000);
        assert!(matches!(
            check_token(None, &current),
            Err(Error::PreconditionRequired { .. })
        ));
    }

    #[test]
    fn test_token_must_match_open_snapshot() {
        let current = open_snapshot(1_000);
        check_token(Some("1970-01-01T00:00:01.000Z"), &current).unwrap();

        let err = check_token(Some("1970-01-01T00:00:00.999Z"), &current).unwrap_err();
        assert_eq!(err.current_snapshot(), Some(&current));
        assert!(matches!(
            check_token(Some("not a time"), &current),
            Err(Error::PreconditionFailed { .. })
        ));
    }
}
