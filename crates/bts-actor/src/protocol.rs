//! Open-gate, recheck, compensate.
//!
//! An actor that performs an effect in another actor cannot hold its own
//! state still while waiting for the answer. The protocol brackets the
//! remote effect with two observations of a local precondition; when they
//! differ the effect is undone and the caller is told to retry.

use async_trait::async_trait;
use bts_core::{Error, Result};
use std::fmt::Debug;
use tracing::warn;

/// Something whose value must not change across a remote effect.
#[async_trait]
pub trait Precondition: Send + Sync {
    type Observation: PartialEq + Debug + Send;

    async fn observe(&self) -> Result<Self::Observation>;
}

/// A cross-actor effect that can be undone.
#[async_trait]
pub trait RemoteEffect: Send + Sync {
    type Output: Send;

    async fn perform(&self) -> Result<Self::Output>;

    async fn compensate(&self) -> Result<()>;
}

/// Run `effect` guarded by `precondition`.
///
/// 1. observe the precondition;
/// 2. perform the effect (an error here aborts with nothing to undo);
/// 3. observe again;
/// 4. on any difference, compensate and fail with
///    [`Error::TransientConflict`].
///
/// The compensation is awaited. When it fails the failure is logged and the
/// caller still gets the transient conflict, leaving an unreferenced remote
/// actor behind.
pub async fn open_gate_recheck<P, E>(precondition: &P, effect: &E) -> Result<E::Output>
where
    P: Precondition + ?Sized,
    E: RemoteEffect + ?Sized,
{
    let before = precondition.observe().await?;
    let output = effect.perform().await?;
    let reason = match precondition.observe().await {
        Ok(after) if after == before => return Ok(output),
        Ok(after) => format!("state moved from {:?} to {:?}", before, after),
        Err(err) => format!("recheck failed: {}", err),
    };

    warn!(%reason, "Precondition changed during remote effect, compensating");
    if let Err(err) = effect.compensate().await {
        warn!(error = %err, "Compensation failed, remote effect left in place");
    }
    Err(Error::TransientConflict(format!("{}; retry", reason)))
}
