//! devkube check: combinators that turn a client and an object reference
//! into readiness [`Check`]s.

#![forbid(unsafe_code)]

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use devkube_core::{Check, ConditionReader, ConditionStatus, Error, Lookup, ObjectCheck, ObjectClient, ObjectRef, Result};
use tokio_util::sync::CancellationToken;
use tracing::trace;

async fn cancellable<T>(cancel: &CancellationToken, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        res = fut => res,
    }
}

/// Ready once the object can be fetched.
pub fn check_object_exists<C>(client: Arc<C>, target: ObjectRef) -> ObjectExists<C>
where
    C: ObjectClient + ?Sized,
{
    ObjectExists { client, target }
}

/// Ready once the object is no longer found.
pub fn check_object_gone<C>(client: Arc<C>, target: ObjectRef) -> ObjectGone<C>
where
    C: ObjectClient + ?Sized,
{
    ObjectGone { client, target }
}

/// Fetches the object once per evaluation and requires every object check
/// to pass, in order. A missing object is not ready.
pub fn check_object_and<C>(client: Arc<C>, target: ObjectRef, checks: Vec<ObjectCheck<C::Object>>) -> ObjectAnd<C>
where
    C: ObjectClient + ?Sized,
{
    ObjectAnd { client, target, checks }
}

pub struct ObjectExists<C: ?Sized> {
    client: Arc<C>,
    target: ObjectRef,
}

#[async_trait]
impl<C> Check for ObjectExists<C>
where
    C: ObjectClient + ?Sized,
{
    async fn check(&self, cancel: &CancellationToken) -> Result<bool> {
        match cancellable(cancel, self.client.get(&self.target)).await? {
            Lookup::Found(_) => Ok(true),
            Lookup::NotFound => Ok(false),
        }
    }
}

pub struct ObjectGone<C: ?Sized> {
    client: Arc<C>,
    target: ObjectRef,
}

#[async_trait]
impl<C> Check for ObjectGone<C>
where
    C: ObjectClient + ?Sized,
{
    async fn check(&self, cancel: &CancellationToken) -> Result<bool> {
        match cancellable(cancel, self.client.get(&self.target)).await? {
            Lookup::Found(_) => Ok(false),
            Lookup::NotFound => Ok(true),
        }
    }
}

pub struct ObjectAnd<C: ObjectClient + ?Sized> {
    client: Arc<C>,
    target: ObjectRef,
    checks: Vec<ObjectCheck<C::Object>>,
}

#[async_trait]
impl<C> Check for ObjectAnd<C>
where
    C: ObjectClient + ?Sized,
{
    async fn check(&self, cancel: &CancellationToken) -> Result<bool> {
        let obj = match cancellable(cancel, self.client.get(&self.target)).await? {
            Lookup::Found(obj) => obj,
            Lookup::NotFound => {
                trace!(object = %self.target, "not found yet");
                return Ok(false);
            }
        };
        for check in &self.checks {
            if !check(&obj)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Object check: condition `condition_type` reports `want`, and the report is
/// current for the object's generation.
///
/// A present `.status.observedGeneration` must equal the generation, as must
/// a nonzero `observedGeneration` on the condition itself. Stale or missing
/// data is "not ready"; only undecodable status is an error.
pub fn condition_status_is<O>(condition_type: impl Into<String>, want: ConditionStatus) -> ObjectCheck<O>
where
    O: ConditionReader + 'static,
{
    let condition_type = condition_type.into();
    Arc::new(move |obj: &O| -> Result<bool> {
        let status = obj.reported_status()?;
        let generation = obj.generation();
        if status.observed_generation.is_some_and(|g| g != generation) {
            return Ok(false);
        }
        let Some(condition) = status.find(&condition_type) else {
            return Ok(false);
        };
        match condition.observed_generation {
            Some(g) if g != 0 && g != generation => Ok(false),
            _ => Ok(condition.status == want),
        }
    })
}
