//! devkube cluster: create objects, then wait until every kind that defines
//! readiness reports ready.

#![forbid(unsafe_code)]

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use devkube_check::{check_object_and, check_object_exists, check_object_gone, condition_status_is};
use devkube_core::{ApiObject, ConditionStatus, Created, Error, KindResolver, ObjectCheck, ObjectClient, ObjectRef, Result};
use devkube_time::Poller;
use kube::core::DynamicObject;
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod registry;

pub use registry::{Readiness, ReadinessChecks};

/// Handle for creating objects in a cluster and awaiting their readiness.
pub struct Cluster<C: ObjectClient, K> {
    client: Arc<C>,
    resolver: K,
    poller: Poller,
    readiness: Arc<ReadinessChecks<C::Object>>,
}

impl<C, K> Cluster<C, K>
where
    C: ObjectClient,
    K: KindResolver<C::Object>,
{
    /// Uses a default [`Poller`] and the built-in readiness checks.
    pub fn new(client: Arc<C>, resolver: K) -> Self {
        Self { client, resolver, poller: Poller::default(), readiness: Arc::new(ReadinessChecks::builtin()) }
    }

    pub fn with_poller(mut self, poller: Poller) -> Self {
        self.poller = poller;
        self
    }

    /// Replaces the built-in checks unless `explicit` is empty.
    pub fn with_readiness_checks(mut self, explicit: ReadinessChecks<C::Object>) -> Self {
        self.readiness = Arc::new(ReadinessChecks::default_or_override(explicit));
        self
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    pub fn readiness_checks(&self) -> &ReadinessChecks<C::Object> {
        &self.readiness
    }

    /// Creates every object in order, then waits for readiness of each one
    /// whose kind has registered checks, again in order.
    ///
    /// "Already exists" counts as created. The first creation or wait error
    /// is returned as is; nothing already created is rolled back.
    pub async fn create_and_await_readiness(&self, cancel: &CancellationToken, objects: &[C::Object]) -> Result<()> {
        let mut pending: Vec<(ObjectRef, Vec<ObjectCheck<C::Object>>)> = Vec::new();
        for obj in objects {
            let target = obj.object_ref()?;
            let created = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                res = self.client.create(obj) => res,
            };
            match created {
                Ok(Created::Fresh) => {
                    counter!("objects_created_total", 1u64);
                    info!(object = %target, "created");
                }
                Ok(Created::AlreadyExists) => {
                    counter!("objects_already_exist_total", 1u64);
                    info!(object = %target, "already exists");
                }
                Err(e) => {
                    warn!(object = %target, error = %e, "create failed");
                    return Err(e);
                }
            }

            let kind = self.resolver.kind_of(obj)?;
            match self.readiness.lookup(&kind) {
                Readiness::Checks(checks) => pending.push((target, checks.to_vec())),
                Readiness::NoWait => debug!(object = %target, kind = %kind, "kind needs no readiness wait"),
                Readiness::Unregistered => debug!(object = %target, kind = %kind, "no readiness checks registered for kind"),
            }
        }

        for (target, checks) in pending {
            info!(object = %target, "waiting for readiness");
            let check = check_object_and(self.client.clone(), target.clone(), checks);
            if let Err(e) = self.poller.wait(cancel, &check).await {
                warn!(object = %target, error = %e, "readiness wait failed");
                return Err(e);
            }
            info!(object = %target, "ready");
        }
        Ok(())
    }

    pub async fn wait_exists(&self, cancel: &CancellationToken, target: ObjectRef) -> Result<()> {
        self.poller.wait(cancel, &check_object_exists(self.client.clone(), target)).await
    }

    pub async fn wait_gone(&self, cancel: &CancellationToken, target: ObjectRef) -> Result<()> {
        self.poller.wait(cancel, &check_object_gone(self.client.clone(), target)).await
    }

    pub async fn wait_for_condition(
        &self,
        cancel: &CancellationToken,
        target: ObjectRef,
        condition_type: &str,
        status: ConditionStatus,
    ) -> Result<()> {
        let check = check_object_and(self.client.clone(), target, vec![condition_status_is(condition_type, status)]);
        self.poller.wait(cancel, &check).await
    }
}

impl<C, K> Cluster<C, K>
where
    C: ObjectClient<Object = DynamicObject>,
    K: KindResolver<DynamicObject>,
{
    /// Loads manifests from files and creates them as one batch.
    pub async fn create_and_wait_from_files<P: AsRef<Path>>(&self, cancel: &CancellationToken, files: &[P]) -> anyhow::Result<()> {
        let mut objects = Vec::new();
        for file in files {
            let file = file.as_ref();
            let objs = devkube_apply::load_from_file(file)
                .with_context(|| format!("loading objects from file {}", file.display()))?;
            objects.extend(objs);
        }
        self.create_and_await_readiness(cancel, &objects).await.context("creating objects")
    }

    /// Loads every manifest of each folder and creates them as one batch.
    pub async fn create_and_wait_from_folders<P: AsRef<Path>>(&self, cancel: &CancellationToken, folders: &[P]) -> anyhow::Result<()> {
        let mut objects = Vec::new();
        for folder in folders {
            let folder = folder.as_ref();
            let objs = devkube_apply::load_from_folder(folder)
                .with_context(|| format!("loading objects from folder {}", folder.display()))?;
            objects.extend(objs);
        }
        self.create_and_await_readiness(cancel, &objects).await.context("creating objects")
    }

    /// Fetches manifests from `http(s)` URLs and creates them as one batch.
    /// Cancelling `cancel` also abandons a download in flight.
    pub async fn create_and_wait_from_http<U: AsRef<str>>(&self, cancel: &CancellationToken, urls: &[U]) -> anyhow::Result<()> {
        let objects = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled.into()),
            res = devkube_apply::load_from_urls(urls) => res?,
        };
        self.create_and_await_readiness(cancel, &objects).await.context("creating objects")
    }
}
