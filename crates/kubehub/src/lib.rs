//! devkube kubehub: kube-rs backed [`ObjectClient`] for dynamic objects.

#![forbid(unsafe_code)]

use std::collections::HashMap;

use async_trait::async_trait;
use devkube_core::{ApiObject, Created, Error, Lookup, ObjectClient, ObjectRef, Result};
use kube::{
    api::{Api, PostParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    discovery::{ApiCapabilities, Discovery, Scope},
    Client,
};
use tokio::sync::Mutex;
use tracing::debug;

/// Talks to the API server through discovery-resolved dynamic APIs.
/// Resolved resources are cached per group/version/kind.
pub struct KubeClient {
    client: Client,
    resources: Mutex<HashMap<String, (ApiResource, bool)>>,
}

impl KubeClient {
    pub fn new(client: Client) -> Self {
        Self { client, resources: Mutex::new(HashMap::new()) }
    }

    /// Kubeconfig or in-cluster configuration.
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await.map_err(Error::client)?;
        Ok(Self::new(client))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn api_for(&self, target: &ObjectRef) -> Result<Api<DynamicObject>> {
        let key = target.gvk_key();
        let cached = self.resources.lock().await.get(&key).cloned();
        let (ar, namespaced) = match cached {
            Some(found) => found,
            None => {
                let gvk = GroupVersionKind::gvk(&target.group, &target.version, &target.kind);
                let found = find_api_resource(self.client.clone(), &gvk).await?;
                self.resources.lock().await.insert(key, found.clone());
                found
            }
        };
        if !namespaced {
            return Ok(Api::all_with(self.client.clone(), &ar));
        }
        let ns = target.namespace.as_deref().unwrap_or_else(|| self.client.default_namespace());
        Ok(Api::namespaced_with(self.client.clone(), ns, &ar))
    }
}

async fn find_api_resource(client: Client, gvk: &GroupVersionKind) -> Result<(ApiResource, bool)> {
    let discovery = Discovery::new(client)
        .filter(&[gvk.group.as_str()])
        .run()
        .await
        .map_err(Error::client)?;
    let found = discovery
        .groups()
        .filter(|group| group.name() == gvk.group)
        .find_map(|group| match_resource(group.versioned_resources(&gvk.version), gvk))
        .ok_or_else(|| Error::UnresolvableKind(format!("GVK not found: {}/{}/{}", gvk.group, gvk.version, gvk.kind)));
    found
}

/// Picks `gvk` out of one group's resources for any served version, preferred
/// or not. Returns the resource and whether it is namespaced.
fn match_resource<I>(resources: I, gvk: &GroupVersionKind) -> Option<(ApiResource, bool)>
where
    I: IntoIterator<Item = (ApiResource, ApiCapabilities)>,
{
    resources
        .into_iter()
        .find(|(ar, _)| ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind)
        .map(|(ar, caps)| (ar, matches!(caps.scope, Scope::Namespaced)))
}

fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists")
}

#[async_trait]
impl ObjectClient for KubeClient {
    type Object = DynamicObject;

    async fn get(&self, target: &ObjectRef) -> Result<Lookup<DynamicObject>> {
        let api = self.api_for(target).await?;
        match api.get_opt(&target.name).await.map_err(Error::client)? {
            Some(obj) => Ok(Lookup::Found(obj)),
            None => Ok(Lookup::NotFound),
        }
    }

    async fn create(&self, object: &DynamicObject) -> Result<Created> {
        let target = object.object_ref()?;
        let api = self.api_for(&target).await?;
        match api.create(&PostParams::default(), object).await {
            Ok(_) => Ok(Created::Fresh),
            Err(e) if is_already_exists(&e) => {
                debug!(object = %target, "create conflicted with existing object");
                Ok(Created::AlreadyExists)
            }
            Err(e) => Err(Error::client(e)),
        }
    }
}
