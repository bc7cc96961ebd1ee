//! Client for the external objects that steps create, observe and delete

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use kube::{
    api::{DeleteParams, DynamicObject, GroupVersionKind, Patch, PatchParams},
    discovery::{self, ApiCapabilities, ApiResource, Scope},
    Api, Client, ResourceExt,
};
use tracing::debug;

use crate::error::{Error, Result};

/// Access to target objects of arbitrary kinds.
///
/// `delete` reports a missing object as [`Error::NotFound`]; `get` reports
/// it as `Ok(None)`.
#[async_trait]
pub trait TargetClient: Send + Sync {
    async fn get(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>>;

    /// Server-side apply owned by `field_manager`, forcing conflicts
    async fn apply(&self, obj: &DynamicObject, field_manager: &str) -> Result<DynamicObject>;

    /// Delete with background propagation
    async fn delete(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> Result<()>;
}

/// Parse the group/version/kind out of an object's type metadata
pub fn gvk_of(obj: &DynamicObject) -> Result<GroupVersionKind> {
    let types = obj
        .types
        .as_ref()
        .ok_or_else(|| Error::render(format!("object {} has no apiVersion/kind", obj.name_any())))?;
    if types.kind.is_empty() {
        return Err(Error::render(format!("object {} has an empty kind", obj.name_any())));
    }
    let (group, version) = match types.api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", types.api_version.as_str()),
    };
    if version.is_empty() {
        return Err(Error::render(format!(
            "object {} has an invalid apiVersion '{}'",
            obj.name_any(),
            types.api_version
        )));
    }
    Ok(GroupVersionKind::gvk(group, version, &types.kind))
}

fn cache_key(gvk: &GroupVersionKind) -> String {
    format!("{}/{}/{}", gvk.group, gvk.version, gvk.kind)
}

/// [`TargetClient`] backed by the Kubernetes API, resolving kinds through discovery
pub struct KubeTargetClient {
    client: Client,
    resources: Mutex<HashMap<String, (ApiResource, ApiCapabilities)>>,
}

impl KubeTargetClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resources: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, key: &str) -> Option<(ApiResource, ApiCapabilities)> {
        self.resources
            .lock()
            .ok()
            .and_then(|cache| cache.get(key).cloned())
    }

    async fn api(&self, gvk: &GroupVersionKind, namespace: Option<&str>) -> Result<Api<DynamicObject>> {
        let key = cache_key(gvk);
        let (resource, caps) = match self.cached(&key) {
            Some(hit) => hit,
            None => {
                let resolved = discovery::pinned_kind(&self.client, gvk)
                    .await
                    .map_err(|e| Error::discovery(format!("unable to resolve {}: {}", key, e)))?;
                debug!(kind = %key, plural = %resolved.0.plural, "Resolved target kind");
                if let Ok(mut cache) = self.resources.lock() {
                    cache.insert(key, resolved.clone());
                }
                resolved
            }
        };

        let api = match (caps.scope, namespace) {
            (Scope::Namespaced, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &resource),
            (Scope::Namespaced, None) => Api::default_namespaced_with(self.client.clone(), &resource),
            (Scope::Cluster, _) => Api::all_with(self.client.clone(), &resource),
        };
        Ok(api)
    }
}

#[async_trait]
impl TargetClient for KubeTargetClient {
    async fn get(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        let api = self.api(gvk, namespace).await?;
        Ok(api.get_opt(name).await?)
    }

    async fn apply(&self, obj: &DynamicObject, field_manager: &str) -> Result<DynamicObject> {
        let gvk = gvk_of(obj)?;
        let api = self.api(&gvk, obj.metadata.namespace.as_deref()).await?;
        let params = PatchParams::apply(field_manager).force();
        Ok(api.patch(&obj.name_any(), &params, &Patch::Apply(obj)).await?)
    }

    async fn delete(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> Result<()> {
        let api = self.api(gvk, namespace).await?;
        match api.delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Err(Error::not_found(format!(
                "{} {}/{}",
                gvk.kind,
                namespace.unwrap_or_default(),
                name
            ))),
            Err(e) => Err(Error::Kube(e)),
        }
    }
}
