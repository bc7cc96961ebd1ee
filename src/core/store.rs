//! Persistence of the managed resource itself

use std::marker::PhantomData;

use async_trait::async_trait;
use kube::{
    api::{Patch, PatchParams},
    Api, Client, ResourceExt,
};
use serde_json::{json, Value};

use crate::adapters::patch;
use crate::crd::ManagedResource;
use crate::error::{Error, Result};

/// The slice of metadata the engine is allowed to change
pub fn metadata_view<K: ManagedResource>(obj: &K) -> Value {
    let meta = obj.meta();
    json!({
        "metadata": {
            "labels": meta.labels,
            "annotations": meta.annotations,
            "finalizers": meta.finalizers,
        }
    })
}

/// The status block of a resource, `null` when absent
pub fn status_view<K: ManagedResource>(obj: &K) -> Result<Value> {
    let value = serde_json::to_value(obj)?;
    Ok(json!({ "status": value.get("status").cloned().unwrap_or(Value::Null) }))
}

/// Fetch and persist managed resources.
///
/// Patches are merge patches computed against `clean`, the snapshot taken
/// when the pass started. A resource that vanished is reported as
/// [`Error::NotFound`].
#[async_trait]
pub trait ResourceStore<K: ManagedResource>: Send + Sync {
    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>>;

    async fn patch_metadata(&self, clean: &K, current: &K, field_manager: &str) -> Result<()>;

    async fn patch_status(&self, clean: &K, current: &K, field_manager: &str) -> Result<()>;
}

/// [`ResourceStore`] backed by the Kubernetes API
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K: ManagedResource> KubeStore<K> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }

    fn api(&self, namespace: Option<&str>) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::default_namespaced(self.client.clone()),
        }
    }
}

fn not_found_or_kube(obj: &str, e: kube::Error) -> Error {
    match e {
        kube::Error::Api(resp) if resp.code == 404 => Error::not_found(obj.to_string()),
        other => Error::Kube(other),
    }
}

#[async_trait]
impl<K> ResourceStore<K> for KubeStore<K>
where
    K: ManagedResource + kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
{
    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn patch_metadata(&self, clean: &K, current: &K, field_manager: &str) -> Result<()> {
        let diff = patch::diff(&metadata_view(clean), &metadata_view(current));
        if patch::is_empty(&diff) {
            return Ok(());
        }
        let name = current.name_any();
        let params = PatchParams {
            field_manager: Some(field_manager.to_string()),
            ..Default::default()
        };
        self.api(current.namespace().as_deref())
            .patch(&name, &params, &Patch::Merge(&diff))
            .await
            .map_err(|e| not_found_or_kube(&name, e))?;
        Ok(())
    }

    async fn patch_status(&self, clean: &K, current: &K, field_manager: &str) -> Result<()> {
        let diff = patch::diff(&status_view(clean)?, &status_view(current)?);
        if patch::is_empty(&diff) {
            return Ok(());
        }
        let name = current.name_any();
        let params = PatchParams {
            field_manager: Some(field_manager.to_string()),
            ..Default::default()
        };
        self.api(current.namespace().as_deref())
            .patch_status(&name, &params, &Patch::Merge(&diff))
            .await
            .map_err(|e| not_found_or_kube(&name, e))?;
        Ok(())
    }
}
