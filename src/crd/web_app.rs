//! WebApp Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{Condition, ManagedResource};

/// WebApp resource specification
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "demo.controller-steps.io",
    version = "v1alpha1",
    kind = "WebApp",
    plural = "webapps",
    singular = "webapp",
    shortname = "wa",
    namespaced,
    status = "WebAppStatus",
    printcolumn = r#"{"name": "Ready", "type": "string", "jsonPath": ".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WebAppSpec {
    /// Container image to run
    pub image: String,

    /// Number of replicas
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Container port exposed by the service
    #[serde(default = "default_port")]
    pub port: i32,

    /// Remove the deployment while keeping the resource around
    #[serde(default)]
    pub paused: bool,
}

fn default_replicas() -> i32 {
    1
}

fn default_port() -> i32 {
    80
}

/// WebApp status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebAppStatus {
    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl ManagedResource for WebApp {
    fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or(&[])
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status.get_or_insert_with(WebAppStatus::default).conditions
    }
}
