//! Steps and templates for the bundled `WebApp` controller
//!
//! A WebApp gets a generated credentials secret, a Deployment and a
//! Service. `Ready` follows the Deployment's `Available` condition. Setting
//! `spec.paused` removes the Deployment but keeps everything else.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::adapters::{EventSink, TargetClient};
use crate::config::Config;
use crate::core::{Engine, ResourceStore, CONDITION_TYPE_ANNOTATION, DELETE_ANNOTATION};
use crate::crd::WebApp;
use crate::error::Result;
use crate::steps::{RandomSecretStep, ReadyStatusStep, TemplateStep};
use crate::templates::{RenderInput, YamlTemplate};

pub const CREDENTIALS_SUFFIX: &str = "credentials";
pub const PASSWORD_KEY: &str = "password";
pub const DEPLOYMENT_CONDITION: &str = "DeploymentAvailable";

fn labels(name: &str) -> Value {
    json!({
        "app.kubernetes.io/name": name,
        "app.kubernetes.io/managed-by": "controller-steps",
    })
}

/// Deployment running the WebApp image, deleted while paused
pub fn deployment(input: &RenderInput<'_>) -> Result<Value> {
    let name = input.name();
    let mut annotations = Map::new();
    annotations.insert(CONDITION_TYPE_ANNOTATION.to_string(), json!("Available"));
    if input.spec("paused").as_bool().unwrap_or(false) {
        annotations.insert(DELETE_ANNOTATION.to_string(), json!("true"));
    }

    Ok(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": name,
            "labels": labels(name),
            "annotations": annotations,
        },
        "spec": {
            "replicas": input.spec("replicas").as_i64().unwrap_or(1),
            "selector": {"matchLabels": labels(name)},
            "template": {
                "metadata": {"labels": labels(name)},
                "spec": {
                    "containers": [{
                        "name": "app",
                        "image": input.spec("image").as_str().unwrap_or_default(),
                        "ports": [{"containerPort": input.spec("port").as_i64().unwrap_or(80)}],
                        "env": [{
                            "name": "PASSWORD",
                            "valueFrom": {"secretKeyRef": {
                                "name": format!("{}-{}", name, CREDENTIALS_SUFFIX),
                                "key": PASSWORD_KEY,
                            }},
                        }],
                    }],
                },
            },
        },
    }))
}

/// Service in front of the Deployment, written as YAML
pub fn service(input: &RenderInput<'_>) -> Result<String> {
    let name = serde_json::to_string(input.name())?;
    let port = input.spec("port").as_i64().unwrap_or(80);
    Ok(format!(
        r#"apiVersion: v1
kind: Service
metadata:
  name: {name}
spec:
  selector:
    app.kubernetes.io/name: {name}
  ports:
    - name: http
      port: {port}
      targetPort: {port}
"#
    ))
}

/// Assemble the WebApp engine
pub fn engine(
    store: Arc<dyn ResourceStore<WebApp>>,
    targets: Arc<dyn TargetClient>,
    events: Option<Arc<dyn EventSink>>,
    config: &Config,
) -> Result<Engine<WebApp>> {
    let mut builder = Engine::builder(store, targets);
    if let Some(field_manager) = &config.field_manager {
        builder = builder.field_manager(field_manager);
    }
    if let Some(events) = events {
        builder = builder.events(events);
    }
    builder
        .step(
            "credentials",
            RandomSecretStep::new([PASSWORD_KEY]).with_suffix(CREDENTIALS_SUFFIX),
        )
        .step(
            "deployment",
            TemplateStep::new(deployment).with_condition(DEPLOYMENT_CONDITION),
        )
        .step("service", TemplateStep::new(YamlTemplate(service)))
        .step("ready", ReadyStatusStep::new([DEPLOYMENT_CONDITION]))
        .build()
}
