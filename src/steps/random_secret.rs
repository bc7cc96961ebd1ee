//! Owned secret holding generated random values

use async_trait::async_trait;
use kube::api::{DynamicObject, GroupVersionKind};
use kube::runtime::events::EventType;
use serde_json::json;
use tracing::info;

use crate::adapters::{
    controller_reference, encode_secret_data, random_string, secret_data, set_controller_reference,
    SecretData, RANDOM_BYTES,
};
use crate::core::{Context, SetupContext, Step, StepResult, WatchRegistrar};
use crate::crd::ManagedResource;
use crate::error::Result;
use crate::predicates::SecretField;

const DEFAULT_KEY: &str = "password";

/// Event reason recorded for every freshly generated value
pub const GENERATED_REASON: &str = "GeneratedRandomValue";

fn secret_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("", "v1", "Secret")
}

/// Keeps a secret named `{resource}-{suffix}` populated with random values.
///
/// Existing non-empty values are never replaced. Every value, old or new, is
/// published into the shared data under its key for later steps.
pub struct RandomSecretStep {
    keys: Vec<String>,
    suffix: Option<String>,
}

impl RandomSecretStep {
    /// Keys to fill; `password` when none are given
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut keys: Vec<String> = keys.into_iter().map(Into::into).filter(|k| !k.is_empty()).collect();
        if keys.is_empty() {
            keys.push(DEFAULT_KEY.to_string());
        }
        keys.dedup();
        Self { keys, suffix: None }
    }

    /// Secret name suffix, defaults to the controller name
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn secret_name(&self, resource: &str, controller: &str) -> String {
        format!("{}-{}", resource, self.suffix.as_deref().unwrap_or(controller))
    }
}

impl Default for RandomSecretStep {
    fn default() -> Self {
        Self::new([DEFAULT_KEY])
    }
}

#[async_trait]
impl<K: ManagedResource> Step<K> for RandomSecretStep {
    async fn setup(&self, _ctx: &SetupContext, registrar: &mut WatchRegistrar) -> Result<()> {
        registrar.owns_with(secret_gvk(), SecretField::new(self.keys.clone()));
        Ok(())
    }

    async fn reconcile(&self, ctx: &mut Context<K>) -> Result<StepResult> {
        let name = self.secret_name(&ctx.name(), ctx.controller());
        let namespace = ctx.namespace();

        let existing = match ctx.targets.get(&secret_gvk(), namespace.as_deref(), &name).await? {
            Some(secret) => secret_data(&secret)?,
            None => SecretData::new(),
        };

        let mut data = SecretData::new();
        let mut generated = Vec::new();
        for key in &self.keys {
            let value = match existing.get(key).filter(|v| !v.is_empty()) {
                Some(value) => value.clone(),
                None => {
                    generated.push(key.as_str());
                    random_string(RANDOM_BYTES)?.into_bytes()
                }
            };
            ctx.data.insert_string(key.clone(), String::from_utf8_lossy(&value));
            data.insert(key.clone(), value);
        }

        if generated.is_empty() {
            return Ok(StepResult::default());
        }

        let mut secret: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {
                "name": name,
                "namespace": namespace,
            },
            "type": "Opaque",
            "data": encode_secret_data(&data),
        }))?;
        set_controller_reference(&mut secret, controller_reference(&ctx.object)?)?;
        ctx.targets.apply(&secret, &ctx.field_manager).await?;
        info!(secret = %name, keys = ?generated, "Generated random secret values");
        for key in generated {
            ctx.publish_event(
                EventType::Normal,
                GENERATED_REASON,
                format!("Generated a random value for key {}", key),
            )
            .await;
        }

        Ok(StepResult::default())
    }
}
