//! Per-pass state shared by the steps of one reconcile

use std::collections::BTreeMap;
use std::sync::Arc;

use kube::runtime::events::{Event, EventType};
use kube::ResourceExt;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::adapters::{EventSink, TargetClient};
use crate::crd::{find_condition, Condition, ConditionStatus, ManagedResource};
use crate::error::{Error, Result};

use super::ConditionLedger;

/// Scratch values passed from earlier steps to later ones.
///
/// Created empty for every pass. By convention a key is written once by the
/// step that owns it and only read afterwards.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SharedData(BTreeMap<String, Value>);

impl SharedData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Serialize) -> Result<()> {
        self.0.insert(key.into(), serde_json::to_value(value)?);
        Ok(())
    }

    pub fn insert_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), Value::String(value.into()));
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Deserialize a value; `Ok(None)` when the key is absent
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.0
            .get(key)
            .map(|v| {
                T::deserialize(v).map_err(|e| {
                    Error::render(format!("shared data key '{}' has an unexpected shape: {}", key, e))
                })
            })
            .transpose()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whole bag as a JSON object, used as template input
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone().into_iter().collect())
    }
}

/// Everything a step sees during one reconcile pass
pub struct Context<K: ManagedResource> {
    /// Working copy of the managed resource; persisted at the end of the pass
    pub object: K,
    /// Values published by earlier steps
    pub data: SharedData,
    /// Buffered status conditions
    pub conditions: ConditionLedger,
    /// Client for owned target objects
    pub targets: Arc<dyn TargetClient>,
    /// Field manager for writes made by the current step
    pub field_manager: String,
    events: Option<Arc<dyn EventSink>>,
    controller: String,
    step: String,
}

impl<K: ManagedResource> Context<K> {
    pub fn new(object: K, targets: Arc<dyn TargetClient>, controller: impl Into<String>) -> Self {
        let generation = object.meta().generation.unwrap_or(0);
        let controller = controller.into();
        Self {
            object,
            data: SharedData::new(),
            conditions: ConditionLedger::new(generation),
            targets,
            field_manager: controller.clone(),
            events: None,
            controller,
            step: String::new(),
        }
    }

    pub fn with_events(mut self, events: Option<Arc<dyn EventSink>>) -> Self {
        self.events = events;
        self
    }

    pub(crate) fn enter_step(&mut self, step: &str) {
        self.step = step.to_string();
        self.field_manager = format!("{}/{}", self.controller, step);
    }

    /// Name of the controller running this pass
    pub fn controller(&self) -> &str {
        &self.controller
    }

    /// Name of the step currently running
    pub fn step(&self) -> &str {
        &self.step
    }

    pub fn name(&self) -> String {
        self.object.name_any()
    }

    pub fn namespace(&self) -> Option<String> {
        self.object.namespace()
    }

    pub fn is_alive(&self) -> bool {
        self.object.meta().deletion_timestamp.is_none()
    }

    /// Current view of a condition: buffered writes first, then the resource
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions
            .pending(type_)
            .or_else(|| find_condition(self.object.conditions(), type_))
    }

    pub fn condition_status(&self, type_: &str) -> Option<ConditionStatus> {
        self.condition(type_).map(|c| c.status)
    }

    /// Record a Kubernetes Event about the managed resource.
    ///
    /// Best effort: failures are logged and never fail the step.
    pub async fn publish_event(&self, type_: EventType, reason: &str, note: impl Into<String>) {
        let Some(events) = &self.events else {
            return;
        };
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(note.into()),
            action: self.step.clone(),
            secondary: None,
        };
        if let Err(e) = events.publish(&self.object.object_ref(&()), event).await {
            warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }
}

/// Context handed to steps while the engine is being wired up
#[derive(Clone, Debug)]
pub struct SetupContext {
    /// Stand-in for the managed resource, named `setup` in namespace `setup`
    pub placeholder: Value,
    pub controller: String,
    pub step: String,
    pub field_manager: String,
}

impl SetupContext {
    pub(crate) fn new<K: ManagedResource>(controller: &str) -> Self {
        let placeholder = serde_json::json!({
            "apiVersion": K::api_version(&()),
            "kind": K::kind(&()),
            "metadata": {
                "name": "setup",
                "namespace": "setup",
            },
        });
        Self {
            placeholder,
            controller: controller.to_string(),
            step: String::new(),
            field_manager: controller.to_string(),
        }
    }

    pub(crate) fn enter_step(&mut self, step: &str) {
        self.step = step.to_string();
        self.field_manager = format!("{}/{}", self.controller, step);
    }
}
