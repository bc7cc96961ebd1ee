//! In-memory collaborators for driving the engine without a cluster

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{DynamicObject, GroupVersionKind};
use kube::runtime::events::{Event, EventType};
use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;
use serde_json::{json, Value};

use controller_steps::adapters::{gvk_of, patch, EventSink, TargetClient};
use controller_steps::core::{
    metadata_view, status_view, Context, Engine, EngineBuilder, Finalized, ReadyCondition, ResourceStore,
    Step, StepResult,
};
use controller_steps::crd::{ConditionStatus, ManagedResource, WebApp, WebAppSpec};
use controller_steps::{Error, Result};

pub const NAMESPACE: &str = "default";

// ============================================================================
// Managed resources
// ============================================================================

pub fn webapp(name: &str) -> WebApp {
    let mut app = WebApp::new(
        name,
        WebAppSpec {
            image: "nginx:1.27".to_string(),
            replicas: 1,
            port: 80,
            paused: false,
        },
    );
    app.metadata.namespace = Some(NAMESPACE.to_string());
    app.metadata.uid = Some(format!("uid-{}", name));
    app.metadata.generation = Some(1);
    app
}

pub fn object_ref(name: &str) -> ObjectRef<WebApp> {
    ObjectRef::new(name).within(NAMESPACE)
}

/// Engine builder wired to the fakes
pub fn builder(store: &Arc<FakeStore<WebApp>>, targets: &Arc<FakeTargets>) -> EngineBuilder<WebApp> {
    Engine::builder(store.clone(), targets.clone())
}

fn key(namespace: Option<&str>, name: &str) -> String {
    format!("{}/{}", namespace.unwrap_or_default(), name)
}

/// Stores managed resources as JSON and applies merge patches like the API server.
///
/// An object marked for deletion disappears once its last finalizer is removed.
pub struct FakeStore<K> {
    objects: Mutex<HashMap<String, Value>>,
    metadata_patches: AtomicUsize,
    status_patches: AtomicUsize,
    reject_status: AtomicBool,
    _kind: PhantomData<fn() -> K>,
}

impl<K: ManagedResource> FakeStore<K> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            objects: Mutex::new(HashMap::new()),
            metadata_patches: AtomicUsize::new(0),
            status_patches: AtomicUsize::new(0),
            reject_status: AtomicBool::new(false),
            _kind: PhantomData,
        })
    }

    pub fn insert(&self, obj: &K) {
        let value = serde_json::to_value(obj).unwrap();
        self.objects
            .lock()
            .unwrap()
            .insert(key(obj.namespace().as_deref(), &obj.name_any()), value);
    }

    pub fn object(&self, name: &str) -> Option<K> {
        self.objects
            .lock()
            .unwrap()
            .get(&key(Some(NAMESPACE), name))
            .map(|v| serde_json::from_value(v.clone()).unwrap())
    }

    pub fn remove(&self, name: &str) {
        self.objects.lock().unwrap().remove(&key(Some(NAMESPACE), name));
    }

    /// Request deletion the way the API server does when finalizers are present
    pub fn mark_deleted(&self, name: &str) {
        let mut objects = self.objects.lock().unwrap();
        let obj = objects.get_mut(&key(Some(NAMESPACE), name)).unwrap();
        obj["metadata"]["deletionTimestamp"] = serde_json::to_value(Time(Utc::now())).unwrap();
    }

    pub fn update(&self, name: &str, change: impl FnOnce(&mut K)) {
        let mut obj = self.object(name).unwrap();
        change(&mut obj);
        self.insert(&obj);
    }

    pub fn reject_status_patches(&self, reject: bool) {
        self.reject_status.store(reject, Ordering::SeqCst);
    }

    pub fn metadata_patches(&self) -> usize {
        self.metadata_patches.load(Ordering::SeqCst)
    }

    pub fn status_patches(&self) -> usize {
        self.status_patches.load(Ordering::SeqCst)
    }

    fn patch(&self, current: &K, diff: &Value) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        let k = key(current.namespace().as_deref(), &current.name_any());
        let stored = objects
            .get_mut(&k)
            .ok_or_else(|| Error::not_found(current.name_any()))?;
        json_patch::merge(stored, diff);

        let deleting = !stored["metadata"]["deletionTimestamp"].is_null();
        let finalizers_left = stored["metadata"]["finalizers"]
            .as_array()
            .is_some_and(|f| !f.is_empty());
        if deleting && !finalizers_left {
            objects.remove(&k);
        }
        Ok(())
    }
}

#[async_trait]
impl<K: ManagedResource> ResourceStore<K> for FakeStore<K> {
    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>> {
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .get(&key(namespace, name))
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()?)
    }

    async fn patch_metadata(&self, clean: &K, current: &K, _field_manager: &str) -> Result<()> {
        self.metadata_patches.fetch_add(1, Ordering::SeqCst);
        self.patch(current, &patch::diff(&metadata_view(clean), &metadata_view(current)))
    }

    async fn patch_status(&self, clean: &K, current: &K, _field_manager: &str) -> Result<()> {
        self.status_patches.fetch_add(1, Ordering::SeqCst);
        if self.reject_status.load(Ordering::SeqCst) {
            return Err(Error::validation("status subresource rejected the patch"));
        }
        self.patch(current, &patch::diff(&status_view(clean)?, &status_view(current)?))
    }
}

// ============================================================================
// Target objects
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetCall {
    Apply {
        kind: String,
        name: String,
        field_manager: String,
    },
    Delete {
        kind: String,
        name: String,
    },
}

fn target_key(gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> String {
    format!("{}/{}/{}/{}", gvk.group, gvk.kind, namespace.unwrap_or_default(), name)
}

/// Target cluster where apply merges fields into existing objects.
///
/// Fields written by other actors survive an apply that does not mention them.
#[derive(Default)]
pub struct FakeTargets {
    objects: Mutex<BTreeMap<String, Value>>,
    calls: Mutex<Vec<TargetCall>>,
    rejected_kinds: Mutex<HashSet<String>>,
    revision: AtomicUsize,
}

impl FakeTargets {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Store an object as if another actor created it
    pub fn insert(&self, value: Value) {
        let obj: DynamicObject = serde_json::from_value(value.clone()).unwrap();
        let gvk = gvk_of(&obj).unwrap();
        let k = target_key(&gvk, obj.namespace().as_deref(), &obj.name_any());
        self.objects.lock().unwrap().insert(k, value);
    }

    pub fn object(&self, group: &str, kind: &str, name: &str) -> Option<Value> {
        let gvk = GroupVersionKind::gvk(group, "v1", kind);
        self.objects
            .lock()
            .unwrap()
            .get(&target_key(&gvk, Some(NAMESPACE), name))
            .cloned()
    }

    /// Overwrite the status block, as the owning controller of the target would
    pub fn set_status(&self, group: &str, kind: &str, name: &str, status: Value) {
        let gvk = GroupVersionKind::gvk(group, "v1", kind);
        let mut objects = self.objects.lock().unwrap();
        let obj = objects.get_mut(&target_key(&gvk, Some(NAMESPACE), name)).unwrap();
        obj["status"] = status;
    }

    pub fn reject(&self, kind: &str) {
        self.rejected_kinds.lock().unwrap().insert(kind.to_string());
    }

    pub fn allow(&self, kind: &str) {
        self.rejected_kinds.lock().unwrap().remove(kind);
    }

    pub fn calls(&self) -> Vec<TargetCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn applies(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, TargetCall::Apply { .. }))
            .count()
    }

    pub fn deletes(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, TargetCall::Delete { .. }))
            .count()
    }
}

#[async_trait]
impl TargetClient for FakeTargets {
    async fn get(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .get(&target_key(gvk, namespace, name))
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()?)
    }

    async fn apply(&self, obj: &DynamicObject, field_manager: &str) -> Result<DynamicObject> {
        let gvk = gvk_of(obj)?;
        let name = obj.name_any();
        if self.rejected_kinds.lock().unwrap().contains(&gvk.kind) {
            return Err(Error::validation(format!("apply of {} {} rejected", gvk.kind, name)));
        }
        self.calls.lock().unwrap().push(TargetCall::Apply {
            kind: gvk.kind.clone(),
            name: name.clone(),
            field_manager: field_manager.to_string(),
        });

        let applied = serde_json::to_value(obj)?;
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        let mut objects = self.objects.lock().unwrap();
        let stored = objects
            .entry(target_key(&gvk, obj.namespace().as_deref(), &name))
            .or_insert_with(|| json!({"metadata": {"uid": format!("target-uid-{}", revision)}}));
        json_patch::merge(stored, &applied);
        stored["metadata"]["resourceVersion"] = json!(revision.to_string());
        Ok(serde_json::from_value(stored.clone())?)
    }

    async fn delete(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> Result<()> {
        self.calls.lock().unwrap().push(TargetCall::Delete {
            kind: gvk.kind.clone(),
            name: name.to_string(),
        });
        self.objects
            .lock()
            .unwrap()
            .remove(&target_key(gvk, namespace, name))
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("{} {}", gvk.kind, name)))
    }
}

// ============================================================================
// Events
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedEvent {
    pub object: String,
    pub type_: EventType,
    pub reason: String,
    pub note: String,
    pub action: String,
}

/// Event sink that keeps everything published to it
#[derive(Default)]
pub struct FakeEvents {
    events: Mutex<Vec<RecordedEvent>>,
}

impl FakeEvents {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn with_reason(&self, reason: &str) -> Vec<RecordedEvent> {
        self.events().into_iter().filter(|e| e.reason == reason).collect()
    }
}

#[async_trait]
impl EventSink for FakeEvents {
    async fn publish(&self, regarding: &ObjectReference, event: Event) -> Result<()> {
        self.events.lock().unwrap().push(RecordedEvent {
            object: regarding.name.clone().unwrap_or_default(),
            type_: event.type_,
            reason: event.reason,
            note: event.note.unwrap_or_default(),
            action: event.action,
        });
        Ok(())
    }
}

// ============================================================================
// Scripted steps
// ============================================================================

pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Step whose behaviour is set up by the test; records every call
pub struct ScriptedStep {
    name: String,
    log: CallLog,
    result: StepResult,
    fail: Arc<AtomicBool>,
    finalizes: bool,
    finalize_done: Arc<AtomicBool>,
    ready: Option<ReadyCondition>,
    publish: Option<(String, String)>,
}

impl ScriptedStep {
    pub fn new(name: &str, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
            result: StepResult::default(),
            fail: Arc::new(AtomicBool::new(false)),
            finalizes: false,
            finalize_done: Arc::new(AtomicBool::new(true)),
            ready: None,
            publish: None,
        }
    }

    pub fn returning(mut self, result: StepResult) -> Self {
        self.result = result;
        self
    }

    pub fn failing(self) -> Self {
        self.fail.store(true, Ordering::SeqCst);
        self
    }

    /// Shared switch toggling failure between passes
    pub fn fail_switch(&self) -> Arc<AtomicBool> {
        self.fail.clone()
    }

    pub fn with_finalizer(mut self, done: &Arc<AtomicBool>) -> Self {
        self.finalizes = true;
        self.finalize_done = done.clone();
        self
    }

    pub fn with_ready(mut self, ready: ReadyCondition) -> Self {
        self.ready = Some(ready);
        self
    }

    pub fn publishing(mut self, key: &str, value: &str) -> Self {
        self.publish = Some((key.to_string(), value.to_string()));
        self
    }
}

#[async_trait]
impl<K: ManagedResource> Step<K> for ScriptedStep {
    async fn reconcile(&self, ctx: &mut Context<K>) -> Result<StepResult> {
        let entry = match ctx.data.get_str("published") {
            Some(value) => format!("{}:reconcile[published={}]", self.name, value),
            None => format!("{}:reconcile", self.name),
        };
        self.log.lock().unwrap().push(entry);

        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::validation(format!("{} is broken", self.name)).with_result(self.result));
        }
        if let Some((key, value)) = &self.publish {
            ctx.data.insert_string(key.clone(), value.clone());
        }
        if let Some(ready) = &self.ready {
            let status = match ready.on_error {
                ConditionStatus::True => ConditionStatus::False,
                _ => ConditionStatus::True,
            };
            ctx.conditions.set(&ready.type_, status, "Healthy", "");
        }
        Ok(self.result)
    }

    fn finalizes(&self) -> bool {
        self.finalizes
    }

    async fn finalize(&self, _ctx: &mut Context<K>) -> Result<Finalized> {
        self.log.lock().unwrap().push(format!("{}:finalize", self.name));
        if self.finalize_done.load(Ordering::SeqCst) {
            Ok(Finalized::done())
        } else {
            Ok(Finalized::pending(StepResult::requeue_after(
                std::time::Duration::from_secs(5),
            )))
        }
    }

    fn ready_condition(&self) -> Option<ReadyCondition> {
        self.ready.clone()
    }
}
