//! Event filters for owned-object watches
//!
//! A [`Predicate`] decides whether an event on an owned object should
//! trigger a reconcile of its owner. [`EventFilter`] turns the raw watcher
//! stream into create, update and delete calls on a predicate.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use kube::api::DynamicObject;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::adapters::{is_secret, patch, secret_data};

/// Environment variable enabling [`UpdateDebug`]
pub const DEBUG_UPDATE_ENV: &str = "DEBUG_UPDATE";

/// Decides which owned-object events are worth a reconcile.
///
/// Every method defaults to processing the event.
pub trait Predicate: Send + Sync {
    fn create(&self, _obj: &DynamicObject) -> bool {
        true
    }

    fn update(&self, _old: &DynamicObject, _new: &DynamicObject) -> bool {
        true
    }

    fn delete(&self, _obj: &DynamicObject) -> bool {
        true
    }

    fn generic(&self, _obj: &DynamicObject) -> bool {
        true
    }
}

/// Drops updates that change nothing beyond bookkeeping fields.
///
/// `generation`, `resourceVersion` and `managedFields` are ignored when
/// comparing old and new.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeepEquals;

fn without_bookkeeping(obj: &DynamicObject) -> serde_json::Value {
    let mut obj = obj.clone();
    obj.metadata.generation = None;
    obj.metadata.resource_version = None;
    obj.metadata.managed_fields = None;
    serde_json::to_value(&obj).unwrap_or(serde_json::Value::Null)
}

impl Predicate for DeepEquals {
    fn update(&self, old: &DynamicObject, new: &DynamicObject) -> bool {
        let changed = without_bookkeeping(old) != without_bookkeeping(new);
        if !changed {
            debug!(name = %new.name_any(), "Ignoring update without meaningful changes");
        }
        changed
    }
}

/// Passes secret updates only when one of the watched keys changed.
///
/// A key appearing or disappearing counts as a change. Objects that are
/// not readable secrets are always processed.
#[derive(Clone, Debug)]
pub struct SecretField {
    keys: Vec<String>,
}

impl SecretField {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

impl Predicate for SecretField {
    fn update(&self, old: &DynamicObject, new: &DynamicObject) -> bool {
        if !is_secret(old) || !is_secret(new) {
            return true;
        }
        let (Ok(old_data), Ok(new_data)) = (secret_data(old), secret_data(new)) else {
            return true;
        };
        self.keys
            .iter()
            .any(|key| old_data.get(key) != new_data.get(key))
    }
}

/// Logs the difference carried by every update, then lets it through.
///
/// Silent unless enabled, normally via `DEBUG_UPDATE=true`.
#[derive(Clone, Copy, Debug, Default)]
pub struct UpdateDebug {
    enabled: bool,
}

impl UpdateDebug {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn from_env() -> Self {
        Self::new(std::env::var(DEBUG_UPDATE_ENV).is_ok_and(|v| v == "true"))
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }
}

impl Predicate for UpdateDebug {
    fn update(&self, old: &DynamicObject, new: &DynamicObject) -> bool {
        if self.enabled {
            let before = serde_json::to_value(old).unwrap_or_default();
            let after = serde_json::to_value(new).unwrap_or_default();
            let delta = patch::diff(&before, &after);
            let kind = new.types.as_ref().map(|t| t.kind.as_str()).unwrap_or_default();
            info!(
                kind,
                name = %new.name_any(),
                namespace = %new.namespace().unwrap_or_default(),
                diff = %delta,
                "Update event"
            );
        }
        true
    }
}

/// Runs several predicates, processing the event only if all agree
#[derive(Clone, Default)]
pub struct All(pub Vec<Arc<dyn Predicate>>);

impl Predicate for All {
    fn create(&self, obj: &DynamicObject) -> bool {
        self.0.iter().all(|p| p.create(obj))
    }

    fn update(&self, old: &DynamicObject, new: &DynamicObject) -> bool {
        self.0.iter().all(|p| p.update(old, new))
    }

    fn delete(&self, obj: &DynamicObject) -> bool {
        self.0.iter().all(|p| p.delete(obj))
    }

    fn generic(&self, obj: &DynamicObject) -> bool {
        self.0.iter().all(|p| p.generic(obj))
    }
}

/// Classifies watcher output into create, update and delete events.
///
/// The last seen version of each object is cached so updates can be
/// compared against it. A relist (`on_relist_start` .. `on_relist_done`)
/// drops every cached object the relist did not mention.
#[derive(Default)]
pub struct EventFilter {
    predicate: Option<Arc<dyn Predicate>>,
    seen: HashMap<String, DynamicObject>,
    relisted: Option<HashSet<String>>,
}

fn object_key(obj: &DynamicObject) -> String {
    match obj.uid() {
        Some(uid) => uid,
        None => format!("{}/{}", obj.namespace().unwrap_or_default(), obj.name_any()),
    }
}

impl EventFilter {
    pub fn new(predicate: Option<Arc<dyn Predicate>>) -> Self {
        Self {
            predicate,
            seen: HashMap::new(),
            relisted: None,
        }
    }

    /// The watch (re)started and a full listing follows
    pub fn on_relist_start(&mut self) {
        self.relisted = Some(HashSet::new());
    }

    /// The listing is complete; forget objects that were deleted while the watch was down
    pub fn on_relist_done(&mut self) {
        if let Some(relisted) = self.relisted.take() {
            let before = self.seen.len();
            self.seen.retain(|key, _| relisted.contains(key));
            if self.seen.len() != before {
                debug!(pruned = before - self.seen.len(), "Dropped objects missing from relist");
            }
        }
    }

    /// An object was added or modified; returns it if it should trigger a reconcile
    pub fn on_apply(&mut self, obj: DynamicObject) -> Option<DynamicObject> {
        let key = object_key(&obj);
        if let Some(relisted) = self.relisted.as_mut() {
            relisted.insert(key.clone());
        }
        let previous = self.seen.insert(key, obj.clone());
        let pass = match (&self.predicate, previous) {
            (None, _) => true,
            (Some(p), None) => p.create(&obj),
            (Some(p), Some(old)) => p.update(&old, &obj),
        };
        pass.then_some(obj)
    }

    /// An object was removed; returns it if it should trigger a reconcile
    pub fn on_delete(&mut self, obj: DynamicObject) -> Option<DynamicObject> {
        self.seen.remove(&object_key(&obj));
        let pass = self.predicate.as_ref().map_or(true, |p| p.delete(&obj));
        pass.then_some(obj)
    }

    pub fn tracked(&self) -> usize {
        self.seen.len()
    }
}
