//! Step orchestration for one managed resource type

use std::sync::Arc;

use kube::runtime::events::EventType;
use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;
use tracing::{debug, error, info, warn};

use crate::adapters::{EventSink, TargetClient};
use crate::crd::ManagedResource;
use crate::error::{Error, Result, StepPhase};
use crate::metrics;

use super::{
    metadata_view, status_view, Context, ReadyCondition, ResourceStore, SetupContext, Step,
    StepResult, WatchRegistrar, SKIP_RECONCILE_ANNOTATION,
};

struct RegisteredStep<K: ManagedResource> {
    name: String,
    step: Box<dyn Step<K>>,
    finalizer: Option<String>,
    ready: Option<ReadyCondition>,
}

/// Merged result of one pass together with its error, if any.
///
/// Unlike a plain `Result`, the requeue hints survive a failed pass.
#[derive(Debug, Default)]
pub struct Outcome {
    pub result: StepResult,
    pub error: Option<Error>,
}

impl Outcome {
    pub fn into_result(self) -> Result<StepResult> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.result),
        }
    }
}

/// Builder for an [`Engine`]
pub struct EngineBuilder<K: ManagedResource> {
    store: Arc<dyn ResourceStore<K>>,
    targets: Arc<dyn TargetClient>,
    name: Option<String>,
    finalizer_base: Option<String>,
    field_manager: Option<String>,
    events: Option<Arc<dyn EventSink>>,
    steps: Vec<(String, Box<dyn Step<K>>)>,
}

impl<K: ManagedResource> EngineBuilder<K> {
    pub fn new(store: Arc<dyn ResourceStore<K>>, targets: Arc<dyn TargetClient>) -> Self {
        Self {
            store,
            targets,
            name: None,
            finalizer_base: None,
            field_manager: None,
            events: None,
            steps: Vec::new(),
        }
    }

    /// Controller name, defaults to the lowercase kind
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Finalizer prefix, defaults to `{controller}.{group}/`
    pub fn finalizer_base(mut self, base: impl Into<String>) -> Self {
        self.finalizer_base = Some(base.into());
        self
    }

    /// Field manager for metadata and status patches, defaults to the controller name
    pub fn field_manager(mut self, field_manager: impl Into<String>) -> Self {
        self.field_manager = Some(field_manager.into());
        self
    }

    /// Where steps publish Kubernetes Events; none are recorded without one
    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// Append a step; steps run in the order they are added
    pub fn step(mut self, name: impl Into<String>, step: impl Step<K> + 'static) -> Self {
        self.steps.push((name.into(), Box::new(step)));
        self
    }

    pub fn build(self) -> Result<Engine<K>> {
        let name = self.name.unwrap_or_else(|| K::kind(&()).to_lowercase());
        if name.is_empty() {
            return Err(Error::validation("controller name must not be empty"));
        }
        let finalizer_base = self
            .finalizer_base
            .unwrap_or_else(|| format!("{}.{}/", name, K::group(&())));
        let field_manager = self.field_manager.unwrap_or_else(|| name.clone());

        let mut steps: Vec<RegisteredStep<K>> = Vec::with_capacity(self.steps.len());
        for (step_name, step) in self.steps {
            if step_name.is_empty() {
                return Err(Error::validation("step name must not be empty"));
            }
            if steps.iter().any(|s| s.name == step_name) {
                return Err(Error::validation(format!(
                    "found duplicate step using name {} in controller {}",
                    step_name, name
                )));
            }
            let finalizer = step
                .finalizes()
                .then(|| format!("{}{}", finalizer_base, step_name));
            let ready = step.ready_condition().filter(|r| !r.type_.is_empty());
            steps.push(RegisteredStep {
                name: step_name,
                step,
                finalizer,
                ready,
            });
        }

        Ok(Engine {
            name,
            field_manager,
            steps,
            store: self.store,
            targets: self.targets,
            events: self.events,
        })
    }
}

/// Runs an ordered pipeline of steps against one resource at a time.
///
/// The engine holds no per-resource state; everything a pass needs is read
/// fresh from the store when it starts.
pub struct Engine<K: ManagedResource> {
    name: String,
    field_manager: String,
    steps: Vec<RegisteredStep<K>>,
    store: Arc<dyn ResourceStore<K>>,
    targets: Arc<dyn TargetClient>,
    events: Option<Arc<dyn EventSink>>,
}

impl<K: ManagedResource> Engine<K> {
    pub fn builder(store: Arc<dyn ResourceStore<K>>, targets: Arc<dyn TargetClient>) -> EngineBuilder<K> {
        EngineBuilder::new(store, targets)
    }

    /// Controller name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finalizer marker of a step, if it cleans up after itself
    pub fn finalizer_for(&self, step: &str) -> Option<&str> {
        self.steps
            .iter()
            .find(|s| s.name == step)
            .and_then(|s| s.finalizer.as_deref())
    }

    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.name.as_str())
    }

    /// Let every step register the kinds it owns
    pub async fn setup(&self) -> Result<WatchRegistrar> {
        let mut registrar = WatchRegistrar::new();
        let mut ctx = SetupContext::new::<K>(&self.name);
        for rs in &self.steps {
            ctx.enter_step(&rs.name);
            rs.step
                .setup(&ctx, &mut registrar)
                .await
                .map_err(|e| e.in_step(&rs.name, StepPhase::Setup))?;
        }
        debug!(controller = %self.name, watches = registrar.len(), "Steps registered watches");
        Ok(registrar)
    }

    /// Run one reconcile pass for the identified resource
    pub async fn reconcile(&self, id: &ObjectRef<K>) -> Outcome {
        info!(controller = %self.name, object = %id, "Starting reconcile");

        let obj = match self.store.get(id.namespace.as_deref(), &id.name).await {
            Ok(Some(obj)) => obj,
            Ok(None) => {
                info!(object = %id, "Aborting reconcile, object already deleted");
                return Outcome::default();
            }
            Err(e) if e.is_not_found() => {
                info!(object = %id, "Aborting reconcile, object already deleted");
                return Outcome::default();
            }
            Err(e) => {
                return Outcome {
                    result: StepResult::requeue(),
                    error: Some(e),
                };
            }
        };
        let clean = obj.clone();

        if obj
            .annotations()
            .get(SKIP_RECONCILE_ANNOTATION)
            .is_some_and(|v| v == "true")
        {
            info!(object = %id, "Skipping reconcile due to annotation");
            metrics::SKIPPED_RECONCILES.with_label_values(&[self.name.as_str()]).inc();
            return Outcome::default();
        }

        let mut ctx = Context::new(obj, self.targets.clone(), &self.name).with_events(self.events.clone());
        let mut total = StepResult::default();
        let mut errors = Vec::new();

        for rs in &self.steps {
            ctx.enter_step(&rs.name);
            if let Some(ready) = &rs.ready {
                ctx.conditions.set_unknown(&ready.type_, "Unknown", "");
            }

            let (phase, outcome) = if ctx.is_alive() {
                debug!(step = %rs.name, "Reconciling step");
                let outcome = rs.step.reconcile(&mut ctx).await;
                if let (Ok(_), Some(finalizer)) = (&outcome, &rs.finalizer) {
                    add_finalizer(&mut ctx.object, finalizer);
                }
                (StepPhase::Reconcile, outcome)
            } else if let Some(finalizer) = rs
                .finalizer
                .as_ref()
                .filter(|f| has_finalizer(&ctx.object, f))
            {
                debug!(step = %rs.name, "Finalizing step");
                let outcome = rs.step.finalize(&mut ctx).await.map(|finalized| {
                    if finalized.done {
                        remove_finalizer(&mut ctx.object, finalizer);
                        metrics::FINALIZATIONS.with_label_values(&[self.name.as_str(), rs.name.as_str()]).inc();
                        debug!(step = %rs.name, "Finalizer released");
                    }
                    finalized.result
                });
                (StepPhase::Finalize, outcome)
            } else {
                (StepPhase::Reconcile, Ok(StepResult::default()))
            };

            let result = match outcome {
                Ok(result) => result,
                Err(e) => {
                    let (result, e) = e.into_parts();
                    if let Some(ready) = &rs.ready {
                        ctx.conditions
                            .set(&ready.type_, ready.on_error, "Error", e.to_string());
                    }
                    error!(step = %rs.name, error = %e, "Error in step {}", phase);
                    metrics::STEP_ERRORS.with_label_values(&[self.name.as_str(), rs.name.as_str()]).inc();
                    ctx.publish_event(
                        EventType::Warning,
                        "StepFailed",
                        format!("Error in {} step {}: {}", rs.name, phase, e),
                    )
                    .await;
                    errors.push(e.in_step(&rs.name, phase));
                    result
                }
            };

            total.merge(&result);
            if result.skip_remaining {
                debug!(step = %rs.name, "Skipping remaining steps");
                break;
            }
        }

        if let Err(e) = ctx.conditions.flush(&mut ctx.object) {
            errors.push(e);
        }

        self.persist(&clean, &ctx.object, &mut errors).await;

        Outcome {
            result: total,
            error: Error::combine(errors),
        }
    }

    async fn persist(&self, clean: &K, current: &K, errors: &mut Vec<Error>) {
        if metadata_view(clean) != metadata_view(current) {
            if let Err(e) = self.store.patch_metadata(clean, current, &self.field_manager).await {
                if e.is_not_found() {
                    warn!(object = %current.name_any(), "Object vanished before metadata patch");
                } else {
                    errors.push(Error::Patch {
                        what: "metadata",
                        source: Box::new(e),
                    });
                }
            }
        }

        let status_changed = match (status_view(clean), status_view(current)) {
            (Ok(before), Ok(after)) => before != after,
            (_, Err(e)) | (Err(e), _) => {
                errors.push(e);
                false
            }
        };
        if status_changed {
            if let Err(e) = self.store.patch_status(clean, current, &self.field_manager).await {
                if e.is_not_found() {
                    warn!(object = %current.name_any(), "Object vanished before status patch");
                } else {
                    errors.push(Error::Patch {
                        what: "status",
                        source: Box::new(e),
                    });
                }
            }
        }
    }
}

fn has_finalizer<K: ManagedResource>(obj: &K, finalizer: &str) -> bool {
    obj.finalizers().iter().any(|f| f == finalizer)
}

fn add_finalizer<K: ManagedResource>(obj: &mut K, finalizer: &str) {
    if !has_finalizer(obj, finalizer) {
        obj.finalizers_mut().push(finalizer.to_string());
    }
}

fn remove_finalizer<K: ManagedResource>(obj: &mut K, finalizer: &str) {
    obj.finalizers_mut().retain(|f| f != finalizer);
}
