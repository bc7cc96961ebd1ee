//! Declarative targets rendered from a template
//!
//! Each pass renders one object and either server-side applies it or, when
//! the rendered object carries the delete annotation, removes it. Two
//! annotations steer the step and are stripped before anything is sent:
//! - `controller-steps.io/delete: "true"` deletes the target if we own it
//! - `controller-steps.io/condition-type: X` mirrors the target's condition `X`

use async_trait::async_trait;
use kube::api::{DynamicObject, GroupVersionKind};
use kube::ResourceExt;
use serde_json::Value;
use tracing::{debug, info};

use crate::adapters::{controller_reference, gvk_of, is_owned_by, set_controller_reference, StatusAccessor};
use crate::core::{
    Context, ReadyCondition, SetupContext, SharedData, Step, StepResult, WatchRegistrar,
    CONDITION_TYPE_ANNOTATION, DELETE_ANNOTATION,
};
use crate::crd::{ConditionStatus, ManagedResource};
use crate::error::{Error, Result};
use crate::predicates::DeepEquals;
use crate::templates::{to_object, RenderInput, Template};

pub const REASON_UPSTREAM_SET: &str = "UpstreamConditionSet";
pub const REASON_UPSTREAM_NOT_SET: &str = "UpstreamConditionNotSet";
pub const REASON_APPLIED: &str = "Applied";
pub const REASON_DOES_NOT_EXIST: &str = "DoesNotExist";
pub const REASON_NOT_OWNED: &str = "NotOwned";

/// A rendered object with its control annotations removed
struct Rendered {
    object: DynamicObject,
    gvk: GroupVersionKind,
    delete: bool,
    upstream_condition: Option<String>,
}

pub struct TemplateStep {
    template: Box<dyn Template>,
    condition: Option<String>,
}

impl TemplateStep {
    pub fn new(template: impl Template + 'static) -> Self {
        Self {
            template: Box::new(template),
            condition: None,
        }
    }

    /// Condition on the managed resource that reports this target's state
    pub fn with_condition(mut self, type_: impl Into<String>) -> Self {
        self.condition = Some(type_.into()).filter(|t| !t.is_empty());
        self
    }

    fn render_value(&self, object: &Value, data: &SharedData) -> Result<DynamicObject> {
        to_object(self.template.render(&RenderInput { object, data })?)
    }

    fn render<K: ManagedResource>(&self, ctx: &Context<K>) -> Result<Rendered> {
        let owner = serde_json::to_value(&ctx.object)?;
        let mut object = self.render_value(&owner, &ctx.data)?;

        if object.metadata.namespace.as_deref().unwrap_or_default().is_empty() {
            object.metadata.namespace = ctx.namespace();
        }

        let mut delete = false;
        let mut upstream_condition = None;
        if let Some(annotations) = object.metadata.annotations.as_mut() {
            delete = annotations.remove(DELETE_ANNOTATION).is_some_and(|v| v == "true");
            upstream_condition = annotations
                .remove(CONDITION_TYPE_ANNOTATION)
                .filter(|v| !v.is_empty());
            if annotations.is_empty() {
                object.metadata.annotations = None;
            }
        }

        let gvk = gvk_of(&object)?;
        Ok(Rendered {
            object,
            gvk,
            delete,
            upstream_condition,
        })
    }

    async fn apply<K: ManagedResource>(&self, ctx: &mut Context<K>, rendered: Rendered) -> Result<()> {
        let Rendered {
            mut object,
            gvk,
            upstream_condition,
            ..
        } = rendered;
        set_controller_reference(&mut object, controller_reference(&ctx.object)?)?;
        let name = object.name_any();
        let namespace = object.namespace();

        debug!(kind = %gvk.kind, name = %name, "Applying target");
        ctx.targets.apply(&object, &ctx.field_manager).await?;

        let Some(dest) = &self.condition else {
            return Ok(());
        };
        match upstream_condition {
            Some(source) => {
                let current = ctx
                    .targets
                    .get(&gvk, namespace.as_deref(), &name)
                    .await?
                    .ok_or_else(|| Error::not_found(format!("{} {}", gvk.kind, name)))?;
                match current.observed_condition(&source) {
                    Some(observed) => ctx.conditions.set(
                        dest,
                        observed.status,
                        REASON_UPSTREAM_SET,
                        format!(
                            "Upstream condition {} on {} {} is {}",
                            source, gvk.kind, name, observed.status
                        ),
                    ),
                    None => ctx.conditions.set(
                        dest,
                        ConditionStatus::Unknown,
                        REASON_UPSTREAM_NOT_SET,
                        format!("Upstream condition {} on {} {} is not set", source, gvk.kind, name),
                    ),
                }
            }
            None => ctx
                .conditions
                .set_true(dest, REASON_APPLIED, format!("{} {} applied", gvk.kind, name)),
        }
        Ok(())
    }

    async fn delete<K: ManagedResource>(&self, ctx: &mut Context<K>, rendered: Rendered) -> Result<()> {
        let Rendered { object, gvk, .. } = rendered;
        let name = object.name_any();
        let namespace = object.namespace();

        let (reason, message) = match ctx.targets.get(&gvk, namespace.as_deref(), &name).await? {
            None => (REASON_DOES_NOT_EXIST, format!("{} {} does not exist", gvk.kind, name)),
            Some(current) if !is_owned_by(&current, &ctx.object) => {
                debug!(kind = %gvk.kind, name = %name, "Not deleting target we do not own");
                (
                    REASON_NOT_OWNED,
                    format!("{} {} exists but is not owned by {}", gvk.kind, name, ctx.name()),
                )
            }
            Some(_) => {
                match ctx.targets.delete(&gvk, namespace.as_deref(), &name).await {
                    Ok(()) => info!(kind = %gvk.kind, name = %name, "Deleted target"),
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
                (REASON_DOES_NOT_EXIST, format!("{} {} deleted", gvk.kind, name))
            }
        };

        if let Some(dest) = &self.condition {
            ctx.conditions.set_true(dest, reason, message);
        }
        Ok(())
    }
}

#[async_trait]
impl<K: ManagedResource> Step<K> for TemplateStep {
    async fn setup(&self, ctx: &SetupContext, registrar: &mut WatchRegistrar) -> Result<()> {
        let object = self.render_value(&ctx.placeholder, &SharedData::new())?;
        registrar.owns_with(gvk_of(&object)?, DeepEquals);
        Ok(())
    }

    async fn reconcile(&self, ctx: &mut Context<K>) -> Result<StepResult> {
        let rendered = self.render(ctx)?;
        if rendered.delete {
            self.delete(ctx, rendered).await?;
        } else {
            self.apply(ctx, rendered).await?;
        }
        Ok(StepResult::default())
    }

    fn ready_condition(&self) -> Option<ReadyCondition> {
        self.condition.clone().map(ReadyCondition::new)
    }
}
