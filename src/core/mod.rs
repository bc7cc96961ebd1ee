//! The reconciliation engine
//!
//! An [`Engine`] runs an ordered list of [`Step`]s against one managed
//! resource per pass:
//! - steps share a [`Context`] holding the working copy of the resource
//! - conditions are buffered in a [`ConditionLedger`] and flushed once
//! - finalizers gate cleanup for steps that implement `finalize`
//! - metadata and status are patched against the snapshot taken at the start

mod conditions;
mod context;
mod engine;
mod result;
mod step;
mod store;
mod watches;

pub use conditions::ConditionLedger;
pub use context::{Context, SetupContext, SharedData};
pub use engine::{Engine, EngineBuilder, Outcome};
pub use result::StepResult;
pub use step::{Finalized, ReadyCondition, Step};
pub use store::{metadata_view, status_view, KubeStore, ResourceStore};
pub use watches::{Watch, WatchRegistrar};

/// Resource annotation that pauses all processing while set to `"true"`
pub const SKIP_RECONCILE_ANNOTATION: &str = "controller-steps.io/skip-reconcile";

/// Target annotation asking the template step to delete the object instead of applying it
pub const DELETE_ANNOTATION: &str = "controller-steps.io/delete";

/// Target annotation naming an upstream condition type to mirror onto the resource
pub const CONDITION_TYPE_ANNOTATION: &str = "controller-steps.io/condition-type";
