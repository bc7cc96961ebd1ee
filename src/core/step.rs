//! The pluggable unit of reconciliation work

use async_trait::async_trait;

use crate::crd::{ConditionStatus, ManagedResource};
use crate::error::Result;

use super::{Context, SetupContext, StepResult, WatchRegistrar};

/// Condition a step keeps up to date, and what it becomes when the step fails
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadyCondition {
    pub type_: String,
    /// Status written when the step returns an error
    pub on_error: ConditionStatus,
}

impl ReadyCondition {
    /// A condition that reads True when healthy and False on error
    pub fn new(type_: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            on_error: ConditionStatus::False,
        }
    }

    /// A negative condition (such as `Degraded`) that turns True on error
    pub fn negated(type_: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            on_error: ConditionStatus::True,
        }
    }

    /// Parse the `!Type` shorthand for a negated condition
    pub fn parse(spec: &str) -> Option<Self> {
        let (type_, negated) = match spec.strip_prefix('!') {
            Some(rest) => (rest, true),
            None => (spec, false),
        };
        if type_.is_empty() {
            return None;
        }
        Some(if negated {
            Self::negated(type_)
        } else {
            Self::new(type_)
        })
    }
}

/// Result of one finalize call
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Finalized {
    pub result: StepResult,
    /// Cleanup has completed and the finalizer can be released
    pub done: bool,
}

impl Finalized {
    pub fn done() -> Self {
        Self {
            result: StepResult::default(),
            done: true,
        }
    }

    /// Cleanup still in flight; check again later
    pub fn pending(result: StepResult) -> Self {
        Self { result, done: false }
    }
}

/// One independently idempotent piece of reconcile logic.
///
/// Only `reconcile` is required. A step that returns true from `finalizes`
/// gets a finalizer on the resource and its `finalize` runs instead of
/// `reconcile` once deletion has been requested.
///
/// A failing step can still steer the pass by returning
/// `Err(e.with_result(..))`; the carried result is merged and its
/// `skip_remaining` honored as if the step had succeeded.
#[async_trait]
pub trait Step<K: ManagedResource>: Send + Sync {
    async fn reconcile(&self, ctx: &mut Context<K>) -> Result<StepResult>;

    /// Register watches before the controller starts
    async fn setup(&self, _ctx: &SetupContext, _registrar: &mut WatchRegistrar) -> Result<()> {
        Ok(())
    }

    fn finalizes(&self) -> bool {
        false
    }

    async fn finalize(&self, _ctx: &mut Context<K>) -> Result<Finalized> {
        Ok(Finalized::done())
    }

    fn ready_condition(&self) -> Option<ReadyCondition> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_negation_shorthand() {
        assert_eq!(ReadyCondition::parse("Available"), Some(ReadyCondition::new("Available")));
        assert_eq!(ReadyCondition::parse("!Degraded"), Some(ReadyCondition::negated("Degraded")));
        assert_eq!(ReadyCondition::parse(""), None);
        assert_eq!(ReadyCondition::parse("!"), None);
    }
}
