//! Aggregate readiness from other conditions

use std::fmt;

use async_trait::async_trait;

use crate::core::{Context, Step, StepResult};
use crate::crd::{ConditionStatus, ManagedResource};
use crate::error::Result;

pub const READY_CONDITION: &str = "Ready";
pub const REASON_READY: &str = "AllRequirementsMet";
pub const REASON_NOT_READY: &str = "RequirementsNotMet";

/// A condition type and the status it must have
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Requirement {
    pub type_: String,
    pub status: ConditionStatus,
}

impl Requirement {
    /// Parse a key; a leading `-` means the condition must be False
    pub fn parse(key: &str) -> Self {
        match key.strip_prefix('-') {
            Some(type_) => Self {
                type_: type_.to_string(),
                status: ConditionStatus::False,
            },
            None => Self {
                type_: key.to_string(),
                status: ConditionStatus::True,
            },
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            ConditionStatus::False => write!(f, "-{}", self.type_),
            _ => f.write_str(&self.type_),
        }
    }
}

/// Sets `Ready` to True only when every requirement holds.
///
/// Conditions written earlier in the same pass are taken into account.
pub struct ReadyStatusStep {
    requirements: Vec<Requirement>,
    condition: String,
}

impl ReadyStatusStep {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            requirements: keys.into_iter().map(|k| Requirement::parse(k.as_ref())).collect(),
            condition: READY_CONDITION.to_string(),
        }
    }

    /// Write a different condition type instead of `Ready`
    pub fn with_condition(mut self, type_: impl Into<String>) -> Self {
        self.condition = type_.into();
        self
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    fn unmet<'a, K: ManagedResource>(&'a self, ctx: &Context<K>) -> Vec<&'a Requirement> {
        self.requirements
            .iter()
            .filter(|r| ctx.condition_status(&r.type_) != Some(r.status))
            .collect()
    }
}

fn join(requirements: &[&Requirement]) -> String {
    requirements
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait]
impl<K: ManagedResource> Step<K> for ReadyStatusStep {
    async fn reconcile(&self, ctx: &mut Context<K>) -> Result<StepResult> {
        let unmet = self.unmet(ctx);
        if unmet.is_empty() {
            let all: Vec<&Requirement> = self.requirements.iter().collect();
            ctx.conditions.set_true(
                &self.condition,
                REASON_READY,
                format!("Observed expected status of {}", join(&all)),
            );
        } else {
            ctx.conditions.set_false(
                &self.condition,
                REASON_NOT_READY,
                format!("Did not observe expected status of {}", join(&unmet)),
            );
        }
        Ok(StepResult::default())
    }
}
