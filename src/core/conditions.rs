//! Buffered condition writes for one reconcile pass

use chrono::Utc;

use crate::crd::{set_condition, Condition, ConditionStatus, ManagedResource};
use crate::error::{Error, Result};

/// Collects condition writes during a pass and applies them in one go.
///
/// Writes are keyed by type with the last one winning. Nothing touches the
/// resource until [`ConditionLedger::flush`].
#[derive(Debug, Default)]
pub struct ConditionLedger {
    generation: i64,
    pending: Vec<Condition>,
}

impl ConditionLedger {
    /// Create a ledger stamping conditions with the given resource generation
    pub fn new(generation: i64) -> Self {
        Self {
            generation,
            pending: Vec::new(),
        }
    }

    pub fn set(
        &mut self,
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) {
        let condition = Condition {
            type_: type_.into(),
            status,
            observed_generation: self.generation,
            last_transition_time: Utc::now(),
            reason: reason.into(),
            message: message.into(),
        };
        match self.pending.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => *existing = condition,
            None => self.pending.push(condition),
        }
    }

    pub fn set_true(&mut self, type_: impl Into<String>, reason: impl Into<String>, message: impl Into<String>) {
        self.set(type_, ConditionStatus::True, reason, message);
    }

    pub fn set_false(&mut self, type_: impl Into<String>, reason: impl Into<String>, message: impl Into<String>) {
        self.set(type_, ConditionStatus::False, reason, message);
    }

    pub fn set_unknown(&mut self, type_: impl Into<String>, reason: impl Into<String>, message: impl Into<String>) {
        self.set(type_, ConditionStatus::Unknown, reason, message);
    }

    /// Buffered write for a type, if any
    pub fn pending(&self, type_: &str) -> Option<&Condition> {
        self.pending.iter().find(|c| c.type_ == type_)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Upsert every buffered write into the resource's condition list.
    ///
    /// The transition time of an existing entry only changes when its status
    /// does. The buffer is emptied even when validation fails.
    pub fn flush<K: ManagedResource>(&mut self, obj: &mut K) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return Ok(());
        }
        if pending.iter().any(|c| c.type_.is_empty()) {
            return Err(Error::validation("condition type must not be empty"));
        }
        let conditions = obj.conditions_mut();
        for condition in pending {
            set_condition(conditions, condition);
        }
        Ok(())
    }
}
