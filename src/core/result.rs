//! Per-step reconcile results and how they merge

use std::time::Duration;

use kube::runtime::controller::Action;

/// Outcome of one step, merged by the engine into the pass result
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StepResult {
    /// Run the pass again as soon as possible
    pub requeue: bool,
    /// Run the pass again after this delay
    pub requeue_after: Option<Duration>,
    /// Stop running the remaining steps of this pass
    pub skip_remaining: bool,
}

impl StepResult {
    pub fn requeue() -> Self {
        Self {
            requeue: true,
            ..Default::default()
        }
    }

    pub fn requeue_after(delay: Duration) -> Self {
        Self {
            requeue_after: Some(delay),
            ..Default::default()
        }
    }

    pub fn skip_remaining() -> Self {
        Self {
            skip_remaining: true,
            ..Default::default()
        }
    }

    /// Fold another result into this one.
    ///
    /// `requeue` is OR-ed, `requeue_after` keeps the smallest non-zero delay.
    /// `skip_remaining` only applies to the pass it was returned in and is
    /// not carried over.
    pub fn merge(&mut self, other: &StepResult) {
        self.requeue |= other.requeue;
        if let Some(delay) = other.requeue_after.filter(|d| !d.is_zero()) {
            self.requeue_after = Some(match self.requeue_after {
                Some(current) if !current.is_zero() => current.min(delay),
                _ => delay,
            });
        }
    }

    /// Translate into the controller runtime's next action
    pub fn to_action(&self) -> Action {
        match self.requeue_after {
            Some(delay) => Action::requeue(delay),
            None if self.requeue => Action::requeue(Duration::from_secs(1)),
            None => Action::await_change(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_shortest_delay() {
        let mut total = StepResult::default();
        total.merge(&StepResult::requeue_after(Duration::from_secs(30)));
        total.merge(&StepResult::requeue_after(Duration::from_secs(10)));
        total.merge(&StepResult::default());
        assert_eq!(total.requeue_after, Some(Duration::from_secs(10)));
        assert!(!total.requeue);
    }

    #[test]
    fn merge_ignores_zero_delay() {
        let mut total = StepResult::requeue_after(Duration::from_secs(5));
        total.merge(&StepResult::requeue_after(Duration::ZERO));
        assert_eq!(total.requeue_after, Some(Duration::from_secs(5)));
    }

    #[test]
    fn requeue_dominates() {
        let mut total = StepResult::default();
        total.merge(&StepResult::requeue());
        total.merge(&StepResult::default());
        assert!(total.requeue);
    }

    #[test]
    fn skip_is_not_merged() {
        let mut total = StepResult::default();
        total.merge(&StepResult::skip_remaining());
        assert!(!total.skip_remaining);
    }
}
