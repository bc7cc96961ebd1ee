//! Owned kinds that should re-trigger reconciliation

use std::sync::Arc;

use kube::api::GroupVersionKind;
use tracing::debug;

use crate::predicates::Predicate;

/// An owned kind and the filter applied to its events
#[derive(Clone)]
pub struct Watch {
    pub gvk: GroupVersionKind,
    pub predicate: Option<Arc<dyn Predicate>>,
}

/// Collects watch registrations from steps during setup.
///
/// Registrations are deduplicated by group and kind; the first one wins.
#[derive(Clone, Default)]
pub struct WatchRegistrar {
    watches: Vec<Watch>,
}

impl WatchRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owns(&mut self, gvk: GroupVersionKind) -> bool {
        self.register(gvk, None)
    }

    pub fn owns_with(&mut self, gvk: GroupVersionKind, predicate: impl Predicate + 'static) -> bool {
        self.register(gvk, Some(Arc::new(predicate)))
    }

    /// Returns false when the kind was already registered
    pub fn register(&mut self, gvk: GroupVersionKind, predicate: Option<Arc<dyn Predicate>>) -> bool {
        if self
            .watches
            .iter()
            .any(|w| w.gvk.group == gvk.group && w.gvk.kind == gvk.kind)
        {
            debug!(group = %gvk.group, kind = %gvk.kind, "Kind already watched, ignoring registration");
            return false;
        }
        self.watches.push(Watch { gvk, predicate });
        true
    }

    pub fn watches(&self) -> &[Watch] {
        &self.watches
    }

    pub fn len(&self) -> usize {
        self.watches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }
}
