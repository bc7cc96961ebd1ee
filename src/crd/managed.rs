//! Capability every reconciled resource type provides

use std::fmt::Debug;

use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::Condition;

/// A custom resource the engine can reconcile.
///
/// The engine never inspects status through reflection; each managed type
/// hands out its ordered condition list directly.
pub trait ManagedResource:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Current conditions, empty when no status has been written yet
    fn conditions(&self) -> &[Condition];

    /// Mutable condition list, creating the status block if needed
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;
}
