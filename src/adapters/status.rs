//! Typed access to the status conditions of external objects

use kube::api::DynamicObject;
use serde::Deserialize;

use crate::crd::ConditionStatus;

/// A condition reported by an external object, reduced to type and status
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservedCondition {
    pub type_: String,
    pub status: ConditionStatus,
}

#[derive(Deserialize)]
struct RawCondition {
    #[serde(rename = "type")]
    type_: String,
    #[serde(default)]
    status: String,
}

/// Reads normalized conditions from an object's status.
///
/// Malformed entries are skipped rather than failing the read.
pub trait StatusAccessor {
    fn observed_conditions(&self) -> Vec<ObservedCondition>;

    fn observed_condition(&self, type_: &str) -> Option<ObservedCondition> {
        self.observed_conditions().into_iter().find(|c| c.type_ == type_)
    }
}

impl StatusAccessor for DynamicObject {
    fn observed_conditions(&self) -> Vec<ObservedCondition> {
        let Some(items) = self
            .data
            .get("status")
            .and_then(|s| s.get("conditions"))
            .and_then(|c| c.as_array())
        else {
            return Vec::new();
        };

        items
            .iter()
            .filter_map(|item| RawCondition::deserialize(item).ok())
            .map(|raw| ObservedCondition {
                status: raw.status.parse().unwrap_or(ConditionStatus::Unknown),
                type_: raw.type_,
            })
            .collect()
    }
}
