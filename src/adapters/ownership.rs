//! Owner references linking target objects back to their managed resource

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{api::DynamicObject, ResourceExt};

use crate::crd::ManagedResource;
use crate::error::{Error, Result};

fn group_of(api_version: &str) -> &str {
    api_version.split_once('/').map(|(group, _)| group).unwrap_or("")
}

/// Build the controller owner reference for a managed resource
pub fn controller_reference<K: ManagedResource>(owner: &K) -> Result<OwnerReference> {
    owner.controller_owner_ref(&()).ok_or_else(|| {
        Error::validation(format!(
            "{} {} has no uid, cannot be used as an owner",
            K::kind(&()),
            owner.name_any()
        ))
    })
}

/// Make `owner` the single controller of `target`.
///
/// Fails when a different object already controls the target.
pub fn set_controller_reference(target: &mut DynamicObject, owner: OwnerReference) -> Result<()> {
    let refs = target.metadata.owner_references.get_or_insert_with(Vec::new);
    if let Some(other) = refs
        .iter()
        .find(|r| r.controller == Some(true) && r.uid != owner.uid)
    {
        return Err(Error::validation(format!(
            "object {} is already controlled by {} {}",
            target.metadata.name.as_deref().unwrap_or_default(),
            other.kind,
            other.name
        )));
    }
    refs.retain(|r| r.uid != owner.uid);
    refs.push(owner);
    Ok(())
}

/// True when `target` carries an owner reference to `owner`, matched on group, kind and name
pub fn is_owned_by<K: ManagedResource>(target: &DynamicObject, owner: &K) -> bool {
    let group = K::group(&());
    let kind = K::kind(&());
    let name = owner.name_any();
    target.owner_references().iter().any(|r| {
        group_of(&r.api_version) == &*group && r.kind == *kind && r.name == name
    })
}
