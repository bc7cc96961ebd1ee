//! Custom Resource Definitions and status types

mod condition;
mod managed;
mod web_app;

pub use condition::*;
pub use managed::*;
pub use web_app::*;

use kube::CustomResourceExt;

use crate::error::Result;

/// Generate all CRD YAML manifests
pub fn generate_crds() -> Result<Vec<String>> {
    Ok(vec![serde_yaml::to_string(&WebApp::crd())?])
}
