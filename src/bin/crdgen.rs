//! CRD YAML Generator
//!
//! This binary generates Kubernetes CRD manifests for the demo custom
//! resources shipped with controller-steps.
//!
//! Usage: cargo run --bin crdgen > deploy/crds/all.yaml

use controller_steps::crd::generate_crds;

fn main() -> anyhow::Result<()> {
    for crd in generate_crds()? {
        println!("---");
        print!("{}", crd);
    }
    Ok(())
}
