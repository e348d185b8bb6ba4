//! Prints the Fleet CRDs as a multi-document YAML stream.
//!
//! `cargo run -p crds --bin crdgen > config/crd/fleet.yaml`

use crds::{ClusterOnboarding, ManagedCluster};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [ClusterOnboarding::crd(), ManagedCluster::crd()];
    for crd in &crds {
        println!("---");
        print!("{}", serde_yaml::to_string(crd)?);
    }
    Ok(())
}
