//! Prints the clusterkit CRD manifests as a multi-document YAML stream.
//!
//! Usage: `cargo run -p crds --bin crdgen > config/crds.yaml`

use crds::{BackupConfig, ManagedCluster};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [ManagedCluster::crd(), BackupConfig::crd()];
    for crd in crds {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
