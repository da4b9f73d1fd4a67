//! Prints the ClusterMonitor CRD manifest as YAML to stdout.
//!
//! Usage: `cargo run --bin crdgen > deploy/crds/clustermonitor.yaml`

use crds::ClusterMonitor;
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&ClusterMonitor::crd())?);
    Ok(())
}
