//! ClusterMonitor CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the cluster-monitor controller.

pub mod cluster_monitor;
pub mod condition;
pub mod references;
pub mod validation;

pub use cluster_monitor::*;
pub use condition::*;
pub use references::*;
pub use validation::*;
