//! Controller-specific error types.
//!
//! This module defines error types specific to the ClusterMonitor controller
//! that are not covered by upstream library errors.

use crds::ValidationError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the ClusterMonitor controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// ClusterMonitor spec failed validation
    #[error("Spec validation failed: {0}")]
    InvalidSpec(#[from] ValidationError),

    /// Metric collection failed
    #[error("Collection failed: {0}")]
    Collection(String),

    /// Export rendering or delivery failed
    #[error("Export failed: {0}")]
    Export(String),

    /// Invalid controller configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Collection scheduler failed
    #[error("Scheduler failed: {0}")]
    Scheduler(String),
}
