//! ClusterMonitor CRD
//!
//! Declares desired monitoring behavior for a cluster (collection intervals,
//! metric scopes, alert thresholds, export destinations) and the observed
//! state written back by the controller.

use crate::condition::Condition;
use crate::references::SecretRef;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Desired state of a ClusterMonitor.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "monitoring.k2a.io",
    version = "v1alpha1",
    kind = "ClusterMonitor",
    plural = "clustermonitors",
    shortname = "cm",
    namespaced,
    status = "ClusterMonitorStatus",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Health", "type":"string", "jsonPath":".status.health.status"}"#,
    printcolumn = r#"{"name":"Last Collection", "type":"date", "jsonPath":".status.lastCollection"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMonitorSpec {
    /// Interval between collection runs, e.g. "30s", "5m", "1h"
    #[serde(default = "default_interval")]
    pub interval: String,

    /// What to collect
    pub metrics_collection: MetricsCollectionSpec,

    /// Alert thresholds (defaults apply when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_thresholds: Option<AlertThresholdsSpec>,

    /// Export configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export: Option<ExportSpec>,

    /// Remote cluster to monitor instead of the local one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_cluster: Option<TargetClusterSpec>,
}

fn default_interval() -> String {
    "30s".to_string()
}

fn default_true() -> bool {
    true
}

/// Metric scopes to collect.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MetricsCollectionSpec {
    /// Collect node metrics
    #[serde(default = "default_true")]
    pub nodes: bool,

    /// Collect pod metrics
    #[serde(default = "default_true")]
    pub pods: bool,

    /// Collect service metrics
    #[serde(default = "default_true")]
    pub services: bool,

    /// Collect persistent volume metrics
    #[serde(default)]
    pub persistent_volumes: bool,

    /// Namespaces to monitor (empty = all)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,

    /// Custom metrics to collect
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_metrics: Vec<CustomMetricSpec>,
}

impl Default for MetricsCollectionSpec {
    fn default() -> Self {
        Self {
            nodes: true,
            pods: true,
            services: true,
            persistent_volumes: false,
            namespaces: Vec::new(),
            custom_metrics: Vec::new(),
        }
    }
}

/// A user-defined metric.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CustomMetricSpec {
    /// Metric name, identifier-shaped (`^[a-zA-Z_][a-zA-Z0-9_]*$`)
    pub name: String,

    /// Query to execute for this metric
    pub query: String,

    /// Per-metric interval override, e.g. "1m"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
}

/// Alert thresholds. Percentages are bounded 0..=100.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AlertThresholdsSpec {
    /// CPU usage threshold (percentage)
    #[serde(default = "default_cpu_threshold")]
    pub cpu_threshold: i32,

    /// Memory usage threshold (percentage)
    #[serde(default = "default_memory_threshold")]
    pub memory_threshold: i32,

    /// Disk usage threshold (percentage)
    #[serde(default = "default_disk_threshold")]
    pub disk_threshold: i32,

    /// Pod restart count threshold
    #[serde(default = "default_pod_restart_threshold")]
    pub pod_restart_threshold: i32,
}

fn default_cpu_threshold() -> i32 {
    80
}

fn default_memory_threshold() -> i32 {
    85
}

fn default_disk_threshold() -> i32 {
    90
}

fn default_pod_restart_threshold() -> i32 {
    5
}

impl Default for AlertThresholdsSpec {
    fn default() -> Self {
        Self {
            cpu_threshold: default_cpu_threshold(),
            memory_threshold: default_memory_threshold(),
            disk_threshold: default_disk_threshold(),
            pod_restart_threshold: default_pod_restart_threshold(),
        }
    }
}

/// Export configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExportSpec {
    /// Export formats to enable (must be non-empty)
    pub formats: Vec<ExportFormat>,

    /// S3-compatible destination for exports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_config: Option<S3ConfigSpec>,

    /// Export schedule: cron macro, "@every <duration>", or a 5-field
    /// cron expression. Unset means export on every collection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
}

/// Supported export formats.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Prometheus text exposition format
    Prometheus,

    /// JSON document per snapshot
    Json,

    /// CSV, one row per sample
    Csv,
}

/// S3-compatible export destination.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct S3ConfigSpec {
    /// Bucket name
    pub bucket: String,

    /// Region
    pub region: String,

    /// Endpoint override (for S3-compatible services)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Credentials secret reference
    pub credentials_secret_ref: SecretRef,
}

/// Remote cluster to monitor.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TargetClusterSpec {
    /// Cluster name
    pub name: String,

    /// Secret holding the kubeconfig for the target cluster
    pub kubeconfig_secret_ref: SecretRef,

    /// API server endpoint override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// Observed state of a ClusterMonitor. Written only by the controller.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMonitorStatus {
    /// Current phase of the monitor
    #[serde(default)]
    pub phase: MonitorPhase,

    /// Last successful collection timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_collection: Option<chrono::DateTime<chrono::Utc>>,

    /// Number of metrics collected in the last run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_collected: Option<i32>,

    /// Current conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Observed health
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthStatus>,

    /// Export status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_status: Option<ExportStatus>,
}

/// Coarse lifecycle phase of a monitor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum MonitorPhase {
    /// Admitted, no collection has run yet
    #[default]
    Pending,

    /// Collecting on schedule
    Running,

    /// Last reconcile failed (invalid spec or collection error)
    Error,

    /// Resource is being deleted
    Stopping,
}

/// Health summary derived from collected metrics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    /// Overall health
    pub status: HealthState,

    /// Last health evaluation timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_check: Option<chrono::DateTime<chrono::Utc>>,

    /// Free-text details
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub details: String,
}

/// Health tiers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum HealthState {
    /// All thresholds respected
    Healthy,

    /// At least one threshold breached
    Warning,

    /// Severe threshold breach
    Critical,

    /// Health could not be evaluated
    #[default]
    Unknown,
}

/// Status of the export pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExportStatus {
    /// Last export timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_export: Option<chrono::DateTime<chrono::Utc>>,

    /// Error from the last export attempt, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Number of records exported in the last run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records_exported: Option<i64>,
}
