//! Metric collection.
//!
//! The `MetricsSource` trait is the seam between the reconciler and whatever
//! actually produces metrics. The production implementation counts cluster
//! objects through the Kubernetes API; anything deeper (metrics-server,
//! Prometheus queries) is an external collaborator and lives behind this
//! trait.

use crate::error::ControllerError;
use chrono::{DateTime, Utc};
use crds::MetricsCollectionSpec;
use k8s_openapi::api::core::v1::{Node, PersistentVolume, Pod, Service};
use kube::api::ListParams;
use kube::{Api, Client};
use serde::Serialize;
use tracing::debug;

/// A single named measurement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSample {
    /// Metric name, identifier-shaped
    pub name: String,

    /// Measured value
    pub value: f64,
}

impl MetricSample {
    /// Build a sample.
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Result of one collection run.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// When the snapshot was taken
    pub collected_at: Option<DateTime<Utc>>,

    /// Collected samples
    pub samples: Vec<MetricSample>,

    /// Highest container restart count observed across collected pods
    pub max_pod_restarts: i32,
}

impl MetricsSnapshot {
    /// Number of metrics in the snapshot, as reported in status.
    #[must_use]
    pub fn metrics_collected(&self) -> i32 {
        i32::try_from(self.samples.len()).unwrap_or(i32::MAX)
    }
}

/// Produces metric snapshots for a ClusterMonitor.
#[async_trait::async_trait]
pub trait MetricsSource {
    /// Collect a snapshot for the given scopes.
    async fn collect(&self, scope: &MetricsCollectionSpec)
    -> Result<MetricsSnapshot, ControllerError>;
}

/// Counts cluster objects through the Kubernetes API.
#[derive(Clone)]
pub struct KubeMetricsSource {
    client: Client,
}

impl KubeMetricsSource {
    /// Create a source backed by the given client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Count namespaced objects, honoring the namespace allow-list.
    async fn count_namespaced<K>(&self, namespaces: &[String]) -> Result<usize, ControllerError>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + serde::de::DeserializeOwned
            + std::fmt::Debug,
        K::DynamicType: Default,
    {
        let lp = ListParams::default();
        if namespaces.is_empty() {
            let api: Api<K> = Api::all(self.client.clone());
            return Ok(api.list(&lp).await?.items.len());
        }
        let mut total = 0;
        for ns in namespaces {
            let api: Api<K> = Api::namespaced(self.client.clone(), ns);
            total += api.list(&lp).await?.items.len();
        }
        Ok(total)
    }

    /// List pods in scope and return (count, highest restart count).
    async fn pod_stats(&self, namespaces: &[String]) -> Result<(usize, i32), ControllerError> {
        let lp = ListParams::default();
        let mut pods: Vec<Pod> = Vec::new();
        if namespaces.is_empty() {
            let api: Api<Pod> = Api::all(self.client.clone());
            pods = api.list(&lp).await?.items;
        } else {
            for ns in namespaces {
                let api: Api<Pod> = Api::namespaced(self.client.clone(), ns);
                pods.extend(api.list(&lp).await?.items);
            }
        }

        let max_restarts = pods
            .iter()
            .filter_map(|pod| pod.status.as_ref())
            .filter_map(|status| status.container_statuses.as_ref())
            .flatten()
            .map(|cs| cs.restart_count)
            .max()
            .unwrap_or(0);

        Ok((pods.len(), max_restarts))
    }
}

#[async_trait::async_trait]
impl MetricsSource for KubeMetricsSource {
    async fn collect(
        &self,
        scope: &MetricsCollectionSpec,
    ) -> Result<MetricsSnapshot, ControllerError> {
        let mut samples = Vec::new();
        let mut max_pod_restarts = 0;

        if scope.nodes {
            let api: Api<Node> = Api::all(self.client.clone());
            let count = api.list(&ListParams::default()).await?.items.len();
            debug!("Collected {} nodes", count);
            samples.push(MetricSample::new("cluster_monitor_nodes", count as f64));
        }

        if scope.pods {
            let (count, restarts) = self.pod_stats(&scope.namespaces).await?;
            debug!("Collected {} pods, max restarts {}", count, restarts);
            samples.push(MetricSample::new("cluster_monitor_pods", count as f64));
            samples.push(MetricSample::new(
                "cluster_monitor_pod_restarts_max",
                f64::from(restarts),
            ));
            max_pod_restarts = restarts;
        }

        if scope.services {
            let count = self.count_namespaced::<Service>(&scope.namespaces).await?;
            debug!("Collected {} services", count);
            samples.push(MetricSample::new("cluster_monitor_services", count as f64));
        }

        if scope.persistent_volumes {
            let api: Api<PersistentVolume> = Api::all(self.client.clone());
            let count = api.list(&ListParams::default()).await?.items.len();
            debug!("Collected {} persistent volumes", count);
            samples.push(MetricSample::new(
                "cluster_monitor_persistent_volumes",
                count as f64,
            ));
        }

        Ok(MetricsSnapshot {
            collected_at: Some(Utc::now()),
            samples,
            max_pod_restarts,
        })
    }
}
