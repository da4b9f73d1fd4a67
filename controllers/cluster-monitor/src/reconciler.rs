//! Reconciliation logic for ClusterMonitor CRDs.
//!
//! Drives the status state machine: validates the spec, collects a metrics
//! snapshot, evaluates health, renders due exports, and writes the observed
//! state back through the status subresource. Spec is owned by users; status
//! is owned exclusively by this controller.
//!
//! Status computation is pure (`next_status`); the `Reconciler` wraps it with
//! API calls, export delivery, and error backoff.

use crate::backoff::FibonacciBackoff;
use crate::collector::{MetricsSnapshot, MetricsSource};
use crate::error::ControllerError;
use crate::export::{self, ExportSink};
use crate::status::{
    self, CONDITION_COLLECTING, CONDITION_CUSTOM_METRICS, CONDITION_SPEC_VALID,
    CONDITION_TARGET_CLUSTER,
};
use chrono::{DateTime, Utc};
use crds::{
    ClusterMonitor, ClusterMonitorStatus, Condition, ConditionStatus, ExportSpec, ExportStatus,
    MonitorPhase, set_condition, validation,
};
use kube::Api;
use kube::api::{Patch, PatchParams};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Backoff state for one monitor.
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
    retry_after: Option<DateTime<Utc>>,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(1, 10), // 1 minute min, 10 minutes max
            error_count: 0,
            retry_after: None,
        }
    }
}

/// Tracks monitors with a reconcile in progress so the watcher and the
/// scheduler cannot run the same resource concurrently.
#[derive(Debug, Default)]
struct InFlight {
    keys: Mutex<HashSet<String>>,
}

impl InFlight {
    /// Claim the key. Returns false when a reconcile already holds it.
    fn begin(&self, key: &str) -> bool {
        self.keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string())
    }

    fn finish(&self, key: &str) {
        self.keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(key);
    }
}

/// What a reconcile attempt observed, independent of how status is persisted.
#[derive(Debug)]
pub(crate) enum ReconcileOutcome {
    /// The resource carries a deletion timestamp
    Stopping,

    /// Spec validation failed with the given message
    InvalidSpec(String),

    /// The metrics source failed with the given message
    CollectionFailed(String),

    /// Collection succeeded; export status was computed from the snapshot
    Collected {
        /// The collected snapshot
        snapshot: MetricsSnapshot,
        /// Export status for this run (None when no export is configured)
        export_status: Option<ExportStatus>,
    },
}

/// Conditions shared by every outcome where the spec validated.
fn spec_conditions(monitor: &ClusterMonitor, conditions: &mut Vec<Condition>) {
    set_condition(
        conditions,
        Condition::new(CONDITION_SPEC_VALID, ConditionStatus::True, "Validated", "")
            .with_observed_generation(monitor.metadata.generation),
    );

    // Remote targets are recorded; kubeconfig resolution is delegated
    if let Some(target) = &monitor.spec.target_cluster {
        set_condition(
            conditions,
            Condition::new(
                CONDITION_TARGET_CLUSTER,
                ConditionStatus::True,
                "Configured",
                format!(
                    "target cluster {:?} configured; collection uses the local cluster client",
                    target.name
                ),
            ),
        );
    }
}

/// Compute the status a reconcile outcome maps to.
///
/// Pure: the phase state machine, conditions, and health evaluation all live
/// here; `Reconciler::reconcile` only persists the result.
pub(crate) fn next_status(
    monitor: &ClusterMonitor,
    outcome: &ReconcileOutcome,
    now: DateTime<Utc>,
) -> ClusterMonitorStatus {
    let previous = monitor.status.clone().unwrap_or_default();
    let mut conditions = previous.conditions.clone();

    match outcome {
        ReconcileOutcome::Stopping => ClusterMonitorStatus {
            phase: MonitorPhase::Stopping,
            ..previous
        },

        ReconcileOutcome::InvalidSpec(message) => {
            set_condition(
                &mut conditions,
                Condition::new(
                    CONDITION_SPEC_VALID,
                    ConditionStatus::False,
                    "InvalidSpec",
                    message.clone(),
                )
                .with_observed_generation(monitor.metadata.generation),
            );
            ClusterMonitorStatus {
                phase: MonitorPhase::Error,
                conditions,
                health: Some(status::unknown_health(now, "spec failed validation")),
                ..previous
            }
        }

        ReconcileOutcome::CollectionFailed(message) => {
            spec_conditions(monitor, &mut conditions);
            set_condition(
                &mut conditions,
                Condition::new(
                    CONDITION_COLLECTING,
                    ConditionStatus::False,
                    "CollectionFailed",
                    message.clone(),
                ),
            );
            ClusterMonitorStatus {
                phase: MonitorPhase::Error,
                conditions,
                health: Some(status::unknown_health(now, "last collection failed")),
                ..previous
            }
        }

        ReconcileOutcome::Collected {
            snapshot,
            export_status,
        } => {
            spec_conditions(monitor, &mut conditions);
            set_condition(
                &mut conditions,
                Condition::new(
                    CONDITION_COLLECTING,
                    ConditionStatus::True,
                    "CollectionSucceeded",
                    "",
                ),
            );

            let custom_metrics = &monitor.spec.metrics_collection.custom_metrics;
            if !custom_metrics.is_empty() {
                set_condition(
                    &mut conditions,
                    Condition::new(
                        CONDITION_CUSTOM_METRICS,
                        ConditionStatus::False,
                        "QueryExecutionExternal",
                        format!(
                            "{} custom metric(s) defined; query execution is delegated to an external metrics source",
                            custom_metrics.len()
                        ),
                    ),
                );
            }

            let thresholds = monitor.spec.alert_thresholds.clone().unwrap_or_default();
            let health = status::evaluate_health(snapshot, &thresholds, now);

            ClusterMonitorStatus {
                phase: MonitorPhase::Running,
                last_collection: snapshot.collected_at.or(Some(now)),
                metrics_collected: Some(snapshot.metrics_collected()),
                conditions,
                health: Some(health),
                export_status: export_status.clone(),
            }
        }
    }
}

/// Render and deliver exports when due. Export failures are recorded in
/// the export status and do not fail the reconcile.
pub(crate) async fn run_export(
    sink: &(dyn ExportSink + Send + Sync),
    name: &str,
    export_spec: Option<&ExportSpec>,
    snapshot: &MetricsSnapshot,
    previous: Option<&ExportStatus>,
    now: DateTime<Utc>,
) -> Option<ExportStatus> {
    let export_spec = export_spec?;
    let last_export = previous.and_then(|e| e.last_export);

    if !export::export_due(export_spec.schedule.as_deref(), last_export, now) {
        return previous.cloned();
    }

    let mut records: i64 = 0;
    for format in &export_spec.formats {
        let rendered = match export::render(snapshot, *format) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Export render failed for ClusterMonitor {}: {}", name, e);
                return Some(ExportStatus {
                    last_export,
                    error: Some(e.to_string()),
                    records_exported: previous.and_then(|p| p.records_exported),
                });
            }
        };
        if let Err(e) = sink.deliver(name, *format, &rendered).await {
            warn!("Export delivery failed for ClusterMonitor {}: {}", name, e);
            return Some(ExportStatus {
                last_export,
                error: Some(e.to_string()),
                records_exported: previous.and_then(|p| p.records_exported),
            });
        }
        records += snapshot.samples.len() as i64;
    }

    Some(ExportStatus {
        last_export: Some(now),
        error: None,
        records_exported: Some(records),
    })
}

/// Reconciles ClusterMonitor resources.
pub struct Reconciler {
    monitor_api: Api<ClusterMonitor>,
    source: Box<dyn MetricsSource + Send + Sync>,
    sink: Box<dyn ExportSink + Send + Sync>,
    /// Error pacing per resource (namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
    in_flight: InFlight,
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        monitor_api: Api<ClusterMonitor>,
        source: Box<dyn MetricsSource + Send + Sync>,
        sink: Box<dyn ExportSink + Send + Sync>,
    ) -> Self {
        Self {
            monitor_api,
            source,
            sink,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
            in_flight: InFlight::default(),
        }
    }

    /// Reconcile a monitor if it is due and not held back by error backoff.
    ///
    /// Returns `Ok(true)` when a reconcile ran. Both the watcher and the
    /// periodic scheduler go through this entry point: status-only writes do
    /// not retrigger work, and a resource already being reconciled by the
    /// other task is skipped rather than run twice.
    pub async fn reconcile_if_due(
        &self,
        monitor: &ClusterMonitor,
        now: DateTime<Utc>,
    ) -> Result<bool, ControllerError> {
        if !status::collection_due(monitor, now) {
            return Ok(false);
        }
        let key = monitor_key(monitor)?;
        if !self.ready_for_retry(&key, now) {
            return Ok(false);
        }
        if !self.in_flight.begin(&key) {
            debug!("ClusterMonitor {} reconcile already in flight, skipping", key);
            return Ok(false);
        }
        let result = self.reconcile(monitor).await;
        self.in_flight.finish(&key);
        result.map(|()| true)
    }

    /// Reconciles a ClusterMonitor resource.
    ///
    /// This method:
    /// 1. Transitions to Stopping when the resource is being deleted
    /// 2. Validates the spec, failing to Error phase with a SpecValid condition
    /// 3. Collects a metrics snapshot through the metrics source
    /// 4. Evaluates health and renders due exports
    /// 5. Patches the status subresource with the observed state
    pub async fn reconcile(&self, monitor: &ClusterMonitor) -> Result<(), ControllerError> {
        let key = monitor_key(monitor)?;
        let name = monitor
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ControllerError::InvalidConfig("ClusterMonitor missing name".to_string()))?;

        info!("Reconciling ClusterMonitor {}", key);
        let now = Utc::now();

        // Deletion: only mark the phase; collection stops here
        if monitor.metadata.deletion_timestamp.is_some() {
            info!("ClusterMonitor {} is being deleted, entering Stopping", key);
            let status = next_status(monitor, &ReconcileOutcome::Stopping, now);
            return self.patch_status(name, &status).await;
        }

        // Validate the declared spec before touching the cluster
        if let Err(validation_error) = validation::validate_spec(&monitor.spec) {
            warn!("ClusterMonitor {} has an invalid spec: {}", key, validation_error);
            let outcome = ReconcileOutcome::InvalidSpec(validation_error.to_string());
            self.patch_status(name, &next_status(monitor, &outcome, now)).await?;
            self.record_failure(&key, now);
            return Err(validation_error.into());
        }

        // Collect
        let snapshot = match self.source.collect(&monitor.spec.metrics_collection).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("Collection failed for ClusterMonitor {}: {}", key, e);
                let outcome = ReconcileOutcome::CollectionFailed(e.to_string());
                self.patch_status(name, &next_status(monitor, &outcome, now)).await?;
                self.record_failure(&key, now);
                return Err(e);
            }
        };

        let export_status = run_export(
            self.sink.as_ref(),
            name,
            monitor.spec.export.as_ref(),
            &snapshot,
            monitor.status.as_ref().and_then(|s| s.export_status.as_ref()),
            now,
        )
        .await;

        let outcome = ReconcileOutcome::Collected {
            snapshot,
            export_status,
        };
        let status = next_status(monitor, &outcome, now);
        self.patch_status(name, &status).await?;
        self.record_success(&key);

        info!(
            "ClusterMonitor {} reconciled: {} metrics collected",
            key,
            status.metrics_collected.unwrap_or(0)
        );
        Ok(())
    }

    /// Patch the status subresource with a merge patch.
    async fn patch_status(
        &self,
        name: &str,
        status: &ClusterMonitorStatus,
    ) -> Result<(), ControllerError> {
        let patch = serde_json::json!({ "status": status });
        self.monitor_api
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    /// Whether the monitor's error backoff window has elapsed.
    fn ready_for_retry(&self, key: &str, now: DateTime<Utc>) -> bool {
        let states = self
            .backoff_states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match states.get(key).and_then(|s| s.retry_after) {
            Some(retry_after) => now >= retry_after,
            None => true,
        }
    }

    fn record_failure(&self, key: &str, now: DateTime<Utc>) {
        let mut states = self
            .backoff_states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let state = states
            .entry(key.to_string())
            .or_insert_with(BackoffState::new);
        state.error_count += 1;
        let delay = state.backoff.next_backoff();
        state.retry_after = Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
        warn!(
            "ClusterMonitor {} failed {} time(s), next retry in {}s",
            key,
            state.error_count,
            delay.as_secs()
        );
    }

    fn record_success(&self, key: &str) {
        let mut states = self
            .backoff_states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        states.remove(key);
    }
}

/// namespace/name key used for backoff tracking and logs.
fn monitor_key(monitor: &ClusterMonitor) -> Result<String, ControllerError> {
    let name = monitor
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| ControllerError::InvalidConfig("ClusterMonitor missing name".to_string()))?;
    let namespace = monitor.metadata.namespace.as_deref().unwrap_or("default");
    Ok(format!("{namespace}/{name}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MetricSample;
    use chrono::TimeDelta;
    use crds::{ClusterMonitorSpec, ExportFormat, HealthState, MetricsCollectionSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

    /// Metrics source returning a fixed snapshot or a fixed failure.
    struct FixedMetricsSource {
        fail: bool,
    }

    #[async_trait::async_trait]
    impl MetricsSource for FixedMetricsSource {
        async fn collect(
            &self,
            _scope: &MetricsCollectionSpec,
        ) -> Result<MetricsSnapshot, ControllerError> {
            if self.fail {
                Err(ControllerError::Collection("node list timed out".to_string()))
            } else {
                Ok(snapshot())
            }
        }
    }

    /// Sink recording each delivery, optionally failing every call.
    #[derive(Default)]
    struct RecordingSink {
        delivered: Mutex<Vec<(ExportFormat, usize)>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl ExportSink for RecordingSink {
        async fn deliver(
            &self,
            _monitor: &str,
            format: ExportFormat,
            payload: &str,
        ) -> Result<(), ControllerError> {
            if self.fail {
                return Err(ControllerError::Export("sink unavailable".to_string()));
            }
            self.delivered
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push((format, payload.len()));
            Ok(())
        }
    }

    fn snapshot() -> MetricsSnapshot {
        MetricsSnapshot {
            collected_at: Some(Utc::now()),
            samples: vec![
                MetricSample::new("cluster_monitor_nodes", 3.0),
                MetricSample::new("cluster_monitor_pods", 42.0),
            ],
            max_pod_restarts: 1,
        }
    }

    fn test_monitor(interval: &str, status: Option<ClusterMonitorStatus>) -> ClusterMonitor {
        ClusterMonitor {
            metadata: ObjectMeta {
                name: Some("prod-monitor".to_string()),
                namespace: Some("monitoring".to_string()),
                generation: Some(1),
                ..Default::default()
            },
            spec: ClusterMonitorSpec {
                interval: interval.to_string(),
                metrics_collection: MetricsCollectionSpec::default(),
                alert_thresholds: None,
                export: None,
                target_cluster: None,
            },
            status,
        }
    }

    fn condition<'a>(status: &'a ClusterMonitorStatus, type_: &str) -> &'a Condition {
        status
            .conditions
            .iter()
            .find(|c| c.type_ == type_)
            .unwrap_or_else(|| panic!("missing condition {type_}"))
    }

    #[tokio::test]
    async fn test_first_collection_moves_pending_to_running() {
        let monitor = test_monitor("30s", None);
        // A status-less resource reads as Pending
        assert_eq!(
            monitor.status.clone().unwrap_or_default().phase,
            MonitorPhase::Pending
        );

        let source = FixedMetricsSource { fail: false };
        let snapshot = source
            .collect(&monitor.spec.metrics_collection)
            .await
            .unwrap();
        let outcome = ReconcileOutcome::Collected {
            snapshot,
            export_status: None,
        };
        let status = next_status(&monitor, &outcome, Utc::now());

        assert_eq!(status.phase, MonitorPhase::Running);
        assert_eq!(status.metrics_collected, Some(2));
        assert!(status.last_collection.is_some());
        assert_eq!(condition(&status, CONDITION_SPEC_VALID).status, ConditionStatus::True);
        assert_eq!(condition(&status, CONDITION_COLLECTING).status, ConditionStatus::True);
        let health = status.health.as_ref().unwrap_or_else(|| panic!("missing health"));
        assert_eq!(health.status, HealthState::Healthy);
    }

    #[test]
    fn test_invalid_spec_moves_to_error() {
        let monitor = test_monitor("30x", None);
        let message = validation::validate_spec(&monitor.spec)
            .expect_err("interval 30x should fail validation")
            .to_string();
        let status = next_status(&monitor, &ReconcileOutcome::InvalidSpec(message), Utc::now());

        assert_eq!(status.phase, MonitorPhase::Error);
        let spec_valid = condition(&status, CONDITION_SPEC_VALID);
        assert_eq!(spec_valid.status, ConditionStatus::False);
        assert_eq!(spec_valid.reason, "InvalidSpec");
        assert_eq!(spec_valid.observed_generation, Some(1));
        let health = status.health.as_ref().unwrap_or_else(|| panic!("missing health"));
        assert_eq!(health.status, HealthState::Unknown);
    }

    #[tokio::test]
    async fn test_collection_failure_moves_to_error() {
        let monitor = test_monitor("30s", None);
        let source = FixedMetricsSource { fail: true };
        let message = source
            .collect(&monitor.spec.metrics_collection)
            .await
            .expect_err("source should fail")
            .to_string();
        let status = next_status(
            &monitor,
            &ReconcileOutcome::CollectionFailed(message),
            Utc::now(),
        );

        assert_eq!(status.phase, MonitorPhase::Error);
        let collecting = condition(&status, CONDITION_COLLECTING);
        assert_eq!(collecting.status, ConditionStatus::False);
        assert_eq!(collecting.reason, "CollectionFailed");
        // Validation passed before collection, so SpecValid stays True
        assert_eq!(condition(&status, CONDITION_SPEC_VALID).status, ConditionStatus::True);
        let health = status.health.as_ref().unwrap_or_else(|| panic!("missing health"));
        assert_eq!(health.status, HealthState::Unknown);
    }

    #[test]
    fn test_deletion_moves_to_stopping_and_keeps_observed_state() {
        let last_collection = Utc::now() - TimeDelta::minutes(1);
        let mut monitor = test_monitor(
            "30s",
            Some(ClusterMonitorStatus {
                phase: MonitorPhase::Running,
                last_collection: Some(last_collection),
                metrics_collected: Some(2),
                ..Default::default()
            }),
        );
        monitor.metadata.deletion_timestamp = Some(Time(Utc::now()));

        let status = next_status(&monitor, &ReconcileOutcome::Stopping, Utc::now());
        assert_eq!(status.phase, MonitorPhase::Stopping);
        assert_eq!(status.last_collection, Some(last_collection));
        assert_eq!(status.metrics_collected, Some(2));
    }

    #[tokio::test]
    async fn test_run_export_counts_records_per_format() {
        let sink = RecordingSink::default();
        let export_spec = ExportSpec {
            formats: vec![ExportFormat::Prometheus, ExportFormat::Csv],
            s3_config: None,
            schedule: None,
        };
        let now = Utc::now();

        let result = run_export(&sink, "prod-monitor", Some(&export_spec), &snapshot(), None, now)
            .await
            .unwrap_or_else(|| panic!("export should run"));

        // 2 samples rendered in each of 2 formats
        assert_eq!(result.records_exported, Some(4));
        assert_eq!(result.last_export, Some(now));
        assert_eq!(result.error, None);

        let delivered = sink
            .delivered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let formats: Vec<ExportFormat> = delivered.iter().map(|(f, _)| *f).collect();
        assert_eq!(formats, vec![ExportFormat::Prometheus, ExportFormat::Csv]);
    }

    #[tokio::test]
    async fn test_run_export_records_sink_failure() {
        let sink = RecordingSink {
            fail: true,
            ..RecordingSink::default()
        };
        let export_spec = ExportSpec {
            formats: vec![ExportFormat::Json],
            s3_config: None,
            schedule: None,
        };
        let earlier = Utc::now() - TimeDelta::hours(1);
        let previous = ExportStatus {
            last_export: Some(earlier),
            error: None,
            records_exported: Some(2),
        };

        let result = run_export(
            &sink,
            "prod-monitor",
            Some(&export_spec),
            &snapshot(),
            Some(&previous),
            Utc::now(),
        )
        .await
        .unwrap_or_else(|| panic!("export should run"));

        assert!(result.error.as_deref().unwrap_or("").contains("sink unavailable"));
        // Failure keeps the previous success markers
        assert_eq!(result.last_export, Some(earlier));
        assert_eq!(result.records_exported, Some(2));
    }

    #[tokio::test]
    async fn test_run_export_not_due_keeps_previous_status() {
        let sink = RecordingSink::default();
        let export_spec = ExportSpec {
            formats: vec![ExportFormat::Json],
            s3_config: None,
            schedule: Some("@every 1h".to_string()),
        };
        let recent = Utc::now() - TimeDelta::minutes(5);
        let previous = ExportStatus {
            last_export: Some(recent),
            error: None,
            records_exported: Some(2),
        };

        let result = run_export(
            &sink,
            "prod-monitor",
            Some(&export_spec),
            &snapshot(),
            Some(&previous),
            Utc::now(),
        )
        .await
        .unwrap_or_else(|| panic!("previous status should carry over"));

        assert_eq!(result.last_export, Some(recent));
        assert_eq!(result.records_exported, Some(2));
        let delivered = sink
            .delivered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        assert!(delivered.is_empty());
    }

    #[test]
    fn test_in_flight_guard_is_exclusive_per_key() {
        let in_flight = InFlight::default();
        assert!(in_flight.begin("monitoring/prod-monitor"));
        // Second claim for the same key is refused while the first holds it
        assert!(!in_flight.begin("monitoring/prod-monitor"));
        // Other keys are unaffected
        assert!(in_flight.begin("monitoring/staging-monitor"));

        in_flight.finish("monitoring/prod-monitor");
        assert!(in_flight.begin("monitoring/prod-monitor"));
    }
}
