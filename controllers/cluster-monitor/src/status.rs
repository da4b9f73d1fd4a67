//! Status state machine helpers.
//!
//! Pure functions the reconciler composes: phase/health evaluation and the
//! due-check that paces collection runs. Kept free of API calls so they are
//! unit testable.

use crate::collector::MetricsSnapshot;
use chrono::{DateTime, Utc};
use crds::validation::parse_interval;
use crds::{AlertThresholdsSpec, ClusterMonitor, HealthState, HealthStatus, MonitorPhase};

/// Condition type: the spec passed validation.
pub const CONDITION_SPEC_VALID: &str = "SpecValid";

/// Condition type: the last collection run succeeded.
pub const CONDITION_COLLECTING: &str = "Collecting";

/// Condition type: custom metric queries were handled.
pub const CONDITION_CUSTOM_METRICS: &str = "CustomMetrics";

/// Condition type: a target cluster is configured.
pub const CONDITION_TARGET_CLUSTER: &str = "TargetCluster";

/// Evaluate health from a snapshot against the configured thresholds.
///
/// Pod restart counts are the one threshold observable from the API server
/// alone: a restart count at or above the threshold is `Warning`, at or above
/// twice the threshold is `Critical`. A threshold of 0 disables the check.
/// CPU/memory/disk thresholds need a metrics pipeline and are only recorded.
#[must_use]
pub fn evaluate_health(
    snapshot: &MetricsSnapshot,
    thresholds: &AlertThresholdsSpec,
    now: DateTime<Utc>,
) -> HealthStatus {
    let restart_limit = thresholds.pod_restart_threshold;
    let (status, details) = if restart_limit > 0 && snapshot.max_pod_restarts >= restart_limit * 2 {
        (
            HealthState::Critical,
            format!(
                "max container restarts {} is at least twice the threshold {}",
                snapshot.max_pod_restarts, restart_limit
            ),
        )
    } else if restart_limit > 0 && snapshot.max_pod_restarts >= restart_limit {
        (
            HealthState::Warning,
            format!(
                "max container restarts {} reached the threshold {}",
                snapshot.max_pod_restarts, restart_limit
            ),
        )
    } else {
        (
            HealthState::Healthy,
            "pod restarts within threshold; cpu/memory/disk evaluation requires a metrics pipeline"
                .to_string(),
        )
    };

    HealthStatus {
        status,
        last_check: Some(now),
        details,
    }
}

/// Health placeholder when collection or validation failed.
#[must_use]
pub fn unknown_health(now: DateTime<Utc>, details: impl Into<String>) -> HealthStatus {
    HealthStatus {
        status: HealthState::Unknown,
        last_check: Some(now),
        details: details.into(),
    }
}

/// Generation the spec was last validated against, if recorded.
#[must_use]
pub fn observed_generation(monitor: &ClusterMonitor) -> Option<i64> {
    monitor
        .status
        .as_ref()?
        .conditions
        .iter()
        .find(|c| c.type_ == CONDITION_SPEC_VALID)?
        .observed_generation
}

/// Whether a reconcile should run now.
///
/// Runs when the resource is being deleted (to transition to `Stopping`),
/// when the spec generation changed, when the monitor has never collected,
/// when it sits in `Error` (retry pacing is the backoff's job), or when the
/// collection interval has elapsed.
#[must_use]
pub fn collection_due(monitor: &ClusterMonitor, now: DateTime<Utc>) -> bool {
    let status = monitor.status.as_ref();
    let phase = status.map(|s| s.phase).unwrap_or_default();

    if monitor.metadata.deletion_timestamp.is_some() {
        return phase != MonitorPhase::Stopping;
    }

    if monitor.metadata.generation != observed_generation(monitor) {
        return true;
    }

    if phase == MonitorPhase::Error {
        return true;
    }

    let Some(last_collection) = status.and_then(|s| s.last_collection) else {
        return true;
    };

    // Unparseable intervals reconcile immediately so validation can flag them
    let Ok(interval) = parse_interval(&monitor.spec.interval) else {
        return true;
    };
    (now - last_collection).to_std().unwrap_or_default() >= interval
}
