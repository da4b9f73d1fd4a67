//! Spec validation for ClusterMonitor resources
//!
//! The CRD schema keeps fields loosely typed (strings for durations and
//! schedules); the rules behind them are enforced here so the controller can
//! reject an invalid spec with a precise reason and so the rules are unit
//! testable.

use crate::cluster_monitor::{AlertThresholdsSpec, ClusterMonitorSpec, ExportSpec};
use std::time::Duration;
use thiserror::Error;

/// Validation failures for a ClusterMonitor spec.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Duration string does not match `^[0-9]+(s|m|h)$`
    #[error("invalid interval {0:?}: expected <number>(s|m|h)")]
    InvalidInterval(String),

    /// Custom metric name does not match `^[a-zA-Z_][a-zA-Z0-9_]*$`
    #[error("invalid metric name {0:?}: expected an identifier")]
    InvalidMetricName(String),

    /// Custom metric has an empty query
    #[error("custom metric {0:?} has an empty query")]
    EmptyQuery(String),

    /// Threshold out of bounds
    #[error("{field} must be within {min}..={max}, got {value}")]
    ThresholdOutOfRange {
        /// Field name as it appears in the spec
        field: &'static str,
        /// Lower bound (inclusive)
        min: i32,
        /// Upper bound (inclusive)
        max: i32,
        /// Offending value
        value: i32,
    },

    /// Export formats list is empty
    #[error("export.formats must not be empty")]
    NoExportFormats,

    /// Schedule string does not match the cron / @every grammar
    #[error("invalid schedule {0:?}: expected a cron expression, a cron macro, or @every <duration>")]
    InvalidSchedule(String),

    /// A referenced name is empty
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
}

/// Parse a duration string of the form `<digits>(s|m|h)`.
pub fn parse_interval(interval: &str) -> Result<Duration, ValidationError> {
    let invalid = || ValidationError::InvalidInterval(interval.to_string());

    if !interval.is_ascii() {
        return Err(invalid());
    }
    let (digits, unit) = interval.split_at(interval.len().saturating_sub(1));
    let multiplier = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        _ => return Err(invalid()),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let value: u64 = digits.parse().map_err(|_| invalid())?;
    value
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(invalid)
}

/// Validate a custom metric name (`^[a-zA-Z_][a-zA-Z0-9_]*$`).
pub fn validate_metric_name(name: &str) -> Result<(), ValidationError> {
    let mut bytes = name.bytes();
    let valid_head = bytes
        .next()
        .is_some_and(|b| b.is_ascii_alphabetic() || b == b'_');
    if valid_head && bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        Ok(())
    } else {
        Err(ValidationError::InvalidMetricName(name.to_string()))
    }
}

/// A parsed export schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// A cron macro such as `@hourly`
    Macro(&'static str),

    /// `@every <duration>` with the parsed cadence
    Every(Duration),

    /// A 5-field cron expression, kept verbatim
    Cron(String),
}

const CRON_MACROS: [&str; 7] = [
    "@annually",
    "@yearly",
    "@monthly",
    "@weekly",
    "@daily",
    "@hourly",
    "@reboot",
];

/// Parse a schedule string: a cron macro, `@every <duration>`, or a
/// 5-field cron expression whose fields draw from `[0-9*/,-]`.
pub fn parse_schedule(schedule: &str) -> Result<Schedule, ValidationError> {
    if let Some(macro_name) = CRON_MACROS.iter().find(|m| **m == schedule) {
        return Ok(Schedule::Macro(macro_name));
    }
    if let Some(rest) = schedule.strip_prefix("@every ") {
        let cadence = parse_interval(rest)
            .map_err(|_| ValidationError::InvalidSchedule(schedule.to_string()))?;
        return Ok(Schedule::Every(cadence));
    }

    let fields: Vec<&str> = schedule.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(ValidationError::InvalidSchedule(schedule.to_string()));
    }
    let field_ok = |field: &&str| {
        !field.is_empty()
            && field
                .bytes()
                .all(|b| b.is_ascii_digit() || matches!(b, b'*' | b'/' | b',' | b'-'))
    };
    if fields.iter().all(field_ok) {
        Ok(Schedule::Cron(schedule.to_string()))
    } else {
        Err(ValidationError::InvalidSchedule(schedule.to_string()))
    }
}

/// Validate threshold bounds: percentages 0..=100, restart count >= 0.
pub fn validate_thresholds(thresholds: &AlertThresholdsSpec) -> Result<(), ValidationError> {
    let percentages = [
        ("cpuThreshold", thresholds.cpu_threshold),
        ("memoryThreshold", thresholds.memory_threshold),
        ("diskThreshold", thresholds.disk_threshold),
    ];
    for (field, value) in percentages {
        if !(0..=100).contains(&value) {
            return Err(ValidationError::ThresholdOutOfRange {
                field,
                min: 0,
                max: 100,
                value,
            });
        }
    }
    if thresholds.pod_restart_threshold < 0 {
        return Err(ValidationError::ThresholdOutOfRange {
            field: "podRestartThreshold",
            min: 0,
            max: i32::MAX,
            value: thresholds.pod_restart_threshold,
        });
    }
    Ok(())
}

fn validate_export(export: &ExportSpec) -> Result<(), ValidationError> {
    if export.formats.is_empty() {
        return Err(ValidationError::NoExportFormats);
    }
    if let Some(schedule) = &export.schedule {
        parse_schedule(schedule)?;
    }
    if let Some(s3) = &export.s3_config {
        if s3.bucket.is_empty() {
            return Err(ValidationError::EmptyField("export.s3Config.bucket"));
        }
        if s3.region.is_empty() {
            return Err(ValidationError::EmptyField("export.s3Config.region"));
        }
        if s3.credentials_secret_ref.name.is_empty() {
            return Err(ValidationError::EmptyField(
                "export.s3Config.credentialsSecretRef.name",
            ));
        }
    }
    Ok(())
}

/// Validate a whole ClusterMonitor spec.
pub fn validate_spec(spec: &ClusterMonitorSpec) -> Result<(), ValidationError> {
    parse_interval(&spec.interval)?;

    for metric in &spec.metrics_collection.custom_metrics {
        validate_metric_name(&metric.name)?;
        if metric.query.is_empty() {
            return Err(ValidationError::EmptyQuery(metric.name.clone()));
        }
        if let Some(interval) = &metric.interval {
            parse_interval(interval)?;
        }
    }

    if let Some(thresholds) = &spec.alert_thresholds {
        validate_thresholds(thresholds)?;
    }

    if let Some(export) = &spec.export {
        validate_export(export)?;
    }

    if let Some(target) = &spec.target_cluster {
        if target.name.is_empty() {
            return Err(ValidationError::EmptyField("targetCluster.name"));
        }
        if target.kubeconfig_secret_ref.name.is_empty() {
            return Err(ValidationError::EmptyField(
                "targetCluster.kubeconfigSecretRef.name",
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster_monitor::{
        CustomMetricSpec, ExportFormat, MetricsCollectionSpec, S3ConfigSpec,
    };
    use crate::references::SecretRef;

    fn minimal_spec() -> ClusterMonitorSpec {
        ClusterMonitorSpec {
            interval: "30s".to_string(),
            metrics_collection: MetricsCollectionSpec::default(),
            alert_thresholds: None,
            export: None,
            target_cluster: None,
        }
    }

    #[test]
    fn test_parse_interval_accepts_units() {
        assert_eq!(parse_interval("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_interval("5m"), Ok(Duration::from_secs(300)));
        assert_eq!(parse_interval("1h"), Ok(Duration::from_secs(3600)));
    }

    #[test]
    fn test_parse_interval_rejects_malformed() {
        for bad in ["", "30", "s", "5x", "-5m", "1.5h", "5 m", "m5"] {
            assert!(parse_interval(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_validate_metric_name() {
        assert!(validate_metric_name("cpu_usage_total").is_ok());
        assert!(validate_metric_name("_internal").is_ok());
        assert!(validate_metric_name("Node9").is_ok());

        assert!(validate_metric_name("").is_err());
        assert!(validate_metric_name("9lives").is_err());
        assert!(validate_metric_name("cpu-usage").is_err());
        assert!(validate_metric_name("cpu usage").is_err());
    }

    #[test]
    fn test_parse_schedule_macros() {
        assert_eq!(parse_schedule("@hourly"), Ok(Schedule::Macro("@hourly")));
        assert_eq!(parse_schedule("@reboot"), Ok(Schedule::Macro("@reboot")));
        assert!(parse_schedule("@fortnightly").is_err());
    }

    #[test]
    fn test_parse_schedule_every() {
        assert_eq!(
            parse_schedule("@every 15m"),
            Ok(Schedule::Every(Duration::from_secs(900)))
        );
        assert!(parse_schedule("@every").is_err());
        assert!(parse_schedule("@every fast").is_err());
    }

    #[test]
    fn test_parse_schedule_cron() {
        assert_eq!(
            parse_schedule("*/5 * * * *"),
            Ok(Schedule::Cron("*/5 * * * *".to_string()))
        );
        assert_eq!(
            parse_schedule("0 0-6,18 * * 1-5"),
            Ok(Schedule::Cron("0 0-6,18 * * 1-5".to_string()))
        );
        // Wrong field count
        assert!(parse_schedule("* * * *").is_err());
        assert!(parse_schedule("* * * * * *").is_err());
        // Bad charset
        assert!(parse_schedule("* * * * mon").is_err());
    }

    #[test]
    fn test_validate_thresholds_bounds() {
        assert!(validate_thresholds(&AlertThresholdsSpec::default()).is_ok());

        let over = AlertThresholdsSpec {
            cpu_threshold: 101,
            ..AlertThresholdsSpec::default()
        };
        assert!(matches!(
            validate_thresholds(&over),
            Err(ValidationError::ThresholdOutOfRange { field: "cpuThreshold", .. })
        ));

        let negative_restarts = AlertThresholdsSpec {
            pod_restart_threshold: -1,
            ..AlertThresholdsSpec::default()
        };
        assert!(validate_thresholds(&negative_restarts).is_err());
    }

    #[test]
    fn test_validate_spec_rejects_empty_formats() {
        let mut spec = minimal_spec();
        spec.export = Some(ExportSpec {
            formats: Vec::new(),
            s3_config: None,
            schedule: None,
        });
        assert_eq!(validate_spec(&spec), Err(ValidationError::NoExportFormats));
    }

    #[test]
    fn test_validate_spec_checks_custom_metric_intervals() {
        let mut spec = minimal_spec();
        spec.metrics_collection.custom_metrics = vec![CustomMetricSpec {
            name: "queue_depth".to_string(),
            query: "sum(queue_depth)".to_string(),
            interval: Some("90x".to_string()),
        }];
        assert!(matches!(
            validate_spec(&spec),
            Err(ValidationError::InvalidInterval(_))
        ));
    }

    #[test]
    fn test_validate_spec_checks_s3_refs() {
        let mut spec = minimal_spec();
        spec.export = Some(ExportSpec {
            formats: vec![ExportFormat::Json],
            s3_config: Some(S3ConfigSpec {
                bucket: "metrics".to_string(),
                region: "us-east-1".to_string(),
                endpoint: None,
                credentials_secret_ref: SecretRef::new(""),
            }),
            schedule: Some("@every 1h".to_string()),
        });
        assert_eq!(
            validate_spec(&spec),
            Err(ValidationError::EmptyField(
                "export.s3Config.credentialsSecretRef.name"
            ))
        );
    }

    #[test]
    fn test_validate_spec_accepts_full_spec() {
        let mut spec = minimal_spec();
        spec.alert_thresholds = Some(AlertThresholdsSpec::default());
        spec.export = Some(ExportSpec {
            formats: vec![ExportFormat::Prometheus, ExportFormat::Csv],
            s3_config: Some(S3ConfigSpec {
                bucket: "metrics".to_string(),
                region: "eu-west-1".to_string(),
                endpoint: Some("https://minio.internal:9000".to_string()),
                credentials_secret_ref: SecretRef::new("s3-creds"),
            }),
            schedule: Some("0 * * * *".to_string()),
        });
        assert!(validate_spec(&spec).is_ok());
    }
}
