//! Snapshot export.
//!
//! Renders a metrics snapshot into the formats a ClusterMonitor enables and
//! hands the payloads to an `ExportSink`. Delivery to object storage is an
//! external collaborator; the default sink only logs payload sizes.

use crate::collector::MetricsSnapshot;
use crate::error::ControllerError;
use chrono::{DateTime, Utc};
use crds::validation::{Schedule, parse_schedule};
use crds::ExportFormat;
use prometheus::{Encoder, Gauge, Opts, Registry, TextEncoder};
use std::fmt::Write as _;
use tracing::info;

/// Render a snapshot into one export format.
pub fn render(snapshot: &MetricsSnapshot, format: ExportFormat) -> Result<String, ControllerError> {
    match format {
        ExportFormat::Prometheus => render_prometheus(snapshot),
        ExportFormat::Json => {
            serde_json::to_string_pretty(snapshot).map_err(|e| ControllerError::Export(e.to_string()))
        }
        ExportFormat::Csv => Ok(render_csv(snapshot)),
    }
}

fn render_prometheus(snapshot: &MetricsSnapshot) -> Result<String, ControllerError> {
    let registry = Registry::new();
    for sample in &snapshot.samples {
        let gauge = Gauge::with_opts(Opts::new(&sample.name, "cluster-monitor collected sample"))
            .map_err(|e| ControllerError::Export(e.to_string()))?;
        gauge.set(sample.value);
        registry
            .register(Box::new(gauge))
            .map_err(|e| ControllerError::Export(e.to_string()))?;
    }

    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .map_err(|e| ControllerError::Export(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| ControllerError::Export(e.to_string()))
}

fn render_csv(snapshot: &MetricsSnapshot) -> String {
    let mut out = String::from("name,value\n");
    for sample in &snapshot.samples {
        // Sample names are identifier-shaped, no CSV quoting needed
        let _ = writeln!(out, "{},{}", sample.name, sample.value);
    }
    out
}

/// Whether an export is due under the given schedule.
///
/// No schedule means export on every collection. `@every <d>` exports once
/// `d` has elapsed since the last export. Cron expressions and macros are
/// validated upstream and treated as due each collection cycle; evaluating
/// cron fields against wall-clock time is an external scheduler concern.
#[must_use]
pub fn export_due(
    schedule: Option<&str>,
    last_export: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    let Some(schedule) = schedule else {
        return true;
    };
    match parse_schedule(schedule) {
        Ok(Schedule::Every(cadence)) => match last_export {
            Some(last) => {
                let elapsed = (now - last).to_std().unwrap_or_default();
                elapsed >= cadence
            }
            None => true,
        },
        Ok(Schedule::Macro(_) | Schedule::Cron(_)) => true,
        // Invalid schedules are caught by spec validation before this point
        Err(_) => false,
    }
}

/// Receives rendered export payloads.
#[async_trait::async_trait]
pub trait ExportSink {
    /// Deliver one rendered payload for the named monitor.
    async fn deliver(
        &self,
        monitor: &str,
        format: ExportFormat,
        payload: &str,
    ) -> Result<(), ControllerError>;
}

/// Sink that logs payload sizes. Stands in until a storage sink is wired up.
#[derive(Debug, Clone, Default)]
pub struct LogSink;

#[async_trait::async_trait]
impl ExportSink for LogSink {
    async fn deliver(
        &self,
        monitor: &str,
        format: ExportFormat,
        payload: &str,
    ) -> Result<(), ControllerError> {
        info!(
            "Export for {}: {:?} payload, {} bytes",
            monitor,
            format,
            payload.len()
        );
        Ok(())
    }
}
