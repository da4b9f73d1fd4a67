//! ClusterMonitor Controller
//!
//! Reconciles `ClusterMonitor` CRDs: validates the declared monitoring spec,
//! collects cluster object metrics on the configured interval, evaluates
//! alert thresholds into a health summary, renders due exports, and reports
//! everything back through the status subresource.

mod backoff;
mod collector;
mod controller;
mod error;
mod export;
mod reconciler;
mod scheduler;
mod status;
mod watcher;

use crate::error::ControllerError;
use controller::Controller;
use std::env;
use std::time::Duration;
use tracing::info;

const DEFAULT_TICK_SECONDS: u64 = 10;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt::init();

    info!("Starting ClusterMonitor Controller");

    // Load configuration from environment variables
    let namespace = env::var("WATCH_NAMESPACE").ok();
    let tick_seconds = match env::var("TICK_SECONDS") {
        Ok(value) => value.parse::<u64>().map_err(|_| {
            ControllerError::InvalidConfig(format!(
                "TICK_SECONDS must be a positive integer, got {value:?}"
            ))
        })?,
        Err(_) => DEFAULT_TICK_SECONDS,
    };
    if tick_seconds == 0 {
        return Err(ControllerError::InvalidConfig(
            "TICK_SECONDS must be greater than zero".to_string(),
        ));
    }

    info!("Configuration:");
    info!("  Namespace: {}", namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Scheduler tick: {}s", tick_seconds);

    // Initialize and run controller
    let controller = Controller::new(namespace, Duration::from_secs(tick_seconds)).await?;
    controller.run().await?;

    Ok(())
}
