//! Periodic collection scheduler.
//!
//! Re-lists ClusterMonitor resources on a fixed tick and reconciles those
//! whose collection interval (or error backoff window) has elapsed. The
//! interval grammar lives in the CRD spec; pacing decisions live in
//! `status::collection_due` and the reconciler's backoff state.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use chrono::Utc;
use crds::ClusterMonitor;
use kube::Api;
use kube::api::ListParams;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Drives interval-based collection runs.
pub struct Scheduler {
    reconciler: Arc<Reconciler>,
    monitor_api: Api<ClusterMonitor>,
    tick: Duration,
}

impl Scheduler {
    /// Creates a scheduler that re-lists monitors every `tick`.
    pub fn new(reconciler: Arc<Reconciler>, monitor_api: Api<ClusterMonitor>, tick: Duration) -> Self {
        Self {
            reconciler,
            monitor_api,
            tick,
        }
    }

    /// Runs the tick loop until the task is cancelled.
    pub async fn run(&self) -> Result<(), ControllerError> {
        info!("Starting collection scheduler (tick {}s)", self.tick.as_secs());
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = self.tick_once().await {
                warn!("Scheduler tick failed: {}", e);
            }
        }
    }

    /// List all monitors and reconcile the ones that are due.
    async fn tick_once(&self) -> Result<(), ControllerError> {
        let monitors = self.monitor_api.list(&ListParams::default()).await?;
        let now = Utc::now();

        for monitor in monitors.items {
            let name = monitor.metadata.name.as_deref().unwrap_or("<unknown>");
            match self.reconciler.reconcile_if_due(&monitor, now).await {
                Ok(true) => debug!("Scheduled reconcile ran for {}", name),
                Ok(false) => {}
                Err(e) => warn!("Scheduled reconcile failed for {}: {}", name, e),
            }
        }
        Ok(())
    }
}
