//! Kubernetes resource watcher.
//!
//! Watches ClusterMonitor resources for changes and triggers reconciliation.
//! Time-based re-collection is handled by the scheduler; the watcher covers
//! spec edits, new resources, and deletions.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use chrono::Utc;
use crds::ClusterMonitor;
use futures::TryStreamExt;
use kube::Api;
use kube_runtime::watcher;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Watches ClusterMonitor resources for changes.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    monitor_api: Api<ClusterMonitor>,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(reconciler: Arc<Reconciler>, monitor_api: Api<ClusterMonitor>) -> Self {
        Self {
            reconciler,
            monitor_api,
        }
    }

    /// Starts watching ClusterMonitor resources.
    pub async fn watch_monitors(&self) -> Result<(), ControllerError> {
        info!("Starting ClusterMonitor watcher");

        let mut stream = Box::pin(watcher(
            self.monitor_api.clone(),
            watcher::Config::default(),
        ));

        while let Some(event) = stream
            .try_next()
            .await
            .map_err(|e| ControllerError::Watch(format!("Watcher stream error: {e}")))?
        {
            match event {
                watcher::Event::Apply(monitor) => {
                    let name = monitor.metadata.name.as_deref().unwrap_or("<unknown>");
                    debug!("ClusterMonitor applied: {}", name);

                    if let Err(e) = self.reconciler.reconcile_if_due(&monitor, Utc::now()).await {
                        error!("Failed to reconcile ClusterMonitor {}: {}", name, e);
                    }
                }
                watcher::Event::Delete(monitor) => {
                    let name = monitor.metadata.name.as_deref().unwrap_or("<unknown>");
                    info!("ClusterMonitor deleted: {}", name);
                }
                watcher::Event::Init => {
                    info!("ClusterMonitor watcher initialized");
                }
                watcher::Event::InitApply(monitor) => {
                    let name = monitor.metadata.name.as_deref().unwrap_or("<unknown>");
                    debug!("ClusterMonitor init apply: {}", name);

                    if let Err(e) = self.reconciler.reconcile_if_due(&monitor, Utc::now()).await {
                        warn!("Failed to reconcile ClusterMonitor {}: {}", name, e);
                    }
                }
                watcher::Event::InitDone => {
                    info!("ClusterMonitor watcher initialization complete");
                }
            }
        }

        Ok(())
    }
}
