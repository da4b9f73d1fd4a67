//! Main controller implementation.
//!
//! This module contains the `Controller` struct that orchestrates
//! reconciliation, resource watching, and the collection scheduler for the
//! ClusterMonitor controller.

use crate::collector::KubeMetricsSource;
use crate::error::ControllerError;
use crate::export::LogSink;
use crate::reconciler::Reconciler;
use crate::scheduler::Scheduler;
use crate::watcher::Watcher;
use crds::ClusterMonitor;
use kube::{Api, Client};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// Main controller for ClusterMonitor management.
pub struct Controller {
    monitor_watcher: JoinHandle<Result<(), ControllerError>>,
    collection_scheduler: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(namespace: Option<String>, tick: Duration) -> Result<Self, ControllerError> {
        info!("Initializing ClusterMonitor Controller");

        // Create Kubernetes client
        let kube_client = Client::try_default().await?;

        // Create API client scoped to the watch namespace, or all namespaces
        let monitor_api: Api<ClusterMonitor> = match namespace.as_deref() {
            Some(ns) => Api::namespaced(kube_client.clone(), ns),
            None => Api::all(kube_client.clone()),
        };

        // Create reconciler - metric collection and export delivery sit
        // behind traits so collaborators can be swapped out
        let reconciler = Arc::new(Reconciler::new(
            monitor_api.clone(),
            Box::new(KubeMetricsSource::new(kube_client)),
            Box::new(LogSink),
        ));

        let watcher_instance = Watcher::new(Arc::clone(&reconciler), monitor_api.clone());
        let scheduler_instance = Scheduler::new(reconciler, monitor_api, tick);

        // Start watcher and scheduler in background tasks
        let monitor_watcher = tokio::spawn(async move { watcher_instance.watch_monitors().await });
        let collection_scheduler = tokio::spawn(async move { scheduler_instance.run().await });

        Ok(Self {
            monitor_watcher,
            collection_scheduler,
        })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("ClusterMonitor Controller running");

        // Wait for either task to exit (they should run forever)
        tokio::select! {
            result = &mut self.monitor_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("ClusterMonitor watcher panicked: {e}")))?
                    .map_err(|e| ControllerError::Watch(format!("ClusterMonitor watcher error: {e}")))?;
            }
            result = &mut self.collection_scheduler => {
                result.map_err(|e| ControllerError::Scheduler(format!("Scheduler panicked: {e}")))?
                    .map_err(|e| ControllerError::Scheduler(format!("Scheduler error: {e}")))?;
            }
        }

        Ok(())
    }
}
