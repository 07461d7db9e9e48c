//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the cluster
//! client, the reconciler and the three change feeds together:
//! - Pods: readiness, label and resourceVersion changes
//! - Services: membership declaration changes
//! - DanmEps: network attachments appearing, changing and disappearing

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::watcher::Watcher;
use cluster_client::{ChangeFeeds, KubeClusterClient};
use kube::Client;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Main controller for DANM Service Endpoints.
pub struct Controller {
    pod_watcher: JoinHandle<Result<(), ControllerError>>,
    service_watcher: JoinHandle<Result<(), ControllerError>>,
    danm_ep_watcher: JoinHandle<Result<(), ControllerError>>,
    startup: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl Controller {
    /// Creates a new controller instance and starts its feeds.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing service watcher");

        let kube_client = Client::try_default().await?;
        let (cluster, feeds) = KubeClusterClient::new(kube_client, config.namespace.as_deref());
        let cluster = Arc::new(cluster);

        let reconciler = Arc::new(Reconciler::new(cluster.clone(), config.retry));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut startup_shutdown = shutdown_rx.clone();
        let watcher = Watcher::new(reconciler.clone(), shutdown_rx);

        let ChangeFeeds { pods, services, danm_eps } = feeds;

        let pod_watcher = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.watch_pods(pods).await })
        };

        let service_watcher = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.watch_services(services).await })
        };

        let danm_ep_watcher = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.watch_danm_eps(danm_eps).await })
        };

        // Services that predate the controller converge once the caches are full
        let startup = tokio::spawn(async move {
            tokio::select! {
                synced = cluster.wait_until_synced() => {
                    if let Err(e) = synced {
                        error!("Caches never synced, skipping startup reconciliation: {}", e);
                        return;
                    }
                }
                _ = startup_shutdown.changed() => {
                    debug!("Shutdown before caches synced, skipping startup reconciliation");
                    return;
                }
            }
            info!("Caches synced, performing startup reconciliation...");
            if let Err(e) = reconciler.startup_reconciliation(&startup_shutdown).await {
                warn!("Startup reconciliation failed (will continue): {}", e);
            }
        });

        Ok(Self {
            pod_watcher,
            service_watcher,
            danm_ep_watcher,
            startup,
            shutdown,
        })
    }

    /// Runs until a termination signal arrives or a feed fails.
    pub async fn run(self) -> Result<(), ControllerError> {
        self.run_until(shutdown_signal()).await
    }

    /// Runs until `signal` resolves or a feed fails, then stops every task.
    ///
    /// A failing `signal` still shuts down cleanly and is reported afterwards.
    async fn run_until<S>(mut self, signal: S) -> Result<(), ControllerError>
    where
        S: Future<Output = Result<(), ControllerError>>,
    {
        info!("Service watcher running");

        let outcome = tokio::select! {
            received = signal => {
                match &received {
                    Ok(()) => info!("Shutdown requested, draining in-flight handlers"),
                    Err(e) => error!("Cannot listen for termination signals, shutting down: {}", e),
                }
                received
            }
            result = &mut self.pod_watcher => flatten("Pod", result),
            result = &mut self.service_watcher => flatten("Service", result),
            result = &mut self.danm_ep_watcher => flatten("DanmEp", result),
        };

        let _ = self.shutdown.send(true);
        if let Err(e) = self.startup.await {
            warn!("Startup reconciliation task failed: {}", e);
        }
        for (name, handle) in [
            ("Pod", self.pod_watcher),
            ("Service", self.service_watcher),
            ("DanmEp", self.danm_ep_watcher),
        ] {
            if handle.is_finished() {
                continue;
            }
            if let Err(e) = flatten(name, handle.await) {
                warn!("{}", e);
            }
        }

        info!("Service watcher stopped");
        outcome
    }
}

fn flatten(
    name: &str,
    result: Result<Result<(), ControllerError>, tokio::task::JoinError>,
) -> Result<(), ControllerError> {
    result
        .map_err(|e| ControllerError::Watch(format!("{} watcher panicked: {}", name, e)))?
        .map_err(|e| ControllerError::Watch(format!("{} watcher error: {}", name, e)))
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() -> Result<(), ControllerError> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = ctrl_c => Ok(result?),
            _ = terminate.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        Ok(ctrl_c.await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Feed task that ends once shutdown is broadcast
    fn spawn_feed(mut shutdown: watch::Receiver<bool>, stopped: Arc<AtomicBool>) -> JoinHandle<Result<(), ControllerError>> {
        tokio::spawn(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
            stopped.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    fn controller_with(startup: JoinHandle<()>) -> (Controller, Vec<Arc<AtomicBool>>) {
        let (shutdown, rx) = watch::channel(false);
        let stopped: Vec<Arc<AtomicBool>> = (0..3).map(|_| Arc::new(AtomicBool::new(false))).collect();
        let controller = Controller {
            pod_watcher: spawn_feed(rx.clone(), Arc::clone(&stopped[0])),
            service_watcher: spawn_feed(rx.clone(), Arc::clone(&stopped[1])),
            danm_ep_watcher: spawn_feed(rx, Arc::clone(&stopped[2])),
            startup,
            shutdown,
        };
        (controller, stopped)
    }

    #[tokio::test]
    async fn test_signal_stops_every_feed() {
        let (controller, stopped) = controller_with(tokio::spawn(async {}));

        let result = controller.run_until(async { Ok(()) }).await;

        assert!(result.is_ok());
        assert!(stopped.iter().all(|flag| flag.load(Ordering::SeqCst)));
    }

    #[tokio::test]
    async fn test_failed_signal_listener_still_drains_feeds() {
        let (controller, stopped) = controller_with(tokio::spawn(async {}));

        let result = controller
            .run_until(async { Err(ControllerError::Io(std::io::Error::other("signal handler unavailable"))) })
            .await;

        assert!(matches!(result, Err(ControllerError::Io(_))));
        assert!(stopped.iter().all(|flag| flag.load(Ordering::SeqCst)));
    }

    #[tokio::test]
    async fn test_startup_reconciliation_runs_to_completion() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let startup = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            flag.store(true, Ordering::SeqCst);
        });
        let (controller, _) = controller_with(startup);

        controller.run_until(async { Ok(()) }).await.unwrap();

        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failed_feed_is_reported() {
        let (shutdown, rx) = watch::channel(false);
        let service_stopped = Arc::new(AtomicBool::new(false));
        let controller = Controller {
            pod_watcher: tokio::spawn(async { Err(ControllerError::Watch("Pod watch stream ended".to_string())) }),
            service_watcher: spawn_feed(rx.clone(), Arc::clone(&service_stopped)),
            danm_ep_watcher: spawn_feed(rx, Arc::new(AtomicBool::new(false))),
            startup: tokio::spawn(async {}),
            shutdown,
        };

        let result = controller.run_until(std::future::pending::<Result<(), ControllerError>>()).await;

        assert!(matches!(result, Err(ControllerError::Watch(_))));
        assert!(service_stopped.load(Ordering::SeqCst));
    }
}
