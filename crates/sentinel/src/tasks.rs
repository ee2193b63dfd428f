//! Background tasks owned by the service: maintenance and notification dispatch

use sentinel_lib::notify::DispatchWorker;
use sentinel_lib::MaintenanceLoop;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

/// Maintenance loop and dispatch worker with separate stop signals
///
/// The final maintenance pass can raise alerts, so the worker is only
/// told to stop once maintenance has finished.
pub struct BackgroundTasks {
    maintenance_shutdown: broadcast::Sender<()>,
    worker_shutdown: broadcast::Sender<()>,
    maintenance: JoinHandle<()>,
    worker: JoinHandle<()>,
}

impl BackgroundTasks {
    pub fn spawn(maintenance: MaintenanceLoop, worker: DispatchWorker) -> Self {
        let (maintenance_shutdown, maintenance_rx) = broadcast::channel::<()>(1);
        let (worker_shutdown, worker_rx) = broadcast::channel::<()>(1);

        Self {
            maintenance: tokio::spawn(maintenance.run(maintenance_rx)),
            worker: tokio::spawn(worker.run(worker_rx)),
            maintenance_shutdown,
            worker_shutdown,
        }
    }

    /// Stop maintenance, then drain and stop the dispatch worker
    pub async fn shutdown(self) {
        let _ = self.maintenance_shutdown.send(());
        if let Err(e) = self.maintenance.await {
            warn!(error = %e, "Maintenance task failed");
        }

        let _ = self.worker_shutdown.send(());
        if let Err(e) = self.worker.await {
            warn!(error = %e, "Dispatch worker task failed");
        }
    }
}
