//! Shutdown coordination.

use crate::error::Result;
use crate::types::Event;

use super::PackagingService;

impl PackagingService {
    /// Gracefully shut down the service
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new requests
    /// 2. Drains the wait queue, marking every drained job CANCELED
    /// 3. Signals cancellation to running jobs (each finishes its current bundle)
    /// 4. Waits for running jobs with the configured shutdown timeout
    ///
    /// Snapshots stay in the status cache, so clients polling through another process
    /// still see the final states.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        // 1. Stop accepting new requests
        self.accepting_new
            .store(false, std::sync::atomic::Ordering::SeqCst);
        tracing::info!("Stopped accepting new packaging requests");

        // 2. Drain the wait queue
        let drained = self.controller.close();
        let drained_count = drained.len();
        for job in drained {
            let id = job.id().clone();
            drop(job);
            self.active_jobs.lock().await.remove(&id);
            self.shutdown_cancel(&id).await;
        }
        tracing::info!(drained = drained_count, "Canceled waiting jobs");

        // 3. Signal running jobs
        self.cancel_all_active().await;

        // 4. Wait for running jobs with timeout
        let shutdown_timeout = self.config.packaging.shutdown_timeout;
        match tokio::time::timeout(shutdown_timeout, self.controller.wait_idle()).await {
            Ok(()) => {
                tracing::info!("All running jobs stopped gracefully");
            }
            Err(_) => {
                tracing::warn!(
                    running = self.controller.running_count(),
                    "Timeout waiting for packaging jobs to stop, proceeding with shutdown"
                );
            }
        }

        self.emit_event(Event::Shutdown);
        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// Whether new requests are still accepted
    pub fn is_accepting(&self) -> bool {
        self.accepting_new.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub(crate) async fn cancel_all_active(&self) {
        let active = self.active_jobs.lock().await;
        tracing::debug!(active_count = active.len(), "Signaling cancellation to running jobs");

        for (id, token) in active.iter() {
            tracing::debug!(job_id = %id, "Signaling cancellation");
            token.cancel();
        }
    }
}
