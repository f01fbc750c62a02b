//! Stuck-job monitor

use super::PackagingService;
use std::time::Duration;
use tokio::task::JoinHandle;

impl PackagingService {
    /// Periodically log jobs that have been packaging longer than `stuck_job_warning`
    ///
    /// The task ends once the service stops accepting requests.
    pub fn start_stuck_job_monitor(&self, every: Duration) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // first tick completes immediately
            interval.tick().await;

            while service.is_accepting() {
                interval.tick().await;
                let stuck = service.stuck_jobs();
                for job in &stuck {
                    tracing::warn!(
                        job_id = %job.id,
                        packaging_secs = job.packaging_secs,
                        estimated_bytes = job.estimated_bytes,
                        "packaging job is taking longer than expected"
                    );
                }
                if stuck.is_empty() {
                    tracing::trace!(stats = ?service.queue_stats(), "stuck-job check");
                }
            }
        })
    }

    /// Running jobs past the stuck-job threshold
    pub fn stuck_jobs(&self) -> Vec<crate::types::JobDiagnostics> {
        let threshold = self.config.packaging.stuck_job_warning.as_secs();
        self.controller
            .diagnostics()
            .into_iter()
            .filter(|d| d.running && d.packaging_secs >= threshold)
            .collect()
    }
}
