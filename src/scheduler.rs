use crate::service::HreflangService;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};
use uuid::Uuid;

/// Owns the recurring sweep job.
///
/// The job is registered at most once no matter how often
/// [`SweepScheduler::ensure_scheduled`] is called, and removed again by
/// [`SweepScheduler::deregister`].
pub struct SweepScheduler {
    scheduler: JobScheduler,
    job_id: Mutex<Option<Uuid>>,
}

impl SweepScheduler {
    /// Create and start an (empty) scheduler.
    pub async fn start() -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .context("Failed to create job scheduler")?;
        scheduler
            .start()
            .await
            .context("Failed to start job scheduler")?;

        Ok(Self {
            scheduler,
            job_id: Mutex::new(None),
        })
    }

    /// Register the sweep job unless it is already registered.
    ///
    /// Returns `true` if this call registered it.
    pub async fn ensure_scheduled(
        &self,
        cron_expr: &str,
        service: Arc<HreflangService>,
    ) -> Result<bool> {
        let mut job_id = self.job_id.lock().await;
        if job_id.is_some() {
            return Ok(false);
        }

        let job = Job::new_async(cron_expr, move |_uuid, _l| {
            let service = Arc::clone(&service);

            Box::pin(async move {
                info!("⏰ Scheduled hreflang sweep triggered");
                if let Some(report) = service.sweep().await {
                    if !report.sites_failed.is_empty() {
                        warn!("Sweep could not refresh sites {:?}", report.sites_failed);
                    }
                }
            })
        })
        .with_context(|| format!("Invalid sweep schedule: {}", cron_expr))?;

        let id = self.scheduler.add(job).await?;
        *job_id = Some(id);
        info!("Scheduled hreflang sweep (cron: {})", cron_expr);

        Ok(true)
    }

    pub async fn is_scheduled(&self) -> bool {
        self.job_id.lock().await.is_some()
    }

    /// Remove the sweep job. Safe to call when nothing is registered.
    pub async fn deregister(&self) -> Result<()> {
        if let Some(id) = self.job_id.lock().await.take() {
            self.scheduler.remove(&id).await?;
            info!("Removed hreflang sweep job");
        }
        Ok(())
    }

    /// Deregister the job and stop the scheduler.
    pub async fn shutdown(mut self) -> Result<()> {
        self.deregister().await?;
        self.scheduler.shutdown().await?;
        info!("✓ Scheduler stopped");
        Ok(())
    }
}
