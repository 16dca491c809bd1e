//! Scheduled Jobs
//!
//! Periodic maintenance: idle rate-limiter keys are pruned and export jobs
//! abandoned in `processing` are failed so partners see a final state.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use crate::rate_limit::RateLimiter;
use crate::store::{ExportJobRepository, StoreError};

/// Reason recorded on jobs reaped by the stale-export sweep
pub const STALE_EXPORT_REASON: &str = "export worker timed out";

// =========================================================================
// Rate limiter pruning
// =========================================================================

/// Drop rate-limit keys with no requests left inside their window
pub fn prune_rate_limiter(limiter: &RateLimiter) -> usize {
    let removed = limiter.prune();
    if removed > 0 {
        tracing::debug!(removed, remaining = limiter.tracked_keys(), "Pruned idle rate limit keys");
    }
    removed
}

// =========================================================================
// Stale export reaping
// =========================================================================

/// Fail export jobs that have been `processing` for longer than `stale_after`
pub async fn fail_stale_exports(
    jobs: &dyn ExportJobRepository,
    stale_after: chrono::Duration,
) -> Result<u64, JobError> {
    let cutoff = Utc::now() - stale_after;
    let reaped = jobs.fail_stale(cutoff, STALE_EXPORT_REASON).await?;

    if reaped > 0 {
        tracing::warn!(reaped, cutoff = %cutoff, "Failed stale export jobs");
    }

    Ok(reaped)
}

// =========================================================================
// Job Scheduler
// =========================================================================

/// Configuration for job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Interval for rate limiter pruning (default: 1 minute)
    pub rate_limit_prune_interval: Duration,
    /// Interval for the stale export sweep (default: 1 minute)
    pub stale_export_interval: Duration,
    /// How long a job may stay in `processing` (default: 15 minutes)
    pub stale_export_after: chrono::Duration,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            rate_limit_prune_interval: Duration::from_secs(60),
            stale_export_interval: Duration::from_secs(60),
            stale_export_after: chrono::Duration::seconds(900),
        }
    }
}

/// Job Scheduler - runs periodic maintenance tasks
pub struct JobScheduler {
    limiter: Arc<RateLimiter>,
    export_jobs: Arc<dyn ExportJobRepository>,
    config: JobSchedulerConfig,
}

impl JobScheduler {
    pub fn new(limiter: Arc<RateLimiter>, export_jobs: Arc<dyn ExportJobRepository>) -> Self {
        Self::with_config(limiter, export_jobs, JobSchedulerConfig::default())
    }

    pub fn with_config(
        limiter: Arc<RateLimiter>,
        export_jobs: Arc<dyn ExportJobRepository>,
        config: JobSchedulerConfig,
    ) -> Self {
        Self {
            limiter,
            export_jobs,
            config,
        }
    }

    /// Start the job scheduler in the background
    /// Returns a handle that can be used to abort the scheduler
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        tracing::info!("Job scheduler started");

        let mut prune_interval = interval(self.config.rate_limit_prune_interval);
        let mut stale_interval = interval(self.config.stale_export_interval);

        loop {
            tokio::select! {
                _ = prune_interval.tick() => {
                    prune_rate_limiter(&self.limiter);
                }
                _ = stale_interval.tick() => {
                    if let Err(e) = fail_stale_exports(self.export_jobs.as_ref(), self.config.stale_export_after).await {
                        tracing::error!(error = %e, "Stale export sweep failed");
                    }
                }
            }
        }
    }

    /// Run all maintenance jobs once (for manual trigger or testing)
    pub async fn run_all_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport {
            rate_limit_keys_pruned: prune_rate_limiter(&self.limiter),
            ..Default::default()
        };

        match fail_stale_exports(self.export_jobs.as_ref(), self.config.stale_export_after).await {
            Ok(count) => report.stale_exports_failed = count,
            Err(e) => report.errors.push(format!("Stale export sweep: {}", e)),
        }

        report.completed_at = Utc::now();
        report
    }
}

/// Report from running maintenance jobs
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub rate_limit_keys_pruned: usize,
    pub stale_exports_failed: u64,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::domain::{ExportFormat, ExportState, NewExportJob, TransactionFilter};
    use crate::rate_limit::RateLimitLane;
    use crate::store::MemoryStore;

    #[test]
    fn test_job_scheduler_config_default() {
        let config = JobSchedulerConfig::default();
        assert_eq!(config.rate_limit_prune_interval, Duration::from_secs(60));
        assert_eq!(config.stale_export_interval, Duration::from_secs(60));
        assert_eq!(config.stale_export_after, chrono::Duration::minutes(15));
    }

    #[test]
    fn test_maintenance_report_default() {
        let report = MaintenanceReport::default();
        assert_eq!(report.stale_exports_failed, 0);
        assert_eq!(report.errors.len(), 0);
    }

    #[tokio::test]
    async fn test_run_all_once_reaps_stale_exports() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let job = store
            .create(NewExportJob {
                partner_id: uuid::Uuid::new_v4(),
                format: ExportFormat::Csv,
                filter: TransactionFilter::new(now - chrono::Duration::days(1), now),
            })
            .await
            .unwrap();
        store.claim_next().await.unwrap();
        store.backdate_export_job(job.id, now - chrono::Duration::hours(1), Some(now - chrono::Duration::minutes(20)));

        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::default()));
        limiter.check(RateLimitLane::Global, "partner-a");

        let scheduler = JobScheduler::new(limiter.clone(), store.clone());
        let report = scheduler.run_all_once().await;

        assert_eq!(report.stale_exports_failed, 1);
        assert!(report.errors.is_empty());
        // Still inside its window
        assert_eq!(limiter.tracked_keys(), 1);

        let reaped = store.export_job(job.id).unwrap();
        assert_eq!(reaped.state, ExportState::Failed);
        assert_eq!(reaped.error_message.as_deref(), Some(STALE_EXPORT_REASON));
    }
}
