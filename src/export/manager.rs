//! Export job creation and status

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::ExportConfig;
use crate::domain::{ExportFormat, ExportJob, ExportState, NewExportJob, PartnerIdentity};
use crate::error::{AppError, AppResult};
use crate::query::FilterParams;
use crate::store::ExportJobRepository;

use super::ObjectStorage;

/// Body of `POST /partner/pos-transactions/export`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateExportRequest {
    #[serde(flatten)]
    pub filters: FilterParams,
    /// Defaults to `csv`
    pub format: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportCreated {
    pub job_id: Uuid,
    pub status: ExportState,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportStatusView {
    pub job_id: Uuid,
    pub status: ExportState,
    pub format: ExportFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct ExportJobManager {
    jobs: Arc<dyn ExportJobRepository>,
    storage: Arc<dyn ObjectStorage>,
    config: ExportConfig,
    max_range_days: i64,
    url_ttl_secs: i64,
}

impl ExportJobManager {
    pub fn new(
        jobs: Arc<dyn ExportJobRepository>,
        storage: Arc<dyn ObjectStorage>,
        config: ExportConfig,
        max_range_days: i64,
        url_ttl_secs: i64,
    ) -> Self {
        Self {
            jobs,
            storage,
            config,
            max_range_days,
            url_ttl_secs,
        }
    }

    pub async fn create(
        &self,
        identity: &PartnerIdentity,
        request: CreateExportRequest,
    ) -> AppResult<ExportCreated> {
        self.create_at(identity, request, Utc::now()).await
    }

    /// Validate and queue a job; the partner's daily cap resets at UTC midnight
    pub async fn create_at(
        &self,
        identity: &PartnerIdentity,
        request: CreateExportRequest,
        now: DateTime<Utc>,
    ) -> AppResult<ExportCreated> {
        let filter = request.filters.into_filter(self.max_range_days)?;
        let format = match request.format.as_deref().map(str::trim) {
            None | Some("") => ExportFormat::Csv,
            Some(raw) => raw.parse::<ExportFormat>()?,
        };

        let day_start = start_of_utc_day(now);
        let created_today = self
            .jobs
            .count_created_since(identity.partner_id, day_start)
            .await?;
        if created_today >= self.config.daily_limit {
            let retry_after = (day_start + Duration::days(1) - now).num_seconds().max(1) as u64;
            tracing::warn!(
                partner_id = %identity.partner_id,
                created_today,
                limit = self.config.daily_limit,
                "Daily export limit reached"
            );
            return Err(AppError::ExportLimitExceeded { retry_after });
        }

        let job = self
            .jobs
            .create(NewExportJob {
                partner_id: identity.partner_id,
                format,
                filter,
            })
            .await?;

        tracing::info!(
            job_id = %job.id,
            partner_id = %job.partner_id,
            format = %job.format,
            "Export job queued"
        );

        Ok(ExportCreated {
            job_id: job.id,
            status: job.state,
        })
    }

    /// A job's progress, with a fresh signed link once it has completed
    pub async fn status(&self, identity: &PartnerIdentity, job_id: &str) -> AppResult<ExportStatusView> {
        let job_id = Uuid::parse_str(job_id.trim())
            .map_err(|_| AppError::BadRequest(format!("Invalid job id: {}", job_id)))?;

        let job = self
            .jobs
            .find_for_partner(identity.partner_id, job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Export job {} not found", job_id)))?;

        Ok(self.view(job))
    }

    fn view(&self, job: ExportJob) -> ExportStatusView {
        let signed = match (job.state, job.file_key.as_deref()) {
            (ExportState::Completed, Some(key)) => Some(self.storage.signed_url(key, self.url_ttl_secs)),
            _ => None,
        };

        ExportStatusView {
            job_id: job.id,
            status: job.state,
            format: job.format,
            row_count: job.row_count,
            download_url: signed.as_ref().map(|s| s.url.clone()),
            expires_at: signed.map(|s| s.expires_at),
            error: job.error_message,
            created_at: job.created_at,
            completed_at: job.completed_at,
        }
    }
}

fn start_of_utc_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now)
}
