//! Background export worker
//!
//! Polls for pending jobs, claims one at a time and runs it on its own task
//! so a panic inside an encoder only fails that job.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::interval;
use uuid::Uuid;

use crate::config::ExportConfig;
use crate::domain::{ExportFormat, ExportJob, StreamCursor};
use crate::store::{ExportJobRepository, StoreError, TransactionRepository};

use super::{encoder_for, ExportError, ObjectStorage};

#[derive(Debug, Clone)]
pub struct ExportWorkerConfig {
    pub poll_interval: Duration,
    /// Rows fetched per keyset batch
    pub batch_size: i64,
    /// Scratch directory; the system temp dir when unset
    pub temp_dir: Option<PathBuf>,
}

impl Default for ExportWorkerConfig {
    fn default() -> Self {
        Self::from(&ExportConfig::default())
    }
}

impl From<&ExportConfig> for ExportWorkerConfig {
    fn from(config: &ExportConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            batch_size: config.batch_size.max(1),
            temp_dir: config.temp_dir.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ExportWorker {
    jobs: Arc<dyn ExportJobRepository>,
    transactions: Arc<dyn TransactionRepository>,
    storage: Arc<dyn ObjectStorage>,
    config: ExportWorkerConfig,
}

impl ExportWorker {
    pub fn new(
        jobs: Arc<dyn ExportJobRepository>,
        transactions: Arc<dyn TransactionRepository>,
        storage: Arc<dyn ObjectStorage>,
        config: ExportWorkerConfig,
    ) -> Self {
        Self {
            jobs,
            transactions,
            storage,
            config,
        }
    }

    /// Start polling in the background
    /// Returns a handle that can be used to abort the worker
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        tracing::info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            "Export worker started"
        );

        let mut ticker = interval(self.config.poll_interval);
        loop {
            ticker.tick().await;
            // Drain the queue before sleeping again
            loop {
                match self.run_once().await {
                    Ok(Some(_)) => continue,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!(error = %e, "Export job claim failed");
                        break;
                    }
                }
            }
        }
    }

    /// Claim and process at most one job. Returns the job id when one ran,
    /// whatever its outcome.
    pub async fn run_once(&self) -> Result<Option<Uuid>, StoreError> {
        let Some(job) = self.jobs.claim_next().await? else {
            return Ok(None);
        };
        let job_id = job.id;

        tracing::info!(
            job_id = %job_id,
            partner_id = %job.partner_id,
            format = %job.format,
            "Export job claimed"
        );

        let worker = self.clone();
        let result = tokio::spawn(async move { worker.produce(job).await }).await;

        let failure = match result {
            Ok(Ok((key, rows))) => {
                if self.jobs.mark_completed(job_id, &key, rows).await? {
                    tracing::info!(job_id = %job_id, rows, key = %key, "Export job completed");
                } else {
                    // Reaped while running: the job stays failed and the upload is dropped
                    tracing::warn!(job_id = %job_id, key = %key, "Export job finished after leaving processing");
                    if let Err(e) = self.storage.delete(&key).await {
                        tracing::warn!(job_id = %job_id, error = %e, "Failed to remove orphaned export");
                    }
                }
                None
            }
            Ok(Err(e)) => Some(e.to_string()),
            Err(join) if join.is_panic() => Some("export worker panicked".to_string()),
            Err(join) => Some(ExportError::Join(join.to_string()).to_string()),
        };

        if let Some(reason) = failure {
            tracing::error!(job_id = %job_id, reason = %reason, "Export job failed");
            if !self.jobs.mark_failed(job_id, &reason).await? {
                tracing::warn!(job_id = %job_id, "Export job already left processing");
            }
        }

        Ok(Some(job_id))
    }

    /// Write the file, upload it, and return its key with the row count
    async fn produce(&self, job: ExportJob) -> Result<(String, i64), ExportError> {
        let scratch = match &self.config.temp_dir {
            Some(dir) => {
                tokio::fs::create_dir_all(dir).await?;
                tempfile::Builder::new().prefix("pos-export-").tempdir_in(dir)?
            }
            None => tempfile::Builder::new().prefix("pos-export-").tempdir()?,
        };

        // A zip export is the CSV rendition packed afterwards
        let body_format = match job.format {
            ExportFormat::Zip => ExportFormat::Csv,
            other => other,
        };
        let body_path = scratch
            .path()
            .join(format!("{}.{}", job.id, body_format.extension()));
        let rows = self.write_body(&job, body_format, &body_path).await?;

        let upload_path = if job.format == ExportFormat::Zip {
            let zip_path = scratch.path().join(format!("{}.zip", job.id));
            let entry = format!("{}.csv", job.id);
            let (source, target) = (body_path.clone(), zip_path.clone());
            tokio::task::spawn_blocking(move || pack_zip(&source, &target, &entry))
                .await
                .map_err(|e| ExportError::Join(e.to_string()))??;
            zip_path
        } else {
            body_path
        };

        let key = job.storage_key();
        self.storage
            .put_file(&key, &upload_path, job.format.content_type())
            .await?;

        Ok((key, rows))
    }

    async fn write_body(
        &self,
        job: &ExportJob,
        format: ExportFormat,
        path: &Path,
    ) -> Result<i64, ExportError> {
        let file = tokio::fs::File::create(path).await?;
        let mut out = tokio::io::BufWriter::new(file);
        let mut encoder = encoder_for(format);

        out.write_all(&encoder.begin()?).await?;

        let mut cursor: Option<StreamCursor> = None;
        let mut rows = 0i64;
        loop {
            let batch = self
                .transactions
                .stream_batch(job.partner_id, &job.filter, cursor, self.config.batch_size)
                .await?;
            let Some(last) = batch.last() else {
                break;
            };
            cursor = Some(StreamCursor::after(last));
            rows += batch.len() as i64;
            out.write_all(&encoder.encode_batch(&batch)?).await?;

            if (batch.len() as i64) < self.config.batch_size {
                break;
            }
        }

        out.write_all(&encoder.finish()?).await?;
        out.flush().await?;

        tracing::debug!(job_id = %job.id, rows, "Export body written");
        Ok(rows)
    }
}

fn pack_zip(source: &Path, target: &Path, entry: &str) -> Result<(), ExportError> {
    let mut input = std::fs::File::open(source)?;
    let mut archive = zip::ZipWriter::new(std::fs::File::create(target)?);
    let options =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    archive.start_file(entry, options)?;
    std::io::copy(&mut input, &mut archive)?;
    archive.finish()?.flush()?;
    Ok(())
}
