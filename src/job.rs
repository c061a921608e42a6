use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One conversion request as seen by the status store.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentJob {
    pub job_id: JobId,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
}

impl DocumentJob {
    pub fn new(job_id: JobId, input_path: &Path, output_path: &Path) -> Self {
        Self {
            job_id,
            input_path: input_path.to_path_buf(),
            output_path: output_path.to_path_buf(),
            status: JobStatus::Pending,
            error_detail: None,
            processing_seconds: None,
            finished_at: None,
        }
    }
}

/// Receives job state transitions from the pipeline. The pipeline only
/// reports; it never reads job state back.
pub trait JobStatusSink: Send + Sync {
    fn mark_pending(&self, _job: &DocumentJob) {}

    fn mark_processing(&self, job_id: &JobId);

    fn mark_completed(&self, job_id: &JobId, elapsed: Duration);

    fn mark_failed(&self, job_id: &JobId, elapsed: Duration, error_message: &str);
}

/// In-process job table, used by the CLI and tests to poll job state.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<JobId, DocumentJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, job_id: &JobId) -> Option<DocumentJob> {
        self.lock().get(job_id).cloned()
    }

    pub fn status(&self, job_id: &JobId) -> Option<JobStatus> {
        self.lock().get(job_id).map(|job| job.status)
    }

    /// Records an input turned away at the upload boundary. It never enters
    /// the pipeline, so it goes straight to `failed` with no processing time.
    pub fn record_rejected(&self, job: &DocumentJob, reason: &str) {
        let mut jobs = self.lock();
        if jobs.contains_key(&job.job_id) {
            warn!("job {} already exists; not recording rejection", job.job_id);
            return;
        }
        let mut record = job.clone();
        record.status = JobStatus::Failed;
        record.error_detail = Some(reason.to_string());
        record.processing_seconds = None;
        record.finished_at = now_rfc3339();
        jobs.insert(record.job_id.clone(), record);
    }

    pub fn jobs(&self) -> Vec<DocumentJob> {
        self.lock().values().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, DocumentJob>> {
        self.jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition<F>(&self, job_id: &JobId, next: JobStatus, apply: F)
    where
        F: FnOnce(&mut DocumentJob),
    {
        let mut jobs = self.lock();
        let job = jobs
            .entry(job_id.clone())
            .or_insert_with(|| DocumentJob::new(job_id.clone(), Path::new(""), Path::new("")));
        if job.status.is_terminal() {
            warn!(
                "job {} is already {}; ignoring transition to {}",
                job_id, job.status, next
            );
            return;
        }
        job.status = next;
        apply(job);
    }
}

impl JobStatusSink for MemoryJobStore {
    fn mark_pending(&self, job: &DocumentJob) {
        let mut jobs = self.lock();
        if let Some(existing) = jobs.get(&job.job_id) {
            if existing.status.is_terminal() || existing.status == JobStatus::Processing {
                warn!("job {} already exists as {}", job.job_id, existing.status);
                return;
            }
        }
        let mut record = job.clone();
        record.status = JobStatus::Pending;
        jobs.insert(record.job_id.clone(), record);
    }

    fn mark_processing(&self, job_id: &JobId) {
        self.transition(job_id, JobStatus::Processing, |_| {});
    }

    fn mark_completed(&self, job_id: &JobId, elapsed: Duration) {
        self.transition(job_id, JobStatus::Completed, |job| {
            job.error_detail = None;
            job.processing_seconds = Some(elapsed.as_secs_f64());
            job.finished_at = now_rfc3339();
        });
    }

    fn mark_failed(&self, job_id: &JobId, elapsed: Duration, error_message: &str) {
        self.transition(job_id, JobStatus::Failed, |job| {
            job.error_detail = Some(error_message.to_string());
            job.processing_seconds = Some(elapsed.as_secs_f64());
            job.finished_at = now_rfc3339();
        });
    }
}

fn now_rfc3339() -> Option<String> {
    OffsetDateTime::now_utc().format(&Rfc3339).ok()
}
