// ABOUTME: Job backend capability used by the build driver.
// ABOUTME: Create, observe, read logs of, list, and delete build jobs.

use async_trait::async_trait;

use super::BuildStatus;
use super::spec::BuildSpec;
use crate::types::ResourceName;

/// A batch-job backend scoped to the build namespace.
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Submit a job. Returns `BackendError::AlreadyExists` when a job with the
    /// same name is present.
    async fn create_job(&self, spec: &BuildSpec) -> Result<(), BackendError>;

    /// Current state of a job, or `None` if it does not exist.
    async fn job_status(&self, name: &ResourceName) -> Result<Option<JobSnapshot>, BackendError>;

    /// The last `tail_lines` lines of the job's pod output.
    async fn job_logs(&self, name: &ResourceName, tail_lines: i64) -> Result<String, BackendError>;

    /// Delete a job and its pods. Deleting a missing job is not an error.
    async fn delete_job(&self, name: &ResourceName) -> Result<(), BackendError>;

    /// Jobs this runner created for `release`.
    async fn list_jobs(&self, release: &ResourceName) -> Result<Vec<JobSummary>, BackendError>;
}

/// Observed state of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    pub status: BuildStatus,
    /// Backend-provided reason for a failure (e.g. `DeadlineExceeded`).
    pub message: Option<String>,
    /// Deletion has been requested but the job is still visible.
    pub terminating: bool,
}

impl JobSnapshot {
    pub fn new(status: BuildStatus) -> Self {
        Self {
            status,
            message: None,
            terminating: false,
        }
    }
}

/// Summary of a job found by label.
#[derive(Debug, Clone)]
pub struct JobSummary {
    pub name: String,
    /// The commit the job was building, from its annotation.
    pub commit: Option<String>,
    pub status: BuildStatus,
}

/// Errors from the job backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("job already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("rejected by API server: {0}")]
    Rejected(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}
