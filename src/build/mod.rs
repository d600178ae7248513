// ABOUTME: Image builds as ephemeral Kaniko jobs.
// ABOUTME: Exports the ImageBuilder capability, the job backend seam, and the driver.

mod backend;
mod driver;
mod job;
mod kube;
mod orphans;
mod spec;

pub use backend::{BackendError, JobBackend, JobSnapshot, JobSummary};
pub use driver::BuildDriver;
pub use job::{BuildJob, Finished, Submitted};
pub use kube::KubeJobBackend;
pub use orphans::{cleanup_orphans, detect_orphans};
pub use spec::{BuildSpec, COMMIT_ANNOTATION, MANAGED_BY_LABEL, MANAGER, RELEASE_LABEL};

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use crate::error::ErrorKind;
use crate::types::{CommitRef, ImageReference, ResourceName};

/// Produces and pushes the image for a commit.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Build and push `commit`; `attempt` is 1-based within the current tick.
    async fn build(&self, commit: &CommitRef, attempt: u32) -> Result<ImageReference, BuildError>;
}

/// Lifecycle of a build job as observed from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl BuildStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BuildStatus::Succeeded | BuildStatus::Failed)
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildStatus::Pending => "pending",
            BuildStatus::Running => "running",
            BuildStatus::Succeeded => "succeeded",
            BuildStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Bookkeeping for one try at building one commit.
#[derive(Debug, Clone)]
pub struct BuildAttempt {
    pub commit: CommitRef,
    pub job_name: ResourceName,
    pub status: BuildStatus,
    pub attempt_number: u32,
}

impl BuildAttempt {
    pub fn new(commit: &CommitRef, attempt_number: u32) -> Self {
        Self {
            commit: commit.clone(),
            job_name: ResourceName::build_job(commit.sha()),
            status: BuildStatus::Pending,
            attempt_number,
        }
    }
}

/// Errors that can occur while building an image.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The job reached its failure terminal state.
    #[error("build job {job} failed: {reason}")]
    Failed { job: String, reason: String },

    /// The job did not reach any terminal state in time.
    #[error("build job {job} did not finish within {}s", .timeout.as_secs())]
    Timeout { job: String, timeout: Duration },

    /// The job could not be created (quota, RBAC, API outage).
    #[error("failed to submit build job {job}: {reason}")]
    Submission { job: String, reason: String },
}

impl BuildError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BuildError::Failed { .. } => ErrorKind::PhaseFailure,
            BuildError::Timeout { .. } | BuildError::Submission { .. } => ErrorKind::Transient,
        }
    }
}
