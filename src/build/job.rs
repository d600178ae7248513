// ABOUTME: Build job lifecycle using the type state pattern.
// ABOUTME: Submitted -> Finished -> deleted; each step consumes the previous state.

use std::time::Duration;
use tokio::time::Instant;

use super::backend::{BackendError, JobBackend};
use super::spec::BuildSpec;
use super::{BuildAttempt, BuildError, BuildStatus};
use crate::types::{ImageReference, ResourceName};

/// Lines of build output kept when a job fails.
const LOG_TAIL_LINES: i64 = 200;
/// Upper bound on waiting for a deleted job to disappear before recreating it.
const DELETION_WAIT: Duration = Duration::from_secs(60);

/// Result type for transitions that hand the job back on failure.
pub type TransitionResult<T, S> = Result<BuildJob<T>, (BuildJob<S>, BuildError)>;

/// Job exists on the backend and has not been seen in a terminal state.
/// Available actions: `wait()`, `abandon()`
#[derive(Debug, Clone, Copy, Default)]
pub struct Submitted;

/// Job reached a terminal state.
/// Available actions: `cleanup()`
#[derive(Debug, Clone)]
pub struct Finished {
    message: Option<String>,
}

/// A build job, parameterized by how far its lifecycle has progressed.
#[derive(Debug)]
pub struct BuildJob<S> {
    attempt: BuildAttempt,
    image: ImageReference,
    state: S,
}

impl<S> BuildJob<S> {
    pub fn attempt(&self) -> &BuildAttempt {
        &self.attempt
    }

    pub fn name(&self) -> &ResourceName {
        &self.attempt.job_name
    }

    pub fn image(&self) -> &ImageReference {
        &self.image
    }

    fn transition<T>(self, state: T) -> BuildJob<T> {
        BuildJob {
            attempt: self.attempt,
            image: self.image,
            state,
        }
    }

    /// Fetch the tail of the job's output and emit it, before the job is gone.
    async fn capture_logs<B: JobBackend>(&self, backend: &B) -> Option<String> {
        match backend.job_logs(self.name(), LOG_TAIL_LINES).await {
            Ok(logs) if !logs.trim().is_empty() => {
                tracing::error!(job = %self.name(), "Build output:\n{}", logs.trim_end());
                Some(logs)
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(job = %self.name(), "Could not read build logs: {}", e);
                None
            }
        }
    }

    async fn delete<B: JobBackend>(&self, backend: &B) {
        match backend.delete_job(self.name()).await {
            Ok(()) => tracing::info!(job = %self.name(), "Build job deleted"),
            Err(e) => tracing::warn!(job = %self.name(), "Failed to delete build job: {}", e),
        }
    }
}

// =============================================================================
// create -> Submitted
// =============================================================================

impl BuildJob<Submitted> {
    /// Create the job, or adopt one left behind by an earlier process.
    ///
    /// An existing job that is pending, running, or succeeded is adopted as
    /// is. A failed leftover, or one still being deleted by an earlier
    /// attempt, is removed and recreated.
    ///
    /// # Errors
    ///
    /// Returns `BuildError::Submission` if the job cannot be created.
    pub async fn submit<B: JobBackend>(
        backend: &B,
        spec: &BuildSpec,
        mut attempt: BuildAttempt,
    ) -> Result<Self, BuildError> {
        let name = attempt.job_name.clone();
        let submission = |reason: String| BuildError::Submission {
            job: name.to_string(),
            reason,
        };

        match backend.create_job(spec).await {
            Ok(()) => {
                tracing::info!(job = %name, commit = %spec.commit.sha().short(), "Build job created");
            }
            Err(BackendError::AlreadyExists(_)) => {
                let existing = backend
                    .job_status(&name)
                    .await
                    .map_err(|e| submission(e.to_string()))?;

                match existing {
                    Some(snapshot)
                        if snapshot.status != BuildStatus::Failed && !snapshot.terminating =>
                    {
                        tracing::info!(job = %name, status = %snapshot.status, "Adopting existing build job");
                        attempt.status = snapshot.status;
                    }
                    _ => {
                        tracing::info!(job = %name, "Replacing stale build job");
                        backend
                            .delete_job(&name)
                            .await
                            .map_err(|e| submission(e.to_string()))?;
                        wait_until_deleted(backend, &name).await.map_err(submission)?;
                        backend
                            .create_job(spec)
                            .await
                            .map_err(|e| submission(e.to_string()))?;
                        tracing::info!(job = %name, "Build job recreated");
                    }
                }
            }
            Err(e) => return Err(submission(e.to_string())),
        }

        Ok(BuildJob {
            attempt,
            image: spec.image.clone(),
            state: Submitted,
        })
    }

    /// Poll until the job reaches a terminal state.
    ///
    /// Status read errors are logged and polling continues; only the overall
    /// `timeout` ends the wait early.
    ///
    /// # Errors
    ///
    /// Returns `(self, BuildError::Timeout)` so the caller can abandon the job,
    /// or `BuildError::Failed` if the job disappears.
    #[must_use = "build job state must be used"]
    pub async fn wait<B: JobBackend>(
        mut self,
        backend: &B,
        timeout: Duration,
        poll_interval: Duration,
    ) -> TransitionResult<Finished, Submitted> {
        let deadline = Instant::now() + timeout;

        loop {
            match backend.job_status(self.name()).await {
                Ok(Some(snapshot)) if snapshot.terminating && !snapshot.status.is_terminal() => {
                    let err = BuildError::Failed {
                        job: self.name().to_string(),
                        reason: "job was deleted before finishing".to_string(),
                    };
                    self.attempt.status = BuildStatus::Failed;
                    return Err((self, err));
                }
                Ok(Some(snapshot)) => {
                    if snapshot.status != self.attempt.status {
                        tracing::debug!(job = %self.name(), status = %snapshot.status, "Build job status changed");
                        self.attempt.status = snapshot.status;
                    }
                    if snapshot.status.is_terminal() {
                        return Ok(self.transition(Finished {
                            message: snapshot.message,
                        }));
                    }
                }
                Ok(None) => {
                    let err = BuildError::Failed {
                        job: self.name().to_string(),
                        reason: "job disappeared before finishing".to_string(),
                    };
                    self.attempt.status = BuildStatus::Failed;
                    return Err((self, err));
                }
                Err(e) => {
                    tracing::warn!(job = %self.name(), "Failed to read build job status: {}", e);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                let err = BuildError::Timeout {
                    job: self.name().to_string(),
                    timeout,
                };
                return Err((self, err));
            }
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }
    }

    /// Give up on a job that never finished: keep its logs, then delete it.
    pub async fn abandon<B: JobBackend>(self, backend: &B) -> BuildAttempt {
        tracing::warn!(job = %self.name(), "Abandoning unfinished build job");
        self.capture_logs(backend).await;
        self.delete(backend).await;
        self.attempt
    }
}

// =============================================================================
// Finished -> deleted
// =============================================================================

impl BuildJob<Finished> {
    pub fn status(&self) -> BuildStatus {
        self.attempt.status
    }

    /// Delete the finished job and report the build result.
    ///
    /// Failed jobs have their output captured first.
    ///
    /// # Errors
    ///
    /// Returns `BuildError::Failed` when the job did not succeed.
    pub async fn cleanup<B: JobBackend>(self, backend: &B) -> Result<ImageReference, BuildError> {
        let logs = if self.status() == BuildStatus::Failed {
            self.capture_logs(backend).await
        } else {
            None
        };

        self.delete(backend).await;

        match self.status() {
            BuildStatus::Succeeded => {
                tracing::info!(job = %self.name(), image = %self.image, "Build succeeded");
                Ok(self.image)
            }
            _ => {
                let reason = self
                    .state
                    .message
                    .clone()
                    .or_else(|| last_line(logs.as_deref()))
                    .unwrap_or_else(|| "job reported failure".to_string());
                Err(BuildError::Failed {
                    job: self.name().to_string(),
                    reason,
                })
            }
        }
    }
}

/// Poll until a deleted job is gone from the backend.
async fn wait_until_deleted<B: JobBackend>(backend: &B, name: &ResourceName) -> Result<(), String> {
    let deadline = Instant::now() + DELETION_WAIT;
    loop {
        match backend.job_status(name).await {
            Ok(None) => return Ok(()),
            Ok(Some(_)) | Err(_) if Instant::now() >= deadline => {
                return Err(format!("job {} still present after deletion", name));
            }
            _ => tokio::time::sleep(Duration::from_secs(1)).await,
        }
    }
}

fn last_line(logs: Option<&str>) -> Option<String> {
    logs?
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}
