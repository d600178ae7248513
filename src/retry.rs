// ABOUTME: Retry coordinator: bounded attempts per phase per commit.
// ABOUTME: Wraps the final failure with phase, commit, and attempt context (SNAFU pattern).

use snafu::{IntoError, Snafu};
use std::fmt;
use std::future::Future;

use crate::build::BuildError;
use crate::config::MIN_ATTEMPTS;
use crate::error::ErrorKind;
use crate::release::DeployError;
use crate::types::CommitRef;

/// The two retried phases of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Build,
    Deploy,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Build => write!(f, "build"),
            Phase::Deploy => write!(f, "deploy"),
        }
    }
}

/// Final failure of a phase for one commit.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PhaseError {
    #[snafu(display("build of {sha} failed on attempt {attempt}: {source}"))]
    Build {
        sha: String,
        attempt: u32,
        source: BuildError,
    },

    #[snafu(display("deploy of {sha} failed on attempt {attempt}: {source}"))]
    Deploy {
        sha: String,
        attempt: u32,
        source: DeployError,
    },
}

impl PhaseError {
    pub fn phase(&self) -> Phase {
        match self {
            PhaseError::Build { .. } => Phase::Build,
            PhaseError::Deploy { .. } => Phase::Deploy,
        }
    }

    pub fn sha(&self) -> &str {
        match self {
            PhaseError::Build { sha, .. } | PhaseError::Deploy { sha, .. } => sha,
        }
    }

    pub fn attempt(&self) -> u32 {
        match self {
            PhaseError::Build { attempt, .. } | PhaseError::Deploy { attempt, .. } => *attempt,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PhaseError::Build { source, .. } => source.kind(),
            PhaseError::Deploy { source, .. } => source.kind(),
        }
    }
}

/// Errors a retried phase can produce.
pub trait PhaseAttemptError: std::error::Error + Send + Sync + 'static {
    const PHASE: Phase;

    fn kind(&self) -> ErrorKind;

    fn into_phase_error(self, commit: &CommitRef, attempt: u32) -> PhaseError;
}

impl PhaseAttemptError for BuildError {
    const PHASE: Phase = Phase::Build;

    fn kind(&self) -> ErrorKind {
        BuildError::kind(self)
    }

    fn into_phase_error(self, commit: &CommitRef, attempt: u32) -> PhaseError {
        BuildSnafu {
            sha: commit.sha().to_string(),
            attempt,
        }
        .into_error(self)
    }
}

impl PhaseAttemptError for DeployError {
    const PHASE: Phase = Phase::Deploy;

    fn kind(&self) -> ErrorKind {
        DeployError::kind(self)
    }

    fn into_phase_error(self, commit: &CommitRef, attempt: u32) -> PhaseError {
        DeploySnafu {
            sha: commit.sha().to_string(),
            attempt,
        }
        .into_error(self)
    }
}

/// How many times a phase may run for one commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(MIN_ATTEMPTS),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Run `attempt_fn` until it succeeds or the policy is exhausted.
///
/// Attempts are numbered from 1 and run back to back. Errors that are not
/// retryable (configuration problems) end the loop at once.
///
/// # Errors
///
/// Returns the last attempt's error wrapped in a [`PhaseError`].
pub async fn with_retry<T, E, F, Fut>(
    commit: &CommitRef,
    policy: RetryPolicy,
    mut attempt_fn: F,
) -> Result<T, PhaseError>
where
    E: PhaseAttemptError,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max = policy.max_attempts();
    let mut attempt = 1;

    loop {
        tracing::info!(phase = %E::PHASE, attempt, max, "Starting {} attempt", E::PHASE);

        match attempt_fn(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if !e.kind().is_retryable() => {
                tracing::error!(phase = %E::PHASE, attempt, "Not retrying: {}", e);
                return Err(e.into_phase_error(commit, attempt));
            }
            Err(e) if attempt >= max => {
                tracing::error!(
                    phase = %E::PHASE,
                    attempt,
                    "Giving up on {} after {} attempts: {}",
                    commit.sha().short(),
                    attempt,
                    e
                );
                return Err(e.into_phase_error(commit, attempt));
            }
            Err(e) => {
                tracing::warn!(phase = %E::PHASE, attempt, max, "Attempt failed: {}", e);
                attempt += 1;
            }
        }
    }
}
