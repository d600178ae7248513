// ABOUTME: Change detection against the source-control host.
// ABOUTME: Defines the CommitSource capability and its GitHub implementation.

mod github;

pub use github::GitHubClient;

use async_trait::async_trait;

use crate::error::ErrorKind;
use crate::types::CommitRef;

/// Reads the current tip of a branch. Implementations must not cache.
#[async_trait]
pub trait CommitSource: Send + Sync {
    /// Look up the newest commit on `branch`.
    async fn latest_commit(&self, branch: &str) -> Result<CommitRef, SourceError>;
}

/// Errors from change detection.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Network, auth, or rate-limit failure.
    #[error("source unavailable: {0}")]
    Unavailable(String),

    /// The repository or branch does not exist (or is invisible to us).
    #[error("repository or branch not found: {0}")]
    RepositoryNotFound(String),

    /// The host answered but the payload was unusable.
    #[error("unexpected response from source host: {0}")]
    InvalidResponse(String),
}

impl SourceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SourceError::Unavailable(_) => ErrorKind::Transient,
            SourceError::RepositoryNotFound(_) | SourceError::InvalidResponse(_) => {
                ErrorKind::PhaseFailure
            }
        }
    }
}
