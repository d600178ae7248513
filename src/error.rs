// ABOUTME: Application-wide error types for ci-runner.
// ABOUTME: Defines the error taxonomy that drives retry and exit decisions.

use std::path::PathBuf;
use thiserror::Error;

use crate::retry::PhaseError;
use crate::state::StateError;

/// How an error should be treated by the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network blips, rate limits, timeouts, submission hiccups.
    Transient,
    /// A build or deploy ran to completion and failed.
    PhaseFailure,
    /// Missing or malformed settings. Never retried; stops the process.
    Configuration,
    /// Unreadable persisted state. Recovered as "no prior deployment".
    StateCorruption,
}

impl ErrorKind {
    /// Whether the retry coordinator may run the phase again.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient | ErrorKind::PhaseFailure)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("state file error: {0}")]
    State(#[from] StateError),

    #[error("kubernetes client setup failed: {0}")]
    KubeClient(String),

    #[error("HTTP client setup failed: {0}")]
    HttpClient(String),

    #[error("CA bundle not readable at {0}")]
    CaBundle(PathBuf),

    #[error(transparent)]
    Phase(#[from] PhaseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MissingEnvVar(_)
            | Error::InvalidConfig(_)
            | Error::KubeClient(_)
            | Error::HttpClient(_)
            | Error::CaBundle(_) => ErrorKind::Configuration,
            Error::State(_) => ErrorKind::StateCorruption,
            Error::Phase(e) => e.kind(),
            Error::Io(_) | Error::Json(_) => ErrorKind::Transient,
        }
    }

    /// Only configuration problems stop the process.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }
}

pub type Result<T> = std::result::Result<T, Error>;
