// ABOUTME: Commit identifiers observed on the monitored branch.
// ABOUTME: CommitSha validates git hashes; CommitRef pairs a sha with its branch.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Number of characters shown when a sha is abbreviated in logs.
const SHORT_LEN: usize = 7;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommitShaError {
    #[error("commit sha cannot be empty")]
    Empty,

    #[error("commit sha must be between 4 and 64 characters, got {0}")]
    BadLength(usize),

    #[error("invalid character in commit sha: '{0}'")]
    InvalidChar(char),
}

/// A full or abbreviated git object hash, normalised to lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CommitSha(String);

impl CommitSha {
    pub fn new(value: &str) -> Result<Self, CommitShaError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(CommitShaError::Empty);
        }

        if !(4..=64).contains(&value.len()) {
            return Err(CommitShaError::BadLength(value.len()));
        }

        if let Some(c) = value.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(CommitShaError::InvalidChar(c));
        }

        Ok(Self(value.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(SHORT_LEN)]
    }
}

impl fmt::Display for CommitSha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for CommitSha {
    type Error = CommitShaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        CommitSha::new(&value)
    }
}

impl From<CommitSha> for String {
    fn from(sha: CommitSha) -> Self {
        sha.0
    }
}

/// The tip of a branch at the moment it was observed.
///
/// Two refs are equal when their shas are equal; the branch is carried for
/// tag construction only.
#[derive(Debug, Clone)]
pub struct CommitRef {
    sha: CommitSha,
    branch: String,
}

impl CommitRef {
    pub fn new(sha: CommitSha, branch: impl Into<String>) -> Self {
        Self {
            sha,
            branch: branch.into(),
        }
    }

    pub fn sha(&self) -> &CommitSha {
        &self.sha
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Whether this commit still needs to be built and deployed.
    ///
    /// `None` means nothing has been deployed yet, so every commit is new.
    pub fn is_newer_than(&self, last_deployed: Option<&CommitSha>) -> bool {
        last_deployed != Some(&self.sha)
    }
}

impl PartialEq for CommitRef {
    fn eq(&self, other: &Self) -> bool {
        self.sha == other.sha
    }
}

impl Eq for CommitRef {}

impl fmt::Display for CommitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.branch, self.sha.short())
    }
}
