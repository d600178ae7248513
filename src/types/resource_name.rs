// ABOUTME: DNS-1123 label validation for Kubernetes object names.
// ABOUTME: Used for release names, namespaces, and derived build job names.

use super::commit::CommitSha;
use std::fmt;
use thiserror::Error;

const MAX_LEN: usize = 63;
const JOB_PREFIX: &str = "build-";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResourceNameError {
    #[error("name cannot be empty")]
    Empty,

    #[error("name exceeds maximum length of 63 characters")]
    TooLong,

    #[error("name cannot start with a hyphen")]
    StartsWithHyphen,

    #[error("name cannot end with a hyphen")]
    EndsWithHyphen,

    #[error("name must be lowercase")]
    NotLowercase,

    #[error("invalid character in name: '{0}'")]
    InvalidChar(char),
}

/// A name valid as a Kubernetes namespace, Helm release, or Job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceName(String);

impl ResourceName {
    pub fn new(value: &str) -> Result<Self, ResourceNameError> {
        if value.is_empty() {
            return Err(ResourceNameError::Empty);
        }

        if value.len() > MAX_LEN {
            return Err(ResourceNameError::TooLong);
        }

        if value.starts_with('-') {
            return Err(ResourceNameError::StartsWithHyphen);
        }

        if value.ends_with('-') {
            return Err(ResourceNameError::EndsWithHyphen);
        }

        for c in value.chars() {
            if c.is_ascii_uppercase() {
                return Err(ResourceNameError::NotLowercase);
            }
            if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
                return Err(ResourceNameError::InvalidChar(c));
            }
        }

        Ok(Self(value.to_string()))
    }

    /// Deterministic build job name for a commit: `build-<sha>`.
    ///
    /// Long shas are cut to fit the label limit, so the same commit always
    /// maps to the same job across restarts.
    pub fn build_job(sha: &CommitSha) -> Self {
        let budget = MAX_LEN - JOB_PREFIX.len();
        let sha = sha.as_str();
        Self(format!("{}{}", JOB_PREFIX, &sha[..sha.len().min(budget)]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
