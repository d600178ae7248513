// ABOUTME: Persisted runner state: the last commit that was successfully deployed.
// ABOUTME: Written atomically via temp file + rename; unreadable files mean "no prior deploy".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::release::DeploymentOutcome;
use crate::types::{CommitRef, CommitSha};

/// Errors from reading or writing the state file.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to replace {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: tempfile::PersistError,
    },

    #[error("refusing to record {commit}: deployment did not succeed for that commit")]
    NotDeployed { commit: String },
}

/// What the runner knows about the monitored branch across restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerState {
    #[serde(default)]
    pub repository: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default, alias = "last_commit")]
    pub last_deployed_commit: Option<CommitSha>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_by: String,
}

impl RunnerState {
    /// State for a branch that has never been deployed.
    pub fn empty(repository: &str, branch: &str) -> Self {
        Self {
            repository: repository.to_string(),
            branch: branch.to_string(),
            last_deployed_commit: None,
            updated_at: Utc::now(),
            updated_by: String::new(),
        }
    }

    /// Whether this record belongs to the given repository and branch.
    ///
    /// Files written before the repository was recorded match anything.
    pub fn tracks(&self, repository: &str, branch: &str) -> bool {
        (self.repository.is_empty() || self.repository == repository)
            && (self.branch.is_empty() || self.branch == branch)
    }

    /// Advance to `commit` after its deployment succeeded.
    ///
    /// The outcome must be a success for exactly this commit; anything else
    /// leaves the state untouched.
    pub fn record_deployment(
        &mut self,
        commit: &CommitRef,
        outcome: &DeploymentOutcome,
    ) -> Result<(), StateError> {
        if !outcome.succeeded || outcome.image.commit_tag() != commit.sha().as_str() {
            return Err(StateError::NotDeployed {
                commit: commit.sha().to_string(),
            });
        }

        self.last_deployed_commit = Some(commit.sha().clone());
        self.branch = commit.branch().to_string();
        self.updated_at = Utc::now();
        self.updated_by = gethostname::gethostname().to_string_lossy().into_owned();
        Ok(())
    }
}

/// File-backed store for [`RunnerState`].
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the state file.
    ///
    /// Returns `Ok(None)` when the file does not exist.
    pub fn read(&self) -> Result<Option<RunnerState>, StateError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StateError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| StateError::Parse {
                path: self.path.clone(),
                source,
            })
    }

    /// Load state for a repository and branch, never failing.
    ///
    /// Missing, unreadable, or foreign state files are treated as "nothing
    /// deployed yet"; the worst case is a redundant build and deploy.
    pub fn load(&self, repository: &str, branch: &str) -> RunnerState {
        match self.read() {
            Ok(Some(state)) if state.tracks(repository, branch) => {
                tracing::debug!(
                    path = %self.path.display(),
                    last_deployed = ?state.last_deployed_commit.as_ref().map(|s| s.short()),
                    "Loaded runner state"
                );
                RunnerState {
                    repository: repository.to_string(),
                    branch: branch.to_string(),
                    ..state
                }
            }
            Ok(Some(state)) => {
                tracing::warn!(
                    path = %self.path.display(),
                    recorded = %format!("{}@{}", state.repository, state.branch),
                    "State file belongs to a different repository or branch; ignoring it"
                );
                RunnerState::empty(repository, branch)
            }
            Ok(None) => {
                tracing::debug!(path = %self.path.display(), "State file does not exist yet");
                RunnerState::empty(repository, branch)
            }
            Err(e) => {
                tracing::warn!("Treating state as empty: {}", e);
                RunnerState::empty(repository, branch)
            }
        }
    }

    /// Write the state atomically: temp file in the same directory, fsync, rename.
    pub fn save(&self, state: &RunnerState) -> Result<(), StateError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        std::fs::create_dir_all(&dir).map_err(|source| StateError::Io {
            path: dir.clone(),
            source,
        })?;

        let bytes = serde_json::to_vec_pretty(state)?;

        let mut tmp = NamedTempFile::new_in(&dir).map_err(|source| StateError::Io {
            path: dir.clone(),
            source,
        })?;
        tmp.write_all(&bytes)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|source| StateError::Io {
                path: tmp.path().to_path_buf(),
                source,
            })?;

        tmp.persist(&self.path)
            .map_err(|source| StateError::Persist {
                path: self.path.clone(),
                source,
            })?;

        tracing::debug!(path = %self.path.display(), "State written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ImageRef, ImageReference, ResourceName};

    fn commit(sha: &str) -> CommitRef {
        CommitRef::new(CommitSha::new(sha).unwrap(), "main")
    }

    fn outcome(sha: &str, succeeded: bool) -> DeploymentOutcome {
        let repo = ImageRef::parse("ghcr.io/acme/app").unwrap();
        DeploymentOutcome {
            release: ResourceName::new("app").unwrap(),
            namespace: ResourceName::new("default").unwrap(),
            image: ImageReference::for_commit(&repo, &commit(sha)),
            succeeded,
            revision: None,
        }
    }

    #[test]
    fn record_requires_matching_success() {
        let mut state = RunnerState::empty("acme/app", "main");

        assert!(
            state
                .record_deployment(&commit("def456"), &outcome("abc123", true))
                .is_err()
        );
        assert!(
            state
                .record_deployment(&commit("def456"), &outcome("def456", false))
                .is_err()
        );
        assert_eq!(state.last_deployed_commit, None);

        state
            .record_deployment(&commit("def456"), &outcome("def456", true))
            .unwrap();
        assert_eq!(
            state.last_deployed_commit,
            Some(CommitSha::new("def456").unwrap())
        );
        assert!(!state.updated_by.is_empty());
    }

    #[test]
    fn legacy_files_are_understood() {
        let state: RunnerState = serde_json::from_str(r#"{"last_commit": "abc123"}"#).unwrap();
        assert_eq!(
            state.last_deployed_commit,
            Some(CommitSha::new("abc123").unwrap())
        );
        assert!(state.tracks("any/repo", "any-branch"));
    }

    #[test]
    fn foreign_state_does_not_track() {
        let state = RunnerState::empty("acme/app", "main");
        assert!(state.tracks("acme/app", "main"));
        assert!(!state.tracks("acme/other", "main"));
        assert!(!state.tracks("acme/app", "develop"));
    }
}
