// ABOUTME: Chart checkout: fetch the repository archive at a commit and unpack it.
// ABOUTME: The checkout lives in a temporary directory removed when dropped.

use async_trait::async_trait;
use flate2::read::GzDecoder;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use super::DeployError;
use crate::source::GitHubClient;
use crate::types::CommitSha;

/// Repository contents at one commit, on local disk.
#[derive(Debug)]
pub struct Checkout {
    _dir: TempDir,
    root: PathBuf,
}

impl Checkout {
    /// Wrap an unpacked tree; `root` must live inside `dir`.
    pub fn new(dir: TempDir, root: PathBuf) -> Self {
        Self { _dir: dir, root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a chart directory inside the checkout.
    ///
    /// # Errors
    ///
    /// Returns `DeployError::ChartUnavailable` when the directory is missing.
    pub fn chart_dir(&self, chart_path: &Path) -> Result<PathBuf, DeployError> {
        let dir = self.root.join(chart_path);
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(DeployError::ChartUnavailable(format!(
                "chart path {} does not exist in archive",
                chart_path.display()
            )))
        }
    }
}

/// Provides the repository tree a release is installed from.
#[async_trait]
pub trait ChartSource: Send + Sync {
    async fn checkout(&self, sha: &CommitSha) -> Result<Checkout, DeployError>;
}

/// Unpack a gzipped tarball into `dest` and return the repository root.
///
/// Source-host archives wrap everything in one top-level directory
/// (`owner-repo-sha/`); when that is the case its path is returned.
pub fn extract_archive(bytes: &[u8], dest: &Path) -> std::io::Result<PathBuf> {
    let mut archive = tar::Archive::new(GzDecoder::new(bytes));
    archive.unpack(dest)?;

    let mut entries = std::fs::read_dir(dest)?.collect::<Result<Vec<_>, _>>()?;
    if entries.len() == 1
        && entries[0].file_type()?.is_dir()
        && let Some(only) = entries.pop()
    {
        return Ok(only.path());
    }
    Ok(dest.to_path_buf())
}

#[async_trait]
impl ChartSource for GitHubClient {
    async fn checkout(&self, sha: &CommitSha) -> Result<Checkout, DeployError> {
        let bytes = self
            .download_archive(sha)
            .await
            .map_err(|e| DeployError::ChartUnavailable(e.to_string()))?;

        let dir = TempDir::with_prefix("ci-runner-")
            .map_err(|e| DeployError::ChartUnavailable(format!("temp dir: {e}")))?;
        let dest = dir.path().to_path_buf();

        let root = tokio::task::spawn_blocking(move || extract_archive(&bytes, &dest))
            .await
            .map_err(|e| DeployError::ChartUnavailable(format!("extraction task failed: {e}")))?
            .map_err(|e| DeployError::ChartUnavailable(format!("failed to extract archive: {e}")))?;

        tracing::debug!(root = %root.display(), "Repository archive extracted");
        Ok(Checkout::new(dir, root))
    }
}
