// ABOUTME: Helm release manager: runs `helm upgrade --install --atomic` as a child process.
// ABOUTME: Argument construction and output parsing are pure functions for testing.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::DeployError;
use crate::types::{ImageReference, ResourceName};

/// Extra time allowed beyond helm's own `--timeout` before the child is killed.
const PROCESS_GRACE: Duration = Duration::from_secs(60);

/// One atomic upgrade of a release.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    pub release: ResourceName,
    pub chart: PathBuf,
    pub namespace: ResourceName,
    pub image: ImageReference,
    pub timeout: Duration,
    /// Pass `--kube-insecure-skip-tls-verify` to helm.
    pub insecure: bool,
}

/// What helm reported after a successful upgrade.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelmRelease {
    pub revision: Option<u32>,
}

/// Applies chart upgrades to the cluster.
#[async_trait]
pub trait ReleaseManager: Send + Sync {
    async fn upgrade(&self, request: &UpgradeRequest) -> Result<HelmRelease, DeployError>;
}

/// Arguments for `helm upgrade --install ... --atomic`.
pub fn upgrade_args(request: &UpgradeRequest) -> Vec<String> {
    let mut args = vec![
        "upgrade".to_string(),
        "--install".to_string(),
        request.release.to_string(),
        request.chart.display().to_string(),
        "--namespace".to_string(),
        request.namespace.to_string(),
        "--atomic".to_string(),
        "--wait".to_string(),
        "--timeout".to_string(),
        format!("{}s", request.timeout.as_secs().max(1)),
        "--set".to_string(),
        format!("image.repository={}", request.image.repository()),
        "--set".to_string(),
        format!("image.tag={}", request.image.commit_tag()),
    ];
    if request.insecure {
        args.push("--kube-insecure-skip-tls-verify".to_string());
    }
    args
}

/// Pull the `REVISION: n` line out of helm's status output.
pub fn parse_revision(stdout: &str) -> Option<u32> {
    stdout.lines().find_map(|line| {
        line.trim()
            .strip_prefix("REVISION:")
            .and_then(|rest| rest.trim().parse().ok())
    })
}

/// Helm reports a completed `--atomic` rollback on stderr. A rollback that
/// itself failed leaves the release broken and does not count.
fn mentions_rollback(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("has been rolled back")
}

/// Shells out to the `helm` binary.
#[derive(Debug, Clone)]
pub struct HelmCli {
    bin: PathBuf,
}

impl HelmCli {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }
}

#[async_trait]
impl ReleaseManager for HelmCli {
    async fn upgrade(&self, request: &UpgradeRequest) -> Result<HelmRelease, DeployError> {
        let args = upgrade_args(request);
        tracing::info!("Executing: {} {}", self.bin.display(), args.join(" "));

        let child = Command::new(&self.bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let limit = request.timeout + PROCESS_GRACE;
        let output = match tokio::time::timeout(limit, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(DeployError::Failed {
                    reason: format!("failed to run {}: {}", self.bin.display(), e),
                    rolled_back: false,
                });
            }
            Err(_) => return Err(DeployError::Timeout { timeout: limit }),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            tracing::error!("Helm command failed: {}", stderr.trim_end());
            let reason = stderr
                .lines()
                .rev()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("helm exited with {}", output.status));
            return Err(DeployError::Failed {
                reason,
                rolled_back: mentions_rollback(&stderr),
            });
        }

        if !stdout.is_empty() {
            tracing::debug!("Helm output: {}", stdout.trim_end());
        }

        Ok(HelmRelease {
            revision: parse_revision(&stdout),
        })
    }
}
