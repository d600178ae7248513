// ABOUTME: Release driver: installs or upgrades the Helm release to a built image.
// ABOUTME: Defines the Deployer capability, deployment outcomes, and deploy errors.

mod chart;
mod driver;
mod helm;
mod namespace;

pub use chart::{ChartSource, Checkout, extract_archive};
pub use driver::ReleaseDriver;
pub use helm::{HelmCli, HelmRelease, ReleaseManager, UpgradeRequest, parse_revision, upgrade_args};
pub use namespace::{KubeNamespaces, NamespaceOps};

use async_trait::async_trait;
use std::time::Duration;

use crate::error::ErrorKind;
use crate::types::{ImageReference, ResourceName};

/// Rolls a release forward to an image.
#[async_trait]
pub trait Deployer: Send + Sync {
    /// Install or upgrade the release so it runs `image`.
    ///
    /// All-or-nothing: on error the release is left at its previous revision.
    async fn deploy(&self, image: &ImageReference) -> Result<DeploymentOutcome, DeployError>;
}

/// Result of one deploy attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentOutcome {
    pub release: ResourceName,
    pub namespace: ResourceName,
    pub image: ImageReference,
    pub succeeded: bool,
    /// Release revision reported by Helm, when it printed one.
    pub revision: Option<u32>,
}

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// Helm exited non-zero. `rolled_back` is set when it reverted the release.
    #[error("deployment failed{}: {reason}", rollback_note(.rolled_back))]
    Failed { reason: String, rolled_back: bool },

    #[error("could not ensure namespace {namespace}: {reason}")]
    NamespaceCreateFailed { namespace: String, reason: String },

    /// Archive fetch or extraction failed, or the chart path is missing.
    #[error("chart unavailable: {0}")]
    ChartUnavailable(String),

    #[error("helm did not finish within {}", format_timeout(.timeout))]
    Timeout { timeout: Duration },

    #[error("configuration invalid at deploy time: {0}")]
    Config(String),
}

fn rollback_note(rolled_back: &bool) -> &'static str {
    if *rolled_back { " (rolled back)" } else { "" }
}

fn format_timeout(timeout: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*timeout)
}

impl DeployError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeployError::Failed { .. } => ErrorKind::PhaseFailure,
            DeployError::NamespaceCreateFailed { .. }
            | DeployError::ChartUnavailable(_)
            | DeployError::Timeout { .. } => ErrorKind::Transient,
            DeployError::Config(_) => ErrorKind::Configuration,
        }
    }
}
