// ABOUTME: Release driver: validate, ensure namespace, check out chart, upgrade.
// ABOUTME: Implements Deployer on top of the namespace, chart, and release capabilities.

use async_trait::async_trait;
use std::sync::Arc;

use super::{
    ChartSource, DeployError, Deployer, DeploymentOutcome, NamespaceOps, ReleaseManager,
    UpgradeRequest,
};
use crate::config::Settings;
use crate::types::{CommitSha, ImageReference};

pub struct ReleaseDriver<M, N, C> {
    manager: M,
    namespaces: N,
    charts: C,
    settings: Arc<Settings>,
}

impl<M, N, C> ReleaseDriver<M, N, C>
where
    M: ReleaseManager,
    N: NamespaceOps,
    C: ChartSource,
{
    pub fn new(manager: M, namespaces: N, charts: C, settings: Arc<Settings>) -> Self {
        Self {
            manager,
            namespaces,
            charts,
            settings,
        }
    }
}

#[async_trait]
impl<M, N, C> Deployer for ReleaseDriver<M, N, C>
where
    M: ReleaseManager,
    N: NamespaceOps,
    C: ChartSource,
{
    async fn deploy(&self, image: &ImageReference) -> Result<DeploymentOutcome, DeployError> {
        let settings = &self.settings;
        settings
            .validate()
            .map_err(|e| DeployError::Config(e.to_string()))?;

        self.namespaces.ensure(&settings.deploy_namespace).await?;

        let sha = CommitSha::new(image.commit_tag())
            .map_err(|e| DeployError::ChartUnavailable(format!("image tag is not a commit: {e}")))?;

        // Dropping the checkout removes the temporary directory.
        let checkout = self.charts.checkout(&sha).await?;
        let chart = checkout.chart_dir(&settings.chart_path)?;

        let request = UpgradeRequest {
            release: settings.release.clone(),
            chart,
            namespace: settings.deploy_namespace.clone(),
            image: image.clone(),
            timeout: settings.helm_timeout,
            insecure: !settings.verify_ssl,
        };

        let release = self.manager.upgrade(&request).await?;
        tracing::info!(
            release = %settings.release,
            namespace = %settings.deploy_namespace,
            image = %image,
            revision = ?release.revision,
            "Release upgraded"
        );

        Ok(DeploymentOutcome {
            release: settings.release.clone(),
            namespace: settings.deploy_namespace.clone(),
            image: image.clone(),
            succeeded: true,
            revision: release.revision,
        })
    }
}
