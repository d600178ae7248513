// ABOUTME: Kubernetes client construction for in-cluster and local use.
// ABOUTME: Prefers the service-account config, falls back to kubeconfig, applies the TLS toggle.

use kube::{Client, Config};

use crate::config::Settings;
use crate::error::{Error, Result};

/// Build a client from the pod's service account, or the local kubeconfig.
pub async fn connect(settings: &Settings) -> Result<Client> {
    let mut config = match Config::incluster() {
        Ok(config) => {
            tracing::debug!("Using in-cluster Kubernetes configuration");
            config
        }
        Err(in_cluster) => {
            tracing::debug!("Not running in a cluster ({}); trying kubeconfig", in_cluster);
            Config::infer()
                .await
                .map_err(|e| Error::KubeClient(e.to_string()))?
        }
    };

    if !settings.verify_ssl {
        tracing::warn!("SSL verification is disabled for Kubernetes API calls");
        config.accept_invalid_certs = true;
    }

    Client::try_from(config).map_err(|e| Error::KubeClient(e.to_string()))
}
