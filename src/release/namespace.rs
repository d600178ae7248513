// ABOUTME: Namespace existence checks for build and deploy namespaces.
// ABOUTME: Get, create on 404, tolerate races and missing list/create permissions.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Client;
use kube::api::{Api, PostParams};

use super::DeployError;
use crate::types::ResourceName;

#[async_trait]
pub trait NamespaceOps: Send + Sync {
    /// Make sure `namespace` exists, creating it if needed.
    async fn ensure(&self, namespace: &ResourceName) -> Result<(), DeployError>;
}

#[derive(Clone)]
pub struct KubeNamespaces {
    api: Api<Namespace>,
}

impl KubeNamespaces {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

fn api_code(e: &kube::Error) -> Option<u16> {
    match e {
        kube::Error::Api(resp) => Some(resp.code),
        _ => None,
    }
}

#[async_trait]
impl NamespaceOps for KubeNamespaces {
    async fn ensure(&self, namespace: &ResourceName) -> Result<(), DeployError> {
        let failed = |e: kube::Error| DeployError::NamespaceCreateFailed {
            namespace: namespace.to_string(),
            reason: e.to_string(),
        };

        match self.api.get(namespace.as_str()).await {
            Ok(_) => return Ok(()),
            Err(e) if api_code(&e) == Some(404) => {}
            Err(e) if api_code(&e) == Some(403) => {
                tracing::warn!(
                    namespace = %namespace,
                    "Not allowed to read namespace; assuming it exists"
                );
                return Ok(());
            }
            Err(e) => return Err(failed(e)),
        }

        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        match self.api.create(&PostParams::default(), &ns).await {
            Ok(_) => {
                tracing::info!(namespace = %namespace, "Created namespace");
                Ok(())
            }
            Err(e) if api_code(&e) == Some(409) => Ok(()),
            Err(e) if api_code(&e) == Some(403) => {
                tracing::warn!(
                    namespace = %namespace,
                    "Not allowed to create namespace; assuming it exists"
                );
                Ok(())
            }
            Err(e) => Err(failed(e)),
        }
    }
}
