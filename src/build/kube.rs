// ABOUTME: Kubernetes Job backend built on kube-rs.
// ABOUTME: Maps API errors and Job status into the backend capability.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::Client;
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};

use super::BuildStatus;
use super::backend::{BackendError, JobBackend, JobSnapshot, JobSummary};
use super::spec::{BuildSpec, COMMIT_ANNOTATION, MANAGED_BY_LABEL, MANAGER, RELEASE_LABEL};
use crate::types::ResourceName;

// =============================================================================
// Error Mapping Helpers
// =============================================================================

pub(crate) fn map_kube_error(e: kube::Error, what: &str) -> BackendError {
    match &e {
        kube::Error::Api(resp) if resp.code == 409 => {
            BackendError::AlreadyExists(what.to_string())
        }
        kube::Error::Api(resp) if resp.code == 404 => BackendError::NotFound(what.to_string()),
        kube::Error::Api(resp) if resp.code == 403 => {
            BackendError::Forbidden(format!("{}: {}", what, resp.message))
        }
        kube::Error::Api(resp) if resp.code == 400 || resp.code == 422 => {
            BackendError::Rejected(format!("{}: {}", what, resp.message))
        }
        _ => BackendError::Unavailable(format!("{}: {}", what, e)),
    }
}

/// Reduce a Job to a build status, noting whether it is being deleted.
pub(crate) fn snapshot_of(job: &Job) -> JobSnapshot {
    let mut snapshot = status_of(job);
    snapshot.terminating = job.metadata.deletion_timestamp.is_some();
    snapshot
}

fn status_of(job: &Job) -> JobSnapshot {
    let Some(status) = job.status.as_ref() else {
        return JobSnapshot::new(BuildStatus::Pending);
    };

    if status.succeeded.unwrap_or(0) > 0 {
        return JobSnapshot::new(BuildStatus::Succeeded);
    }

    let failed_condition = status.conditions.as_ref().and_then(|conditions| {
        conditions
            .iter()
            .find(|c| c.type_ == "Failed" && c.status == "True")
    });

    if let Some(condition) = failed_condition {
        return JobSnapshot {
            status: BuildStatus::Failed,
            message: condition
                .message
                .clone()
                .or_else(|| condition.reason.clone()),
            terminating: false,
        };
    }

    if status.failed.unwrap_or(0) > 0 {
        return JobSnapshot::new(BuildStatus::Failed);
    }

    if status.active.unwrap_or(0) > 0 {
        JobSnapshot::new(BuildStatus::Running)
    } else {
        JobSnapshot::new(BuildStatus::Pending)
    }
}

/// Build jobs in one namespace of the cluster.
#[derive(Clone)]
pub struct KubeJobBackend {
    jobs: Api<Job>,
    pods: Api<Pod>,
}

impl KubeJobBackend {
    pub fn new(client: Client, namespace: &ResourceName) -> Self {
        Self {
            jobs: Api::namespaced(client.clone(), namespace.as_str()),
            pods: Api::namespaced(client, namespace.as_str()),
        }
    }
}

#[async_trait]
impl JobBackend for KubeJobBackend {
    async fn create_job(&self, spec: &BuildSpec) -> Result<(), BackendError> {
        self.jobs
            .create(&PostParams::default(), &spec.to_job())
            .await
            .map(|_| ())
            .map_err(|e| map_kube_error(e, spec.name.as_str()))
    }

    async fn job_status(&self, name: &ResourceName) -> Result<Option<JobSnapshot>, BackendError> {
        let job = self
            .jobs
            .get_opt(name.as_str())
            .await
            .map_err(|e| map_kube_error(e, name.as_str()))?;
        Ok(job.as_ref().map(snapshot_of))
    }

    async fn job_logs(&self, name: &ResourceName, tail_lines: i64) -> Result<String, BackendError> {
        let selector = format!("job-name={}", name);
        let pods = self
            .pods
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(|e| map_kube_error(e, name.as_str()))?;

        // backoffLimit is 0, so there is at most one pod per job.
        let Some(pod_name) = pods.items.into_iter().filter_map(|p| p.metadata.name).last() else {
            return Err(BackendError::NotFound(format!("pod for job {}", name)));
        };

        let params = LogParams {
            tail_lines: Some(tail_lines),
            ..LogParams::default()
        };

        self.pods
            .logs(&pod_name, &params)
            .await
            .map_err(|e| map_kube_error(e, &pod_name))
    }

    async fn delete_job(&self, name: &ResourceName) -> Result<(), BackendError> {
        match self.jobs.delete(name.as_str(), &DeleteParams::foreground()).await {
            Ok(_) => Ok(()),
            Err(e) => match map_kube_error(e, name.as_str()) {
                BackendError::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn list_jobs(&self, release: &ResourceName) -> Result<Vec<JobSummary>, BackendError> {
        let selector = format!("{}={},{}={}", MANAGED_BY_LABEL, MANAGER, RELEASE_LABEL, release);
        let jobs = self
            .jobs
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(|e| map_kube_error(e, &selector))?;

        Ok(jobs
            .items
            .iter()
            .filter_map(|job| {
                let name = job.metadata.name.clone()?;
                let commit = job
                    .metadata
                    .annotations
                    .as_ref()
                    .and_then(|a| a.get(COMMIT_ANNOTATION).cloned());
                Some(JobSummary {
                    name,
                    commit,
                    status: snapshot_of(job).status,
                })
            })
            .collect())
    }
}
