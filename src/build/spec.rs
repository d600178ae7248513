// ABOUTME: Kaniko build job definition derived from settings and a commit.
// ABOUTME: Pure construction: executor args, credentials, labels, and the Job object.

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, KeyToPath, PodSpec, PodTemplateSpec, SecretVolumeSource, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

use crate::config::Settings;
use crate::types::{CommitRef, ImageReference, ImageRef, ResourceName};

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGER: &str = "ci-runner";
pub const RELEASE_LABEL: &str = "ci-runner/release";
pub const COMMIT_ANNOTATION: &str = "ci-runner/commit";
const JOB_NAME_LABEL: &str = "job-name";

const CONTAINER_NAME: &str = "kaniko";
const REGISTRY_VOLUME: &str = "registry-creds";
const REGISTRY_MOUNT: &str = "/kaniko/.docker";

/// Everything needed to submit one build job.
#[derive(Debug, Clone)]
pub struct BuildSpec {
    pub name: ResourceName,
    pub namespace: ResourceName,
    pub release: ResourceName,
    pub commit: CommitRef,
    pub image: ImageReference,
    pub executor_image: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub registry_secret: Option<String>,
    pub service_account: String,
    pub deadline_secs: i64,
}

impl BuildSpec {
    pub fn new(settings: &Settings, commit: &CommitRef) -> Self {
        let image = ImageReference::for_commit(&settings.image, commit);
        let args = executor_args(&settings.repo, &settings.dockerfile, &settings.image, commit);

        let mut env = Vec::new();
        if let Some(ref token) = settings.git_token {
            env.push(("GIT_USERNAME".to_string(), "x-access-token".to_string()));
            env.push(("GIT_PASSWORD".to_string(), token.expose().to_string()));
        }

        Self {
            name: ResourceName::build_job(commit.sha()),
            namespace: settings.cicd_namespace.clone(),
            release: settings.release.clone(),
            commit: commit.clone(),
            image,
            executor_image: settings.kaniko_image.clone(),
            args,
            env,
            registry_secret: settings.registry_secret.clone(),
            service_account: settings.service_account.clone(),
            deadline_secs: settings.build_timeout.as_secs().max(1) as i64,
        }
    }

    fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (MANAGED_BY_LABEL.to_string(), MANAGER.to_string()),
            (RELEASE_LABEL.to_string(), self.release.to_string()),
        ])
    }

    fn annotations(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(COMMIT_ANNOTATION.to_string(), self.commit.sha().to_string())])
    }

    /// Render the Kubernetes Job for this build.
    pub fn to_job(&self) -> Job {
        let mut pod_labels = self.labels();
        pod_labels.insert(JOB_NAME_LABEL.to_string(), self.name.to_string());

        let (volumes, mounts) = match self.registry_secret {
            Some(ref secret) => (
                Some(vec![Volume {
                    name: REGISTRY_VOLUME.to_string(),
                    secret: Some(SecretVolumeSource {
                        secret_name: Some(secret.clone()),
                        items: Some(vec![KeyToPath {
                            key: ".dockerconfigjson".to_string(),
                            path: "config.json".to_string(),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                Some(vec![VolumeMount {
                    name: REGISTRY_VOLUME.to_string(),
                    mount_path: REGISTRY_MOUNT.to_string(),
                    read_only: Some(true),
                    ..Default::default()
                }]),
            ),
            None => (None, None),
        };

        let env: Vec<EnvVar> = self
            .env
            .iter()
            .map(|(name, value)| EnvVar {
                name: name.clone(),
                value: Some(value.clone()),
                ..Default::default()
            })
            .collect();

        let container = Container {
            name: CONTAINER_NAME.to_string(),
            image: Some(self.executor_image.clone()),
            args: Some(self.args.clone()),
            env: if env.is_empty() { None } else { Some(env) },
            volume_mounts: mounts,
            ..Default::default()
        };

        Job {
            metadata: ObjectMeta {
                name: Some(self.name.to_string()),
                namespace: Some(self.namespace.to_string()),
                labels: Some(self.labels()),
                annotations: Some(self.annotations()),
                ..Default::default()
            },
            spec: Some(JobSpec {
                backoff_limit: Some(0),
                active_deadline_seconds: Some(self.deadline_secs),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(pod_labels),
                        annotations: Some(self.annotations()),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![container],
                        restart_policy: Some("Never".to_string()),
                        service_account_name: Some(self.service_account.clone()),
                        volumes,
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// Kaniko executor arguments: git context pinned to the commit, both tags pushed.
fn executor_args(repo: &str, dockerfile: &str, image: &ImageRef, commit: &CommitRef) -> Vec<String> {
    let reference = ImageReference::for_commit(image, commit);
    vec![
        format!("--dockerfile={}", dockerfile),
        format!("--context=git://github.com/{}.git#{}", repo, commit.sha()),
        format!("--destination={}", reference.commit_image()),
        format!("--destination={}", reference.branch_image()),
        "--snapshotMode=time".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Secret;
    use crate::types::CommitSha;
    use std::collections::HashMap;

    fn settings(extra: &[(&str, &str)]) -> Settings {
        let mut vars: HashMap<&str, &str> = HashMap::from([
            ("REPO", "acme/widgets"),
            ("IMAGE", "ghcr.io/acme/widgets"),
            ("CHART_PATH", "chart"),
            ("RELEASE", "widgets"),
        ]);
        vars.extend(extra.iter().copied());
        Settings::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap()
    }

    fn commit() -> CommitRef {
        CommitRef::new(CommitSha::new("def456").unwrap(), "main")
    }

    #[test]
    fn args_pin_commit_and_push_both_tags() {
        let spec = BuildSpec::new(&settings(&[]), &commit());
        assert_eq!(
            spec.args,
            vec![
                "--dockerfile=Dockerfile",
                "--context=git://github.com/acme/widgets.git#def456",
                "--destination=ghcr.io/acme/widgets:def456",
                "--destination=ghcr.io/acme/widgets:main-latest",
                "--snapshotMode=time",
            ]
        );
        assert_eq!(spec.name.as_str(), "build-def456");
        assert_eq!(spec.namespace.as_str(), "cicd");
    }

    #[test]
    fn job_never_restarts_and_carries_ownership_labels() {
        let job = BuildSpec::new(&settings(&[]), &commit()).to_job();
        let labels = job.metadata.labels.clone().unwrap();
        assert_eq!(labels.get(MANAGED_BY_LABEL).map(String::as_str), Some(MANAGER));
        assert_eq!(labels.get(RELEASE_LABEL).map(String::as_str), Some("widgets"));
        assert_eq!(
            job.metadata
                .annotations
                .unwrap()
                .get(COMMIT_ANNOTATION)
                .map(String::as_str),
            Some("def456")
        );

        let spec = job.spec.unwrap();
        assert_eq!(spec.backoff_limit, Some(0));
        assert_eq!(spec.active_deadline_seconds, Some(1800));
        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        assert_eq!(pod.service_account_name.as_deref(), Some("deployer"));
        assert!(pod.volumes.is_none());
        assert!(pod.containers[0].env.is_none());
    }

    #[test]
    fn credentials_are_wired_when_configured() {
        let mut s = settings(&[("REGISTRY_SECRET", "regcred")]);
        s.git_token = Some(Secret::new("t0ken"));
        let job = BuildSpec::new(&s, &commit()).to_job();
        let pod = job.spec.unwrap().template.spec.unwrap();

        let volume = &pod.volumes.unwrap()[0];
        let secret = volume.secret.as_ref().unwrap();
        assert_eq!(secret.secret_name.as_deref(), Some("regcred"));
        assert_eq!(secret.items.as_ref().unwrap()[0].path, "config.json");

        let container = &pod.containers[0];
        assert_eq!(
            container.volume_mounts.as_ref().unwrap()[0].mount_path,
            "/kaniko/.docker"
        );
        let env = container.env.as_ref().unwrap();
        assert!(
            env.iter()
                .any(|e| e.name == "GIT_PASSWORD" && e.value.as_deref() == Some("t0ken"))
        );
    }
}
