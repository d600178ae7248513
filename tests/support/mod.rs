// ABOUTME: Test support utilities.
// ABOUTME: In-memory fakes for the collaborator traits plus settings and tracing helpers.

#![allow(dead_code)]

use async_trait::async_trait;
use ci_runner::build::{
    BackendError, BuildError, BuildSpec, BuildStatus, ImageBuilder, JobBackend, JobSnapshot,
    JobSummary,
};
use ci_runner::config::Settings;
use ci_runner::release::{DeployError, Deployer, DeploymentOutcome};
use ci_runner::source::{CommitSource, SourceError};
use ci_runner::types::{CommitRef, CommitSha, ImageReference, ResourceName};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, Once};

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env()
            .add_directive("ci_runner=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub const REPO: &str = "acme/widgets";
pub const IMAGE: &str = "registry.example.com/acme/widgets";

/// Settings for tests, with the state file inside `state_dir`.
pub fn settings(state_dir: &Path, extra: &[(&str, &str)]) -> Settings {
    let state_path = state_dir.join("runner-state.json");
    let mut vars: HashMap<String, String> = HashMap::from([
        ("REPO".to_string(), REPO.to_string()),
        ("IMAGE".to_string(), IMAGE.to_string()),
        ("CHART_PATH".to_string(), "chart".to_string()),
        ("RELEASE".to_string(), "widgets".to_string()),
        ("DEPLOY_NS".to_string(), "prod".to_string()),
        ("STATE_PATH".to_string(), state_path.display().to_string()),
        ("BUILD_POLL_INTERVAL".to_string(), "1".to_string()),
    ]);
    for (k, v) in extra {
        vars.insert(k.to_string(), v.to_string());
    }
    Settings::from_lookup(|k| vars.get(k).cloned()).unwrap()
}

pub fn sha(s: &str) -> CommitSha {
    CommitSha::new(s).unwrap()
}

pub fn commit(s: &str) -> CommitRef {
    CommitRef::new(sha(s), "main")
}

pub fn image_for(s: &str) -> ImageReference {
    ImageReference::for_commit(&ci_runner::types::ImageRef::parse(IMAGE).unwrap(), &commit(s))
}

// =============================================================================
// CommitSource
// =============================================================================

/// Branch tip that tests move by hand.
#[derive(Clone, Default)]
pub struct FakeSource {
    tip: Arc<Mutex<Option<String>>>,
    branch_missing: Arc<Mutex<bool>>,
    calls: Arc<Mutex<u32>>,
}

impl FakeSource {
    pub fn at(sha: &str) -> Self {
        let source = Self::default();
        source.set_tip(sha);
        source
    }

    pub fn set_tip(&self, sha: &str) {
        *self.tip.lock().unwrap() = Some(sha.to_string());
        *self.branch_missing.lock().unwrap() = false;
    }

    /// Make lookups report the branch as gone until the next `set_tip`.
    pub fn delete_branch(&self) {
        *self.branch_missing.lock().unwrap() = true;
    }

    /// Make lookups fail until the next `set_tip`.
    pub fn go_offline(&self) {
        *self.tip.lock().unwrap() = None;
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl CommitSource for FakeSource {
    async fn latest_commit(&self, branch: &str) -> Result<CommitRef, SourceError> {
        *self.calls.lock().unwrap() += 1;
        if *self.branch_missing.lock().unwrap() {
            return Err(SourceError::RepositoryNotFound(format!("acme/widgets@{branch}")));
        }
        match self.tip.lock().unwrap().as_deref() {
            Some(tip) => Ok(CommitRef::new(sha(tip), branch)),
            None => Err(SourceError::Unavailable("connection refused".into())),
        }
    }
}

// =============================================================================
// ImageBuilder
// =============================================================================

/// Builder whose results are scripted per call; succeeds once the script runs out.
#[derive(Clone, Default)]
pub struct FakeBuilder {
    script: Arc<Mutex<VecDeque<BuildError>>>,
    calls: Arc<Mutex<Vec<(String, u32)>>>,
}

impl FakeBuilder {
    pub fn failing_times(n: usize) -> Self {
        let builder = Self::default();
        for _ in 0..n {
            builder.push_failure(BuildError::Failed {
                job: "build-x".into(),
                reason: "kaniko exited 1".into(),
            });
        }
        builder
    }

    pub fn push_failure(&self, err: BuildError) {
        self.script.lock().unwrap().push_back(err);
    }

    /// `(sha, attempt)` for every build call.
    pub fn calls(&self) -> Vec<(String, u32)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageBuilder for FakeBuilder {
    async fn build(&self, commit: &CommitRef, attempt: u32) -> Result<ImageReference, BuildError> {
        self.calls
            .lock()
            .unwrap()
            .push((commit.sha().to_string(), attempt));
        match self.script.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(image_for(commit.sha().as_str())),
        }
    }
}

// =============================================================================
// Deployer
// =============================================================================

#[derive(Clone, Default)]
pub struct FakeDeployer {
    script: Arc<Mutex<VecDeque<DeployError>>>,
    deployed: Arc<Mutex<Vec<String>>>,
    calls: Arc<Mutex<u32>>,
}

impl FakeDeployer {
    pub fn push_failure(&self, err: DeployError) {
        self.script.lock().unwrap().push_back(err);
    }

    pub fn failing_times(n: usize) -> Self {
        let deployer = Self::default();
        for _ in 0..n {
            deployer.push_failure(DeployError::Failed {
                reason: "readiness probe failed".into(),
                rolled_back: true,
            });
        }
        deployer
    }

    /// Commit tags successfully rolled out, in order.
    pub fn deployed(&self) -> Vec<String> {
        self.deployed.lock().unwrap().clone()
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Deployer for FakeDeployer {
    async fn deploy(&self, image: &ImageReference) -> Result<DeploymentOutcome, DeployError> {
        *self.calls.lock().unwrap() += 1;
        if let Some(err) = self.script.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.deployed
            .lock()
            .unwrap()
            .push(image.commit_tag().to_string());
        Ok(DeploymentOutcome {
            release: ResourceName::new("widgets").unwrap(),
            namespace: ResourceName::new("prod").unwrap(),
            image: image.clone(),
            succeeded: true,
            revision: Some(self.deployed.lock().unwrap().len() as u32),
        })
    }
}

// =============================================================================
// JobBackend
// =============================================================================

#[derive(Debug, Clone)]
struct FakeJob {
    release: String,
    commit: String,
    /// Statuses reported by successive polls; the last one sticks.
    statuses: VecDeque<BuildStatus>,
    message: Option<String>,
    /// Set once deleted: polls left before the job is gone.
    removal_in: Option<u32>,
}

/// In-memory job API with scripted status progressions.
#[derive(Clone, Default)]
pub struct FakeJobs {
    jobs: Arc<Mutex<BTreeMap<String, FakeJob>>>,
    /// Progression given to each newly created job.
    next: Arc<Mutex<Vec<BuildStatus>>>,
    logs: Arc<Mutex<String>>,
    created: Arc<Mutex<Vec<String>>>,
    deleted: Arc<Mutex<Vec<String>>>,
    reject_create: Arc<Mutex<bool>>,
    /// Polls a deleted job stays visible, like foreground deletion.
    removal_delay: Arc<Mutex<u32>>,
}

impl FakeJobs {
    /// Jobs created from now on report `statuses`, one per poll.
    pub fn will_report(&self, statuses: &[BuildStatus]) {
        *self.next.lock().unwrap() = statuses.to_vec();
    }

    pub fn set_logs(&self, logs: &str) {
        *self.logs.lock().unwrap() = logs.to_string();
    }

    /// Deleted jobs remain visible, still terminating, for `polls` status reads.
    pub fn delay_removal(&self, polls: u32) {
        *self.removal_delay.lock().unwrap() = polls;
    }

    pub fn reject_creates(&self) {
        *self.reject_create.lock().unwrap() = true;
    }

    /// Pretend a job survived from an earlier process.
    pub fn seed(&self, name: &str, release: &str, commit: &str, status: BuildStatus) {
        self.jobs.lock().unwrap().insert(
            name.to_string(),
            FakeJob {
                release: release.to_string(),
                commit: commit.to_string(),
                statuses: VecDeque::from([status]),
                message: None,
                removal_in: None,
            },
        );
    }

    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn live(&self) -> Vec<String> {
        self.jobs.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl JobBackend for FakeJobs {
    async fn create_job(&self, spec: &BuildSpec) -> Result<(), BackendError> {
        if *self.reject_create.lock().unwrap() {
            return Err(BackendError::Forbidden("exceeded quota: cicd-quota".into()));
        }
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.contains_key(spec.name.as_str()) {
            return Err(BackendError::AlreadyExists(spec.name.to_string()));
        }
        let mut statuses: VecDeque<BuildStatus> = self.next.lock().unwrap().clone().into();
        if statuses.is_empty() {
            statuses.push_back(BuildStatus::Succeeded);
        }
        jobs.insert(
            spec.name.to_string(),
            FakeJob {
                release: spec.release.to_string(),
                commit: spec.commit.sha().to_string(),
                statuses,
                message: None,
                removal_in: None,
            },
        );
        self.created.lock().unwrap().push(spec.name.to_string());
        Ok(())
    }

    async fn job_status(&self, name: &ResourceName) -> Result<Option<JobSnapshot>, BackendError> {
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs.get_mut(name.as_str()) else {
            return Ok(None);
        };

        if let Some(left) = job.removal_in {
            if left == 0 {
                jobs.remove(name.as_str());
                return Ok(None);
            }
            job.removal_in = Some(left - 1);
            return Ok(Some(JobSnapshot {
                status: job.statuses.front().copied().unwrap_or(BuildStatus::Pending),
                message: job.message.clone(),
                terminating: true,
            }));
        }

        let status = if job.statuses.len() > 1 {
            job.statuses.pop_front().unwrap_or(BuildStatus::Pending)
        } else {
            job.statuses.front().copied().unwrap_or(BuildStatus::Pending)
        };
        Ok(Some(JobSnapshot {
            status,
            message: job.message.clone(),
            terminating: false,
        }))
    }

    async fn job_logs(&self, name: &ResourceName, _tail_lines: i64) -> Result<String, BackendError> {
        if self.jobs.lock().unwrap().contains_key(name.as_str()) {
            Ok(self.logs.lock().unwrap().clone())
        } else {
            Err(BackendError::NotFound(name.to_string()))
        }
    }

    async fn delete_job(&self, name: &ResourceName) -> Result<(), BackendError> {
        let delay = *self.removal_delay.lock().unwrap();
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(name.as_str()) {
            Some(job) if delay > 0 => {
                job.removal_in.get_or_insert(delay);
            }
            _ => {
                jobs.remove(name.as_str());
            }
        }
        drop(jobs);
        self.deleted.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn list_jobs(&self, release: &ResourceName) -> Result<Vec<JobSummary>, BackendError> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, job)| job.release == release.as_str())
            .map(|(name, job)| JobSummary {
                name: name.clone(),
                commit: Some(job.commit.clone()),
                status: job.statuses.front().copied().unwrap_or(BuildStatus::Pending),
            })
            .collect())
    }
}
