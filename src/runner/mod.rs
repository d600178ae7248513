// ABOUTME: Control loop: detect -> build -> deploy -> record, once per interval.
// ABOUTME: Re-reads the state file every tick; only the recording step writes it.

use std::future::Future;
use std::sync::Arc;
use tracing::Instrument;

use crate::build::ImageBuilder;
use crate::config::Settings;
use crate::diagnostics::{Diagnostics, Warning};
use crate::error::{Error, ErrorKind, Result};
use crate::release::Deployer;
use crate::retry::{Phase, PhaseError, RetryPolicy, with_retry};
use crate::source::CommitSource;
use crate::state::{RunnerState, StateStore};
use crate::types::{CommitRef, ImageReference};

/// Where the loop is within a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Detecting,
    Building,
    Deploying,
    Recording,
}

/// How a tick ended.
#[derive(Debug)]
pub enum TickOutcome {
    /// The branch tip is the last deployed commit.
    NoChange,
    /// The commit was built, deployed, and recorded.
    Deployed {
        commit: CommitRef,
        image: ImageReference,
        revision: Option<u32>,
    },
    /// The branch tip could not be read.
    DetectFailed { kind: ErrorKind, reason: String },
    /// A phase ran out of attempts; the commit is retried next tick.
    Failed {
        phase: Phase,
        commit: CommitRef,
        reason: String,
    },
}

impl TickOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, TickOutcome::DetectFailed { .. } | TickOutcome::Failed { .. })
    }
}

/// Runs the detect/build/deploy/record cycle for one repository branch.
pub struct Runner<S, B, D> {
    settings: Arc<Settings>,
    source: S,
    builder: B,
    deployer: D,
    store: StateStore,
    state: RunnerState,
    /// A recorded deployment whose save failed; stands in for the file until a save succeeds.
    unsaved: Option<RunnerState>,
    policy: RetryPolicy,
    loop_state: LoopState,
}

impl<S, B, D> Runner<S, B, D>
where
    S: CommitSource,
    B: ImageBuilder,
    D: Deployer,
{
    /// Create a runner, loading persisted state from `settings.state_path`.
    pub fn new(settings: Arc<Settings>, source: S, builder: B, deployer: D) -> Self {
        let store = StateStore::new(&settings.state_path);
        let state = store.load(&settings.repo, &settings.branch);
        tracing::info!(
            path = %store.path().display(),
            last_deployed = ?state.last_deployed_commit.as_ref().map(|s| s.short()),
            "Loaded runner state"
        );
        let policy = RetryPolicy::new(settings.max_retries);

        Self {
            settings,
            source,
            builder,
            deployer,
            store,
            state,
            unsaved: None,
            policy,
            loop_state: LoopState::Idle,
        }
    }

    pub fn state(&self) -> &RunnerState {
        &self.state
    }

    pub fn loop_state(&self) -> LoopState {
        self.loop_state
    }

    fn enter(&mut self, next: LoopState) {
        tracing::debug!(from = ?self.loop_state, to = ?next, "Loop state");
        self.loop_state = next;
    }

    /// Run one iteration of the loop.
    ///
    /// # Errors
    ///
    /// Only fatal (configuration) errors are returned; everything else is
    /// reported through the outcome and retried on a later tick.
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        let span = tracing::info_span!("tick", commit = tracing::field::Empty);
        let mut diagnostics = Diagnostics::default();

        let result = self.tick_inner(&mut diagnostics).instrument(span).await;
        diagnostics.summarise();
        self.enter(LoopState::Idle);
        result
    }

    async fn tick_inner(&mut self, diagnostics: &mut Diagnostics) -> Result<TickOutcome> {
        self.refresh_state();

        self.enter(LoopState::Detecting);
        let commit = match self.source.latest_commit(&self.settings.branch).await {
            Ok(commit) => commit,
            Err(e) => {
                let kind = e.kind();
                if kind == ErrorKind::Transient {
                    diagnostics.warn(Warning::source_unavailable(format!(
                        "Could not read tip of {}: {}",
                        self.settings.branch, e
                    )));
                } else {
                    tracing::error!(repo = %self.settings.repo, "Cannot track {}: {}", self.settings.branch, e);
                }
                return Ok(TickOutcome::DetectFailed {
                    kind,
                    reason: e.to_string(),
                });
            }
        };

        tracing::Span::current().record("commit", commit.sha().short());

        if !commit.is_newer_than(self.state.last_deployed_commit.as_ref()) {
            tracing::info!("No new commits on {}", commit.branch());
            return Ok(TickOutcome::NoChange);
        }

        tracing::info!(branch = commit.branch(), sha = %commit.sha(), "New commit detected");

        self.enter(LoopState::Building);
        let builder = &self.builder;
        let built = with_retry(&commit, self.policy, |attempt| builder.build(&commit, attempt)).await;
        let image = match built {
            Ok(image) => image,
            Err(e) => return phase_failed(e, commit),
        };

        self.enter(LoopState::Deploying);
        let deployer = &self.deployer;
        let deployed = with_retry(&commit, self.policy, |_| deployer.deploy(&image)).await;
        let outcome = match deployed {
            Ok(outcome) => outcome,
            Err(e) => return phase_failed(e, commit),
        };

        self.enter(LoopState::Recording);
        let mut next = self.state.clone();
        if let Err(e) = next.record_deployment(&commit, &outcome) {
            tracing::error!("Deployment result not recorded: {}", e);
            return Ok(TickOutcome::Failed {
                phase: Phase::Deploy,
                commit,
                reason: e.to_string(),
            });
        }
        match self.store.save(&next) {
            Ok(()) => self.unsaved = None,
            Err(e) => {
                diagnostics.warn(Warning::state_write(format!(
                    "Deployed {} but could not save state: {}",
                    commit.sha().short(),
                    e
                )));
                self.unsaved = Some(next.clone());
            }
        }
        self.state = next;

        tracing::info!(image = %outcome.image, revision = ?outcome.revision, "Deployment recorded");
        Ok(TickOutcome::Deployed {
            commit,
            image: outcome.image,
            revision: outcome.revision,
        })
    }

    /// Pick up the state file as it is now, so operator edits apply on the next tick.
    fn refresh_state(&mut self) {
        match self.unsaved {
            Some(ref pending) => {
                tracing::debug!("Using in-memory state; last save failed");
                self.state = pending.clone();
            }
            None => {
                self.state = self.store.load(&self.settings.repo, &self.settings.branch);
            }
        }
    }

    /// Tick forever, pausing `interval` between ticks, until `shutdown` resolves.
    ///
    /// The first tick runs immediately. Shutdown drops any in-flight tick
    /// without writing state; an unfinished build job is adopted on the next
    /// start.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let interval = self.settings.interval;

        tracing::info!(
            repo = %self.settings.repo,
            branch = %self.settings.branch,
            interval = %humantime::format_duration(interval),
            "Starting control loop"
        );

        loop {
            tokio::select! {
                result = self.tick() => {
                    result?;
                }
                () = &mut shutdown => break,
            }

            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                () = &mut shutdown => break,
            }
        }

        tracing::info!("Shutdown requested; stopping control loop");
        Ok(())
    }
}

/// Fatal phase errors stop the process; the rest fail only this tick.
fn phase_failed(e: PhaseError, commit: CommitRef) -> Result<TickOutcome> {
    if e.kind() == ErrorKind::Configuration {
        return Err(Error::Phase(e));
    }
    tracing::error!("{}", e);
    Ok(TickOutcome::Failed {
        phase: e.phase(),
        commit,
        reason: e.to_string(),
    })
}
