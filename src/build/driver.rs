// ABOUTME: Build driver: runs one commit's build job from submission to deletion.
// ABOUTME: Clears orphans first so at most one build job per runner exists.

use async_trait::async_trait;
use std::sync::Arc;

use super::backend::JobBackend;
use super::job::BuildJob;
use super::orphans::{cleanup_orphans, detect_orphans};
use super::spec::BuildSpec;
use super::{BuildAttempt, BuildError, ImageBuilder};
use crate::config::Settings;
use crate::types::{CommitRef, ImageReference};

pub struct BuildDriver<B> {
    backend: B,
    settings: Arc<Settings>,
}

impl<B: JobBackend> BuildDriver<B> {
    pub fn new(backend: B, settings: Arc<Settings>) -> Self {
        Self { backend, settings }
    }

    async fn clear_orphans(&self, spec: &BuildSpec) {
        match detect_orphans(&self.backend, &spec.release, &spec.name).await {
            Ok(orphans) if !orphans.is_empty() => {
                let cleaned = cleanup_orphans(&self.backend, &orphans).await;
                tracing::info!(
                    found = orphans.len(),
                    cleaned,
                    "Cleaned up build jobs from interrupted runs"
                );
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Could not list existing build jobs: {}", e),
        }
    }
}

#[async_trait]
impl<B: JobBackend> ImageBuilder for BuildDriver<B> {
    async fn build(&self, commit: &CommitRef, attempt: u32) -> Result<ImageReference, BuildError> {
        let spec = BuildSpec::new(&self.settings, commit);
        self.clear_orphans(&spec).await;

        let job = BuildJob::submit(&self.backend, &spec, BuildAttempt::new(commit, attempt)).await?;

        match job
            .wait(
                &self.backend,
                self.settings.build_timeout,
                self.settings.build_poll_interval,
            )
            .await
        {
            Ok(finished) => finished.cleanup(&self.backend).await,
            Err((job, err)) => {
                job.abandon(&self.backend).await;
                Err(err)
            }
        }
    }
}
