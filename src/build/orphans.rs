// ABOUTME: Orphan build job detection and cleanup.
// ABOUTME: Finds jobs from interrupted runs that belong to a commit no longer being built.

use super::backend::{BackendError, JobBackend, JobSummary};
use crate::types::ResourceName;

/// Detect orphaned build jobs for a release.
///
/// An orphan is a job that:
/// - Is managed by this runner and labelled for `release`
/// - Is not the job for the commit currently being built
pub async fn detect_orphans<B: JobBackend>(
    backend: &B,
    release: &ResourceName,
    current: &ResourceName,
) -> Result<Vec<JobSummary>, BackendError> {
    let jobs = backend.list_jobs(release).await?;

    Ok(jobs
        .into_iter()
        .filter(|job| job.name != current.as_str())
        .collect())
}

/// Delete orphaned jobs, best effort.
///
/// Returns the number of jobs deleted.
pub async fn cleanup_orphans<B: JobBackend>(backend: &B, orphans: &[JobSummary]) -> usize {
    let mut cleaned = 0;

    for job in orphans {
        let name = match ResourceName::new(&job.name) {
            Ok(name) => name,
            Err(e) => {
                tracing::warn!(job = %job.name, "Skipping job with unexpected name: {}", e);
                continue;
            }
        };

        match backend.delete_job(&name).await {
            Ok(()) => {
                tracing::info!(
                    job = %job.name,
                    commit = job.commit.as_deref().unwrap_or("unknown"),
                    status = %job.status,
                    "Deleted orphaned build job"
                );
                cleaned += 1;
            }
            Err(e) => tracing::warn!(job = %job.name, "Failed to delete orphaned build job: {}", e),
        }
    }

    cleaned
}
