// ABOUTME: Minimal GitHub REST client for branch tips and source archives.
// ABOUTME: Honours the token, TLS verification toggle, and optional CA bundle from settings.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use super::{CommitSource, SourceError};
use crate::config::{DEFAULT_GITHUB_API, Secret, Settings};
use crate::error::{Error, Result};
use crate::types::{CommitRef, CommitSha};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const ARCHIVE_TIMEOUT: Duration = Duration::from_secs(120);
const ACCEPT: &str = "application/vnd.github+json";

#[derive(Debug, Deserialize)]
struct CommitPayload {
    sha: Option<String>,
}

/// Talks to `api.github.com` (or a GitHub Enterprise API base).
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: String,
    repo: String,
    token: Option<Secret>,
}

impl GitHubClient {
    pub fn new(
        repo: &str,
        token: Option<Secret>,
        api_base: &str,
        verify_ssl: bool,
        ca_bundle: Option<&Path>,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("ci-runner/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10));

        if !verify_ssl {
            tracing::warn!("SSL verification is disabled for GitHub HTTP requests");
            builder = builder.danger_accept_invalid_certs(true);
        } else if let Some(path) = ca_bundle {
            let pem = std::fs::read(path).map_err(|_| Error::CaBundle(path.to_path_buf()))?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| Error::HttpClient(format!("invalid CA bundle: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }

        let http = builder
            .build()
            .map_err(|e| Error::HttpClient(e.to_string()))?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            repo: repo.to_string(),
            token,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(
            &settings.repo,
            settings.git_token.clone(),
            &settings.github_api_url,
            settings.verify_ssl,
            settings.ca_bundle_path.as_deref(),
        )
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.http.get(url).header(reqwest::header::ACCEPT, ACCEPT);
        match self.token {
            Some(ref token) => request.bearer_auth(token.expose()),
            None => request,
        }
    }

    /// Where the gzipped tarball of the repository at `sha` lives.
    ///
    /// Authenticated or enterprise setups go through the API tarball
    /// endpoint; public github.com repositories use the archive link.
    pub fn archive_url(&self, sha: &CommitSha) -> String {
        if self.token.is_some() || self.api_base != DEFAULT_GITHUB_API {
            format!("{}/repos/{}/tarball/{}", self.api_base, self.repo, sha)
        } else {
            format!("https://github.com/{}/archive/{}.tar.gz", self.repo, sha)
        }
    }

    /// Download the repository tarball at `sha`.
    pub async fn download_archive(&self, sha: &CommitSha) -> std::result::Result<Bytes, SourceError> {
        let url = self.archive_url(sha);
        tracing::debug!(%url, "Downloading repository archive");

        let response = self
            .get(&url)
            .timeout(ARCHIVE_TIMEOUT)
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(format!("archive download failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, &format!("archive for {}", sha.short())));
        }

        response
            .bytes()
            .await
            .map_err(|e| SourceError::Unavailable(format!("archive download interrupted: {e}")))
    }
}

#[async_trait]
impl CommitSource for GitHubClient {
    async fn latest_commit(&self, branch: &str) -> std::result::Result<CommitRef, SourceError> {
        let url = format!("{}/repos/{}/commits/{}", self.api_base, self.repo, branch);

        let response = self
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(classify_status(
                status,
                &format!("{}@{}", self.repo, branch),
            ));
        }

        let payload: CommitPayload = response
            .json()
            .await
            .map_err(|e| SourceError::InvalidResponse(e.to_string()))?;

        let sha = payload
            .sha
            .ok_or_else(|| SourceError::InvalidResponse("response did not include a commit sha".into()))?;
        let sha = CommitSha::new(&sha).map_err(|e| SourceError::InvalidResponse(e.to_string()))?;

        tracing::debug!(repo = %self.repo, branch, sha = %sha, "Fetched branch tip");
        Ok(CommitRef::new(sha, branch))
    }
}

/// Map a non-success status to the error taxonomy.
fn classify_status(status: StatusCode, what: &str) -> SourceError {
    match status {
        StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => {
            SourceError::RepositoryNotFound(format!("{what}: {status}"))
        }
        _ => SourceError::Unavailable(format!("failed to fetch {what}: {status}")),
    }
}
