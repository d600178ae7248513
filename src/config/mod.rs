// ABOUTME: Runner settings loaded from environment variables.
// ABOUTME: Applies defaults and floors, validates values, and redacts secrets for display.

mod parse;
mod secret;

pub use parse::{parse_bool, parse_count, parse_duration};
pub use secret::Secret;

use crate::error::{Error, Result};
use crate::types::{ImageRef, ResourceName};
use parse::{serialize_display, serialize_duration};
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_CICD_NAMESPACE: &str = "cicd";
pub const DEFAULT_DEPLOY_NAMESPACE: &str = "default";
pub const DEFAULT_STATE_PATH: &str = "/data/runner-state.json";
pub const DEFAULT_KANIKO_IMAGE: &str = "gcr.io/kaniko-project/executor:latest";
pub const DEFAULT_GITHUB_API: &str = "https://api.github.com";

/// Shortest allowed pause between ticks.
pub const MIN_INTERVAL: Duration = Duration::from_secs(5);
/// Fewest allowed attempts per phase.
pub const MIN_ATTEMPTS: u32 = 1;

#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    /// `owner/name` on the source-control host.
    pub repo: String,
    pub branch: String,
    #[serde(serialize_with = "serialize_display")]
    pub image: ImageRef,
    pub chart_path: PathBuf,
    #[serde(serialize_with = "serialize_display")]
    pub release: ResourceName,
    #[serde(serialize_with = "serialize_display")]
    pub cicd_namespace: ResourceName,
    #[serde(serialize_with = "serialize_display")]
    pub deploy_namespace: ResourceName,
    #[serde(serialize_with = "serialize_duration")]
    pub interval: Duration,
    pub max_retries: u32,
    pub git_token: Option<Secret>,
    pub registry_secret: Option<String>,
    pub state_path: PathBuf,
    pub verify_ssl: bool,
    pub ca_bundle_path: Option<PathBuf>,
    #[serde(serialize_with = "serialize_duration")]
    pub build_timeout: Duration,
    #[serde(serialize_with = "serialize_duration")]
    pub build_poll_interval: Duration,
    #[serde(serialize_with = "serialize_duration")]
    pub helm_timeout: Duration,
    pub kaniko_image: String,
    pub dockerfile: String,
    pub service_account: String,
    pub helm_bin: PathBuf,
    pub github_api_url: String,
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load settings through an arbitrary lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let require = |name: &str| get(name).ok_or_else(|| Error::MissingEnvVar(name.to_string()));
        let name_or = |name: &str, default: &str| -> Result<ResourceName> {
            let raw = get(name).unwrap_or_else(|| default.to_string());
            ResourceName::new(raw.trim())
                .map_err(|e| Error::InvalidConfig(format!("{name}: {e}")))
        };

        let interval = match get("INTERVAL") {
            Some(raw) => parse_duration("INTERVAL", &raw)?.max(MIN_INTERVAL),
            None => Duration::from_secs(300),
        };

        let max_retries = match get("MAX_RETRIES") {
            Some(raw) => parse_count("MAX_RETRIES", &raw, MIN_ATTEMPTS)?,
            None => 3,
        };

        let image_raw = require("IMAGE")?;
        let image =
            ImageRef::parse(&image_raw).map_err(|e| Error::InvalidConfig(format!("IMAGE: {e}")))?;

        let build_poll_interval = match get("BUILD_POLL_INTERVAL") {
            Some(raw) => parse_duration("BUILD_POLL_INTERVAL", &raw)?.max(Duration::from_secs(1)),
            None => Duration::from_secs(10),
        };

        let settings = Settings {
            repo: require("REPO")?.trim().to_string(),
            branch: get("BRANCH").unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
            image,
            chart_path: PathBuf::from(require("CHART_PATH")?.trim()),
            release: ResourceName::new(require("RELEASE")?.trim())
                .map_err(|e| Error::InvalidConfig(format!("RELEASE: {e}")))?,
            cicd_namespace: name_or("CICD_NS", DEFAULT_CICD_NAMESPACE)?,
            deploy_namespace: name_or("DEPLOY_NS", DEFAULT_DEPLOY_NAMESPACE)?,
            interval,
            max_retries,
            git_token: get("GIT_TOKEN").map(Secret::new),
            registry_secret: get("REGISTRY_SECRET"),
            state_path: get("STATE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_PATH)),
            verify_ssl: match get("VERIFY_SSL") {
                Some(raw) => parse_bool("VERIFY_SSL", &raw)?,
                None => true,
            },
            ca_bundle_path: get("CA_BUNDLE_PATH").map(PathBuf::from),
            build_timeout: match get("BUILD_TIMEOUT") {
                Some(raw) => parse_duration("BUILD_TIMEOUT", &raw)?,
                None => Duration::from_secs(1800),
            },
            build_poll_interval,
            helm_timeout: match get("HELM_TIMEOUT") {
                Some(raw) => parse_duration("HELM_TIMEOUT", &raw)?,
                None => Duration::from_secs(300),
            },
            kaniko_image: get("KANIKO_IMAGE").unwrap_or_else(|| DEFAULT_KANIKO_IMAGE.to_string()),
            dockerfile: get("DOCKERFILE").unwrap_or_else(|| "Dockerfile".to_string()),
            service_account: get("SERVICE_ACCOUNT").unwrap_or_else(|| "deployer".to_string()),
            helm_bin: get("HELM_BIN")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("helm")),
            github_api_url: get("GITHUB_API_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_GITHUB_API.to_string()),
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Check invariants that construction alone cannot guarantee.
    ///
    /// Runs at startup and again before every deploy attempt.
    pub fn validate(&self) -> Result<()> {
        validate_repo(&self.repo)?;

        if self.branch.trim().is_empty() {
            return Err(Error::InvalidConfig("BRANCH cannot be blank".to_string()));
        }

        validate_chart_path(&self.chart_path)?;

        if self.interval < MIN_INTERVAL {
            return Err(Error::InvalidConfig(format!(
                "INTERVAL must be at least {}s",
                MIN_INTERVAL.as_secs()
            )));
        }

        if self.max_retries < MIN_ATTEMPTS {
            return Err(Error::InvalidConfig(
                "MAX_RETRIES must be at least 1".to_string(),
            ));
        }

        if self.build_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "BUILD_TIMEOUT must be positive".to_string(),
            ));
        }

        if self.helm_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "HELM_TIMEOUT must be positive".to_string(),
            ));
        }

        if let Some(ref ca) = self.ca_bundle_path
            && !ca.is_file()
        {
            return Err(Error::CaBundle(ca.clone()));
        }

        Ok(())
    }
}

fn validate_repo(repo: &str) -> Result<()> {
    let valid_part = |part: &str| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    };

    match repo.split_once('/') {
        Some((owner, name)) if valid_part(owner) && valid_part(name) => Ok(()),
        _ => Err(Error::InvalidConfig(format!(
            "REPO must look like owner/name, got {repo:?}"
        ))),
    }
}

fn validate_chart_path(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(Error::InvalidConfig("CHART_PATH cannot be empty".to_string()));
    }

    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(Error::InvalidConfig(format!(
            "CHART_PATH must be relative to the repository root: {}",
            path.display()
        )));
    }
    Ok(())
}
