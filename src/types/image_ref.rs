// ABOUTME: Image repository parsing and per-commit image tag derivation.
// ABOUTME: ImageRef validates the configured repository; ImageReference names a build's outputs.

use super::commit::CommitRef;
use std::fmt;
use thiserror::Error;

/// Maximum length of an OCI tag.
const MAX_TAG_LEN: usize = 128;
const LATEST_SUFFIX: &str = "-latest";

#[derive(Debug, Error)]
pub enum ParseImageRefError {
    #[error("image reference cannot be empty")]
    Empty,

    #[error("invalid character in image reference: {0}")]
    InvalidChar(char),

    #[error("invalid image reference format: {0}")]
    InvalidFormat(String),

    #[error("image repository must not carry a tag or digest: {0}")]
    TagNotAllowed(String),

    #[error("image repository path must be lowercase: {0}")]
    NotLowercase(String),
}

/// A registry repository such as `ghcr.io/org/app` or `localhost:5000/app`.
///
/// Tags are derived per commit, so a configured reference carrying a tag or
/// digest is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    registry: Option<String>,
    name: String,
}

impl ImageRef {
    pub fn parse(input: &str) -> Result<Self, ParseImageRefError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ParseImageRefError::Empty);
        }

        for c in input.chars() {
            if !c.is_ascii_alphanumeric()
                && c != '/'
                && c != ':'
                && c != '.'
                && c != '-'
                && c != '_'
                && c != '@'
            {
                return Err(ParseImageRefError::InvalidChar(c));
            }
        }

        if input.contains('@') {
            return Err(ParseImageRefError::TagNotAllowed(input.to_string()));
        }

        // A colon after the last slash is a tag; before it, a registry port.
        if let Some((_, after)) = input.rsplit_once(':')
            && !after.contains('/')
        {
            return Err(ParseImageRefError::TagNotAllowed(input.to_string()));
        }

        if input.starts_with('/') || input.ends_with('/') || input.contains("//") {
            return Err(ParseImageRefError::InvalidFormat(input.to_string()));
        }

        let (registry, name) = Self::parse_registry_and_name(input)?;

        // Registry hosts are case-insensitive; repository paths are not accepted in uppercase.
        if name.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(ParseImageRefError::NotLowercase(input.to_string()));
        }

        Ok(Self { registry, name })
    }

    fn parse_registry_and_name(
        input: &str,
    ) -> Result<(Option<String>, String), ParseImageRefError> {
        // A registry is present if the first component contains a dot or colon,
        // or is "localhost"
        let parts: Vec<&str> = input.splitn(2, '/').collect();

        match parts.as_slice() {
            [name] => Ok((None, (*name).to_string())),
            [first, rest] => {
                if first.contains('.') || first.contains(':') || *first == "localhost" {
                    Ok((Some((*first).to_string()), (*rest).to_string()))
                } else {
                    Ok((None, input.to_string()))
                }
            }
            _ => Err(ParseImageRefError::InvalidFormat(input.to_string())),
        }
    }

    pub fn registry(&self) -> Option<&str> {
        self.registry.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref registry) = self.registry {
            write!(f, "{}/", registry)?;
        }
        write!(f, "{}", self.name)
    }
}

/// The two tags every build pushes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTags {
    pub commit_tag: String,
    pub branch_latest_tag: String,
}

/// What a build for a given commit produces. Recomputable at any time from
/// the commit and the configured repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    repository: String,
    tags: ImageTags,
}

impl ImageReference {
    pub fn for_commit(repository: &ImageRef, commit: &CommitRef) -> Self {
        Self {
            repository: repository.to_string(),
            tags: ImageTags {
                commit_tag: commit.sha().to_string(),
                branch_latest_tag: branch_latest_tag(commit.branch()),
            },
        }
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tags(&self) -> &ImageTags {
        &self.tags
    }

    pub fn commit_tag(&self) -> &str {
        &self.tags.commit_tag
    }

    /// `repository:<sha>`
    pub fn commit_image(&self) -> String {
        format!("{}:{}", self.repository, self.tags.commit_tag)
    }

    /// `repository:<branch>-latest`
    pub fn branch_image(&self) -> String {
        format!("{}:{}", self.repository, self.tags.branch_latest_tag)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.commit_image())
    }
}

/// `<branch>-latest`, with the branch rewritten into the tag alphabet
/// (`[A-Za-z0-9_.-]`, first character not `.` or `-`).
pub fn branch_latest_tag(branch: &str) -> String {
    let budget = MAX_TAG_LEN - LATEST_SUFFIX.len();
    let mut tag: String = branch
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .take(budget)
        .collect();

    match tag.chars().next() {
        None => tag.push_str("branch"),
        Some('.') | Some('-') => tag.replace_range(..1, "_"),
        Some(_) => {}
    }

    tag.push_str(LATEST_SUFFIX);
    tag
}
