//! Action identity parsing
//!
//! A `uses:` value names one of:
//!
//! - a remote action: `owner/repo@ref` or `owner/repo/sub/dir@ref`
//! - a remote reusable workflow: `owner/repo/.github/workflows/ci.yml@ref`
//! - a local action or workflow inside the repository: `./.github/actions/setup`
//!
//! Parsing is pure and total: any input either yields an [`ActionIdentity`]
//! or an [`IdentityError`]. Two raw strings that normalize to the same key
//! are the same identity.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

/// Host serving raw repository content
pub const DEFAULT_RAW_BASE_URL: &str = "https://raw.githubusercontent.com";
/// Host serving the browsable repository view
pub const DEFAULT_WEB_BASE_URL: &str = "https://github.com";
/// REST API answering release queries
pub const DEFAULT_API_BASE_URL: &str = "https://api.github.com";

const ACTION_FILE: &str = "action.yml";
const ACTION_FILE_ALT: &str = "action.yaml";
const LOCAL_PREFIX: &str = "./";

/// What the descriptor behind an identity describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    /// `action.yml` with top-level `inputs` / `outputs`
    Action,
    /// Reusable workflow with `on.workflow_call.inputs` / `outputs`
    Workflow,
}

/// Reasons a raw reference cannot be turned into an identity
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Empty reference")]
    Empty,

    #[error("Missing '@<ref>' in reference '{0}'")]
    MissingRef(String),

    #[error("Invalid ref in reference '{0}'")]
    InvalidRef(String),

    #[error("Expected 'owner/repo' in reference '{0}'")]
    InvalidSlug(String),

    #[error("Local reference escapes the repository root: '{0}'")]
    OutsideRepository(String),

    #[error("Unsupported reference '{0}'")]
    Unsupported(String),
}

/// Normalized identity of an action or reusable workflow reference.
///
/// Equality and hashing use the normalized key only.
#[derive(Debug, Clone)]
pub struct ActionIdentity {
    key: String,
    slug: String,
    git_ref: Option<String>,
    sub_path: String,
    kind: ReferenceKind,
    local: bool,
}

impl ActionIdentity {
    /// Parse a raw `uses:` value.
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        let cleaned = clean(raw);
        if cleaned.is_empty() {
            return Err(IdentityError::Empty);
        }
        if cleaned.contains("://") || cleaned.chars().any(char::is_whitespace) {
            return Err(IdentityError::Unsupported(cleaned.to_string()));
        }

        match cleaned.rfind('@') {
            Some(at) => Self::remote(cleaned, at),
            None if cleaned.starts_with(LOCAL_PREFIX) => Self::local(cleaned),
            None => Err(IdentityError::MissingRef(cleaned.to_string())),
        }
    }

    fn remote(cleaned: &str, at: usize) -> Result<Self, IdentityError> {
        let (path, git_ref) = (&cleaned[..at], &cleaned[at + 1..]);
        if git_ref.is_empty() || git_ref.contains('/') {
            return Err(IdentityError::InvalidRef(cleaned.to_string()));
        }

        let invalid_slug = || IdentityError::InvalidSlug(cleaned.to_string());
        let (owner, rest) = path.split_once('/').ok_or_else(invalid_slug)?;
        let (repo, sub) = rest.split_once('/').unwrap_or((rest, ""));
        if !is_segment(owner) || !is_segment(repo) {
            return Err(invalid_slug());
        }

        let sub_segments: Vec<&str> = sub.split('/').filter(|s| !s.is_empty()).collect();
        if sub_segments.iter().any(|s| !is_segment(s)) {
            return Err(invalid_slug());
        }

        let slug = format!("{}/{}", owner, repo);
        let sub_path: String = sub_segments.iter().map(|s| format!("/{}", s)).collect();
        let kind = kind_of(&sub_path);

        Ok(Self {
            key: format!("{}{}@{}", slug, sub_path, git_ref),
            slug,
            git_ref: Some(git_ref.to_string()),
            sub_path,
            kind,
            local: false,
        })
    }

    fn local(cleaned: &str) -> Result<Self, IdentityError> {
        let mut segments: Vec<&str> = Vec::new();
        for segment in cleaned[LOCAL_PREFIX.len()..].split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        return Err(IdentityError::OutsideRepository(cleaned.to_string()));
                    }
                }
                other => segments.push(other),
            }
        }
        if segments.is_empty() {
            return Err(IdentityError::Empty);
        }

        let path = segments.join("/");
        Ok(Self {
            key: format!("{}{}", LOCAL_PREFIX, path),
            kind: kind_of(&path),
            slug: path,
            git_ref: None,
            sub_path: String::new(),
            local: true,
        })
    }

    /// Normalized string form used as cache key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// `owner/repo` for remote identities, the repository-relative path for local ones
    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// Tag, branch or sha; `None` for local identities
    pub fn git_ref(&self) -> Option<&str> {
        self.git_ref.as_deref()
    }

    /// Path inside the repository, with a leading `/`, or empty
    pub fn sub_path(&self) -> &str {
        &self.sub_path
    }

    pub fn kind(&self) -> ReferenceKind {
        self.kind
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    pub fn is_action(&self) -> bool {
        self.kind == ReferenceKind::Action
    }

    /// Display name: `owner/repo` for remote references, the path for local ones
    pub fn name(&self) -> &str {
        &self.slug
    }

    /// Candidate descriptor paths, in lookup order.
    ///
    /// Remote paths are relative to the raw content host
    /// (`owner/repo/ref/...`); local paths are relative to the repository root.
    pub fn descriptor_paths(&self) -> Vec<String> {
        let base = match &self.git_ref {
            Some(git_ref) => format!("{}/{}{}", self.slug, git_ref, self.sub_path),
            None => self.slug.clone(),
        };
        match self.kind {
            ReferenceKind::Workflow => vec![base],
            ReferenceKind::Action => vec![
                format!("{}/{}", base, ACTION_FILE),
                format!("{}/{}", base, ACTION_FILE_ALT),
            ],
        }
    }

    /// Primary raw descriptor URL against the given host, `None` for local identities
    pub fn descriptor_url_with(&self, raw_base_url: &str) -> Option<String> {
        if self.local {
            return None;
        }
        self.descriptor_paths()
            .into_iter()
            .next()
            .map(|path| join_url(raw_base_url, &path))
    }

    /// Primary raw descriptor URL on raw.githubusercontent.com
    pub fn descriptor_url(&self) -> Option<String> {
        self.descriptor_url_with(DEFAULT_RAW_BASE_URL)
    }

    /// Browsable URL of the descriptor, `None` for local identities
    pub fn github_url_with(&self, web_base_url: &str) -> Option<String> {
        let git_ref = self.git_ref.as_deref()?;
        let file = match self.kind {
            ReferenceKind::Action => format!("/{}", ACTION_FILE),
            ReferenceKind::Workflow => String::new(),
        };
        Some(join_url(
            web_base_url,
            &format!("{}/blob/{}{}{}", self.slug, git_ref, self.sub_path, file),
        ))
    }

    pub fn github_url(&self) -> Option<String> {
        self.github_url_with(DEFAULT_WEB_BASE_URL)
    }

    /// Marketplace listing for remote actions
    pub fn marketplace_url(&self) -> Option<String> {
        (!self.local && self.is_action())
            .then(|| format!("{}/marketplace/{}", DEFAULT_WEB_BASE_URL, self.slug))
    }
}

/// Strip whitespace and the quoting YAML scalars may carry
fn clean(raw: &str) -> &str {
    let trimmed = raw.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| {
            trimmed
                .strip_prefix('\'')
                .and_then(|s| s.strip_suffix('\''))
        })
        .unwrap_or(trimmed);
    unquoted.trim()
}

fn is_segment(segment: &str) -> bool {
    !segment.is_empty() && segment != "." && segment != ".." && !segment.contains('@')
}

fn kind_of(path: &str) -> ReferenceKind {
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".yml") || lower.ends_with(".yaml") {
        ReferenceKind::Workflow
    } else {
        ReferenceKind::Action
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}

impl PartialEq for ActionIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for ActionIdentity {}

impl Hash for ActionIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for ActionIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ActionIdentity {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

impl fmt::Display for ActionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl FromStr for ActionIdentity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ActionIdentity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.key)
    }
}

impl<'de> Deserialize<'de> for ActionIdentity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_simple_action() {
        let id = ActionIdentity::parse("actions/setup-java@main").unwrap();
        assert_eq!(id.key(), "actions/setup-java@main");
        assert_eq!(id.slug(), "actions/setup-java");
        assert_eq!(id.git_ref(), Some("main"));
        assert_eq!(id.sub_path(), "");
        assert_eq!(id.kind(), ReferenceKind::Action);
        assert!(!id.is_local());
        assert_eq!(
            id.descriptor_url().as_deref(),
            Some("https://raw.githubusercontent.com/actions/setup-java/main/action.yml")
        );
    }

    #[test]
    fn test_parse_action_in_subdirectory() {
        let id = ActionIdentity::parse("github/codeql-action/init@v3").unwrap();
        assert_eq!(id.slug(), "github/codeql-action");
        assert_eq!(id.sub_path(), "/init");
        assert_eq!(
            id.descriptor_paths(),
            vec![
                "github/codeql-action/v3/init/action.yml".to_string(),
                "github/codeql-action/v3/init/action.yaml".to_string(),
            ]
        );
        assert_eq!(
            id.github_url().as_deref(),
            Some("https://github.com/github/codeql-action/blob/v3/init/action.yml")
        );
    }

    #[test]
    fn test_parse_reusable_workflow() {
        let id = ActionIdentity::parse("octo/shared/.github/workflows/build.yml@v1").unwrap();
        assert_eq!(id.kind(), ReferenceKind::Workflow);
        assert_eq!(
            id.descriptor_url().as_deref(),
            Some("https://raw.githubusercontent.com/octo/shared/v1/.github/workflows/build.yml")
        );
        assert_eq!(id.marketplace_url(), None);
    }

    #[test]
    fn test_normalization_yields_same_identity() {
        let a = ActionIdentity::parse("  \"actions/checkout@v4\" ").unwrap();
        let b = ActionIdentity::parse("actions/checkout/@v4").unwrap();
        let c = ActionIdentity::parse("'actions/checkout@v4'").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.key(), "actions/checkout@v4");
    }

    #[test]
    fn test_case_sensitive_keys() {
        let a = ActionIdentity::parse("Actions/Checkout@v4").unwrap();
        let b = ActionIdentity::parse("actions/checkout@v4").unwrap();
        assert_ne!(a, b);
        let c = ActionIdentity::parse("actions/checkout@V4").unwrap();
        assert_ne!(b, c);
    }

    #[test]
    fn test_ref_split_on_last_at() {
        let err = ActionIdentity::parse("owner/repo@v1@v2").unwrap_err();
        assert!(matches!(err, IdentityError::InvalidSlug(_)));
    }

    #[test]
    fn test_invalid_references() {
        assert_eq!(ActionIdentity::parse(""), Err(IdentityError::Empty));
        assert_eq!(ActionIdentity::parse("   "), Err(IdentityError::Empty));
        assert!(matches!(
            ActionIdentity::parse("actions/checkout"),
            Err(IdentityError::MissingRef(_))
        ));
        assert!(matches!(
            ActionIdentity::parse("checkout@v4"),
            Err(IdentityError::InvalidSlug(_))
        ));
        assert!(matches!(
            ActionIdentity::parse("actions/checkout@feature/x"),
            Err(IdentityError::InvalidRef(_))
        ));
        assert!(matches!(
            ActionIdentity::parse("actions/checkout@"),
            Err(IdentityError::InvalidRef(_))
        ));
        assert!(matches!(
            ActionIdentity::parse("/checkout@v4"),
            Err(IdentityError::InvalidSlug(_))
        ));
        assert!(matches!(
            ActionIdentity::parse("docker://alpine:3.8"),
            Err(IdentityError::Unsupported(_))
        ));
        assert!(matches!(
            ActionIdentity::parse("./foo@v1"),
            Err(IdentityError::InvalidSlug(_))
        ));
    }

    #[test]
    fn test_parse_local_action() {
        let id = ActionIdentity::parse("./.github/actions/setup/").unwrap();
        assert!(id.is_local());
        assert_eq!(id.key(), "./.github/actions/setup");
        assert_eq!(id.git_ref(), None);
        assert_eq!(id.descriptor_url(), None);
        assert_eq!(id.github_url(), None);
        assert_eq!(
            id.descriptor_paths(),
            vec![
                ".github/actions/setup/action.yml".to_string(),
                ".github/actions/setup/action.yaml".to_string(),
            ]
        );

        let same = ActionIdentity::parse("./.github/./actions//setup").unwrap();
        assert_eq!(id, same);
    }

    #[test]
    fn test_parse_local_workflow() {
        let id = ActionIdentity::parse("./.github/workflows/reusable.yaml").unwrap();
        assert!(id.is_local());
        assert_eq!(id.kind(), ReferenceKind::Workflow);
        assert_eq!(
            id.descriptor_paths(),
            vec![".github/workflows/reusable.yaml".to_string()]
        );
    }

    #[test]
    fn test_local_path_must_stay_inside_repository() {
        assert!(matches!(
            ActionIdentity::parse("./../outside"),
            Err(IdentityError::OutsideRepository(_))
        ));
        let id = ActionIdentity::parse("./a/../b").unwrap();
        assert_eq!(id.key(), "./b");
    }

    #[test]
    fn test_serde_as_key_string() {
        let id = ActionIdentity::parse("actions/checkout@v4").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"actions/checkout@v4\"");
        let back: ActionIdentity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<ActionIdentity>("\"nope\"").is_err());
    }
}
