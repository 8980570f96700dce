//! Tracked-repository domain model: scraped metadata, structural snapshot,
//! cohesiveness scoring, and the scrape task shape carried on the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::JobPriority;

/// Severity of a cohesiveness issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Info,
    Warning,
    Critical,
}

impl IssueSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// Kind of cohesiveness issue. Naming and dependency kinds are hooks for
/// future checks; today's scorer emits the first two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    MissingConfig,
    StructureMismatch,
    NamingInconsistency,
    DependencyIssue,
}

/// A single finding from the cohesiveness scorer. `auto_fixable` decides
/// whether healing may enqueue a fix without a human.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohesivenessIssue {
    #[serde(rename = "type")]
    pub kind: IssueKind,
    pub severity: IssueSeverity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    pub auto_fixable: bool,
}

/// Four sub-scores (0-100) and their rounded mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohesivenessScore {
    pub structure: u8,
    pub naming: u8,
    pub dependencies: u8,
    pub config: u8,
    pub overall: u8,
    pub issues: Vec<CohesivenessIssue>,
    pub checked_at: DateTime<Utc>,
}

impl CohesivenessScore {
    /// Issues that healing may act on without a human in the loop.
    pub fn critical_auto_fixable(&self) -> Vec<&CohesivenessIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Critical && i.auto_fixable)
            .collect()
    }
}

/// Structural snapshot of a repository tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoStructure {
    pub files: Vec<String>,
    pub directories: Vec<String>,
    pub config_files: Vec<String>,
    pub has_package_manifest: bool,
    pub has_type_config: bool,
    pub has_deploy_config: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_language: Option<String>,
}

impl RepoStructure {
    pub fn has_src_dir(&self) -> bool {
        self.directories.iter().any(|d| d == "src" || d.starts_with("src/"))
    }

    pub fn has_readme(&self) -> bool {
        self.files
            .iter()
            .any(|f| f.to_lowercase().starts_with("readme"))
    }
}

/// Canonical record for a tracked repository, keyed by "owner/name".
///
/// A repo is present in the engine iff it has been scraped at least once.
/// The core never deletes repos; eviction is an external policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoData {
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub default_branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pushed_at: Option<DateTime<Utc>>,
    pub structure: RepoStructure,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cohesiveness: Option<CohesivenessScore>,
    /// ETag from the last metadata fetch, used for conditional requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    pub last_scraped_at: DateTime<Utc>,
}

impl RepoData {
    /// Short name without the owner prefix.
    pub fn short_name(&self) -> &str {
        self.full_name
            .split_once('/')
            .map(|(_, name)| name)
            .unwrap_or(&self.full_name)
    }
}

/// Whether a scrape walks the whole tree or leans on the cached ETag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeType {
    Full,
    Incremental,
}

/// Message shape on the scrape queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeTask {
    pub id: String,
    /// Repository short name; the scraper resolves the owner from config
    pub repo: String,
    pub scrape_type: ScrapeType,
    pub priority: JobPriority,
    pub requested_at: DateTime<Utc>,
}

/// One entry in the engine's recent-error ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub at: DateTime<Utc>,
    pub message: String,
}
