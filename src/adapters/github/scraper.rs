//! GitHub REST v3 scraper.
//!
//! Fetches repository metadata with ETag conditional requests and walks the
//! git tree to build the structural snapshot the cohesiveness scorer
//! consumes.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::domain::error::ScrapeError;
use crate::domain::models::{RepoData, RepoStructure, ScrapeType, ScraperConfig};
use crate::domain::ports::RepoScraper;

/// Root-level files that count as a project manifest.
const MANIFEST_FILES: &[&str] = &[
    "package.json",
    "Cargo.toml",
    "pyproject.toml",
    "go.mod",
    "pom.xml",
    "Gemfile",
];

/// Root-level files that count as type-checker configuration.
const TYPE_CONFIG_FILES: &[&str] = &["tsconfig.json", "jsconfig.json", "pyrightconfig.json"];

/// Root-level files that count as deployment configuration.
const DEPLOY_CONFIG_FILES: &[&str] = &[
    "wrangler.toml",
    "wrangler.jsonc",
    "Dockerfile",
    "docker-compose.yml",
    "fly.toml",
];

#[derive(Debug, Deserialize)]
struct RepoResponse {
    full_name: String,
    description: Option<String>,
    default_branch: String,
    pushed_at: Option<DateTime<Utc>>,
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

pub struct GithubScraper {
    http: Client,
    api_base: String,
    backup_api_base: String,
    org: String,
    token: Option<String>,
}

impl GithubScraper {
    pub fn new(config: &ScraperConfig, org: String, token: Option<String>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .unwrap_or_default();

        Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            backup_api_base: config.backup_api_base.trim_end_matches('/').to_string(),
            org,
            token,
        }
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .http
            .get(url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header("User-Agent", "roadwarden");
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        req
    }

    async fn fetch_tree(&self, full_name: &str, branch: &str) -> Result<Vec<TreeEntry>, ScrapeError> {
        let url = format!(
            "{}/repos/{}/git/trees/{}?recursive=1",
            self.api_base, full_name, branch
        );
        let resp = self
            .request(&url)
            .send()
            .await
            .map_err(|e| ScrapeError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            // An empty repository has no tree; treat it as an empty
            // structure rather than a failure.
            if status == StatusCode::NOT_FOUND || status == StatusCode::CONFLICT {
                return Ok(vec![]);
            }
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, body, full_name));
        }

        let tree: TreeResponse = resp
            .json()
            .await
            .map_err(|e| ScrapeError::Decode(e.to_string()))?;
        Ok(tree.tree)
    }
}

#[async_trait]
impl RepoScraper for GithubScraper {
    #[instrument(skip(self), fields(org = %self.org), err)]
    async fn scrape(
        &self,
        repo: &str,
        scrape_type: ScrapeType,
        etag: Option<&str>,
    ) -> Result<Option<RepoData>, ScrapeError> {
        let full_name = format!("{}/{repo}", self.org);
        let url = format!("{}/repos/{}", self.api_base, full_name);

        let mut req = self.request(&url);
        if let Some(etag) = etag {
            req = req.header("If-None-Match", etag);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ScrapeError::Network(e.to_string()))?;

        if resp.status() == StatusCode::NOT_MODIFIED {
            debug!(repo = %full_name, "etag match, nothing to do");
            return Ok(None);
        }

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, body, &full_name));
        }

        let fresh_etag = resp
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let meta: RepoResponse = resp
            .json()
            .await
            .map_err(|e| ScrapeError::Decode(e.to_string()))?;

        let entries = self
            .fetch_tree(&meta.full_name, &meta.default_branch)
            .await?;
        let mut structure = build_structure(&entries);
        structure.primary_language = meta.language;

        debug!(
            repo = %meta.full_name,
            scrape_type = ?scrape_type,
            files = structure.files.len(),
            "repository scraped"
        );

        Ok(Some(RepoData {
            full_name: meta.full_name,
            description: meta.description,
            default_branch: meta.default_branch,
            pushed_at: meta.pushed_at,
            structure,
            cohesiveness: None,
            etag: fresh_etag,
            last_scraped_at: Utc::now(),
        }))
    }

    async fn probe_backup(&self) -> Result<(), ScrapeError> {
        let url = format!("{}/rate_limit", self.backup_api_base);
        let resp = self
            .request(&url)
            .send()
            .await
            .map_err(|e| ScrapeError::Network(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ScrapeError::Upstream {
                status: status.as_u16(),
                message: "backup endpoint probe failed".into(),
            })
        }
    }
}

fn classify_status(status: StatusCode, body: String, full_name: &str) -> ScrapeError {
    match status {
        StatusCode::NOT_FOUND => ScrapeError::RepoMissing(full_name.to_string()),
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => ScrapeError::RateLimited,
        _ => ScrapeError::Upstream {
            status: status.as_u16(),
            message: body.chars().take(200).collect(),
        },
    }
}

fn build_structure(entries: &[TreeEntry]) -> RepoStructure {
    let mut structure = RepoStructure::default();

    for entry in entries {
        match entry.kind.as_str() {
            "tree" => structure.directories.push(entry.path.clone()),
            "blob" => {
                let is_root = !entry.path.contains('/');
                if is_root {
                    if MANIFEST_FILES.contains(&entry.path.as_str()) {
                        structure.has_package_manifest = true;
                        structure.config_files.push(entry.path.clone());
                    } else if TYPE_CONFIG_FILES.contains(&entry.path.as_str()) {
                        structure.has_type_config = true;
                        structure.config_files.push(entry.path.clone());
                    } else if DEPLOY_CONFIG_FILES.contains(&entry.path.as_str()) {
                        structure.has_deploy_config = true;
                        structure.config_files.push(entry.path.clone());
                    }
                }
                structure.files.push(entry.path.clone());
            }
            _ => {}
        }
    }

    structure
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(path: &str) -> TreeEntry {
        TreeEntry {
            path: path.into(),
            kind: "blob".into(),
        }
    }

    fn tree(path: &str) -> TreeEntry {
        TreeEntry {
            path: path.into(),
            kind: "tree".into(),
        }
    }

    #[test]
    fn structure_detects_root_configs() {
        let entries = vec![
            blob("package.json"),
            blob("tsconfig.json"),
            blob("wrangler.toml"),
            blob("README.md"),
            tree("src"),
            blob("src/index.ts"),
        ];

        let structure = build_structure(&entries);
        assert!(structure.has_package_manifest);
        assert!(structure.has_type_config);
        assert!(structure.has_deploy_config);
        assert!(structure.has_src_dir());
        assert!(structure.has_readme());
        assert_eq!(structure.config_files.len(), 3);
        assert_eq!(structure.files.len(), 5);
    }

    #[test]
    fn nested_configs_do_not_count_as_root() {
        let entries = vec![tree("sub"), blob("sub/package.json")];
        let structure = build_structure(&entries);
        assert!(!structure.has_package_manifest);
        assert!(structure.config_files.is_empty());
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, String::new(), "o/r"),
            ScrapeError::RepoMissing(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, String::new(), "o/r"),
            ScrapeError::RateLimited
        ));
        let err = classify_status(StatusCode::BAD_GATEWAY, "upstream sad".into(), "o/r");
        assert!(err.is_transient());
    }
}
