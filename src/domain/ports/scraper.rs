//! Code-host scraper port.

use async_trait::async_trait;

use crate::domain::error::ScrapeError;
use crate::domain::models::{RepoData, ScrapeType};

/// Fetches repository metadata and structure from the remote code host.
///
/// Transport details (pagination, tree walking, payload parsing) live in the
/// adapter; the core only sees normalized [`RepoData`].
#[async_trait]
pub trait RepoScraper: Send + Sync {
    /// Scrape one repository by short name.
    ///
    /// `etag` enables a conditional fetch: `Ok(None)` means the upstream
    /// content is unchanged and the caller should keep what it has. A full
    /// scrape walks the repo tree; an incremental scrape reuses cached
    /// structure wherever the ETag still matches.
    async fn scrape(
        &self,
        repo: &str,
        scrape_type: ScrapeType,
        etag: Option<&str>,
    ) -> Result<Option<RepoData>, ScrapeError>;

    /// Probe the backup upstream used by the switch_endpoint healing
    /// strategy. Success means the backup answers; no state is mutated.
    async fn probe_backup(&self) -> Result<(), ScrapeError>;
}
