//! GitHub REST adapter behind the [`RepoScraper`] port.
//!
//! [`RepoScraper`]: crate::domain::ports::RepoScraper

pub mod scraper;

pub use scraper::GithubScraper;
