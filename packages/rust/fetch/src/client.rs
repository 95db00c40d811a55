//! Shared HTTP client for titles, remote file stats and payload downloads.

use std::time::Duration;

use reqwest::Client;
use reqwest::header::{CONTENT_LENGTH, LAST_MODIFIED};
use scraper::{Html, Selector};
use tracing::{debug, instrument};

use nbcrate_discovery::GitHubRepo;
use nbcrate_shared::{CrateError, FetchConfig, Result};

use crate::github::GitHubClient;
use crate::stats::{FileStats, now_timestamp, parse_http_date};

/// User-Agent string for all requests.
const USER_AGENT: &str = concat!("nbcrate/", env!("CARGO_PKG_VERSION"));

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 5;

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// HTTP access to the web and the GitHub API.
#[derive(Debug)]
pub struct Fetcher {
    client: Client,
    github: GitHubClient,
}

impl Fetcher {
    /// Build the HTTP client from the fetch configuration.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CrateError::Network(format!("failed to build HTTP client: {e}")))?;

        let github = GitHubClient::new(
            client.clone(),
            &config.github_api,
            config.github_token.clone(),
        );

        Ok(Self { client, github })
    }

    /// The GitHub API client sharing this fetcher's connection pool.
    pub fn github(&self) -> &GitHubClient {
        &self.github
    }

    /// Title of the HTML page at `url`; `None` for non-success responses or untitled pages.
    #[instrument(skip(self))]
    pub async fn page_title(&self, url: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CrateError::Network(format!("{url}: {e}")))?;

        if !response.status().is_success() {
            debug!(status = %response.status(), "no title for unsuccessful response");
            return Ok(None);
        }

        let body = response
            .text()
            .await
            .map_err(|e| CrateError::Network(format!("{url}: body read failed: {e}")))?;

        Ok(extract_title(&body))
    }

    /// Size and modification stats of a remote file.
    ///
    /// GitHub-hosted files are looked up through the contents API; anything else
    /// gets a HEAD request.
    #[instrument(skip(self))]
    pub async fn web_file_stats(&self, url: &str) -> Result<FileStats> {
        let mut stats = FileStats {
            sd_date_published: Some(now_timestamp()),
            ..Default::default()
        };

        if let Some(repo) = GitHubRepo::from_url(url) {
            let branch = self.github.default_branch(&repo).await?;
            let file_path = url
                .rsplit_once(&format!("/{branch}/"))
                .map_or(url, |(_, path)| path);
            let contents = self.github.contents(&repo, file_path).await?;
            stats.content_size = Some(contents.size);
            stats.date_modified = contents.last_modified;
            return Ok(stats);
        }

        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| CrateError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CrateError::Network(format!("{url}: HTTP {status}")));
        }

        let headers = response.headers();
        stats.content_size = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        stats.date_modified = headers
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(parse_http_date)
            .transpose()?;

        Ok(stats)
    }

    /// Download the body of `url`.
    #[instrument(skip(self))]
    pub async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CrateError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CrateError::Network(format!("{url}: HTTP {status}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CrateError::Network(format!("{url}: body read failed: {e}")))?;
        debug!(len = bytes.len(), "downloaded payload");
        Ok(bytes.to_vec())
    }
}

/// Extract the trimmed `<title>` text from an HTML document.
pub fn extract_title(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let title_sel = Selector::parse("title").ok()?;
    doc.select(&title_sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|title| !title.is_empty())
}
