//! Minimal GitHub REST client: repository default branches and file metadata.

use std::collections::HashMap;
use std::sync::Mutex;

use reqwest::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, LAST_MODIFIED};
use serde::Deserialize;
use tracing::{debug, instrument};

use nbcrate_discovery::GitHubRepo;
use nbcrate_shared::{CrateError, Result};

use crate::stats::parse_http_date;

/// Media type recommended by the GitHub REST API.
const GITHUB_MEDIA_TYPE: &str = "application/vnd.github+json";

/// Metadata of a single file as reported by the contents API.
#[derive(Debug, Clone, PartialEq)]
pub struct GitHubContents {
    /// Size in bytes.
    pub size: u64,
    /// `Last-Modified` of the file (RFC 3339), when GitHub reports it.
    pub last_modified: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    default_branch: String,
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    size: u64,
}

/// GitHub API client. Default branches are cached for the client's lifetime.
#[derive(Debug)]
pub struct GitHubClient {
    client: Client,
    api_base: String,
    token: Option<String>,
    branches: Mutex<HashMap<GitHubRepo, String>>,
}

impl GitHubClient {
    /// Create a client against `api_base` (e.g. `https://api.github.com`).
    pub fn new(client: Client, api_base: &str, token: Option<String>) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
            branches: Mutex::new(HashMap::new()),
        }
    }

    /// Name of the repository's default branch.
    #[instrument(skip(self), fields(repo = %repo.full_name()))]
    pub async fn default_branch(&self, repo: &GitHubRepo) -> Result<String> {
        if let Some(branch) = self
            .branches
            .lock()
            .ok()
            .and_then(|cache| cache.get(repo).cloned())
        {
            return Ok(branch);
        }

        let url = format!("{}/repos/{}/{}", self.api_base, repo.owner, repo.name);
        let (body, _) = self.get_json::<RepoResponse>(&url).await?;
        debug!(branch = %body.default_branch, "default branch resolved");

        if let Ok(mut cache) = self.branches.lock() {
            cache.insert(repo.clone(), body.default_branch.clone());
        }
        Ok(body.default_branch)
    }

    /// Size and last-modified time of `path` on the default branch.
    #[instrument(skip(self), fields(repo = %repo.full_name()))]
    pub async fn contents(&self, repo: &GitHubRepo, path: &str) -> Result<GitHubContents> {
        let url = format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_base,
            repo.owner,
            repo.name,
            path.trim_start_matches('/')
        );
        let (body, headers) = self.get_json::<ContentsResponse>(&url).await?;

        let last_modified = headers
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(parse_http_date)
            .transpose()?;

        Ok(GitHubContents {
            size: body.size,
            last_modified,
        })
    }

    /// Web URL of a file in the repository:
    /// `https://github.com/<owner>/<repo>/blob/<branch>/<path>`.
    pub async fn blob_url(&self, repo: &GitHubRepo, path: &str) -> Result<String> {
        let branch = self.default_branch(repo).await?;
        Ok(format!(
            "{}/blob/{branch}/{}",
            repo.html_url(),
            path.trim_start_matches("./")
        ))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<(T, HeaderMap)> {
        let mut request = self.client.get(url).header(ACCEPT, GITHUB_MEDIA_TYPE);
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| CrateError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CrateError::Network(format!("{url}: HTTP {status}")));
        }

        let headers = response.headers().clone();
        let body = response
            .json::<T>()
            .await
            .map_err(|e| CrateError::parse(format!("{url}: unexpected GitHub response: {e}")))?;
        Ok((body, headers))
    }
}
