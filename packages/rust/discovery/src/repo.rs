//! Repository locator.
//!
//! Resolves the local git remote (via the `git` binary) and splits GitHub URLs
//! into owner/repo parts. Neither operation is fatal: a missing repository, a
//! missing remote, or a non-GitHub URL is an explicit `None`.

use std::path::Path;
use std::process::Command;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

/// Name used for the crate when there is no git remote to take it from.
pub const PLACEHOLDER_REPO_NAME: &str = "example-repo";

/// Matches `https://github.com/<owner>/<repo>` and raw.githubusercontent.com URLs.
static GITHUB_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://[^/]*(?:github|githubusercontent)\.com/([^/]+)/([A-Za-z0-9_.\-]+)")
        .expect("github url regex")
});

// ---------------------------------------------------------------------------
// GitHubRepo
// ---------------------------------------------------------------------------

/// Owner/name parts of a GitHub-hosted resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GitHubRepo {
    pub owner: String,
    pub name: String,
}

impl GitHubRepo {
    /// Split a GitHub (or raw.githubusercontent.com) URL. Anything else is `None`.
    pub fn from_url(url: &str) -> Option<Self> {
        let caps = GITHUB_URL_RE.captures(url)?;
        let name = caps[2].trim_end_matches(".git");
        if name.is_empty() {
            return None;
        }
        Some(Self {
            owner: caps[1].to_string(),
            name: name.to_string(),
        })
    }

    /// `owner/name`, the form used to match file URLs against a repository.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Canonical web URL of the repository.
    pub fn html_url(&self) -> String {
        format!("https://github.com/{}/{}", self.owner, self.name)
    }

    /// Whether `url` points somewhere inside this repository.
    pub fn contains_url(&self, url: &str) -> bool {
        url.contains(&self.full_name())
    }
}

// ---------------------------------------------------------------------------
// RepoInfo
// ---------------------------------------------------------------------------

/// Name and web URL of the local code repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoInfo {
    /// Repository name (last path segment of the remote URL).
    pub name: String,
    /// Remote URL normalised to `https://host/owner/repo`. Empty when unknown.
    pub url: String,
}

impl RepoInfo {
    /// Stand-in used when `dir` is not a git checkout or has no `origin`.
    pub fn placeholder() -> Self {
        Self {
            name: PLACEHOLDER_REPO_NAME.to_string(),
            url: String::new(),
        }
    }

    /// Read `origin` from the git repository containing `dir`.
    pub fn locate(dir: &Path) -> Option<Self> {
        let output = Command::new("git")
            .args(["remote", "get-url", "origin"])
            .current_dir(dir)
            .output();

        let output = match output {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                debug!(
                    dir = %dir.display(),
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "no git remote"
                );
                return None;
            }
            Err(e) => {
                debug!(error = %e, "git not available");
                return None;
            }
        };

        let remote = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if remote.is_empty() {
            return None;
        }
        Some(Self::from_remote(&remote))
    }

    /// Like [`RepoInfo::locate`], falling back to [`RepoInfo::placeholder`].
    pub fn locate_or_placeholder(dir: &Path) -> Self {
        Self::locate(dir).unwrap_or_else(Self::placeholder)
    }

    /// Build repository info from a remote URL (HTTPS or SCP-style SSH).
    pub fn from_remote(remote: &str) -> Self {
        let url = normalize_remote(remote);
        let name = url
            .rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty())
            .unwrap_or(PLACEHOLDER_REPO_NAME)
            .to_string();
        Self { name, url }
    }

    /// GitHub parts of the remote, if it is hosted on GitHub.
    pub fn github(&self) -> Option<GitHubRepo> {
        GitHubRepo::from_url(&self.url)
    }
}

/// Convert `git@host:owner/repo.git` or `https://host/owner/repo.git/` to
/// `https://host/owner/repo`.
fn normalize_remote(remote: &str) -> String {
    let remote = remote.trim();
    let https = match remote.strip_prefix("git@") {
        Some(rest) => match rest.split_once(':') {
            Some((host, path)) => format!("https://{host}/{path}"),
            None => remote.to_string(),
        },
        None => remote.to_string(),
    };
    https
        .trim_end_matches('/')
        .trim_end_matches(".git")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn github_parts_from_blob_url() {
        let repo = GitHubRepo::from_url("https://github.com/org/data/blob/main/out.csv").unwrap();
        assert_eq!(repo.owner, "org");
        assert_eq!(repo.name, "data");
        assert_eq!(repo.full_name(), "org/data");
        assert_eq!(repo.html_url(), "https://github.com/org/data");
    }

    #[test]
    fn github_parts_from_raw_url() {
        let raw = "https://raw.githubusercontent.com/GLAM-Workbench/trove-newspapers/master/data/x.csv";
        let repo = GitHubRepo::from_url(raw).unwrap();
        assert_eq!(repo.full_name(), "GLAM-Workbench/trove-newspapers");
    }

    #[test]
    fn github_parts_strip_git_suffix() {
        let repo = GitHubRepo::from_url("https://github.com/org/code.git").unwrap();
        assert_eq!(repo.name, "code");
    }

    #[test]
    fn non_github_urls_have_no_parts() {
        assert!(GitHubRepo::from_url("https://gitlab.com/org/repo").is_none());
        assert!(GitHubRepo::from_url("https://example.com/github.com/org/repo").is_none());
        assert!(GitHubRepo::from_url("https://github.com/org").is_none());
        assert!(GitHubRepo::from_url("").is_none());
    }

    #[test]
    fn contains_url_matches_owner_and_repo() {
        let repo = GitHubRepo::from_url("https://github.com/org/data").unwrap();
        assert!(repo.contains_url("https://github.com/org/data/blob/main/out.csv"));
        assert!(!repo.contains_url("https://github.com/other/repo/blob/main/out.csv"));
    }

    #[test]
    fn remote_normalisation() {
        let https = RepoInfo::from_remote("https://github.com/org/code.git");
        assert_eq!(https.url, "https://github.com/org/code");
        assert_eq!(https.name, "code");

        let ssh = RepoInfo::from_remote("git@github.com:org/code.git\n");
        assert_eq!(ssh.url, "https://github.com/org/code");
        assert_eq!(ssh.github().unwrap().full_name(), "org/code");

        let trailing = RepoInfo::from_remote("https://gitlab.com/org/code/");
        assert_eq!(trailing.url, "https://gitlab.com/org/code");
        assert!(trailing.github().is_none());
    }

    #[test]
    fn missing_repository_is_none() {
        let dir = std::env::temp_dir().join(format!("nbcrate-repo-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();

        // A fresh temp dir is not a checkout (or git is absent): either way, no info.
        if RepoInfo::locate(&dir).is_none() {
            assert_eq!(RepoInfo::locate_or_placeholder(&dir), RepoInfo::placeholder());
        }

        let _ = std::fs::remove_dir_all(&dir);
    }
}
