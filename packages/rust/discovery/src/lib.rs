//! Local discovery: notebooks in the working directory and the git repository
//! they live in.
//!
//! - [`notebook`]: finds publishable notebooks and reads their `rocrate` metadata block
//! - [`repo`]: resolves the local git remote and splits GitHub URLs into owner/repo

pub mod notebook;
pub mod repo;

pub use notebook::{Notebook, find_notebooks, interpreter_version};
pub use repo::{GitHubRepo, PLACEHOLDER_REPO_NAME, RepoInfo};
