//! Git repository discovery and the source-control collaborator.
//!
//! The engine never talks to git directly; hosts hand it a [`SourceControl`]
//! that answers two questions: which branch is checked out, and which files
//! are currently changed or staged.

use std::path::{Path, PathBuf};

use git2::{ErrorCode, Repository, StatusOptions};

use crate::error::{Error, Result};

/// Source of the current branch and the working set of changed files.
pub trait SourceControl {
    /// Name of the checked-out branch, or the configured sentinel when there
    /// is none (no VCS, detached HEAD).
    fn current_branch(&self) -> Result<String>;

    /// Absolute paths of files that are modified, staged, or untracked.
    fn changed_files(&self) -> Result<Vec<PathBuf>>;
}

/// Discover a git repository from a starting path.
pub fn discover_repo(start: Option<&Path>) -> Result<Repository> {
    let start_path = match start {
        Some(path) => path.to_path_buf(),
        None => std::env::current_dir()?,
    };

    Repository::discover(&start_path).map_err(|err| {
        if err.code() == ErrorCode::NotFound {
            Error::RepoNotFound(start_path)
        } else {
            Error::Git(err)
        }
    })
}

/// Open a repository and validate it is a non-bare checkout.
pub fn open_repo(start: Option<&Path>) -> Result<Repository> {
    let repo = discover_repo(start)?;
    if repo.is_bare() {
        return Err(Error::OperationFailed(
            "bare repositories are not supported".to_string(),
        ));
    }
    Ok(repo)
}

/// Return the repository workdir (root of the working tree).
pub fn workdir(repo: &Repository) -> Result<PathBuf> {
    repo.workdir()
        .map(|path| path.to_path_buf())
        .ok_or_else(|| Error::OperationFailed("repository has no working directory".to_string()))
}

/// Get the path to the git common directory.
///
/// For worktrees, this returns the path to the main repository's .git directory.
/// For normal repositories, this returns the .git directory path.
pub fn common_dir(repo: &Repository) -> PathBuf {
    let git_dir = repo.path();
    let commondir_file = git_dir.join("commondir");

    if commondir_file.exists() {
        if let Ok(content) = std::fs::read_to_string(&commondir_file) {
            let rel = content.trim();
            if !rel.is_empty() {
                return git_dir.join(rel);
            }
        }
    }

    git_dir.to_path_buf()
}

/// Short name of the checked-out branch.
///
/// Returns `None` for a detached HEAD. An unborn branch (fresh repository
/// without commits) still reports the name HEAD points at.
pub fn current_branch(repo: &Repository) -> Result<Option<String>> {
    match repo.head() {
        Ok(head) => {
            if head.is_branch() {
                Ok(head.shorthand().map(str::to_string))
            } else {
                Ok(None)
            }
        }
        Err(err) if matches!(err.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
            let head = repo.find_reference("HEAD")?;
            Ok(head
                .symbolic_target()
                .and_then(|target| target.strip_prefix("refs/heads/"))
                .map(str::to_string))
        }
        Err(err) => Err(Error::Git(err)),
    }
}

/// Files with staged, unstaged, or untracked changes, as absolute paths.
///
/// Deleted and ignored files are skipped since there is nothing to read.
pub fn changed_files(repo: &Repository) -> Result<Vec<PathBuf>> {
    let root = workdir(repo)?;

    let mut options = StatusOptions::new();
    options
        .include_untracked(true)
        .recurse_untracked_dirs(true)
        .include_ignored(false);

    let statuses = repo.statuses(Some(&mut options))?;
    let mut paths = Vec::new();

    for entry in statuses.iter() {
        let status = entry.status();
        if status.is_ignored() || status.is_wt_deleted() {
            continue;
        }
        if status.is_index_deleted() && !status.is_wt_new() {
            continue;
        }
        let Some(path) = entry.path() else {
            tracing::debug!("skipping status entry with non utf-8 path");
            continue;
        };
        paths.push(root.join(path));
    }

    paths.sort();
    paths.dedup();
    Ok(paths)
}

/// [`SourceControl`] backed by a git checkout.
pub struct GitSourceControl {
    repo: Repository,
    fallback_branch: String,
}

impl GitSourceControl {
    /// `fallback_branch` is reported while HEAD is detached.
    pub fn new(repo: Repository, fallback_branch: impl Into<String>) -> Self {
        Self {
            repo,
            fallback_branch: fallback_branch.into(),
        }
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }
}

impl SourceControl for GitSourceControl {
    fn current_branch(&self) -> Result<String> {
        Ok(current_branch(&self.repo)?.unwrap_or_else(|| self.fallback_branch.clone()))
    }

    fn changed_files(&self) -> Result<Vec<PathBuf>> {
        changed_files(&self.repo)
    }
}

/// [`SourceControl`] for directories outside any repository.
#[derive(Debug, Clone)]
pub struct NoSourceControl {
    branch: String,
}

impl NoSourceControl {
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
        }
    }
}

impl SourceControl for NoSourceControl {
    fn current_branch(&self) -> Result<String> {
        Ok(self.branch.clone())
    }

    fn changed_files(&self) -> Result<Vec<PathBuf>> {
        Ok(Vec::new())
    }
}
