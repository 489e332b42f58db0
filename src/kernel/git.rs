//! Native git management using the `git2` crate.
//!
//! Covers what the build needs from version control: byte-exact restore of a
//! patched file, commit counting for the module version code, snapshotting an
//! integrated tree, and cloning the packaging repository.

use crate::error::BuildError;
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{IndexAddOption, Repository, Signature};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during git operations
#[derive(Debug, Error)]
pub enum GitError {
    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Clone error: {0}")]
    Clone(String),

    #[error("Checkout error: {0}")]
    Checkout(String),

    #[error("Commit error: {0}")]
    Commit(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Git2 error: {0}")]
    Git2(#[from] git2::Error),
}

impl From<GitError> for BuildError {
    fn from(e: GitError) -> Self {
        BuildError::Git(e.to_string())
    }
}

/// Result type for git operations
pub type GitResult<T> = Result<T, GitError>;

/// Manages a working tree through native git bindings
pub struct GitManager {
    repo: Repository,
}

impl GitManager {
    /// Opens the repository containing `path` (searching parent directories)
    pub fn discover(path: impl AsRef<Path>) -> GitResult<Self> {
        let path = path.as_ref();
        let start = if path.is_dir() {
            path.to_path_buf()
        } else {
            path.parent().map(Path::to_path_buf).unwrap_or_default()
        };

        let repo = Repository::discover(&start).map_err(|e| {
            GitError::Repository(format!(
                "No repository found for {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(GitManager { repo })
    }

    /// Root of the working tree
    pub fn workdir(&self) -> GitResult<&Path> {
        self.repo
            .workdir()
            .ok_or_else(|| GitError::Repository("Repository is bare".to_string()))
    }

    /// Path of `file` relative to the working tree root
    fn relative_path(&self, file: &Path) -> GitResult<PathBuf> {
        let workdir = fs::canonicalize(self.workdir()?)?;
        let file = match fs::canonicalize(file) {
            Ok(p) => p,
            Err(_) => {
                // A deleted file cannot be canonicalized; resolve its parent instead.
                let parent = file.parent().map(fs::canonicalize).transpose()?;
                match (parent, file.file_name()) {
                    (Some(parent), Some(name)) => parent.join(name),
                    _ => file.to_path_buf(),
                }
            }
        };

        file.strip_prefix(&workdir)
            .map(Path::to_path_buf)
            .map_err(|_| {
                GitError::Checkout(format!(
                    "{} is outside the working tree {}",
                    file.display(),
                    workdir.display()
                ))
            })
    }

    /// Restores a single file from the index, like `git checkout -- <file>`.
    ///
    /// Restoring an unmodified file is a no-op.
    pub fn restore_path(&self, file: &Path) -> GitResult<()> {
        let relative = self.relative_path(file)?;

        let mut checkout = CheckoutBuilder::new();
        checkout
            .force()
            .disable_pathspec_match(true)
            .path(relative.as_path());

        self.repo
            .checkout_index(None, Some(&mut checkout))
            .map_err(|e| {
                GitError::Checkout(format!("Failed to restore {}: {}", relative.display(), e))
            })
    }

    /// Number of commits reachable from HEAD, like `git rev-list --count HEAD`
    pub fn commit_count(&self) -> GitResult<usize> {
        let mut walk = self.repo.revwalk()?;
        walk.push_head()?;
        let mut count = 0;
        for oid in walk {
            oid?;
            count += 1;
        }
        Ok(count)
    }

    /// Stages every change in the working tree and commits it.
    ///
    /// Returns `false` without committing when the staged tree equals HEAD's.
    pub fn commit_all(&self, message: &str, name: &str, email: &str) -> GitResult<bool> {
        let mut index = self.repo.index()?;
        index.add_all(["*"], IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"], None)?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let parent = match self.repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(_) => None,
        };

        if let Some(parent) = &parent {
            if parent.tree_id() == tree_id {
                log::info!("[Git] Nothing to commit, working tree clean");
                return Ok(false);
            }
        }

        let tree = self.repo.find_tree(tree_id)?;
        let sig = Signature::now(name, email)?;
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        let oid = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .map_err(|e| GitError::Commit(format!("Failed to commit '{}': {}", message, e)))?;

        log::info!("[Git] Committed {} as {}", message, oid);
        Ok(true)
    }

    /// Clones a repository with shallow clone optimization.
    ///
    /// Falls back to a full clone when the remote refuses shallow fetches.
    pub fn clone(url: &str, target_path: impl AsRef<Path>) -> GitResult<Self> {
        let target_path = target_path.as_ref();
        log::info!("[Git] [CLONE] Cloning {} into {}", url, target_path.display());

        let repo = match Self::shallow_clone(url, target_path) {
            Ok(repo) => repo,
            Err(shallow_err) => {
                log::warn!("[Git] [CLONE] Shallow clone failed: {}", shallow_err);
                log::warn!("[Git] [CLONE] Falling back to standard (full) clone");
                if target_path.exists() {
                    fs::remove_dir_all(target_path)?;
                }
                Repository::clone(url, target_path).map_err(|e| {
                    GitError::Clone(format!(
                        "Failed to clone {} to {} (fallback): {}",
                        url,
                        target_path.display(),
                        e
                    ))
                })?
            }
        };

        log::info!("[Git] [CLONE] Clone completed");
        Ok(GitManager { repo })
    }

    fn shallow_clone(url: &str, target_path: &Path) -> GitResult<Repository> {
        let mut fetch_options = git2::FetchOptions::new();
        fetch_options.depth(1);

        let mut builder = RepoBuilder::new();
        builder.fetch_options(fetch_options);
        builder.clone(url, target_path).map_err(|e| {
            GitError::Clone(format!("Shallow clone failed for {}: {}", url, e))
        })
    }
}
