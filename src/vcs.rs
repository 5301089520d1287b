// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Version control oracle.
//!
//! Clank never builds version control state itself. It only asks a few
//! questions: is this path tracked, what is the working tree status, where is
//! the repository root and common directory, and is this checkout a linked
//! worktree. The [`Vcs`] trait is that set of questions, answered through
//! libgit2 by [`Git2Vcs`].

use crate::{mapping::GitContext, path::normalize};

use git2::{Repository, Status, StatusOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// Questions clank asks version control.
pub trait Vcs {
    /// Check if a path is tracked in the index.
    fn is_tracked(&self, path: &Path) -> bool;

    /// Working tree status, one short-format line per entry.
    fn status_lines(&self) -> Result<Vec<String>>;
}

/// Version control through libgit2.
pub struct Git2Vcs {
    repository: Repository,
}

impl Git2Vcs {
    /// Discover repository containing a path.
    ///
    /// # Errors
    ///
    /// - Return [`VcsError::Git2`] if no repository is found.
    #[instrument(skip(path), level = "debug")]
    pub fn discover(path: impl AsRef<Path>) -> Result<Self> {
        debug!("discover repository from {:?}", path.as_ref().display());
        let repository = Repository::discover(path.as_ref())?;
        Ok(Self { repository })
    }

    /// Open repository at path, initializing it if none exists.
    ///
    /// # Errors
    ///
    /// - Return [`VcsError::Git2`] if libgit2 operations fail.
    #[instrument(skip(path), level = "debug")]
    pub fn open_or_init(path: impl AsRef<Path>) -> Result<Self> {
        let repository = match Repository::open(path.as_ref()) {
            Ok(repository) => repository,
            Err(_) => {
                info!("initialize repository: {:?}", path.as_ref().display());
                Repository::init(path.as_ref())?
            }
        };

        Ok(Self { repository })
    }

    /// Root of the working tree.
    ///
    /// # Errors
    ///
    /// - Return [`VcsError::Bare`] if repository has no working tree.
    pub fn workdir(&self) -> Result<PathBuf> {
        self.repository
            .workdir()
            .map(normalize)
            .ok_or_else(|| VcsError::Bare(self.repository.path().to_path_buf()))
    }

    /// Directory shared by every worktree of the repository.
    pub fn common_dir(&self) -> PathBuf {
        normalize(self.repository.commondir())
    }

    /// Current checkout is a linked worktree.
    pub fn is_worktree(&self) -> bool {
        self.repository.is_worktree()
    }

    /// Exclude file shared by every worktree.
    pub fn exclude_path(&self) -> PathBuf {
        self.common_dir().join("info").join("exclude")
    }

    /// Gather project and worktree names of the current checkout.
    ///
    /// The project is named after the directory holding the common git
    /// directory, so every worktree of a project agrees on it. The worktree
    /// is named after the checked out branch, with `/` flattened to `-`.
    ///
    /// # Errors
    ///
    /// - Return [`VcsError::Bare`] if repository has no working tree.
    pub fn git_context(&self) -> Result<GitContext> {
        let root = self.workdir()?;
        let common = self.common_dir();
        let project_dir = match common.file_name() {
            Some(name) if name == ".git" => common.parent().unwrap_or(&common).to_path_buf(),
            _ => common.clone(),
        };
        let project_name = project_dir
            .file_name()
            .map(|name| name.to_string_lossy().trim_end_matches(".git").to_string())
            .unwrap_or_default();

        let worktree_name = self
            .branch_name()
            .or_else(|| {
                root.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .unwrap_or_default()
            .replace('/', "-");

        Ok(GitContext {
            project_name,
            worktree_name,
            is_worktree: self.is_worktree(),
            root,
        })
    }

    fn branch_name(&self) -> Option<String> {
        match self.repository.head() {
            Ok(head) if head.is_branch() => head.shorthand().map(str::to_owned),
            Ok(_) => None,
            // INVARIANT: Unborn branch still names its branch through HEAD.
            Err(_) => self
                .repository
                .find_reference("HEAD")
                .ok()
                .and_then(|head| {
                    head.symbolic_target()
                        .and_then(|target| target.strip_prefix("refs/heads/"))
                        .map(str::to_owned)
                }),
        }
    }
}

impl Vcs for Git2Vcs {
    fn is_tracked(&self, path: &Path) -> bool {
        let Ok(root) = self.workdir() else {
            return false;
        };
        let Ok(rel) = normalize(path).strip_prefix(&root).map(Path::to_path_buf) else {
            return false;
        };

        self.repository
            .index()
            .ok()
            .and_then(|index| index.get_path(&rel, 0))
            .is_some()
    }

    fn status_lines(&self) -> Result<Vec<String>> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(true);

        let statuses = self.repository.statuses(Some(&mut opts))?;
        let lines = statuses
            .iter()
            .filter_map(|entry| {
                let path = entry.path()?.to_string();
                Some(format!("{} {path}", status_code(entry.status())))
            })
            .collect();

        Ok(lines)
    }
}

impl std::fmt::Debug for Git2Vcs {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("Git2Vcs")
            .field("path", &self.repository.path())
            .finish()
    }
}

/// Version control stand-in where nothing is tracked.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoVcs;

impl Vcs for NoVcs {
    fn is_tracked(&self, _path: &Path) -> bool {
        false
    }

    fn status_lines(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

// Two-column status code in the style of `git status --short`.
fn status_code(status: Status) -> String {
    if status.contains(Status::WT_NEW) {
        return "??".into();
    }

    let index = if status.contains(Status::INDEX_NEW) {
        'A'
    } else if status.contains(Status::INDEX_MODIFIED) {
        'M'
    } else if status.contains(Status::INDEX_DELETED) {
        'D'
    } else if status.contains(Status::INDEX_RENAMED) {
        'R'
    } else {
        ' '
    };

    let worktree = if status.contains(Status::WT_MODIFIED) {
        'M'
    } else if status.contains(Status::WT_DELETED) {
        'D'
    } else if status.contains(Status::WT_RENAMED) {
        'R'
    } else {
        ' '
    };

    format!("{index}{worktree}")
}

/// Version control error types.
#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    /// Repository has no working tree.
    #[error("repository at {:?} has no working tree", .0.display())]
    Bare(PathBuf),

    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),
}

/// Friendly result alias :3
pub type Result<T, E = VcsError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test]
    fn context_names_project_after_repository_dir() -> anyhow::Result<()> {
        let root = std::env::current_dir()?.join("shop");
        let mut opts = git2::RepositoryInitOptions::new();
        opts.initial_head("feature/cart");
        Repository::init_opts(&root, &opts)?;

        let vcs = Git2Vcs::discover(root.join("."))?;
        let result = vcs.git_context()?;
        assert_eq!(result.project_name, "shop");
        assert_eq!(result.worktree_name, "feature-cart");
        assert!(!result.is_worktree);
        assert_eq!(result.root, root);

        Ok(())
    }

    #[sealed_test]
    fn tracked_paths_come_from_index() -> anyhow::Result<()> {
        let root = std::env::current_dir()?;
        let repository = Repository::init(&root)?;
        std::fs::write(root.join("CLAUDE.md"), "tracked")?;
        std::fs::write(root.join("notes.md"), "untracked")?;
        let mut index = repository.index()?;
        index.add_path(Path::new("CLAUDE.md"))?;
        index.write()?;

        let vcs = Git2Vcs::discover(&root)?;
        assert!(vcs.is_tracked(&root.join("CLAUDE.md")));
        assert!(!vcs.is_tracked(&root.join("notes.md")));
        assert!(!vcs.is_tracked(Path::new("/elsewhere/CLAUDE.md")));

        let lines = vcs.status_lines()?;
        assert_eq!(lines, vec!["A  CLAUDE.md".to_string(), "?? notes.md".to_string()]);

        Ok(())
    }

    #[test]
    fn short_status_codes() {
        assert_eq!(status_code(Status::WT_NEW), "??");
        assert_eq!(status_code(Status::INDEX_MODIFIED | Status::WT_MODIFIED), "MM");
        assert_eq!(status_code(Status::WT_DELETED), " D");
    }
}
