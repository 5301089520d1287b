// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Orphan detection.
//!
//! Overlay files kept in a subdirectory pocket, e.g.,
//! `targets/app/packages/foo/clank/notes.md`, only make sense while
//! `packages/foo/` exists in the target. Rename or delete that directory and
//! the overlay file is __orphaned__: linking silently skips it. This module
//! finds those files so the user can move or remove them. It never changes
//! anything.

use crate::{
    config::{Config, ConfigError},
    fs::walk,
    mapping::{MappingContext, WORKTREES_DIR},
    scope::Scope,
};

use futures::StreamExt;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
};
use tracing::debug;

/// Overlay file whose target directory is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Orphan {
    /// Overlay file.
    pub overlay_path: PathBuf,

    /// Target directory the file expects, relative to the target root.
    pub expected_dir: PathBuf,

    pub scope: Scope,
}

impl Orphan {
    /// Command that drops the orphan from the overlay.
    pub fn remediation(&self, ctx: &MappingContext) -> String {
        let rel = self
            .overlay_path
            .strip_prefix(ctx.scope_root(self.scope))
            .unwrap_or(&self.overlay_path);
        format!("clank rm {} {}", self.scope.flag(), rel.display())
    }
}

impl Display for Orphan {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(
            fmt,
            "{} ({}) expects missing directory {:?}",
            self.overlay_path.display(),
            self.scope,
            self.expected_dir.display()
        )
    }
}

/// Find orphaned overlay files of the current project.
///
/// Only the project scope and the current worktree's scope are searched.
/// Global files apply to every project and are never orphaned.
///
/// # Errors
///
/// - Return [`ConfigError::IgnorePattern`] if ignore patterns are malformed.
pub async fn find_orphans(ctx: &MappingContext, config: &Config) -> Result<Vec<Orphan>, ConfigError> {
    let matcher = config.ignore_matcher()?;
    let worktrees = ctx.project_root().join(WORKTREES_DIR);
    let current = ctx.scope_root(Scope::Worktree);
    let mut orphans = Vec::new();

    let mut paths = walk(ctx.project_root(), move |path, is_dir| {
        // INVARIANT: Other worktrees are not ours to judge.
        let foreign_worktree =
            is_dir && path.parent() == Some(worktrees.as_path()) && path != current;
        foreign_worktree || matcher.matched(path, is_dir).is_ignore()
    });

    while let Some(path) = paths.next().await {
        if let Some(orphan) = orphan_of(ctx, &path, |dir| dir.exists()) {
            debug!("orphan {:?}", orphan.overlay_path.display());
            orphans.push(orphan);
        }
    }

    Ok(orphans)
}

/// Decide whether one overlay file is orphaned.
///
/// Files anchored at the target root are never orphans.
pub fn orphan_of(
    ctx: &MappingContext,
    overlay_path: &Path,
    dir_exists: impl Fn(&Path) -> bool,
) -> Option<Orphan> {
    let mapping = ctx.overlay_to_target(overlay_path)?;
    let anchor = ctx.anchor_dir(&mapping);
    if anchor == ctx.target_root || dir_exists(&anchor) {
        return None;
    }

    Some(Orphan {
        overlay_path: overlay_path.to_path_buf(),
        expected_dir: anchor
            .strip_prefix(&ctx.target_root)
            .unwrap_or(&anchor)
            .to_path_buf(),
        scope: mapping.scope,
    })
}
