// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! File system primitives.
//!
//! Directory walking, symlink creation and inspection, and the small
//! [`LinkInspector`] capability that classification code goes through so it can
//! be exercised without a real file system.

use crate::{path::normalize, vcs::Vcs};

use futures::stream::{self, LocalBoxStream, StreamExt};
use std::{
    collections::VecDeque,
    io,
    path::{Path, PathBuf},
};
use tokio::fs;
use tracing::debug;

/// Walk a directory tree depth-first, lazily.
///
/// Yields every non-directory entry (regular files and symlinks, including
/// symlinks to directories, which are never descended into). Entries are
/// visited in sorted order. Unreadable directories are treated as empty.
/// The `skip` predicate receives each entry path and whether it is a
/// directory; skipped directories are not descended into.
pub fn walk<F>(root: impl Into<PathBuf>, skip: F) -> LocalBoxStream<'static, PathBuf>
where
    F: Fn(&Path, bool) -> bool + 'static,
{
    let state = WalkState {
        dirs: vec![root.into()],
        files: VecDeque::new(),
        skip,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(file) = state.files.pop_front() {
                return Some((file, state));
            }

            let dir = state.dirs.pop()?;
            let Ok(mut entries) = fs::read_dir(&dir).await else {
                debug!("cannot read {:?}, treating as empty", dir.display());
                continue;
            };

            let mut subdirs = Vec::new();
            let mut files = Vec::new();
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                let Ok(file_type) = entry.file_type().await else {
                    continue;
                };
                if (state.skip)(&path, file_type.is_dir()) {
                    continue;
                }

                match file_type.is_dir() {
                    true => subdirs.push(path),
                    false => files.push(path),
                }
            }

            // INVARIANT: Files of a directory come before its subdirectories,
            // and subdirectories are popped in sorted order.
            files.sort();
            subdirs.sort_by(|a, b| b.cmp(a));
            state.files.extend(files);
            state.dirs.extend(subdirs);
        }
    })
    .boxed_local()
}

struct WalkState<F> {
    dirs: Vec<PathBuf>,
    files: VecDeque<PathBuf>,
    skip: F,
}

/// Result of placing a symlink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// Nothing was at the link path.
    Created,

    /// Something else was at the link path and got replaced.
    Replaced,

    /// Link already pointed at the source.
    Unchanged,
}

/// Place a symlink at `link` pointing to `source`, replacing what is there.
///
/// Missing parent directories are created. Directories at the link path are
/// never replaced.
///
/// # Errors
///
/// - Return [`io::Error`] if the link cannot be placed.
pub async fn replace_symlink(link: &Path, source: &Path) -> io::Result<LinkOutcome> {
    let outcome = match fs::symlink_metadata(link).await {
        Ok(meta) if meta.file_type().is_symlink() => {
            if resolve_link(link).as_deref() == Some(source) {
                return Ok(LinkOutcome::Unchanged);
            }
            fs::remove_file(link).await?;
            LinkOutcome::Replaced
        }
        Ok(meta) if meta.is_dir() => {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("directory exists at {:?}", link.display()),
            ));
        }
        Ok(_) => {
            fs::remove_file(link).await?;
            LinkOutcome::Replaced
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => LinkOutcome::Created,
        Err(err) => return Err(err),
    };

    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::symlink(source, link).await?;

    Ok(outcome)
}

/// Remove a symlink, leaving anything else alone.
///
/// Returns whether a link was removed.
pub async fn remove_symlink(link: &Path) -> io::Result<bool> {
    match fs::symlink_metadata(link).await {
        Ok(meta) if meta.file_type().is_symlink() => {
            fs::remove_file(link).await?;
            Ok(true)
        }
        Ok(_) => Ok(false),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Resolve where a symlink points to as an absolute, normalized path.
///
/// Relative link targets are resolved against the link's directory. Returns
/// `None` if the path is not a symlink.
pub fn resolve_link(link: &Path) -> Option<PathBuf> {
    let target = std::fs::read_link(link).ok()?;
    let absolute = match target.is_absolute() {
        true => target,
        false => link.parent().unwrap_or(Path::new("/")).join(target),
    };

    Some(normalize(absolute))
}

/// Copy a file and check that the copy matches the original.
///
/// Missing parent directories of `to` are created.
///
/// # Errors
///
/// - Return [`io::Error`] if copying fails, or the copy does not match.
pub async fn copy_verified(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).await?;
    }

    fs::copy(from, to).await?;
    if fs::read(from).await? != fs::read(to).await? {
        return Err(io::Error::other(format!(
            "copy of {:?} to {:?} does not match",
            from.display(),
            to.display()
        )));
    }

    Ok(())
}

/// Move a file by copying, verifying, and then deleting the original.
///
/// A crash part way leaves either the original alone or both copies intact,
/// never neither.
///
/// # Errors
///
/// - Return [`io::Error`] if any step fails, or the copy does not match.
pub async fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    copy_verified(from, to).await?;
    fs::remove_file(from).await
}

/// Remove empty directories from `dir` upwards, stopping at `stop`.
///
/// `stop` itself is never removed.
pub async fn prune_empty_dirs(dir: &Path, stop: &Path) {
    let mut current = Some(dir);
    while let Some(dir) = current {
        if dir == stop || !dir.starts_with(stop) {
            break;
        }
        // INVARIANT: Removal fails on non-empty directories, ending the climb.
        if fs::remove_dir(dir).await.is_err() {
            break;
        }
        debug!("remove empty directory {:?}", dir.display());
        current = dir.parent();
    }
}

/// What a path in the target tree physically is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presence {
    Missing,
    Symlink(PathBuf),
    File,
    Dir,
}

/// Side-effecting oracle used by classification.
pub trait LinkInspector {
    /// Inspect what is at a path without following symlinks.
    fn presence(&self, path: &Path) -> Presence;

    /// Check if a path is tracked by version control.
    fn is_tracked(&self, path: &Path) -> bool;

    /// Check if a path exists, following symlinks.
    fn exists(&self, path: &Path) -> bool;
}

/// Inspector backed by the host file system and a version control oracle.
#[derive(Debug)]
pub struct HostInspector<'a, V: Vcs> {
    vcs: &'a V,
}

impl<'a, V: Vcs> HostInspector<'a, V> {
    /// Construct new host inspector.
    pub fn new(vcs: &'a V) -> Self {
        Self { vcs }
    }
}

impl<V: Vcs> LinkInspector for HostInspector<'_, V> {
    fn presence(&self, path: &Path) -> Presence {
        match std::fs::symlink_metadata(path) {
            Ok(meta) if meta.file_type().is_symlink() => {
                resolve_link(path).map_or(Presence::Missing, Presence::Symlink)
            }
            Ok(meta) if meta.is_dir() => Presence::Dir,
            Ok(_) => Presence::File,
            Err(_) => Presence::Missing,
        }
    }

    fn is_tracked(&self, path: &Path) -> bool {
        self.vcs.is_tracked(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}
