// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Link reconciliation.
//!
//! The overlay is the source of truth. Linking walks every overlay file that
//! applies to the current checkout, asks the [`MappingContext`] where it
//! surfaces in the target tree, and converges the target tree to that plan:
//! missing links are created, misdirected links are repaired, and links into
//! the overlay that no longer belong to the plan are removed. Overlay content
//! is never written here.
//!
//! # Fan Out
//!
//! An instructions file surfaces under every configured alias in its
//! directory, skipping aliases that are real files tracked by the target
//! repository. A prompt file surfaces in every tool's prompts directory.
//! Everything else surfaces exactly once.
//!
//! # Scope Collisions
//!
//! When files from different scopes land on the same target path, the global
//! copy keeps the plain name and the others get a scope suffix, e.g.,
//! `clank/notes.md` and `clank/notes-worktree.md`.
//!
//! # Partial Success
//!
//! A link whose anchor directory is gone (a renamed or deleted pocket such as
//! `packages/foo/`) is skipped and reported, not fatal. Failure to place one
//! link never rolls back the others. The only hard stop is an instructions
//! file that exists for real in the target tree, see [`LinkError`].

pub mod exclude;
pub mod state;

use crate::{
    config::{Config, ConfigError},
    fs::{
        remove_symlink, replace_symlink, resolve_link, walk, HostInspector, LinkOutcome, LinkInspector,
        Presence,
    },
    link::{
        exclude::ExcludeDrafter,
        state::{classify, LinkState},
    },
    mapping::{
        add_scope_suffix, is_instructions_name, tool_of, EntryKind, MappingContext, TargetMapping,
        GLOBAL_DIR, INIT_DIR, INSTRUCTIONS_FILE, MISC_DIR,
    },
    path::has_dir_component,
    scope::Scope,
    vcs::Vcs,
};

use futures::{future::join_all, stream::LocalBoxStream, StreamExt};
use std::{
    collections::{BTreeMap, HashSet},
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// One link the reconciler intends to place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedLink {
    pub link: PathBuf,
    pub source: PathBuf,
    pub mapping: TargetMapping,
}

/// Link skipped because its anchor directory does not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingAnchor {
    pub link: PathBuf,
    pub anchor: PathBuf,
}

/// Outcome of a link run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LinkReport {
    pub created: Vec<PathBuf>,
    pub replaced: Vec<PathBuf>,
    pub unchanged: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
    pub skipped_tracked: Vec<PathBuf>,
    pub missing_anchor: Vec<MissingAnchor>,
    pub failed: Vec<(PathBuf, String)>,
}

impl LinkReport {
    /// Nothing was created, replaced, or removed.
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.replaced.is_empty() && self.removed.is_empty()
    }

    fn placed(&self) -> impl Iterator<Item = &PathBuf> {
        self.created
            .iter()
            .chain(self.replaced.iter())
            .chain(self.unchanged.iter())
    }
}

/// Real instructions file found where clank expects to manage one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionsConflict {
    pub path: PathBuf,
    pub kind: ConflictKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictKind {
    Tracked,
    Untracked,
    ForeignLink(PathBuf),
}

impl InstructionsConflict {
    /// Exact command that resolves this conflict.
    pub fn remediation(&self, root: &Path) -> String {
        let rel = self.path.strip_prefix(root).unwrap_or(&self.path).display();
        match &self.kind {
            ConflictKind::Tracked => format!("git rm --cached {rel} && clank add {rel}"),
            ConflictKind::Untracked => format!("clank add {rel}"),
            ConflictKind::ForeignLink(_) => format!("rm {rel}"),
        }
    }
}

impl Display for InstructionsConflict {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            ConflictKind::Tracked => write!(fmt, "{:?} is tracked by git", self.path.display()),
            ConflictKind::Untracked => write!(fmt, "{:?} is a real file", self.path.display()),
            ConflictKind::ForeignLink(target) => write!(
                fmt,
                "{:?} links outside the overlay to {:?}",
                self.path.display(),
                target.display()
            ),
        }
    }
}

/// Reconcile target tree links against the overlay.
#[derive(Debug)]
pub struct Linker<'a, V: Vcs> {
    ctx: &'a MappingContext,
    config: &'a Config,
    vcs: &'a V,
    exclude: Option<ExcludeDrafter>,
}

impl<'a, V: Vcs> Linker<'a, V> {
    /// Construct new linker.
    pub fn new(ctx: &'a MappingContext, config: &'a Config, vcs: &'a V) -> Self {
        Self {
            ctx,
            config,
            vcs,
            exclude: None,
        }
    }

    /// Record placed links in a git exclude file.
    pub fn with_exclude(mut self, exclude: ExcludeDrafter) -> Self {
        self.exclude = Some(exclude);
        self
    }

    /// Converge the whole target tree to the overlay.
    ///
    /// # Errors
    ///
    /// - Return [`LinkError::InstructionsConflict`] if real instructions
    ///   files are in the way. Nothing is touched in that case.
    /// - Return [`LinkError::Config`] if ignore patterns are malformed.
    /// - Return [`LinkError::Exclude`] if exclude file cannot be updated.
    #[instrument(skip(self), level = "debug")]
    pub async fn link(&self) -> Result<LinkReport> {
        self.preflight().await?;

        let plan = self.plan(&self.overlay_files().await?);
        let mut report = self.apply(&plan).await;

        // INVARIANT: Only links that point into the overlay and fell out of
        // the plan are pruned, foreign links are never touched.
        let planned = plan.iter().map(|p| p.link.clone()).collect::<HashSet<_>>();
        for link in self.overlay_links().await {
            if planned.contains(&link) {
                continue;
            }
            match remove_symlink(&link).await {
                Ok(true) => {
                    info!("prune {:?}", link.display());
                    report.removed.push(link);
                }
                Ok(false) => {}
                Err(err) => report.failed.push((link, err.to_string())),
            }
        }

        if let Some(exclude) = &self.exclude {
            let entries = report.placed().map(|link| self.exclude_entry(link)).collect::<Vec<_>>();
            exclude.edit(|edit| edit.replace_entries(entries))?;
        }

        Ok(report)
    }

    /// Link only the given overlay files.
    ///
    /// Scope suffixes are still decided against the whole overlay, so the
    /// result matches what a full [`Linker::link`] would place. Files of
    /// other scopes sharing a target path are placed again, and their links
    /// at names that no longer apply are pruned.
    ///
    /// # Errors
    ///
    /// - Return [`LinkError::Config`] if ignore patterns are malformed.
    /// - Return [`LinkError::Exclude`] if exclude file cannot be updated.
    #[instrument(skip(self, sources), level = "debug")]
    pub async fn link_files(&self, sources: &[PathBuf]) -> Result<LinkReport> {
        self.link_sources(sources, &[]).await
    }

    /// Point links of overlay files `from` at their replacements `to`.
    ///
    /// Links of `from` are removed first, then `to` is linked as if `from`
    /// were already gone from the overlay, so the two never collide.
    ///
    /// # Errors
    ///
    /// - Return [`LinkError::Config`] if ignore patterns are malformed.
    /// - Return [`LinkError::Exclude`] if exclude file cannot be updated.
    #[instrument(skip(self, from, to), level = "debug")]
    pub async fn relink(&self, from: &[PathBuf], to: &[PathBuf]) -> Result<LinkReport> {
        let removed = self.unlink_files(from).await?;
        let mut report = self.link_sources(to, from).await?;
        let replaced = removed
            .into_iter()
            .filter(|link| !report.placed().any(|placed| placed == link))
            .collect::<Vec<_>>();
        report.removed.extend(replaced);

        Ok(report)
    }

    async fn link_sources(&self, sources: &[PathBuf], gone: &[PathBuf]) -> Result<LinkReport> {
        let overlay_files = self
            .overlay_files()
            .await?
            .into_iter()
            .filter(|path| !gone.contains(path))
            .collect::<Vec<_>>();
        let plan = self.plan(&overlay_files);

        // INVARIANT: Files sharing a target path with a source are placed
        // again, since a new collision renames their links too.
        let touched = plan
            .iter()
            .filter(|planned| sources.contains(&planned.source))
            .map(|planned| planned.mapping.target_path.clone())
            .collect::<HashSet<_>>();
        let plan = plan
            .into_iter()
            .filter(|planned| {
                sources.contains(&planned.source) || touched.contains(&planned.mapping.target_path)
            })
            .collect::<Vec<_>>();
        let mut report = self.apply(&plan).await;

        let planned = plan.iter().map(|p| p.link.clone()).collect::<HashSet<_>>();
        let linked = sources
            .iter()
            .chain(plan.iter().map(|p| &p.source))
            .collect::<HashSet<_>>();
        for link in self.overlay_links().await {
            let stale = !planned.contains(&link)
                && resolve_link(&link).is_some_and(|target| linked.contains(&target));
            if !stale {
                continue;
            }
            match remove_symlink(&link).await {
                Ok(true) => {
                    info!("prune {:?}", link.display());
                    report.removed.push(link);
                }
                Ok(false) => {}
                Err(err) => report.failed.push((link, err.to_string())),
            }
        }

        if let Some(exclude) = &self.exclude {
            let placed = report.placed().map(|link| self.exclude_entry(link)).collect::<Vec<_>>();
            let removed = report.removed.iter().map(|link| self.exclude_entry(link)).collect::<Vec<_>>();
            exclude.edit(|edit| {
                edit.remove_entries(removed);
                edit.insert_entries(placed);
            })?;
        }

        Ok(report)
    }

    /// Remove every link pointing at the given overlay files.
    ///
    /// # Errors
    ///
    /// - Return [`LinkError::Exclude`] if exclude file cannot be updated.
    pub async fn unlink_files(&self, sources: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let mut removed = Vec::new();
        for link in self.overlay_links().await {
            let points_at_source = resolve_link(&link).is_some_and(|target| sources.contains(&target));
            if !points_at_source {
                continue;
            }
            match remove_symlink(&link).await {
                Ok(true) => {
                    info!("unlink {:?}", link.display());
                    removed.push(link);
                }
                Ok(false) => {}
                Err(err) => warn!("cannot unlink {:?}: {err}", link.display()),
            }
        }

        if let Some(exclude) = &self.exclude {
            let entries = removed.iter().map(|link| self.exclude_entry(link)).collect::<Vec<_>>();
            exclude.edit(|edit| edit.remove_entries(entries))?;
        }

        Ok(removed)
    }

    /// Remove every link into the overlay from the target tree.
    ///
    /// # Errors
    ///
    /// - Return [`LinkError::Exclude`] if exclude file cannot be updated.
    #[instrument(skip(self), level = "debug")]
    pub async fn unlink(&self) -> Result<Vec<PathBuf>> {
        let mut removed = Vec::new();
        for link in self.overlay_links().await {
            match remove_symlink(&link).await {
                Ok(true) => {
                    info!("unlink {:?}", link.display());
                    removed.push(link);
                }
                Ok(false) => {}
                Err(err) => warn!("cannot unlink {:?}: {err}", link.display()),
            }
        }

        if let Some(exclude) = &self.exclude {
            exclude.edit(|edit| edit.clear_entries())?;
        }

        Ok(removed)
    }

    /// Find real instructions files standing in the way of linking.
    pub async fn instructions_conflicts(&self) -> Vec<InstructionsConflict> {
        let inspector = HostInspector::new(self.vcs);
        let mut conflicts = Vec::new();
        let mut paths = target_walk(&self.ctx.target_root, false);

        while let Some(path) = paths.next().await {
            if path.file_name().is_none_or(|name| name != INSTRUCTIONS_FILE) {
                continue;
            }

            let kind = match inspector.presence(&path) {
                Presence::Symlink(target) if target.starts_with(&self.ctx.overlay_root) => continue,
                Presence::Symlink(target) => ConflictKind::ForeignLink(target),
                Presence::File if inspector.is_tracked(&path) => ConflictKind::Tracked,
                Presence::File => ConflictKind::Untracked,
                Presence::Missing | Presence::Dir => continue,
            };
            conflicts.push(InstructionsConflict { path, kind });
        }

        conflicts
    }

    /// Classify every managed-looking path in the target tree.
    pub async fn classify_target(&self) -> Vec<(PathBuf, LinkState)> {
        let inspector = HostInspector::new(self.vcs);
        let mut states = Vec::new();
        let mut paths = target_walk(&self.ctx.target_root, true);

        while let Some(path) = paths.next().await {
            if !self.looks_managed(&path) {
                continue;
            }
            let state = classify(&path, self.ctx, &inspector);
            states.push((path, state));
        }

        states
    }

    /// Every file in the overlay that may apply to this checkout.
    ///
    /// Covers the global scope (without the template area) and the current
    /// project, honoring configured ignore patterns.
    ///
    /// # Errors
    ///
    /// - Return [`LinkError::Config`] if ignore patterns are malformed.
    pub async fn overlay_files(&self) -> Result<Vec<PathBuf>> {
        let matcher = self.config.ignore_matcher()?;
        let template = self.ctx.overlay_root.join(GLOBAL_DIR).join(INIT_DIR);
        let mut files = Vec::new();

        for root in [self.ctx.scope_root(Scope::Global), self.ctx.project_root()] {
            let template = template.clone();
            let matcher = matcher.clone();
            let mut paths = walk(root, move |path, is_dir| {
                path == template
                    || path.file_name().is_some_and(|name| name == ".git")
                    || matcher.matched(path, is_dir).is_ignore()
            });
            while let Some(path) = paths.next().await {
                files.push(path);
            }
        }

        Ok(files)
    }

    /// Decide every link for a set of overlay files.
    pub fn plan(&self, overlay_files: &[PathBuf]) -> Vec<PlannedLink> {
        let mut plan = Vec::new();
        for source in overlay_files {
            let Some(mapping) = self.ctx.overlay_to_target(source) else {
                continue;
            };
            for link in self.ctx.fan_out(&mapping, &self.config.agents) {
                plan.push(PlannedLink {
                    link,
                    source: source.clone(),
                    mapping: mapping.clone(),
                });
            }
        }

        apply_scope_suffixes(&mut plan);
        plan
    }

    async fn preflight(&self) -> Result<()> {
        let conflicts = self.instructions_conflicts().await;
        if conflicts.is_empty() {
            return Ok(());
        }

        let remediation = conflicts
            .iter()
            .map(|conflict| conflict.remediation(&self.ctx.target_root))
            .collect();
        Err(LinkError::InstructionsConflict {
            conflicts,
            remediation,
        })
    }

    async fn apply(&self, plan: &[PlannedLink]) -> LinkReport {
        let inspector = HostInspector::new(self.vcs);
        let mut report = LinkReport::default();

        let mut by_source: BTreeMap<&Path, Vec<&PlannedLink>> = BTreeMap::new();
        for planned in plan {
            by_source.entry(planned.source.as_path()).or_default().push(planned);
        }

        for (source, group) in by_source {
            let mut pending = Vec::new();
            for planned in group {
                let anchor = self.ctx.anchor_dir(&planned.mapping);
                if !inspector.exists(&anchor) {
                    debug!(
                        "anchor {:?} missing, skip {:?}",
                        anchor.display(),
                        planned.link.display()
                    );
                    report.missing_anchor.push(MissingAnchor {
                        link: planned.link.clone(),
                        anchor,
                    });
                    continue;
                }

                let is_alias = planned.mapping.kind == EntryKind::Instructions;
                let is_real = inspector.presence(&planned.link) == Presence::File;
                if is_alias && is_real && inspector.is_tracked(&planned.link) {
                    debug!("{:?} tracked by git, skip", planned.link.display());
                    report.skipped_tracked.push(planned.link.clone());
                    continue;
                }

                pending.push(planned.link.clone());
            }

            // INVARIANT: Fan out of one overlay file is placed concurrently.
            let outcomes = join_all(pending.iter().map(|link| replace_symlink(link, source))).await;
            for (link, outcome) in pending.into_iter().zip(outcomes) {
                match outcome {
                    Ok(LinkOutcome::Created) => {
                        info!("link {:?}", link.display());
                        report.created.push(link);
                    }
                    Ok(LinkOutcome::Replaced) => {
                        info!("relink {:?}", link.display());
                        report.replaced.push(link);
                    }
                    Ok(LinkOutcome::Unchanged) => report.unchanged.push(link),
                    Err(err) => {
                        warn!("cannot link {:?}: {err}", link.display());
                        report.failed.push((link, err.to_string()));
                    }
                }
            }
        }

        report
    }

    async fn overlay_links(&self) -> Vec<PathBuf> {
        let mut links = Vec::new();
        let mut paths = target_walk(&self.ctx.target_root, true);
        while let Some(path) = paths.next().await {
            if resolve_link(&path).is_some_and(|target| target.starts_with(&self.ctx.overlay_root)) {
                links.push(path);
            }
        }

        links
    }

    fn looks_managed(&self, path: &Path) -> bool {
        looks_managed(self.ctx, path, true)
    }

    fn exclude_entry(&self, link: &Path) -> String {
        let rel = link.strip_prefix(&self.ctx.target_root).unwrap_or(link);
        format!("/{}", rel.display())
    }
}

/// Check if a target path is the kind of path clank manages.
///
/// Instructions files and anything under the misc directory always are;
/// paths under a tool directory only when `tools` is set.
pub fn looks_managed(ctx: &MappingContext, path: &Path, tools: bool) -> bool {
    let Ok(rel) = ctx.relative_target(path) else {
        return false;
    };

    if rel.file_name().is_some_and(is_instructions_name) {
        return true;
    }
    if has_dir_component(&rel, MISC_DIR) {
        return true;
    }

    tools && rel.iter().next().and_then(tool_of).is_some()
}

/// Walk the target tree, skipping version control internals, dependency
/// folders, nested checkouts, and hidden directories other than tool
/// directories (those only when `tools` is set).
pub fn target_walk(root: &Path, tools: bool) -> LocalBoxStream<'static, PathBuf> {
    let root = root.to_path_buf();
    walk(root.clone(), move |path, is_dir| {
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            return false;
        };
        if name == ".git" {
            return true;
        }
        if !is_dir {
            return false;
        }
        if name == "node_modules" {
            return true;
        }
        if name.starts_with('.') && !(tools && tool_of(name).is_some()) {
            return true;
        }

        // INVARIANT: Nested repositories and worktrees manage their own links.
        path != root && path.join(".git").exists()
    })
}

// Suffix non-global links that collide with links from other sources.
fn apply_scope_suffixes(plan: &mut [PlannedLink]) {
    let mut sources_by_link: BTreeMap<PathBuf, HashSet<PathBuf>> = BTreeMap::new();
    for planned in plan.iter() {
        sources_by_link
            .entry(planned.link.clone())
            .or_default()
            .insert(planned.source.clone());
    }

    for planned in plan.iter_mut() {
        let colliding = sources_by_link
            .get(&planned.link)
            .is_some_and(|sources| sources.len() > 1);
        if colliding && planned.mapping.scope != Scope::Global {
            planned.link = add_scope_suffix(&planned.link, planned.mapping.scope);
        }
    }
}

/// Link reconciliation error types.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Real instructions files stand where links are expected.
    #[error(
        "refusing to link, instructions files need attention first:\n{}\n\nto fix, run:\n  {}",
        conflicts.iter().map(|c| format!("  {c}")).collect::<Vec<_>>().join("\n"),
        remediation.join("\n  ")
    )]
    InstructionsConflict {
        conflicts: Vec<InstructionsConflict>,
        remediation: Vec<String>,
    },

    /// Ignore patterns cannot be compiled.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Exclude file cannot be updated.
    #[error(transparent)]
    Exclude(#[from] exclude::Error),
}

/// Friendly result alias :3
pub type Result<T, E = LinkError> = std::result::Result<T, E>;
