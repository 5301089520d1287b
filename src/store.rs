// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Overlay store management and manipulation.
//!
//! The overlay repository is where clank keeps every managed file. This module
//! moves files into it, out of it, and between its scopes, then asks the
//! [`Linker`] to bring the target tree along.
//!
//! # Overlay Store Layout
//!
//! The overlay can generally be placed anywhere on the user's file system.
//! However, the default location is `~/clankover`. It is a plain git
//! repository, so the user can version and share it like any other. See
//! [`crate::mapping`] for the meaning of each directory.
//!
//! # Ordering
//!
//! Nothing here is transactional. Every mutation is a sequence of steps that
//! can be repeated: content is copied and verified before the original is
//! deleted, and links are updated before the old overlay copy goes away. All
//! arguments of a command are validated before the first step is taken, so
//! a conflict on one path leaves every path untouched.
//!
//! Once steps are under way, a failing path is recorded in the report and
//! the remaining paths carry on. Work already done for other paths, like
//! content moved into the overlay, is always linked before returning.

use crate::{
    config::Config,
    fs::{copy_verified, move_file, prune_empty_dirs, resolve_link, HostInspector, LinkInspector, Presence},
    link::{exclude::ExcludeDrafter, state::classify, LinkError, LinkReport, Linker},
    mapping::{MapError, MappingContext, GLOBAL_DIR, INIT_DIR, TARGETS_DIR},
    path::{normalize, relative_to},
    scope::Scope,
    vcs::{Git2Vcs, Vcs, VcsError},
};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
};
use tokio::fs;
use tracing::{info, instrument, warn};

/// Create the overlay skeleton and make it a git repository.
///
/// Creates `global/`, `global/init/`, and `targets/<project>/` when a
/// project is given. Safe to run again on an existing overlay.
///
/// # Errors
///
/// - Return [`StoreError::Io`] if directories cannot be created.
/// - Return [`StoreError::Vcs`] if the repository cannot be initialized.
#[instrument(skip(overlay_root), level = "debug")]
pub fn init(overlay_root: impl AsRef<Path>, project: Option<&str>) -> Result<Git2Vcs> {
    let overlay_root = overlay_root.as_ref();
    let mut dirs = vec![overlay_root.join(GLOBAL_DIR).join(INIT_DIR)];
    if let Some(project) = project {
        dirs.push(overlay_root.join(TARGETS_DIR).join(project));
    }

    for dir in dirs {
        std::fs::create_dir_all(&dir).map_err(|err| StoreError::Io {
            source: err,
            path: dir.clone(),
        })?;
    }
    info!("overlay ready at {:?}", overlay_root.display());

    Ok(Git2Vcs::open_or_init(overlay_root)?)
}

/// Outcome of adding files to the overlay.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AddReport {
    /// Overlay files now holding the added content.
    pub stored: Vec<PathBuf>,

    /// Real target files whose content moved into the overlay.
    pub moved: Vec<PathBuf>,

    /// Paths that could not be stored, with the reason.
    pub failed: Vec<(PathBuf, String)>,

    pub links: LinkReport,
}

/// Outcome of removing files from the overlay.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RemoveReport {
    pub deleted: Vec<PathBuf>,
    pub unlinked: Vec<PathBuf>,

    /// Overlay files that could not be deleted, with the reason.
    pub failed: Vec<(PathBuf, String)>,

    /// Links of same-named files in other scopes, renamed once the
    /// collision is gone.
    pub links: LinkReport,
}

/// Outcome of moving files between scopes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MoveReport {
    /// Pairs of old and new overlay file.
    pub moved: Vec<(PathBuf, PathBuf)>,

    /// Files already in the requested scope.
    pub unchanged: Vec<PathBuf>,

    /// Overlay files that could not be copied or deleted, with the reason.
    pub failed: Vec<(PathBuf, String)>,

    pub links: LinkReport,
}

/// Overlay file located for a target path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub overlay: PathBuf,
    pub scope: Scope,
}

/// Manage files of the overlay for one target checkout.
#[derive(Debug)]
pub struct OverlayStore<'a, V: Vcs> {
    ctx: &'a MappingContext,
    config: &'a Config,
    vcs: &'a V,
    exclude: Option<ExcludeDrafter>,
}

impl<'a, V: Vcs> OverlayStore<'a, V> {
    /// Construct new overlay store handle.
    pub fn new(ctx: &'a MappingContext, config: &'a Config, vcs: &'a V) -> Self {
        Self {
            ctx,
            config,
            vcs,
            exclude: None,
        }
    }

    /// Keep a git exclude file in sync with placed links.
    pub fn with_exclude(mut self, exclude: ExcludeDrafter) -> Self {
        self.exclude = Some(exclude);
        self
    }

    /// Linker sharing this store's context.
    pub fn linker(&self) -> Linker<'a, V> {
        let linker = Linker::new(self.ctx, self.config, self.vcs);
        match &self.exclude {
            Some(exclude) => linker.with_exclude(exclude.clone()),
            None => linker,
        }
    }

    /// Bring target paths under management in a scope.
    ///
    /// Existing real content is moved into the overlay, otherwise an empty
    /// overlay file is created. Each stored file is then linked, fanned out
    /// like a full link run would. A name already used by another scope is
    /// stored all the same, and the links of both get scope suffixes.
    ///
    /// Content that cannot be moved is recorded in [`AddReport::failed`],
    /// and the other paths are still stored and linked.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Map`] if a path escapes the target root.
    /// - Return [`StoreError::WrongScope`] if a path without new content
    ///   already links into another scope.
    /// - Return [`StoreError::Tracked`] if a path is tracked by git.
    /// - Return [`StoreError::Exists`] if both a real file and an overlay
    ///   file exist for a path.
    /// - Return [`StoreError::Link`] if linking fails.
    #[instrument(skip(self, paths, cwd), level = "debug")]
    pub async fn add(&self, paths: &[PathBuf], scope: Scope, cwd: &Path) -> Result<AddReport> {
        let inspector = HostInspector::new(self.vcs);
        let mut pending = Vec::new();

        for input in paths {
            let target = self.ctx.normalize_add_path(input, cwd)?;
            let overlay = self.ctx.target_to_overlay(&target, scope)?;

            // INVARIANT: Content may sit at the typed path, e.g., `CLAUDE.md`
            // for `agents.md` or `notes.md` for `clank/notes.md`.
            let typed = normalize(cwd.join(input));
            let content = [&typed, &target]
                .into_iter()
                .find(|path| inspector.presence(path) == Presence::File)
                .cloned();

            // Without new content, a link into another scope names that
            // scope's file, which only `mv` may relocate.
            if content.is_none() {
                let linked = [&typed, &target].into_iter().find_map(|path| {
                    let existing = classify(path, self.ctx, &inspector).scope()?;
                    (existing != scope).then(|| (path.to_path_buf(), existing))
                });
                if let Some((path, existing)) = linked {
                    return Err(StoreError::WrongScope {
                        path: relative_to(&path, cwd),
                        existing,
                        requested: scope,
                    });
                }
            }

            if let Some(content) = &content {
                if inspector.is_tracked(content) {
                    return Err(StoreError::Tracked {
                        path: relative_to(content, cwd),
                    });
                }
                if overlay.exists() {
                    return Err(StoreError::Exists {
                        path: relative_to(content, cwd),
                        overlay,
                    });
                }
            }

            pending.push((overlay, content));
        }

        let mut report = AddReport::default();
        for (overlay, content) in pending {
            match content {
                Some(content) => match move_file(&content, &overlay).await {
                    Ok(()) => {
                        info!("store {:?} as {:?}", content.display(), overlay.display());
                        report.moved.push(content);
                    }
                    Err(err) => {
                        warn!("cannot store {:?}: {err}", content.display());
                        report.failed.push((content, err.to_string()));
                        continue;
                    }
                },
                None if overlay.exists() => {}
                None => match create_empty(&overlay).await {
                    Ok(()) => info!("create {:?}", overlay.display()),
                    Err(err) => {
                        warn!("cannot create {:?}: {err}", overlay.display());
                        report.failed.push((overlay, err.to_string()));
                        continue;
                    }
                },
            }
            report.stored.push(overlay);
        }

        report.links = self.linker().link_files(&report.stored).await?;
        Ok(report)
    }

    /// Drop target paths from the overlay.
    ///
    /// Without a scope, the single scope holding each path is used. Files of
    /// the same name left in other scopes are relinked, dropping suffixes
    /// that no longer collide.
    ///
    /// An overlay file that cannot be deleted is recorded in
    /// [`RemoveReport::failed`] and keeps its links. The other paths are
    /// still deleted and unlinked.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NotFound`] if a path is not in the overlay.
    /// - Return [`StoreError::ScopeRequired`] if a path is in several scopes
    ///   and none was given.
    /// - Return [`StoreError::Link`] if links cannot be updated.
    #[instrument(skip(self, paths, cwd), level = "debug")]
    pub async fn remove(&self, paths: &[PathBuf], scope: Option<Scope>, cwd: &Path) -> Result<RemoveReport> {
        let mut doomed = Vec::new();
        for input in paths {
            let overlay = self.locate(input, scope, cwd)?.overlay;
            if !doomed.contains(&overlay) {
                doomed.push(overlay);
            }
        }

        let mut report = RemoveReport::default();
        for overlay in doomed {
            match fs::remove_file(&overlay).await {
                Ok(()) => {
                    info!("delete {:?}", overlay.display());
                    self.prune_overlay_dirs(&overlay).await;
                    report.deleted.push(overlay);
                }
                Err(err) => {
                    warn!("cannot delete {:?}: {err}", overlay.display());
                    report.failed.push((overlay, err.to_string()));
                }
            }
        }

        let linker = self.linker();
        report.unlinked = linker.unlink_files(&report.deleted).await?;

        let survivors = self.same_named(&report.deleted);
        if !survivors.is_empty() {
            report.links = linker.link_files(&survivors).await?;
        }

        Ok(report)
    }

    /// Move managed files into another scope.
    ///
    /// Each file is copied into the new scope and verified, its links are
    /// repointed, and only then is the old copy deleted.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NotFound`] if a path is not in the overlay.
    /// - Return [`StoreError::ScopeRequired`] if a path is in several scopes.
    /// - Return [`StoreError::Exists`] if the new scope already holds it.
    /// - Return [`StoreError::Link`] if links cannot be updated.
    #[instrument(skip(self, paths, cwd), level = "debug")]
    pub async fn move_scope(&self, paths: &[PathBuf], to: Scope, cwd: &Path) -> Result<MoveReport> {
        let mut report = MoveReport::default();
        let mut pending = Vec::new();

        for input in paths {
            let located = self.locate(input, None, cwd)?;
            if located.scope == to {
                report.unchanged.push(located.overlay);
                continue;
            }

            let Some(mapping) = self.ctx.overlay_to_target(&located.overlay) else {
                return Err(StoreError::NotFound {
                    path: input.clone(),
                });
            };
            let destination = self.ctx.target_to_overlay(&mapping.target_path, to)?;
            if destination.exists() {
                return Err(StoreError::Exists {
                    path: relative_to(&mapping.target_path, cwd),
                    overlay: destination,
                });
            }

            pending.push((located.overlay, destination));
        }

        let mut copied = Vec::new();
        for (from, to) in pending {
            match copy_verified(&from, &to).await {
                Ok(()) => copied.push((from, to)),
                Err(err) => {
                    warn!("cannot copy {:?}: {err}", from.display());
                    report.failed.push((from, err.to_string()));
                }
            }
        }

        let (from, to): (Vec<_>, Vec<_>) = copied.iter().cloned().unzip();
        report.links = self.linker().relink(&from, &to).await?;

        // INVARIANT: Links already point at the new copy, so a failed delete
        // only leaves a stale duplicate behind.
        for (from, to) in copied {
            if let Err(err) = fs::remove_file(&from).await {
                warn!("cannot delete {:?}: {err}", from.display());
                report.failed.push((from.clone(), err.to_string()));
            } else {
                info!("move {:?} to {:?}", from.display(), to.display());
                self.prune_overlay_dirs(&from).await;
            }
            report.moved.push((from, to));
        }

        Ok(report)
    }

    /// Find the overlay file behind a user-typed target path.
    ///
    /// A link into the overlay names its file directly. Otherwise each scope
    /// is searched for the mapped overlay path.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Map`] if path escapes target root.
    /// - Return [`StoreError::NotFound`] if no scope holds the path.
    /// - Return [`StoreError::ScopeRequired`] if several scopes hold it and
    ///   no scope was given.
    pub fn locate(&self, input: &Path, scope: Option<Scope>, cwd: &Path) -> Result<Located> {
        let typed = normalize(cwd.join(input));
        let inspector = HostInspector::new(self.vcs);

        if let Some(state_scope) = classify(&typed, self.ctx, &inspector).scope() {
            if scope.is_none_or(|scope| scope == state_scope) {
                if let Some(overlay) = resolve_link(&typed) {
                    return Ok(Located {
                        overlay,
                        scope: state_scope,
                    });
                }
            }
        }

        let target = self.ctx.normalize_add_path(input, cwd)?;
        let scopes = match scope {
            Some(scope) => vec![scope],
            None => Scope::ALL.to_vec(),
        };

        let mut found = Vec::new();
        for scope in scopes {
            let overlay = self.ctx.target_to_overlay(&target, scope)?;
            if overlay.is_file() {
                found.push(Located { overlay, scope });
            }
        }

        match found.len() {
            0 => Err(StoreError::NotFound {
                path: input.to_path_buf(),
            }),
            1 => Ok(found.remove(0)),
            _ => Err(StoreError::ScopeRequired {
                path: input.to_path_buf(),
                scopes: found.into_iter().map(|located| located.scope).collect(),
            }),
        }
    }

    // Overlay files in other scopes sharing a target path with `overlays`.
    fn same_named(&self, overlays: &[PathBuf]) -> Vec<PathBuf> {
        let mut found = Vec::new();
        for overlay in overlays {
            let Some(mapping) = self.ctx.overlay_to_target(overlay) else {
                continue;
            };
            for scope in Scope::ALL.into_iter().filter(|scope| *scope != mapping.scope) {
                let Ok(other) = self.ctx.target_to_overlay(&mapping.target_path, scope) else {
                    continue;
                };
                if other.is_file() && !found.contains(&other) {
                    found.push(other);
                }
            }
        }

        found
    }

    async fn prune_overlay_dirs(&self, overlay: &Path) {
        if let Some(parent) = overlay.parent() {
            let stop = Scope::ALL
                .into_iter()
                .map(|scope| self.ctx.scope_root(scope))
                .filter(|root| parent.starts_with(root))
                .max_by_key(|root| root.components().count())
                .unwrap_or_else(|| self.ctx.overlay_root.clone());
            prune_empty_dirs(parent, &stop).await;
        }
    }
}

async fn create_empty(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, "").await
}

/// Scopes listed for the user, e.g., "global, worktree".
struct ScopeList<'a>(&'a [Scope]);

impl Display for ScopeList<'_> {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let names = self.0.iter().map(Scope::as_str).collect::<Vec<_>>();
        fmt.write_str(&names.join(", "))
    }
}

/// Overlay store error types.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Path is managed in a different scope than requested.
    #[error(
        "{:?} is already managed in {existing} scope\n\nto move it, run:\n  clank mv {} {}",
        path.display(),
        requested.flag(),
        path.display()
    )]
    WrongScope {
        path: PathBuf,
        existing: Scope,
        requested: Scope,
    },

    /// Path is a real file tracked by git.
    #[error(
        "{:?} is tracked by git\n\nto stop tracking it, run:\n  git rm --cached {}",
        path.display(),
        path.display()
    )]
    Tracked { path: PathBuf },

    /// Overlay already holds content for a real file.
    #[error("{:?} already exists in overlay as {:?}", path.display(), overlay.display())]
    Exists { path: PathBuf, overlay: PathBuf },

    /// Path is in no scope of the overlay.
    #[error("{:?} is not managed by clank", path.display())]
    NotFound { path: PathBuf },

    /// Path is in several scopes of the overlay.
    #[error(
        "{:?} exists in several scopes ({}), pass one of --global, --project, --worktree",
        path.display(),
        ScopeList(scopes)
    )]
    ScopeRequired { path: PathBuf, scopes: Vec<Scope> },

    #[error("file system operation failed at {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    #[error(transparent)]
    Map(#[from] MapError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Vcs(#[from] VcsError),
}

/// Friendly result alias :3
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::OverlayRepo, fs::tests::block_on, mapping::GitContext, vcs::NoVcs};
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::fs::{create_dir_all, read_to_string, write};

    fn fixture() -> anyhow::Result<(MappingContext, Config)> {
        let cwd = std::env::current_dir()?;
        let overlay = cwd.join("overlay");
        let target = cwd.join("app");
        create_dir_all(&target)?;
        let ctx = MappingContext::new(
            &overlay,
            &target,
            GitContext {
                project_name: "app".into(),
                worktree_name: "main".into(),
                is_worktree: false,
                root: target.clone(),
            },
        );
        let config = Config {
            overlay_repo: OverlayRepo::new(&overlay),
            ..Config::default()
        };

        Ok((ctx, config))
    }

    #[sealed_test]
    fn init_creates_skeleton_twice() -> anyhow::Result<()> {
        let overlay = std::env::current_dir()?.join("overlay");
        init(&overlay, Some("app"))?;
        init(&overlay, Some("app"))?;

        assert!(overlay.join("global/init").is_dir());
        assert!(overlay.join("targets/app").is_dir());
        assert!(overlay.join(".git").is_dir());

        Ok(())
    }

    #[sealed_test]
    fn add_alias_stores_one_file_and_fans_out() -> anyhow::Result<()> {
        let (ctx, config) = fixture()?;
        let pkg = ctx.target_root.join("pkg");
        create_dir_all(&pkg)?;

        let store = OverlayStore::new(&ctx, &config, &NoVcs);
        let report = block_on(store.add(&["CLAUDE.md".into()], Scope::Project, &pkg))?;

        let overlay = ctx.overlay_root.join("targets/app/pkg/agents.md");
        assert_eq!(report.stored, vec![overlay.clone()]);
        assert!(overlay.is_file());
        for alias in ["AGENTS.md", "CLAUDE.md", "GEMINI.md"] {
            assert_eq!(resolve_link(&pkg.join(alias)), Some(overlay.clone()));
        }

        Ok(())
    }

    #[sealed_test]
    fn add_moves_real_content_into_overlay() -> anyhow::Result<()> {
        let (ctx, config) = fixture()?;
        write(ctx.target_root.join("notes.md"), "remember")?;

        let store = OverlayStore::new(&ctx, &config, &NoVcs);
        let report = block_on(store.add(&["notes.md".into()], Scope::Global, &ctx.target_root))?;

        let overlay = ctx.overlay_root.join("global/clank/notes.md");
        assert_eq!(report.moved, vec![ctx.target_root.join("notes.md")]);
        assert_eq!(read_to_string(&overlay)?, "remember");
        assert!(!ctx.target_root.join("notes.md").exists());
        assert_eq!(resolve_link(&ctx.target_root.join("clank/notes.md")), Some(overlay));

        Ok(())
    }

    #[sealed_test]
    fn add_in_second_scope_suffixes_collision() -> anyhow::Result<()> {
        let (ctx, config) = fixture()?;
        let store = OverlayStore::new(&ctx, &config, &NoVcs);
        let root = ctx.target_root.clone();

        write(root.join("notes.md"), "shared")?;
        block_on(store.add(&["notes.md".into()], Scope::Global, &root))?;
        write(root.join("notes.md"), "mine")?;
        let report = block_on(store.add(&["notes.md".into()], Scope::Worktree, &root))?;

        let global = ctx.overlay_root.join("global/clank/notes.md");
        let worktree = ctx.overlay_root.join("targets/app/worktrees/main/clank/notes.md");
        assert_eq!(report.stored, vec![worktree.clone()]);
        assert_eq!(read_to_string(&global)?, "shared");
        assert_eq!(read_to_string(&worktree)?, "mine");
        assert_eq!(resolve_link(&root.join("clank/notes.md")), Some(global));
        assert_eq!(resolve_link(&root.join("clank/notes-worktree.md")), Some(worktree));

        // The link alone names the global file, which only `mv` relocates.
        let result = block_on(store.add(&["clank/notes.md".into()], Scope::Project, &root));
        assert!(matches!(result, Err(StoreError::WrongScope { existing: Scope::Global, .. })));

        Ok(())
    }

    #[sealed_test]
    fn suffixes_follow_collisions_coming_and_going() -> anyhow::Result<()> {
        let (ctx, config) = fixture()?;
        let store = OverlayStore::new(&ctx, &config, &NoVcs);
        let root = ctx.target_root.clone();
        let project = ctx.overlay_root.join("targets/app/clank/notes.md");
        let worktree = ctx.overlay_root.join("targets/app/worktrees/main/clank/notes.md");

        write(root.join("notes.md"), "team")?;
        block_on(store.add(&["notes.md".into()], Scope::Project, &root))?;
        write(root.join("notes.md"), "mine")?;
        let report = block_on(store.add(&["notes.md".into()], Scope::Worktree, &root))?;

        assert_eq!(report.links.removed, vec![root.join("clank/notes.md")]);
        assert!(std::fs::symlink_metadata(root.join("clank/notes.md")).is_err());
        assert_eq!(resolve_link(&root.join("clank/notes-project.md")), Some(project.clone()));
        assert_eq!(resolve_link(&root.join("clank/notes-worktree.md")), Some(worktree));

        let report = block_on(store.remove(&["clank/notes-worktree.md".into()], None, &root))?;
        assert_eq!(report.unlinked, vec![root.join("clank/notes-worktree.md")]);
        assert_eq!(report.links.removed, vec![root.join("clank/notes-project.md")]);
        assert_eq!(resolve_link(&root.join("clank/notes.md")), Some(project));

        Ok(())
    }

    #[sealed_test]
    fn add_keeps_going_past_a_failed_path() -> anyhow::Result<()> {
        let (ctx, config) = fixture()?;
        let store = OverlayStore::new(&ctx, &config, &NoVcs);
        let root = ctx.target_root.clone();
        write(root.join("a.md"), "a")?;
        create_dir_all(root.join("sub"))?;
        write(root.join("sub/b.md"), "b")?;

        // A file where the overlay needs a directory.
        create_dir_all(ctx.overlay_root.join("global"))?;
        write(ctx.overlay_root.join("global/sub"), "in the way")?;

        let report = block_on(store.add(&["a.md".into(), "sub/b.md".into()], Scope::Global, &root))?;

        let stored = ctx.overlay_root.join("global/clank/a.md");
        assert_eq!(report.stored, vec![stored.clone()]);
        assert_eq!(report.moved, vec![root.join("a.md")]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, root.join("sub/b.md"));
        assert_eq!(resolve_link(&root.join("clank/a.md")), Some(stored));
        assert_eq!(read_to_string(root.join("sub/b.md"))?, "b");

        Ok(())
    }

    #[sealed_test]
    fn remove_keeps_going_past_a_failed_path() -> anyhow::Result<()> {
        let (ctx, config) = fixture()?;
        let store = OverlayStore::new(&ctx, &config, &NoVcs);
        let root = ctx.target_root.clone();
        block_on(store.add(&["clank/a.md".into()], Scope::Global, &root))?;

        // A directory cannot be deleted as an overlay file.
        let stuck = ctx.overlay_root.join("global/clank/b.md");
        create_dir_all(&stuck)?;
        std::os::unix::fs::symlink(&stuck, root.join("clank/b.md"))?;

        let paths = ["clank/a.md".into(), "clank/b.md".into()];
        let report = block_on(store.remove(&paths, None, &root))?;

        assert_eq!(report.deleted, vec![ctx.overlay_root.join("global/clank/a.md")]);
        assert_eq!(report.unlinked, vec![root.join("clank/a.md")]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, stuck);
        assert_eq!(resolve_link(&root.join("clank/b.md")), Some(stuck));

        Ok(())
    }

    #[sealed_test]
    fn remove_infers_single_scope() -> anyhow::Result<()> {
        let (ctx, config) = fixture()?;
        let store = OverlayStore::new(&ctx, &config, &NoVcs);
        let root = ctx.target_root.clone();
        block_on(store.add(&["clank/todo.md".into()], Scope::Worktree, &root))?;

        let report = block_on(store.remove(&["clank/todo.md".into()], None, &root))?;
        assert_eq!(
            report.deleted,
            vec![ctx.overlay_root.join("targets/app/worktrees/main/clank/todo.md")]
        );
        assert_eq!(report.unlinked, vec![root.join("clank/todo.md")]);
        assert!(!ctx.overlay_root.join("targets/app/worktrees/main/clank").exists());

        let result = block_on(store.remove(&["clank/todo.md".into()], None, &root));
        assert!(matches!(result, Err(StoreError::NotFound { .. })));

        Ok(())
    }

    #[sealed_test]
    fn remove_needs_scope_when_ambiguous() -> anyhow::Result<()> {
        let (ctx, config) = fixture()?;
        for scope in [Scope::Global, Scope::Project] {
            let overlay = ctx.target_to_overlay(ctx.target_root.join("clank/a.md"), scope)?;
            create_dir_all(overlay.parent().expect("parent"))?;
            write(&overlay, "a")?;
        }

        let store = OverlayStore::new(&ctx, &config, &NoVcs);
        let result = store.locate(Path::new("clank/a.md"), None, &ctx.target_root);
        assert!(matches!(result, Err(StoreError::ScopeRequired { .. })));

        let result = store.locate(Path::new("clank/a.md"), Some(Scope::Project), &ctx.target_root)?;
        assert_eq!(result.scope, Scope::Project);

        Ok(())
    }

    #[sealed_test]
    fn move_scope_relinks_before_deleting() -> anyhow::Result<()> {
        let (ctx, config) = fixture()?;
        let store = OverlayStore::new(&ctx, &config, &NoVcs);
        let root = ctx.target_root.clone();
        write(root.join("notes.md"), "keep me")?;
        block_on(store.add(&["notes.md".into()], Scope::Project, &root))?;

        let report = block_on(store.move_scope(&["clank/notes.md".into()], Scope::Global, &root))?;
        let old = ctx.overlay_root.join("targets/app/clank/notes.md");
        let new = ctx.overlay_root.join("global/clank/notes.md");
        assert_eq!(report.moved, vec![(old.clone(), new.clone())]);
        assert!(!old.exists());
        assert_eq!(read_to_string(&new)?, "keep me");
        assert_eq!(resolve_link(&root.join("clank/notes.md")), Some(new));

        let report = block_on(store.move_scope(&["clank/notes.md".into()], Scope::Global, &root))?;
        assert_eq!(report.unchanged.len(), 1);

        Ok(())
    }
}
