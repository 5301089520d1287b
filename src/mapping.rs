// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Bidirectional path mapping between overlay and target trees.
//!
//! The __overlay__ is a separate repository holding shared agent files. The
//! __target__ is the user's project (or one of its worktrees). Every managed
//! file in the target is a symlink into the overlay, and the functions here
//! decide where each overlay file surfaces in the target and where a target
//! path is stored in the overlay. Nothing in this module touches the file
//! system.
//!
//! # Overlay Layout
//!
//! ```text
//! <overlay>/
//!   global/                                  # every project
//!     init/                                  # templates, never linked
//!   targets/<project>/                       # every worktree of a project
//!     worktrees/<worktree>/                  # a single worktree
//! ```
//!
//! Each scope root has the same internal shape: a `clank/` bag of loose
//! files (at any depth, mirroring the target), tool directories (`claude/`,
//! `gemini/`) that surface as dot-directories, a tool-agnostic `prompts/`
//! directory fanned out to every tool, and an `agents.md` instructions file
//! at any depth that surfaces under each configured alias (`AGENTS.md`,
//! `CLAUDE.md`, `GEMINI.md`).

use crate::{
    path::{has_dir_component, normalize},
    scope::Scope,
};

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};

/// Reserved directory for loose files.
pub const MISC_DIR: &str = "clank";

/// Overlay storage name of the instructions file.
pub const INSTRUCTIONS_FILE: &str = "agents.md";

/// Tool-agnostic prompts directory.
pub const PROMPTS_DIR: &str = "prompts";

/// Registered tool directories, primary tool first.
pub const TOOL_DIRS: &[&str] = &["claude", "gemini"];

/// Tool whose prompts directory is the canonical mapping target.
pub const PRIMARY_TOOL: &str = "claude";

pub const GLOBAL_DIR: &str = "global";
pub const TARGETS_DIR: &str = "targets";
pub const WORKTREES_DIR: &str = "worktrees";

/// Template area under the global scope, never linked.
pub const INIT_DIR: &str = "init";

const INSTRUCTIONS_ALIASES: &[(&str, &str)] = &[
    ("agents", "AGENTS.md"),
    ("claude", "CLAUDE.md"),
    ("gemini", "GEMINI.md"),
];

/// File name an instructions alias surfaces as, e.g., "claude" → "CLAUDE.md".
pub fn alias_filename(agent: &str) -> Option<&'static str> {
    INSTRUCTIONS_ALIASES
        .iter()
        .find(|(name, _)| *name == agent)
        .map(|(_, file)| *file)
}

/// Every known instructions alias name.
pub fn alias_agents() -> impl Iterator<Item = &'static str> {
    INSTRUCTIONS_ALIASES.iter().map(|(name, _)| *name)
}

/// Check if a file name is the instructions file or one of its aliases.
pub fn is_instructions_name(name: impl AsRef<OsStr>) -> bool {
    let name = name.as_ref();
    name == INSTRUCTIONS_FILE || INSTRUCTIONS_ALIASES.iter().any(|(_, file)| name == *file)
}

/// Tool name of a target dot-directory component, e.g., ".claude" → "claude".
pub fn tool_of(component: impl AsRef<OsStr>) -> Option<&'static str> {
    let component = component.as_ref().to_str()?;
    let bare = component.strip_prefix('.')?;
    TOOL_DIRS.iter().find(|tool| **tool == bare).copied()
}

/// Append a scope tag to a file name, e.g., `notes.md` → `notes-worktree.md`.
///
/// Global scope is left untouched.
pub fn add_scope_suffix(path: impl AsRef<Path>, scope: Scope) -> PathBuf {
    let path = path.as_ref();
    if scope == Scope::Global {
        return path.to_path_buf();
    }

    let Some(stem) = path.file_stem() else {
        return path.to_path_buf();
    };
    let name = match path.extension() {
        Some(ext) => format!("{}-{scope}.{}", stem.to_string_lossy(), ext.to_string_lossy()),
        None => format!("{}-{scope}", stem.to_string_lossy()),
    };

    path.with_file_name(name)
}

/// Version control facts about the current checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitContext {
    /// Name of the project, shared by all of its worktrees.
    pub project_name: String,

    /// Name of the current worktree (its branch).
    pub worktree_name: String,

    /// Current checkout is a linked (secondary) worktree.
    pub is_worktree: bool,

    /// Root of the current checkout.
    pub root: PathBuf,
}

/// What part of a scope root an overlay file lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    /// Instructions file, fanned out to every configured alias.
    Instructions,

    /// Prompt file, fanned out to every tool. Holds the prompt-relative path.
    Prompt(PathBuf),

    /// File under a tool directory.
    Tool,

    /// Loose file under the reserved misc directory.
    Misc,
}

/// Where an overlay file surfaces in the target tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetMapping {
    pub target_path: PathBuf,
    pub scope: Scope,
    pub kind: EntryKind,
}

/// Immutable per-invocation mapping parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingContext {
    pub overlay_root: PathBuf,
    pub target_root: PathBuf,
    pub git: GitContext,
}

impl MappingContext {
    /// Construct new mapping context.
    pub fn new(
        overlay_root: impl Into<PathBuf>,
        target_root: impl Into<PathBuf>,
        git: GitContext,
    ) -> Self {
        Self {
            overlay_root: normalize(overlay_root.into()),
            target_root: normalize(target_root.into()),
            git,
        }
    }

    /// Overlay directory holding the files of a scope.
    pub fn scope_root(&self, scope: Scope) -> PathBuf {
        match scope {
            Scope::Global => self.overlay_root.join(GLOBAL_DIR),
            Scope::Project => self.project_root(),
            Scope::Worktree => self
                .project_root()
                .join(WORKTREES_DIR)
                .join(&self.git.worktree_name),
        }
    }

    /// Overlay directory of the current project.
    pub fn project_root(&self) -> PathBuf {
        self.overlay_root
            .join(TARGETS_DIR)
            .join(&self.git.project_name)
    }

    /// Map an overlay file to its place in the target tree.
    ///
    /// Returns `None` for anything that does not apply to this context:
    /// paths outside the overlay, other projects, other worktrees, the
    /// template area, and root-level special files.
    pub fn overlay_to_target(&self, overlay_path: impl AsRef<Path>) -> Option<TargetMapping> {
        let rel = overlay_path.as_ref().strip_prefix(&self.overlay_root).ok()?;
        let parts = rel.iter().collect::<Vec<_>>();
        let project = OsStr::new(&self.git.project_name);

        let (scope, rest) = match parts.as_slice() {
            [global, rest @ ..] if *global == GLOBAL_DIR => {
                if rest.first().is_some_and(|first| *first == INIT_DIR) {
                    return None;
                }
                (Scope::Global, rest)
            }
            [targets, name, worktrees, worktree, rest @ ..]
                if *targets == TARGETS_DIR && *name == project && *worktrees == WORKTREES_DIR =>
            {
                // INVARIANT: Other worktrees are invisible to this context.
                if *worktree != OsStr::new(&self.git.worktree_name) {
                    return None;
                }
                (Scope::Worktree, rest)
            }
            [targets, name, rest @ ..] if *targets == TARGETS_DIR && *name == project => {
                (Scope::Project, rest)
            }
            _ => return None,
        };

        let (target_rel, kind) = decode_scope_path(rest)?;
        Some(TargetMapping {
            target_path: self.target_root.join(target_rel),
            scope,
            kind,
        })
    }

    /// Map a target path to its storage place in the overlay for a scope.
    ///
    /// # Errors
    ///
    /// - Return [`MapError::OutsideTarget`] if path is not under target root.
    pub fn target_to_overlay(&self, target_path: impl AsRef<Path>, scope: Scope) -> Result<PathBuf> {
        let rel = self.relative_target(target_path.as_ref())?;
        let base = self.scope_root(scope);
        let parts = rel.iter().collect::<Vec<_>>();
        let parent = rel.parent().unwrap_or(Path::new(""));

        let Some(name) = parts.last() else {
            return Err(MapError::OutsideTarget {
                path: target_path.as_ref().to_path_buf(),
                root: self.target_root.clone(),
            });
        };

        if is_instructions_name(name) {
            return Ok(base.join(parent).join(INSTRUCTIONS_FILE));
        }

        if let [first, second, tail @ ..] = parts.as_slice() {
            if tool_of(first).is_some() && *second == PROMPTS_DIR && !tail.is_empty() {
                return Ok(base.join(PROMPTS_DIR).join(tail.iter().collect::<PathBuf>()));
            }
        }

        if let [first, tail @ ..] = parts.as_slice() {
            if let Some(tool) = tool_of(first).filter(|_| !tail.is_empty()) {
                return Ok(base.join(tool).join(tail.iter().collect::<PathBuf>()));
            }
        }

        if has_dir_component(&rel, MISC_DIR) {
            return Ok(base.join(rel));
        }

        Ok(base.join(parent).join(MISC_DIR).join(name))
    }

    /// Resolve a user-typed path into the canonical target path to add.
    ///
    /// Instructions aliases collapse onto the canonical instructions file,
    /// and plain files are placed under the misc directory unless the path
    /// already sits in the misc directory or a tool directory.
    ///
    /// # Errors
    ///
    /// - Return [`MapError::OutsideTarget`] if path escapes target root.
    pub fn normalize_add_path(&self, input: impl AsRef<Path>, cwd: impl AsRef<Path>) -> Result<PathBuf> {
        let input = input.as_ref();
        let joined = match input.is_absolute() {
            true => input.to_path_buf(),
            false => cwd.as_ref().join(input),
        };
        let abs = normalize(joined);
        let rel = self.relative_target(&abs)?;

        // INVARIANT: Compare components relative to the target root, so a
        // project directory named like the misc directory is never mistaken
        // for it.
        let Some(name) = rel.file_name() else {
            return Err(MapError::OutsideTarget {
                path: abs,
                root: self.target_root.clone(),
            });
        };
        let parent = rel.parent().unwrap_or(Path::new(""));
        let in_tool_dir = rel.iter().next().and_then(tool_of).is_some();

        let rel = if is_instructions_name(name) {
            parent.join(INSTRUCTIONS_FILE)
        } else if in_tool_dir || has_dir_component(&rel, MISC_DIR) {
            rel.clone()
        } else {
            parent.join(MISC_DIR).join(name)
        };

        Ok(self.target_root.join(rel))
    }

    /// Every target path a mapping surfaces at.
    ///
    /// Instructions files fan out to each configured alias, prompt files to
    /// each registered tool directory, everything else to itself.
    pub fn fan_out(&self, mapping: &TargetMapping, agents: &[String]) -> Vec<PathBuf> {
        match &mapping.kind {
            EntryKind::Instructions => {
                let dir = mapping.target_path.parent().unwrap_or(&self.target_root);
                let mut links = Vec::new();
                for file in agents.iter().filter_map(|agent| alias_filename(agent)) {
                    let link = dir.join(file);
                    if !links.contains(&link) {
                        links.push(link);
                    }
                }
                links
            }
            EntryKind::Prompt(rel) => TOOL_DIRS
                .iter()
                .map(|tool| {
                    self.target_root
                        .join(format!(".{tool}"))
                        .join(PROMPTS_DIR)
                        .join(rel)
                })
                .collect(),
            EntryKind::Tool | EntryKind::Misc => vec![mapping.target_path.clone()],
        }
    }

    /// Target directory that must exist for a mapping to be linked.
    ///
    /// For files in a subdirectory pocket, e.g., `packages/foo/clank/a.md`,
    /// that is the pocket's directory (`packages/foo`). Everything else is
    /// anchored at the target root.
    pub fn anchor_dir(&self, mapping: &TargetMapping) -> PathBuf {
        let rel = mapping
            .target_path
            .strip_prefix(&self.target_root)
            .unwrap_or(&mapping.target_path);

        match mapping.kind {
            EntryKind::Instructions => rel
                .parent()
                .map(|parent| self.target_root.join(parent))
                .unwrap_or_else(|| self.target_root.clone()),
            EntryKind::Misc => {
                let prefix = rel
                    .iter()
                    .take_while(|component| *component != MISC_DIR)
                    .collect::<PathBuf>();
                self.target_root.join(prefix)
            }
            EntryKind::Prompt(_) | EntryKind::Tool => self.target_root.clone(),
        }
    }

    /// Path relative to target root, lexically normalized.
    pub fn relative_target(&self, path: &Path) -> Result<PathBuf> {
        normalize(path)
            .strip_prefix(&self.target_root)
            .map(Path::to_path_buf)
            .map_err(|_| MapError::OutsideTarget {
                path: path.to_path_buf(),
                root: self.target_root.clone(),
            })
    }
}

// Decode a scope-relative overlay path into a target-relative path.
fn decode_scope_path(rest: &[&OsStr]) -> Option<(PathBuf, EntryKind)> {
    let (first, tail) = rest.split_first()?;
    let rel = rest.iter().collect::<PathBuf>();

    if rest.last().is_some_and(|name| *name == INSTRUCTIONS_FILE) {
        return Some((rel, EntryKind::Instructions));
    }

    if *first == PROMPTS_DIR && !tail.is_empty() {
        let prompt = tail.iter().collect::<PathBuf>();
        let target = PathBuf::from(format!(".{PRIMARY_TOOL}"))
            .join(PROMPTS_DIR)
            .join(&prompt);
        return Some((target, EntryKind::Prompt(prompt)));
    }

    if let Some(tool) = TOOL_DIRS.iter().find(|tool| *first == **tool) {
        if !tail.is_empty() {
            let target = PathBuf::from(format!(".{tool}")).join(tail.iter().collect::<PathBuf>());
            return Some((target, EntryKind::Tool));
        }
    }

    if has_dir_component(&rel, MISC_DIR) {
        return Some((rel, EntryKind::Misc));
    }

    None
}

/// Path mapping error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    #[error("{:?} is outside of repository root {:?}", path.display(), root.display())]
    OutsideTarget { path: PathBuf, root: PathBuf },
}

/// Friendly result alias :3
pub type Result<T, E = MapError> = std::result::Result<T, E>;

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    pub(crate) fn context() -> MappingContext {
        context_with("/work/app", "app", "main")
    }

    pub(crate) fn context_with(target: &str, project: &str, worktree: &str) -> MappingContext {
        MappingContext::new(
            "/home/me/clankover",
            target,
            GitContext {
                project_name: project.into(),
                worktree_name: worktree.into(),
                is_worktree: false,
                root: target.into(),
            },
        )
    }

    fn agents() -> Vec<String> {
        vec!["agents".into(), "claude".into(), "gemini".into()]
    }

    #[test_case("global/clank/style.md", "/work/app/clank/style.md", Scope::Global; "global misc")]
    #[test_case("targets/app/claude/commands/build.md", "/work/app/.claude/commands/build.md", Scope::Project; "project tool")]
    #[test_case("targets/app/worktrees/main/clank/notes.md", "/work/app/clank/notes.md", Scope::Worktree; "worktree misc")]
    #[test_case("targets/app/pkg/agents.md", "/work/app/pkg/agents.md", Scope::Project; "nested instructions")]
    #[test_case("global/prompts/review.md", "/work/app/.claude/prompts/review.md", Scope::Global; "prompt to primary tool")]
    #[test_case("targets/app/packages/foo/clank/notes.md", "/work/app/packages/foo/clank/notes.md", Scope::Project; "pocket misc")]
    #[test]
    fn overlay_maps_into_target(overlay: &str, target: &str, scope: Scope) {
        let ctx = context();
        let mapping = ctx
            .overlay_to_target(ctx.overlay_root.join(overlay))
            .expect("mapping");
        pretty_assertions::assert_eq!(mapping.target_path, PathBuf::from(target));
        pretty_assertions::assert_eq!(mapping.scope, scope);
    }

    #[test_case("targets/app/worktrees/feature/clank/notes.md"; "other worktree")]
    #[test_case("targets/web/clank/notes.md"; "other project")]
    #[test_case("global/init/clank/notes.md"; "template area")]
    #[test_case("global/README.md"; "root special file")]
    #[test_case("global/claude"; "bare tool directory")]
    #[test]
    fn inapplicable_overlay_paths_map_to_nothing(overlay: &str) {
        let ctx = context();
        pretty_assertions::assert_eq!(ctx.overlay_to_target(ctx.overlay_root.join(overlay)), None);
    }

    #[test]
    fn outside_overlay_maps_to_nothing() {
        let ctx = context();
        assert_eq!(ctx.overlay_to_target("/elsewhere/global/clank/a.md"), None);
    }

    #[test]
    fn project_tool_file_maps_into_overlay() -> anyhow::Result<()> {
        let ctx = context();
        let result = ctx.target_to_overlay("/work/app/.claude/commands/build.md", Scope::Project)?;
        assert_eq!(
            result,
            PathBuf::from("/home/me/clankover/targets/app/claude/commands/build.md")
        );

        Ok(())
    }

    #[test_case("/work/app/notes.md", Scope::Global, "global/clank/notes.md"; "plain root file")]
    #[test_case("/work/app/pkg/notes.md", Scope::Project, "targets/app/pkg/clank/notes.md"; "plain nested file")]
    #[test_case("/work/app/pkg/CLAUDE.md", Scope::Project, "targets/app/pkg/agents.md"; "alias collapses")]
    #[test_case("/work/app/.gemini/prompts/x.md", Scope::Worktree, "targets/app/worktrees/main/prompts/x.md"; "fanned prompt")]
    #[test_case("/work/app/packages/foo/clank/notes.md", Scope::Project, "targets/app/packages/foo/clank/notes.md"; "pocket kept")]
    #[test]
    fn target_maps_into_overlay(target: &str, scope: Scope, overlay: &str) {
        let ctx = context();
        let result = ctx.target_to_overlay(target, scope).expect("overlay path");
        pretty_assertions::assert_eq!(result, ctx.overlay_root.join(overlay));
    }

    #[test]
    fn target_outside_root_is_rejected() {
        let ctx = context();
        assert!(matches!(
            ctx.target_to_overlay("/work/other/notes.md", Scope::Global),
            Err(MapError::OutsideTarget { .. })
        ));
    }

    #[test]
    fn mapping_round_trips() -> anyhow::Result<()> {
        let ctx = context();
        let overlays = [
            "global/clank/style.md",
            "global/agents.md",
            "targets/app/claude/commands/build.md",
            "targets/app/gemini/settings.json",
            "targets/app/prompts/review.md",
            "targets/app/pkg/agents.md",
            "targets/app/packages/foo/clank/notes.md",
            "targets/app/worktrees/main/clank/todo.md",
        ];

        for overlay in overlays {
            let overlay = ctx.overlay_root.join(overlay);
            let mapping = ctx.overlay_to_target(&overlay).expect("mapping");
            assert_eq!(ctx.target_to_overlay(&mapping.target_path, mapping.scope)?, overlay);

            // INVARIANT: Every fanned out path maps back to the same file.
            for link in ctx.fan_out(&mapping, &agents()) {
                assert_eq!(ctx.target_to_overlay(&link, mapping.scope)?, overlay);
            }
        }

        Ok(())
    }

    #[test]
    fn instructions_fan_out_to_configured_aliases() {
        let ctx = context();
        let mapping = ctx
            .overlay_to_target(ctx.overlay_root.join("targets/app/pkg/agents.md"))
            .expect("mapping");
        let expect = vec![
            PathBuf::from("/work/app/pkg/AGENTS.md"),
            PathBuf::from("/work/app/pkg/CLAUDE.md"),
            PathBuf::from("/work/app/pkg/GEMINI.md"),
        ];
        assert_eq!(ctx.fan_out(&mapping, &agents()), expect);
        assert_eq!(ctx.anchor_dir(&mapping), PathBuf::from("/work/app/pkg"));
    }

    #[test]
    fn prompts_fan_out_to_every_tool() {
        let ctx = context();
        let mapping = ctx
            .overlay_to_target(ctx.overlay_root.join("global/prompts/review.md"))
            .expect("mapping");
        let expect = vec![
            PathBuf::from("/work/app/.claude/prompts/review.md"),
            PathBuf::from("/work/app/.gemini/prompts/review.md"),
        ];
        assert_eq!(ctx.fan_out(&mapping, &agents()), expect);
    }

    #[test]
    fn pocket_files_anchor_at_pocket() {
        let ctx = context();
        let mapping = ctx
            .overlay_to_target(ctx.overlay_root.join("targets/app/packages/foo/clank/notes.md"))
            .expect("mapping");
        assert_eq!(ctx.anchor_dir(&mapping), PathBuf::from("/work/app/packages/foo"));

        let mapping = ctx
            .overlay_to_target(ctx.overlay_root.join("targets/app/clank/notes.md"))
            .expect("mapping");
        assert_eq!(ctx.anchor_dir(&mapping), PathBuf::from("/work/app"));
    }

    #[test_case("notes.md", Scope::Global, "notes.md"; "global untouched")]
    #[test_case("notes.md", Scope::Project, "notes-project.md"; "project tagged")]
    #[test_case("clank/notes.md", Scope::Worktree, "clank/notes-worktree.md"; "worktree tagged")]
    #[test_case("Makefile", Scope::Project, "Makefile-project"; "no extension")]
    #[test]
    fn scope_suffix(input: &str, scope: Scope, expect: &str) {
        pretty_assertions::assert_eq!(add_scope_suffix(input, scope), PathBuf::from(expect));
    }

    #[test_case("CLAUDE.md", "/work/app/pkg", "/work/app/pkg/agents.md"; "alias from subdirectory")]
    #[test_case("GEMINI.md", "/work/app", "/work/app/agents.md"; "alias from root")]
    #[test_case("notes.md", "/work/app", "/work/app/clank/notes.md"; "plain file gets misc dir")]
    #[test_case("notes.md", "/work/app/clank", "/work/app/clank/notes.md"; "inside misc dir")]
    #[test_case("build.md", "/work/app/.claude/commands", "/work/app/.claude/commands/build.md"; "inside tool dir")]
    #[test_case("packages/foo/clank/notes.md", "/work/app", "/work/app/packages/foo/clank/notes.md"; "non prefix misc component")]
    #[test_case("../x.md", "/work/app/pkg", "/work/app/clank/x.md"; "parent components folded")]
    #[test]
    fn add_path_normalization(input: &str, cwd: &str, expect: &str) {
        let ctx = context();
        let result = ctx.normalize_add_path(input, cwd).expect("normalized path");
        pretty_assertions::assert_eq!(result, PathBuf::from(expect));
    }

    #[test]
    fn add_path_outside_repository_is_rejected() {
        let ctx = context();
        assert!(ctx.normalize_add_path("../../etc/passwd", "/work/app").is_err());
    }

    #[test]
    fn project_named_like_misc_dir_keeps_its_root() -> anyhow::Result<()> {
        let ctx = context_with("/work/clank", "clank", "main");
        let target = ctx.normalize_add_path("notes.md", "/work/clank")?;
        assert_eq!(target, PathBuf::from("/work/clank/clank/notes.md"));

        let overlay = ctx.target_to_overlay(&target, Scope::Project)?;
        assert_eq!(
            overlay,
            PathBuf::from("/home/me/clankover/targets/clank/clank/notes.md")
        );

        let mapping = ctx.overlay_to_target(&overlay).expect("mapping");
        assert_eq!(mapping.target_path, target);

        Ok(())
    }
}
