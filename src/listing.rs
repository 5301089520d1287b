// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Managed file listing.
//!
//! Walks the target tree, keeps the paths clank manages, and tags each with
//! its [`LinkState`]. Because one overlay file can surface at several paths
//! (instructions aliases, prompts in every tool directory), listings are
//! deduplicated by default down to one representative per overlay file.

use crate::{
    config::Config,
    fs::LinkInspector,
    link::{looks_managed, state::classify, state::LinkState, target_walk},
    mapping::{alias_filename, is_instructions_name, tool_of, MappingContext, MISC_DIR, PROMPTS_DIR},
    path::relative_to,
    scope::Scope,
};

use futures::StreamExt;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

/// Which link states to keep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum LinkFilter {
    #[default]
    All,
    Linked,
    Unlinked,
}

/// Listing options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOptions {
    /// Include files under tool dot-directories.
    pub hidden: bool,

    /// Maximum depth below the nearest misc directory.
    pub max_depth: Option<usize>,

    /// Only list below this directory.
    pub subtree: Option<PathBuf>,

    pub link_filter: LinkFilter,

    /// Only list links into this scope.
    pub scope: Option<Scope>,

    /// Collapse fanned out copies of one overlay file.
    pub dedupe: bool,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            hidden: false,
            max_depth: None,
            subtree: None,
            link_filter: LinkFilter::All,
            scope: None,
            dedupe: true,
        }
    }
}

/// One managed path in the target tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    /// Absolute path in the target tree.
    pub path: PathBuf,

    /// Path relative to the caller's working directory.
    pub display: PathBuf,

    pub state: LinkState,
}

/// List managed files.
///
/// Output is sorted by path relative to `cwd`.
pub async fn list(
    ctx: &MappingContext,
    config: &Config,
    inspector: &impl LinkInspector,
    opts: &ListOptions,
    cwd: &Path,
) -> Vec<ListEntry> {
    let root = opts.subtree.as_deref().unwrap_or(ctx.target_root.as_path());
    let mut paths = target_walk(root, opts.hidden);
    let mut entries = Vec::new();

    while let Some(path) = paths.next().await {
        if !looks_managed(ctx, &path, opts.hidden) {
            continue;
        }
        if let Some(max) = opts.max_depth {
            let rel = ctx.relative_target(&path).unwrap_or_default();
            if misc_depth(&rel) > max {
                continue;
            }
        }

        let state = classify(&path, ctx, inspector);
        let keep_link = match opts.link_filter {
            LinkFilter::All => true,
            LinkFilter::Linked => state.is_linked(),
            LinkFilter::Unlinked => !state.is_linked(),
        };
        let keep_scope = opts.scope.is_none_or(|scope| state.scope() == Some(scope));
        if !(keep_link && keep_scope) {
            continue;
        }

        entries.push(ListEntry {
            display: relative_to(&path, cwd),
            path,
            state,
        });
    }

    if opts.dedupe {
        entries = dedupe(ctx, config, entries);
    }
    entries.sort_by(|a, b| a.display.cmp(&b.display));
    entries
}

/// Depth of a path below its nearest misc directory component.
///
/// `clank/a.md` is depth 0, `clank/sub/a.md` is depth 1. Paths without a
/// misc directory are depth 0.
pub fn misc_depth(rel: &Path) -> usize {
    let parts = rel.iter().collect::<Vec<_>>();
    match parts.iter().rposition(|part| *part == MISC_DIR) {
        Some(index) if index + 1 < parts.len() => parts.len() - index - 2,
        _ => 0,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum GroupKey {
    Instructions { dir: PathBuf, overlay: PathBuf },
    Prompt(PathBuf),
}

/// Keep one representative per overlay file.
///
/// Instructions aliases in one directory that resolve to the same overlay
/// file collapse to the alias highest in the configured `agents` order.
/// Prompt copies collapse by prompt-relative path to the tool highest in
/// `prompt_preference`. Without a preferred candidate, the lexicographically
/// first one wins.
pub fn dedupe(ctx: &MappingContext, config: &Config, entries: Vec<ListEntry>) -> Vec<ListEntry> {
    let alias_order = config
        .agents
        .iter()
        .filter_map(|agent| alias_filename(agent))
        .map(String::from)
        .collect::<Vec<_>>();

    let mut groups: BTreeMap<GroupKey, Vec<(String, usize)>> = BTreeMap::new();
    for (index, entry) in entries.iter().enumerate() {
        if let Some((key, name)) = group_of(ctx, entry) {
            groups.entry(key).or_default().push((name, index));
        }
    }

    let mut dropped = vec![false; entries.len()];
    for (key, mut members) in groups {
        let order = match key {
            GroupKey::Instructions { .. } => &alias_order,
            GroupKey::Prompt(_) => &config.prompt_preference,
        };
        members.sort_by_key(|(name, _)| {
            let rank = order.iter().position(|preferred| preferred == name);
            (rank.unwrap_or(usize::MAX), name.clone())
        });
        for (_, index) in members.into_iter().skip(1) {
            dropped[index] = true;
        }
    }

    entries
        .into_iter()
        .zip(dropped)
        .filter_map(|(entry, dropped)| (!dropped).then_some(entry))
        .collect()
}

// Group an entry with its fanned out siblings, naming it for preference.
fn group_of(ctx: &MappingContext, entry: &ListEntry) -> Option<(GroupKey, String)> {
    let rel = ctx.relative_target(&entry.path).ok()?;
    let name = rel.file_name()?;

    if is_instructions_name(name) {
        let overlay = match &entry.state {
            LinkState::Valid { overlay, .. } | LinkState::WrongMapping { overlay, .. } => overlay,
            _ => return None,
        };
        let key = GroupKey::Instructions {
            dir: rel.parent().unwrap_or(Path::new("")).to_path_buf(),
            overlay: overlay.clone(),
        };
        return Some((key, name.to_string_lossy().into_owned()));
    }

    let parts = rel.iter().collect::<Vec<_>>();
    if let [first, second, tail @ ..] = parts.as_slice() {
        if let Some(tool) = tool_of(first).filter(|_| *second == PROMPTS_DIR && !tail.is_empty()) {
            let prompt = tail.iter().collect::<PathBuf>();
            return Some((GroupKey::Prompt(prompt), tool.to_string()));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fs::tests::FakeInspector, mapping::tests::context};
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    fn entry(path: &str, state: LinkState) -> ListEntry {
        ListEntry {
            path: path.into(),
            display: Path::new(path)
                .strip_prefix("/work/app")
                .expect("under root")
                .into(),
            state,
        }
    }

    fn valid(overlay: &str) -> LinkState {
        LinkState::Valid {
            overlay: overlay.into(),
            scope: Scope::Project,
        }
    }

    #[test_case("clank/a.md", 0; "directly in misc dir")]
    #[test_case("clank/sub/a.md", 1; "one level down")]
    #[test_case("pkg/clank/sub/deeper/a.md", 2; "pocket")]
    #[test_case("CLAUDE.md", 0; "no misc dir")]
    #[test]
    fn depth_below_misc_dir(rel: &str, expect: usize) {
        pretty_assertions::assert_eq!(misc_depth(Path::new(rel)), expect);
    }

    #[test]
    fn aliases_collapse_to_preferred_agent() {
        let ctx = context();
        let config = Config {
            agents: vec!["gemini".into(), "claude".into(), "agents".into()],
            ..Config::default()
        };
        let overlay = "/home/me/clankover/targets/app/agents.md";
        let entries = vec![
            entry("/work/app/AGENTS.md", valid(overlay)),
            entry("/work/app/CLAUDE.md", valid(overlay)),
            entry("/work/app/GEMINI.md", valid(overlay)),
        ];

        let result = dedupe(&ctx, &config, entries);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].path, PathBuf::from("/work/app/GEMINI.md"));
    }

    #[test]
    fn aliases_fall_back_to_lexicographic_order() {
        let ctx = context();
        let config = Config {
            agents: vec![],
            ..Config::default()
        };
        let overlay = "/home/me/clankover/targets/app/agents.md";
        let entries = vec![
            entry("/work/app/GEMINI.md", valid(overlay)),
            entry("/work/app/CLAUDE.md", valid(overlay)),
        ];

        let result = dedupe(&ctx, &config, entries);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].path, PathBuf::from("/work/app/CLAUDE.md"));
    }

    #[test]
    fn aliases_of_different_files_are_kept() {
        let ctx = context();
        let entries = vec![
            entry("/work/app/CLAUDE.md", valid("/home/me/clankover/targets/app/agents.md")),
            entry("/work/app/pkg/CLAUDE.md", valid("/home/me/clankover/targets/app/pkg/agents.md")),
            entry("/work/app/AGENTS.md", LinkState::Unadded),
            entry("/work/app/GEMINI.md", LinkState::Unadded),
        ];

        assert_eq!(dedupe(&ctx, &Config::default(), entries).len(), 4);
    }

    #[test]
    fn prompts_collapse_to_preferred_tool() {
        let ctx = context();
        let overlay = "/home/me/clankover/global/prompts/review.md";
        let entries = vec![
            entry("/work/app/.claude/prompts/review.md", valid(overlay)),
            entry("/work/app/.gemini/prompts/review.md", valid(overlay)),
            entry("/work/app/.gemini/prompts/other.md", LinkState::Unadded),
        ];

        let config = Config {
            prompt_preference: vec!["gemini".into()],
            ..Config::default()
        };
        let result = dedupe(&ctx, &config, entries.clone());
        let paths = result.iter().map(|e| e.path.clone()).collect::<Vec<_>>();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/work/app/.gemini/prompts/review.md"),
                PathBuf::from("/work/app/.gemini/prompts/other.md"),
            ]
        );

        // No preferred copy present: lexicographic fallback.
        let config = Config {
            prompt_preference: vec!["codex".into()],
            ..Config::default()
        };
        let result = dedupe(&ctx, &config, entries);
        assert_eq!(result[0].path, PathBuf::from("/work/app/.claude/prompts/review.md"));
    }

    #[test]
    fn unlinked_entries_are_never_grouped() {
        let ctx = context();
        let inspector = FakeInspector::default().file("/work/app/CLAUDE.md");
        let state = classify(Path::new("/work/app/CLAUDE.md"), &ctx, &inspector);
        let entries = vec![entry("/work/app/CLAUDE.md", state)];
        assert_eq!(dedupe(&ctx, &Config::default(), entries).len(), 1);
    }
}
