// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Link state classification.
//!
//! Every managed-looking path in the target tree ends up in exactly one
//! [`LinkState`]. Classification only reads through a [`LinkInspector`], so the
//! state machine can be checked against an in-memory file system.

use crate::{
    fs::{LinkInspector, Presence},
    mapping::{
        add_scope_suffix, alias_agents, EntryKind, MappingContext, TargetMapping,
        INSTRUCTIONS_FILE,
    },
    scope::Scope,
};

use std::path::{Path, PathBuf};

/// Where a target path stands relative to the overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    /// Symlink into the overlay that maps back to this very path.
    Valid { overlay: PathBuf, scope: Scope },

    /// No symlink here: nothing at all, or a real file.
    Unadded,

    /// Symlink whose target lies outside the overlay.
    OutsideOverlay { target: PathBuf },

    /// Symlink into the overlay that maps somewhere else, usually because a
    /// target directory was renamed after linking.
    WrongMapping {
        overlay: PathBuf,
        expected: Option<PathBuf>,
    },
}

impl LinkState {
    /// Points into the overlay, whether correctly or not.
    pub fn is_linked(&self) -> bool {
        matches!(self, Self::Valid { .. } | Self::WrongMapping { .. })
    }

    /// Scope of the overlay file, when it can be inferred.
    pub fn scope(&self) -> Option<Scope> {
        match self {
            Self::Valid { scope, .. } => Some(*scope),
            _ => None,
        }
    }
}

/// Classify one target path.
pub fn classify(
    path: &Path,
    ctx: &MappingContext,
    inspector: &impl LinkInspector,
) -> LinkState {
    let Presence::Symlink(target) = inspector.presence(path) else {
        return LinkState::Unadded;
    };

    if !target.starts_with(&ctx.overlay_root) {
        return LinkState::OutsideOverlay { target };
    }

    let Some(mapping) = ctx.overlay_to_target(&target) else {
        return LinkState::WrongMapping {
            overlay: target,
            expected: None,
        };
    };

    if accepted_links(ctx, &mapping, inspector).iter().any(|link| link == path) {
        return LinkState::Valid {
            overlay: target,
            scope: mapping.scope,
        };
    }

    let expected = if mapping.scope != Scope::Global && collides(ctx, &mapping, inspector) {
        add_scope_suffix(&mapping.target_path, mapping.scope)
    } else {
        mapping.target_path
    };
    LinkState::WrongMapping {
        overlay: target,
        expected: Some(expected),
    }
}

/// Infer scope of a target path by resolving its link.
///
/// Returns `None` if the path is not a valid link into the overlay.
pub fn infer_scope(path: &Path, ctx: &MappingContext, inspector: &impl LinkInspector) -> Option<Scope> {
    classify(path, ctx, inspector).scope()
}

// Every path a mapping may legitimately surface at: each fanned out path
// under any known alias, suffixed only while another scope holds the same
// target path.
fn accepted_links(ctx: &MappingContext, mapping: &TargetMapping, inspector: &impl LinkInspector) -> Vec<PathBuf> {
    let every_alias = alias_agents().map(String::from).collect::<Vec<_>>();

    let mut links = ctx.fan_out(mapping, &every_alias);
    if mapping.kind == EntryKind::Instructions {
        // INVARIANT: Legacy links at the canonical name still count.
        links.push(mapping.target_path.with_file_name(INSTRUCTIONS_FILE));
    }

    if mapping.scope != Scope::Global && collides(ctx, mapping, inspector) {
        links = links
            .iter()
            .map(|link| add_scope_suffix(link, mapping.scope))
            .collect();
    }
    links
}

fn collides(ctx: &MappingContext, mapping: &TargetMapping, inspector: &impl LinkInspector) -> bool {
    Scope::ALL
        .into_iter()
        .filter(|scope| *scope != mapping.scope)
        .filter_map(|scope| ctx.target_to_overlay(&mapping.target_path, scope).ok())
        .any(|overlay| inspector.exists(&overlay))
}
