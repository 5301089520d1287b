// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Scope model.
//!
//! Every overlay file lives in exactly one of three sibling __scopes__:
//! global (shared by all projects), project (shared by all worktrees of one
//! project), or worktree (private to one worktree). Scopes carry no order of
//! specificity, each simply owns its own storage subtree in the overlay.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

/// Storage scope of an overlay file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    Global,
    Project,
    Worktree,
}

impl Scope {
    /// All scopes, in the order clank searches them.
    pub const ALL: [Scope; 3] = [Scope::Global, Scope::Project, Scope::Worktree];

    /// Name used in suffixes, flags, and messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Project => "project",
            Self::Worktree => "worktree",
        }
    }

    /// Command-line flag selecting this scope.
    pub fn flag(&self) -> &'static str {
        match self {
            Self::Global => "--global",
            Self::Project => "--project",
            Self::Worktree => "--worktree",
        }
    }
}

impl Display for Scope {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = ScopeError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        match data {
            "global" => Ok(Self::Global),
            "project" => Ok(Self::Project),
            "worktree" => Ok(Self::Worktree),
            other => Err(ScopeError::Unknown(other.to_string())),
        }
    }
}

/// Scope selection as given by the user.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScopeFlags {
    pub global: bool,
    pub project: bool,
    pub worktree: bool,
}

impl ScopeFlags {
    /// Selected scope, if any.
    ///
    /// # Errors
    ///
    /// - Return [`ScopeError::Multiple`] if more than one flag is set.
    pub fn selected(&self) -> Result<Option<Scope>> {
        let picked = [
            (self.global, Scope::Global),
            (self.project, Scope::Project),
            (self.worktree, Scope::Worktree),
        ]
        .into_iter()
        .filter_map(|(set, scope)| set.then_some(scope))
        .collect::<Vec<_>>();

        match picked.as_slice() {
            [] => Ok(None),
            [scope] => Ok(Some(*scope)),
            _ => Err(ScopeError::Multiple),
        }
    }

    /// Resolve scope, falling back to `default` when no flag is set.
    pub fn resolve_or(&self, default: Scope) -> Result<Scope> {
        Ok(self.selected()?.unwrap_or(default))
    }

    /// Resolve scope, failing when no flag is set.
    pub fn resolve_required(&self) -> Result<Scope> {
        self.selected()?.ok_or(ScopeError::Required)
    }
}

impl From<Scope> for ScopeFlags {
    fn from(scope: Scope) -> Self {
        Self {
            global: scope == Scope::Global,
            project: scope == Scope::Project,
            worktree: scope == Scope::Worktree,
        }
    }
}

/// Scope resolution error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScopeError {
    #[error("only one of --global, --project, --worktree may be given")]
    Multiple,

    #[error("scope required: pass one of --global, --project, --worktree")]
    Required,

    #[error("unknown scope {0:?}")]
    Unknown(String),
}

/// Friendly result alias :3
type Result<T, E = ScopeError> = std::result::Result<T, E>;
