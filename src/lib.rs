// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Overlay manager for AI agent files.
//!
//! Clank keeps agent instructions, prompts, tool settings, and loose notes in
//! a separate __overlay__ repository, and links them into project checkouts
//! as symlinks. Projects stay free of those files in their own history, while
//! the overlay can be versioned and shared on its own.
//!
//! # Scopes
//!
//! Every overlay file lives in one of three scopes: global (every project),
//! project (every worktree of a project), or worktree (one worktree). See
//! [`scope`] for details and [`mapping`] for how each scope is laid out.
//!
//! # Flow
//!
//! 1. [`store`] moves files into, out of, and between scopes.
//! 2. [`link`] converges the target tree onto the overlay.
//! 3. [`listing`] and [`orphan`] report what is managed and what went stale.

pub mod config;
pub mod fs;
pub mod link;
pub mod listing;
pub mod mapping;
pub mod orphan;
pub mod path;
pub mod scope;
pub mod store;
pub mod vcs;

pub use config::Config;
pub use link::{state::LinkState, Linker};
pub use mapping::{GitContext, MappingContext};
pub use scope::{Scope, ScopeFlags};
pub use store::OverlayStore;
pub use vcs::{Git2Vcs, NoVcs, Vcs};
