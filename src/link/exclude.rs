// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Git exclude maintenance.
//!
//! Links placed by clank should not show up as untracked files in the target
//! repository, but clank also must not touch the project's own `.gitignore`.
//! Git reads a second, private ignore file at `$GIT_COMMON_DIR/info/exclude`
//! that every worktree shares. Clank owns one fenced block of that file:
//!
//! ```text
//! # clank:begin
//! /.claude/commands/build.md
//! /clank/notes.md
//! # clank:end
//! ```
//!
//! Lines outside the block belong to the user and are preserved as they are.
//! Entries inside the block are unique and kept sorted.

use std::{
    collections::BTreeSet,
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{create_dir_all, read_to_string, write, OpenOptions},
    path::PathBuf,
};

const BEGIN_MARKER: &str = "# clank:begin";
const END_MARKER: &str = "# clank:end";

/// Manage clank's block in a git exclude file.
#[derive(Clone, Debug)]
pub struct ExcludeDrafter {
    exclude_path: PathBuf,
}

impl ExcludeDrafter {
    /// Construct new exclude drafter.
    ///
    /// Creates the exclude file if it does not already exist yet.
    ///
    /// # Errors
    ///
    /// - Return [`Error::CreateExcludeFile`] if exclude file cannot be
    ///   created if missing.
    pub fn new(exclude_path: impl Into<PathBuf>) -> Result<Self> {
        let exclude_path = exclude_path.into();

        // INVARIANT: Create exclude file if needed.
        if let Some(parent) = exclude_path.parent() {
            create_dir_all(parent).map_err(|err| Error::CreateExcludeFile {
                source: err,
                exclude_path: exclude_path.clone(),
            })?;
        }
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&exclude_path)
            .map_err(|err| Error::CreateExcludeFile {
                source: err,
                exclude_path: exclude_path.clone(),
            })?;

        Ok(Self { exclude_path })
    }

    /// Edit managed entries.
    ///
    /// Read current exclude file into [`ExcludeEdit`] instance, and directly
    /// edit each entry before writing the results back. Nothing is written
    /// if the edit changed nothing.
    ///
    /// # Errors
    ///
    /// - Return [`Error::ReadExcludeFile`] if exclude file cannot be read.
    /// - Return [`Error::WriteExcludeFile`] if exclude file cannot be written.
    pub fn edit<E>(&self, editor: E) -> Result<()>
    where
        E: FnOnce(&mut ExcludeEdit),
    {
        let content = read_to_string(&self.exclude_path).map_err(|err| Error::ReadExcludeFile {
            source: err,
            exclude_path: self.exclude_path.clone(),
        })?;

        let mut edit = ExcludeEdit::from(content);
        editor(&mut edit);

        if !edit.changed {
            return Ok(());
        }

        write(&self.exclude_path, edit.to_string().as_bytes()).map_err(|err| {
            Error::WriteExcludeFile {
                source: err,
                exclude_path: self.exclude_path.clone(),
            }
        })?;

        Ok(())
    }

    /// List managed entries.
    ///
    /// # Errors
    ///
    /// - Return [`Error::ReadExcludeFile`] if exclude file cannot be read.
    pub fn current_entries(&self) -> Result<Vec<String>> {
        read_to_string(&self.exclude_path)
            .map_err(|err| Error::ReadExcludeFile {
                source: err,
                exclude_path: self.exclude_path.clone(),
            })
            .map(|content| ExcludeEdit::from(content).entries.into_iter().collect())
    }
}

/// Exclude block editor.
///
/// # Invariant
///
/// - No duplicate entries.
/// - User lines outside the managed block are never touched.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExcludeEdit {
    before: Vec<String>,
    entries: BTreeSet<String>,
    after: Vec<String>,
    changed: bool,
}

impl ExcludeEdit {
    /// Construct new exclude editor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a listing of entries.
    pub fn insert_entries(&mut self, entries: impl IntoIterator<Item = impl Into<String>>) {
        for entry in entries {
            if self.entries.insert(entry.into()) {
                self.changed = true;
            }
        }
    }

    /// Remove a listing of entries.
    pub fn remove_entries(&mut self, entries: impl IntoIterator<Item = impl AsRef<str>>) {
        for entry in entries {
            if self.entries.remove(entry.as_ref()) {
                self.changed = true;
            }
        }
    }

    /// Replace every entry with a new listing.
    pub fn replace_entries(&mut self, entries: impl IntoIterator<Item = impl Into<String>>) {
        let entries = entries.into_iter().map(Into::into).collect::<BTreeSet<_>>();
        if entries != self.entries {
            self.entries = entries;
            self.changed = true;
        }
    }

    /// Clear all entries.
    pub fn clear_entries(&mut self) {
        if !self.entries.is_empty() {
            self.entries.clear();
            self.changed = true;
        }
    }
}

impl Display for ExcludeEdit {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        let mut out = String::new();
        for line in &self.before {
            out.push_str(line);
            out.push('\n');
        }

        if !self.entries.is_empty() {
            out.push_str(BEGIN_MARKER);
            out.push('\n');
            for entry in &self.entries {
                out.push_str(entry);
                out.push('\n');
            }
            out.push_str(END_MARKER);
            out.push('\n');
        }

        for line in &self.after {
            out.push_str(line);
            out.push('\n');
        }

        write!(fmt, "{out}")
    }
}

impl From<&str> for ExcludeEdit {
    fn from(content: &str) -> Self {
        let mut edit = Self::default();
        let mut lines = content.lines();

        for line in lines.by_ref() {
            if line == BEGIN_MARKER {
                break;
            }
            edit.before.push(line.to_owned());
        }

        for line in lines.by_ref() {
            if line == END_MARKER {
                break;
            }
            if !line.trim().is_empty() {
                edit.entries.insert(line.to_owned());
            }
        }

        edit.after.extend(lines.map(str::to_owned));
        edit
    }
}

impl From<String> for ExcludeEdit {
    fn from(content: String) -> Self {
        Self::from(content.as_str())
    }
}

/// Exclude file management error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Exclude file cannot be created when missing.
    #[error("failed to create exclude file at {:?}", exclude_path.display())]
    CreateExcludeFile {
        #[source]
        source: std::io::Error,
        exclude_path: PathBuf,
    },

    /// Exclude file cannot be read from.
    #[error("failed to read from exclude file at {:?}", exclude_path.display())]
    ReadExcludeFile {
        #[source]
        source: std::io::Error,
        exclude_path: PathBuf,
    },

    /// Exclude file cannot be written to.
    #[error("failed to write to exclude file at {:?}", exclude_path.display())]
    WriteExcludeFile {
        #[source]
        source: std::io::Error,
        exclude_path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[test]
    fn exclude_edit_entry_insertion() {
        let mut editor = ExcludeEdit::from(indoc! {r#"
            # user comment
            *.log
        "#});

        editor.insert_entries(["/clank/notes.md", "/CLAUDE.md"]);
        let result = editor.to_string();
        let expect = indoc! {r#"
            # user comment
            *.log
            # clank:begin
            /CLAUDE.md
            /clank/notes.md
            # clank:end
        "#};
        assert_eq!(result, expect);

        // No duplication.
        editor.insert_entries(["/CLAUDE.md"]);
        assert_eq!(editor.to_string(), expect);
    }

    #[test]
    fn empty_exclude_edit_writes_nothing() {
        let mut editor = ExcludeEdit::new();
        assert_eq!(editor.to_string(), "");

        editor.clear_entries();
        assert_eq!(editor.to_string(), "");
    }

    #[test]
    fn exclude_edit_keeps_user_lines_around_block() {
        let content = indoc! {r#"
            *.log
            # clank:begin
            /AGENTS.md
            /clank/old.md
            # clank:end
            build/
        "#};
        let mut editor = ExcludeEdit::from(content);

        editor.remove_entries(["/clank/old.md"]);
        let result = editor.to_string();
        let expect = indoc! {r#"
            *.log
            # clank:begin
            /AGENTS.md
            # clank:end
            build/
        "#};
        assert_eq!(result, expect);

        editor.clear_entries();
        let result = editor.to_string();
        let expect = indoc! {r#"
            *.log
            build/
        "#};
        assert_eq!(result, expect);
    }

    #[test]
    fn exclude_edit_replace_tracks_changes() {
        let mut editor = ExcludeEdit::from("# clank:begin\n/a\n/b\n# clank:end\n");
        editor.replace_entries(["/b", "/a"]);
        assert!(!editor.changed);

        editor.replace_entries(["/c"]);
        assert!(editor.changed);
        assert_eq!(editor.to_string(), "# clank:begin\n/c\n# clank:end\n");
    }

    #[sealed_test]
    fn drafter_creates_missing_file() -> anyhow::Result<()> {
        let path = std::env::current_dir()?.join("info").join("exclude");
        let drafter = ExcludeDrafter::new(&path)?;
        assert!(path.exists());

        drafter.edit(|edit| edit.insert_entries(["/clank/notes.md"]))?;
        assert_eq!(drafter.current_entries()?, vec!["/clank/notes.md".to_string()]);

        Ok(())
    }
}
