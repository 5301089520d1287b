// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the configuration file that clank reads once at the
//! start of every command. A missing file is not an error, every field has a
//! sensible default.
//!
//! # General Layout
//!
//! ```toml
//! overlay_repo = "~/clankover"
//! agents = ["agents", "claude", "gemini"]
//! prompt_preference = ["claude", "gemini"]
//! ignore = [".DS_Store"]
//! ```

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::{create_dir_all, read_to_string, write},
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

/// Clank configuration.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Absolute path to overlay repository.
    pub overlay_repo: OverlayRepo,

    /// Instructions aliases to fan out, in preference order.
    pub agents: Vec<String>,

    /// Tool directory preference when deduplicating prompt files.
    pub prompt_preference: Vec<String>,

    /// Gitignore-style patterns excluded from overlay scans.
    pub ignore: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            overlay_repo: OverlayRepo::new("~/clankover"),
            agents: vec!["agents".into(), "claude".into(), "gemini".into()],
            prompt_preference: vec!["claude".into(), "gemini".into()],
            ignore: vec![".DS_Store".into()],
        }
    }
}

impl Config {
    /// Load configuration from file.
    ///
    /// Missing file means default configuration.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if file exists but cannot be read.
    /// - Return [`ConfigError::Deserialize`] if file content is invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match read_to_string(path) {
            Ok(data) => data.parse(),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no config at {:?}, using defaults", path.display());
                "".parse()
            }
            Err(err) => Err(ConfigError::Read {
                source: err,
                path: path.to_path_buf(),
            }),
        }
    }

    /// Write configuration to file unless one already exists.
    ///
    /// Returns whether the file was written. Missing parent directories are
    /// created.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Write`] if file cannot be written.
    /// - Return [`ConfigError::Serialize`] if configuration cannot be
    ///   serialized.
    pub fn save_if_absent(&self, path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref();
        if path.exists() {
            return Ok(false);
        }

        let data = toml::ser::to_string_pretty(self)?;
        path.parent()
            .map(create_dir_all)
            .transpose()
            .and_then(|_| write(path, data))
            .map_err(|err| ConfigError::Write {
                source: err,
                path: path.to_path_buf(),
            })?;
        debug!("write default config to {:?}", path.display());

        Ok(true)
    }

    /// Compile ignore patterns into a matcher rooted at the overlay.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::IgnorePattern`] if a pattern is malformed.
    pub fn ignore_matcher(&self) -> Result<Gitignore> {
        let mut builder = GitignoreBuilder::new(self.overlay_repo.as_path());
        for pattern in &self.ignore {
            builder.add_line(None, pattern)?;
        }

        Ok(builder.build()?)
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: Config = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on overlay repository field.
        config.overlay_repo = OverlayRepo::new(
            shellexpand::full(config.overlay_repo.to_string().as_str())
                .map_err(ConfigError::ShellExpansion)?
                .into_owned(),
        );

        Ok(config)
    }
}

impl Display for Config {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Path to the overlay repository.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct OverlayRepo(PathBuf);

impl OverlayRepo {
    /// Construct new overlay repository path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// Treat overlay repository as [`Path`] slice.
    pub fn as_path(&self) -> &Path {
        self.0.as_path()
    }
}

impl Display for OverlayRepo {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_path().to_string_lossy().as_ref())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to write configuration file.
    #[error("failed to write config file at {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Ignore pattern cannot be compiled.
    #[error(transparent)]
    IgnorePattern(#[from] ignore::Error),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test(env = [("OVERLAY", "/home/blah/overlay")])]
    fn deserialize_config() -> anyhow::Result<()> {
        let result: Config = r#"
            overlay_repo = "$OVERLAY"
            agents = ["claude", "agents"]
            prompt_preference = ["gemini"]
            ignore = ["*.swp"]
        "#
        .parse()?;

        let expect = Config {
            overlay_repo: OverlayRepo::new("/home/blah/overlay"),
            agents: vec!["claude".into(), "agents".into()],
            prompt_preference: vec!["gemini".into()],
            ignore: vec!["*.swp".into()],
        };

        assert_eq!(result, expect);

        Ok(())
    }

    #[sealed_test(env = [("HOME", "/home/blah")])]
    fn missing_fields_use_defaults() -> anyhow::Result<()> {
        let result: Config = r#"agents = ["gemini"]"#.parse()?;
        assert_eq!(result.overlay_repo, OverlayRepo::new("/home/blah/clankover"));
        assert_eq!(result.agents, vec!["gemini".to_string()]);
        assert_eq!(result.prompt_preference, Config::default().prompt_preference);

        Ok(())
    }

    #[sealed_test(env = [("HOME", "/home/blah")])]
    fn missing_file_means_defaults() -> anyhow::Result<()> {
        let result = Config::load("does-not-exist.toml")?;
        assert_eq!(result.overlay_repo, OverlayRepo::new("/home/blah/clankover"));
        assert_eq!(result.agents, Config::default().agents);

        Ok(())
    }

    #[test]
    fn serialize_config() {
        let result = Config {
            overlay_repo: OverlayRepo::new("/home/blah/overlay"),
            agents: vec!["agents".into()],
            prompt_preference: vec!["claude".into()],
            ignore: vec![],
        }
        .to_string();

        let expect = indoc! {r#"
            overlay_repo = "/home/blah/overlay"
            agents = ["agents"]
            prompt_preference = ["claude"]
            ignore = []
        "#};

        assert_eq!(result, expect);
    }

    #[sealed_test]
    fn save_if_absent_never_overwrites() -> anyhow::Result<()> {
        let path = std::env::current_dir()?.join("clank/config.toml");
        let config = Config {
            overlay_repo: OverlayRepo::new("/overlay"),
            ..Config::default()
        };

        assert!(config.save_if_absent(&path)?);
        assert_eq!(Config::load(&path)?, config);

        let other = Config {
            agents: vec!["claude".into()],
            ..config.clone()
        };
        assert!(!other.save_if_absent(&path)?);
        assert_eq!(Config::load(&path)?, config);

        Ok(())
    }

    #[test]
    fn ignore_matcher_matches_patterns() -> anyhow::Result<()> {
        let config = Config {
            overlay_repo: OverlayRepo::new("/overlay"),
            ignore: vec!["*.swp".into()],
            ..Config::default()
        };
        let matcher = config.ignore_matcher()?;
        assert!(matcher.matched("/overlay/global/clank/a.swp", false).is_ignore());
        assert!(!matcher.matched("/overlay/global/clank/a.md", false).is_ignore());

        Ok(())
    }
}
