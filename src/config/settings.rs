use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::data::{default_store_path, DatabaseOptions, StoreOptions, DEFAULT_TABLE};
use crate::git::{tooling_root, CommitSettings};
use crate::util::paths::data_dir;

/// Name of the per-project configuration file inside `.trellis`
pub const CONFIG_FILE: &str = "config.toml";

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Explicit state database file (None = per-project file in the data dir)
    pub state_db: Option<PathBuf>,
    /// Table the state store is bound to
    pub state_table: String,
    /// SQLite busy timeout
    pub busy_timeout: Duration,
    /// Retries after a busy/locked error
    pub max_retries: u32,
    /// First retry delay, doubled per attempt
    pub retry_backoff: Duration,
    /// Wording of automatic commits
    pub commit: CommitSettings,
}

impl Default for Config {
    fn default() -> Self {
        let db = DatabaseOptions::default();
        Self {
            state_db: None,
            state_table: DEFAULT_TABLE.to_string(),
            busy_timeout: db.busy_timeout,
            max_retries: db.max_retries,
            retry_backoff: db.retry_backoff,
            commit: CommitSettings::default(),
        }
    }
}

/// TOML file shape; every field optional and merged over the defaults
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TomlConfig {
    pub state: Option<TomlStateConfig>,
    pub commit: Option<TomlCommitConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TomlStateConfig {
    pub path: Option<PathBuf>,
    pub table: Option<String>,
    pub busy_timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TomlCommitConfig {
    pub prefix: Option<String>,
    pub co_author: Option<String>,
}

impl Config {
    /// Load `<project>/.trellis/config.toml` over the defaults.
    ///
    /// A missing file is not an error. A relative `state.path` is taken
    /// relative to the project directory.
    pub fn load(project_dir: &Path) -> Result<Self, ConfigError> {
        let path = config_path(project_dir);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file; using defaults");
                return Ok(Self::default());
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };
        let toml_config: TomlConfig =
            toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;

        let mut config = Self::default();
        config.merge(toml_config, project_dir);
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    fn merge(&mut self, toml_config: TomlConfig, project_dir: &Path) {
        if let Some(state) = toml_config.state {
            if let Some(path) = state.path {
                self.state_db = Some(project_dir.join(path));
            }
            if let Some(table) = state.table {
                self.state_table = table;
            }
            if let Some(ms) = state.busy_timeout_ms {
                self.busy_timeout = Duration::from_millis(ms);
            }
            if let Some(retries) = state.max_retries {
                self.max_retries = retries;
            }
            if let Some(ms) = state.retry_backoff_ms {
                self.retry_backoff = Duration::from_millis(ms);
            }
        }

        if let Some(commit) = toml_config.commit {
            if let Some(prefix) = commit.prefix {
                self.commit.prefix = prefix;
            }
            if let Some(co_author) = commit.co_author {
                self.commit.co_author = co_author;
            }
        }
    }

    /// Options for opening the state store
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            table: self.state_table.clone(),
            database: DatabaseOptions {
                busy_timeout: self.busy_timeout,
                max_retries: self.max_retries,
                retry_backoff: self.retry_backoff,
            },
        }
    }

    /// State database for `project_dir`
    pub fn state_db_path(&self, project_dir: &Path) -> PathBuf {
        self.state_db
            .clone()
            .unwrap_or_else(|| default_store_path(&data_dir(), project_dir))
    }
}

/// `<project>/.trellis/config.toml`
pub fn config_path(project_dir: &Path) -> PathBuf {
    tooling_root(project_dir).join(CONFIG_FILE)
}
