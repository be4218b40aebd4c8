//! Configuration file for fleetscope
//!
//! Read from `<config dir>/fleetscope/config.toml` unless a path is given.
//! Every key is optional; command line flags override file values.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use fleetscope_feed::{CommandFeed, DEFAULT_BACKLOG_LINES, LineFormat};
use fleetscope_logs::LiveLogOptions;

/// Settings for the command that tails a device's logs
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub program: String,
    pub args: Vec<String>,
    pub format: LineFormat,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            program: "balena".to_string(),
            args: vec!["logs".to_string(), "{uuid}".to_string(), "--tail".to_string()],
            format: LineFormat::Text,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Recent lines requested when a live document opens
    pub backlog_lines: usize,

    /// Per-document size cap in bytes
    pub max_content_bytes: Option<usize>,

    pub feed: FeedConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backlog_lines: DEFAULT_BACKLOG_LINES,
            max_content_bytes: None,
            feed: FeedConfig::default(),
        }
    }
}

impl Config {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        Some(dirs::config_dir()?.join("fleetscope").join("config.toml"))
    }

    /// Load from `path`, or from the default location if it exists
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn live_options(&self) -> LiveLogOptions {
        LiveLogOptions {
            backlog_lines: self.backlog_lines,
            max_content_bytes: self.max_content_bytes,
        }
    }

    pub fn command_feed(&self) -> CommandFeed {
        CommandFeed::new(self.feed.program.clone(), self.feed.args.clone())
            .with_format(self.feed.format)
    }
}
