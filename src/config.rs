use chrono::FixedOffset;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::pr::filter::{LabelFilter, DEFAULT_EXCLUDED_LABEL};
use crate::pr::github::DEFAULT_API_URL;
use crate::pr::{FetchOptions, StateFilter};
use crate::stats::AggregateOptions;

pub const DEFAULT_CONFIG_FILE: &str = ".pr-stats.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid UTC offset: {0} hours (expected -23..=23)")]
    InvalidOffset(i32),
}

/// Top-level configuration loaded from .pr-stats.toml.
/// All fields are optional. The tool works with zero config and every
/// value can be overridden on the command line.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub github: GitHubConfig,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub analyze: AnalyzeConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitHubConfig {
    /// GitHub API token. If None, falls back to GITHUB_TOKEN env var.
    pub token: Option<String>,
    /// API base URL, for GitHub Enterprise installs
    pub api_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FetchConfig {
    /// Labels to exclude. Absent means `["dependencies"]`; `[]` disables exclusion.
    pub exclude_labels: Option<Vec<String>>,
    pub limit: Option<usize>,
    pub state: Option<StateFilter>,
    pub timeout_secs: Option<u64>,
    pub include_diff_stats: Option<bool>,
    pub diff_concurrency: Option<usize>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalyzeConfig {
    pub timezone_offset_hours: Option<i32>,
}

impl Config {
    /// Load configuration from .pr-stats.toml in the current directory.
    /// Returns default config if the file doesn't exist.
    pub fn load() -> Result<Config, ConfigError> {
        let path = Path::new(DEFAULT_CONFIG_FILE);
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Config::default())
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Resolve the GitHub token: config file value takes precedence,
    /// falls back to GITHUB_TOKEN env var.
    pub fn github_token(&self) -> Option<String> {
        self.github
            .token
            .clone()
            .or_else(|| std::env::var("GITHUB_TOKEN").ok())
    }

    pub fn api_url(&self) -> &str {
        self.github.api_url.as_deref().unwrap_or(DEFAULT_API_URL)
    }

    /// Fetch options from this config layered over the built-in defaults.
    pub fn fetch_options(&self) -> FetchOptions {
        let defaults = FetchOptions::default();
        let fetch = &self.fetch;
        let excluded = fetch
            .exclude_labels
            .clone()
            .unwrap_or_else(|| vec![DEFAULT_EXCLUDED_LABEL.to_string()]);

        FetchOptions {
            labels: LabelFilter::new(None, excluded),
            include_diff_stats: fetch.include_diff_stats.unwrap_or(defaults.include_diff_stats),
            limit: fetch.limit.unwrap_or(defaults.limit),
            state: fetch.state.unwrap_or(defaults.state),
            timeout: fetch
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            diff_concurrency: fetch.diff_concurrency.unwrap_or(defaults.diff_concurrency),
            page_size: fetch.page_size.unwrap_or(defaults.page_size),
        }
    }

    /// Aggregation options without a date window; the window comes from the CLI.
    pub fn aggregate_options(&self) -> Result<AggregateOptions, ConfigError> {
        let mut options = AggregateOptions::default();
        if let Some(hours) = self.analyze.timezone_offset_hours {
            options.utc_offset = utc_offset(hours)?;
        }
        Ok(options)
    }
}

pub fn utc_offset(hours: i32) -> Result<FixedOffset, ConfigError> {
    hours
        .checked_mul(3600)
        .and_then(FixedOffset::east_opt)
        .ok_or(ConfigError::InvalidOffset(hours))
}
