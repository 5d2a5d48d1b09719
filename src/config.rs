//! Configuration module for geotrail
//!
//! Settings come from `~/.config/geotrail/config.toml` when present; every
//! field has a default, and CLI flags override whatever the file says.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::ProfileTarget;
use crate::paths;

/// Problems that make a run configuration unusable
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// No profile given
    #[error("no profile to harvest")]
    MissingProfile,
    /// Profile is neither a username, an id nor a profile URL
    #[error("invalid profile: {0}")]
    InvalidProfile(String),
    /// `max_posts` must be positive
    #[error("max_posts must be greater than zero")]
    ZeroMaxPosts,
    /// Date range is inverted
    #[error("date_from ({from}) is after date_to ({to})")]
    InvertedDateRange {
        /// Lower bound
        from: DateTime<Utc>,
        /// Upper bound
        to: DateTime<Utc>,
    },
    /// Worker pool must hold at least one worker
    #[error("resolver.workers must be at least 1")]
    ZeroWorkers,
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Profile to harvest (username, numeric id or profile URL)
    #[serde(default)]
    pub profile: String,

    /// Maximum number of posts to collect
    #[serde(default = "default_max_posts")]
    pub max_posts: usize,

    /// Ignore posts published before this instant
    #[serde(default)]
    pub date_from: Option<DateTime<Utc>>,

    /// Ignore posts published after this instant
    #[serde(default)]
    pub date_to: Option<DateTime<Utc>>,

    /// Minimum delay between two calls to the remote service
    #[serde(default = "default_rate_limit_floor_ms")]
    pub rate_limit_floor_ms: u64,

    /// Backoff behaviour on throttling
    #[serde(default)]
    pub governor: GovernorConfig,

    /// Location lookups
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Post listing
    #[serde(default)]
    pub paginator: PaginatorConfig,

    /// Login behaviour
    #[serde(default)]
    pub auth: AuthConfig,

    /// Run control
    #[serde(default)]
    pub harvest: HarvestConfig,

    /// Remote endpoints
    #[serde(default)]
    pub api: ApiConfig,

    /// Output artifact
    #[serde(default)]
    pub export: ExportConfig,
}

/// Throttling backoff settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernorConfig {
    /// First backoff delay after a throttle signal
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    /// Backoff ceiling
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Throttle retries before giving up on one operation
    #[serde(default = "default_max_throttle_retries")]
    pub max_throttle_retries: u32,
}

/// Location resolver settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Concurrent remote lookups
    #[serde(default = "default_workers")]
    pub workers: usize,
}

/// Paginator settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginatorConfig {
    /// Retries for a transient failure before skipping/stopping
    #[serde(default = "default_transient_retries")]
    pub transient_retries: u32,
    /// Posts requested per page
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

/// Authentication settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Account used to log in
    #[serde(default)]
    pub username: Option<String>,
    /// Two-factor codes accepted before giving up
    #[serde(default = "default_max_challenge_attempts")]
    pub max_challenge_attempts: u32,
    /// Override for the encrypted session file location
    #[serde(default)]
    pub session_file: Option<PathBuf>,
}

/// Run control settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Time an in-flight request may take to finish after cancellation
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
}

/// Remote endpoint settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Web endpoints (login, profile info, post metadata)
    #[serde(default = "default_web_base_url")]
    pub web_base_url: String,
    /// Media listing endpoint
    #[serde(default = "default_graph_base_url")]
    pub graph_base_url: String,
    /// Per-request timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// User agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Export settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Directory the CSV is written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// File name; defaults to `<profile>_location_timeline.csv`
    #[serde(default)]
    pub file_name: Option<String>,
}

fn default_max_posts() -> usize {
    50
}

fn default_rate_limit_floor_ms() -> u64 {
    3000
}

fn default_base_backoff_ms() -> u64 {
    2000
}

fn default_max_backoff_ms() -> u64 {
    120_000
}

fn default_max_throttle_retries() -> u32 {
    5
}

fn default_workers() -> usize {
    4
}

fn default_transient_retries() -> u32 {
    3
}

fn default_page_size() -> usize {
    12
}

fn default_max_challenge_attempts() -> u32 {
    5
}

fn default_cancel_grace_ms() -> u64 {
    2000
}

fn default_web_base_url() -> String {
    "https://www.instagram.com".to_string()
}

fn default_graph_base_url() -> String {
    "https://graph.instagram.com".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("geotrail/{}", env!("CARGO_PKG_VERSION"))
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_throttle_retries: default_max_throttle_retries(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

impl Default for PaginatorConfig {
    fn default() -> Self {
        Self {
            transient_retries: default_transient_retries(),
            page_size: default_page_size(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: None,
            max_challenge_attempts: default_max_challenge_attempts(),
            session_file: None,
        }
    }
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            cancel_grace_ms: default_cancel_grace_ms(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            web_base_url: default_web_base_url(),
            graph_base_url: default_graph_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            file_name: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile: String::new(),
            max_posts: default_max_posts(),
            date_from: None,
            date_to: None,
            rate_limit_floor_ms: default_rate_limit_floor_ms(),
            governor: GovernorConfig::default(),
            resolver: ResolverConfig::default(),
            paginator: PaginatorConfig::default(),
            auth: AuthConfig::default(),
            harvest: HarvestConfig::default(),
            api: ApiConfig::default(),
            export: ExportConfig::default(),
        }
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Result<PathBuf> {
        paths::config_path()
    }

    /// Load config from the default path or create default
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        Self::load_from(&path)
    }

    /// Load config from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Parsed harvest target
    pub fn target(&self) -> Result<ProfileTarget, ConfigError> {
        if self.profile.trim().is_empty() {
            return Err(ConfigError::MissingProfile);
        }
        ProfileTarget::parse(&self.profile)
            .ok_or_else(|| ConfigError::InvalidProfile(self.profile.clone()))
    }

    /// Check the run parameters before any network call is made
    pub fn validate(&self) -> Result<ProfileTarget, ConfigError> {
        let target = self.target()?;

        if self.max_posts == 0 {
            return Err(ConfigError::ZeroMaxPosts);
        }

        if let (Some(from), Some(to)) = (self.date_from, self.date_to) {
            if from > to {
                return Err(ConfigError::InvertedDateRange { from, to });
            }
        }

        if self.resolver.workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }

        Ok(target)
    }

    /// CSV path for a profile
    pub fn export_path(&self, profile: &ProfileTarget) -> PathBuf {
        let file_name = self
            .export
            .file_name
            .clone()
            .unwrap_or_else(|| format!("{}_location_timeline.csv", profile.name()));
        self.export.output_dir.join(file_name)
    }
}

/// Which end of a date range a bare date stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateBound {
    /// Start of the day
    Start,
    /// Last second of the day
    End,
}

/// Parse `YYYY-MM-DD` or an RFC 3339 timestamp into a UTC instant
pub fn parse_date(input: &str, bound: DateBound) -> Option<DateTime<Utc>> {
    let input = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(input, "%Y-%m-%d").ok()?;
    let time = match bound {
        DateBound::Start => NaiveTime::MIN,
        DateBound::End => NaiveTime::from_hms_opt(23, 59, 59)?,
    };
    Some(date.and_time(time).and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.max_posts, 50);
        assert_eq!(config.rate_limit_floor_ms, 3000);
        assert_eq!(config.resolver.workers, 4);
        assert_eq!(config.paginator.transient_retries, 3);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            profile = "natgeo"
            max_posts = 10

            [governor]
            max_throttle_retries = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.max_posts, 10);
        assert_eq!(config.governor.max_throttle_retries, 2);
        assert_eq!(config.governor.base_backoff_ms, 2000);
        assert_eq!(config.api.web_base_url, "https://www.instagram.com");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config {
            profile: "natgeo".to_string(),
            date_from: parse_date("2024-01-01", DateBound::Start),
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.profile, "natgeo");
        assert_eq!(loaded.date_from, config.date_from);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempdir().unwrap();
        let loaded = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert!(loaded.profile.is_empty());
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        assert_eq!(config.validate(), Err(ConfigError::MissingProfile));

        config.profile = "https://example.com/x".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidProfile(_))));

        config.profile = "natgeo".to_string();
        config.max_posts = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroMaxPosts));

        config.max_posts = 5;
        config.date_from = parse_date("2024-02-01", DateBound::Start);
        config.date_to = parse_date("2024-01-01", DateBound::End);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvertedDateRange { .. })
        ));

        config.date_to = None;
        assert_eq!(
            config.validate(),
            Ok(ProfileTarget::Username("natgeo".to_string()))
        );
    }

    #[test]
    fn test_parse_date_bounds() {
        let start = parse_date("2024-03-09", DateBound::Start).unwrap();
        assert_eq!((start.year(), start.month(), start.day(), start.hour()), (2024, 3, 9, 0));

        let end = parse_date("2024-03-09", DateBound::End).unwrap();
        assert_eq!((end.hour(), end.minute(), end.second()), (23, 59, 59));

        assert!(parse_date("2024-03-09T10:00:00+02:00", DateBound::Start).is_some());
        assert!(parse_date("yesterday", DateBound::Start).is_none());
    }

    #[test]
    fn test_export_path() {
        let config = Config::default();
        let target = ProfileTarget::Username("natgeo".to_string());
        assert_eq!(
            config.export_path(&target),
            PathBuf::from("output").join("natgeo_location_timeline.csv")
        );
    }
}
