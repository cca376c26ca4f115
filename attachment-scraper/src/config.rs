//! Runtime configuration
//!
//! Values come from, in order of precedence:
//! 1. command-line flags or their environment variables
//! 2. the TOML file named by `--config`
//! 3. built-in defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use mailbox_api::gmail::{DEFAULT_BASE_URL, DEFAULT_USER_ID};
use mailbox_api::{Credentials, GmailConfig};
use serde::Deserialize;
use thiserror::Error;

use crate::pipeline::StageLimits;

const DEFAULT_OUTPUT_DIR: &str = "attachments";
const DEFAULT_TOKEN_FILE: &str = "token.json";
const DEFAULT_CONCURRENCY: usize = 16;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("concurrency must be at least 1")]
    InvalidConcurrency,

    #[error("request timeout must be at least 1 second")]
    InvalidRequestTimeout,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Download every attachment sent by one address
#[derive(Debug, Default, Parser)]
#[command(name = "attachment-scraper", version, about)]
pub struct Cli {
    /// Sender whose attachments are downloaded; prompted for when absent
    #[arg(long, env = "SCRAPER_FROM", value_name = "EMAIL")]
    pub from: Option<String>,

    /// Directory the attachments are written to [default: ./attachments]
    #[arg(long, env = "SCRAPER_OUTPUT_DIR", value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Maximum concurrent workers per stage [default: 16]
    #[arg(long, env = "SCRAPER_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Buffer size of the channels between stages, 0 for direct handoff [default: 0]
    #[arg(long, env = "SCRAPER_CHANNEL_CAPACITY")]
    pub channel_capacity: Option<usize>,

    /// OAuth bearer token; takes precedence over the token file
    #[arg(long, env = "GMAIL_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Google `token.json` holding the access token [default: token.json]
    #[arg(long, env = "GMAIL_TOKEN_FILE", value_name = "FILE")]
    pub token_file: Option<PathBuf>,

    /// Mailbox owner [default: me]
    #[arg(long, env = "GMAIL_USER_ID")]
    pub user_id: Option<String>,

    /// Gmail API base URL
    #[arg(long, env = "GMAIL_API_BASE_URL", value_name = "URL")]
    pub api_base_url: Option<String>,

    /// Per-request timeout in seconds [default: 30]
    #[arg(long, env = "GMAIL_REQUEST_TIMEOUT_SECS", value_name = "SECS")]
    pub request_timeout_secs: Option<u64>,

    /// TOML file with defaults for any of the options above
    #[arg(long, env = "SCRAPER_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log output format [default: text]
    #[arg(long, env = "SCRAPER_LOG_FORMAT", value_enum)]
    pub log_format: Option<LogFormat>,
}

/// Contents of the `--config` file; every key is optional
#[derive(Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub from: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub channel_capacity: Option<usize>,
    pub access_token: Option<String>,
    pub token_file: Option<PathBuf>,
    pub user_id: Option<String>,
    pub api_base_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub log_format: Option<LogFormat>,
}

impl FileConfig {
    /// Reads and parses a config file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Read` or `ConfigError::Parse`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Fully resolved settings for one run
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    /// Sender given up front, if any
    pub from: Option<String>,
    pub output_dir: PathBuf,
    pub limits: StageLimits,
    pub credentials: Credentials,
    pub gmail: GmailConfig,
    pub log_format: LogFormat,
}

impl ScraperConfig {
    /// Merges the command line with the optional config file and defaults
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the config file is unreadable or a value is
    /// out of range
    pub fn load(cli: Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(cli, file)
    }

    fn merge(cli: Cli, file: FileConfig) -> Result<Self, ConfigError> {
        let max_concurrency = cli
            .concurrency
            .or(file.concurrency)
            .unwrap_or(DEFAULT_CONCURRENCY);
        if max_concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency);
        }

        let timeout_secs = cli
            .request_timeout_secs
            .or(file.request_timeout_secs)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidRequestTimeout);
        }

        let credentials = match cli.access_token.or(file.access_token) {
            Some(token) => Credentials::AccessToken(token),
            None => Credentials::TokenFile(
                cli.token_file
                    .or(file.token_file)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_TOKEN_FILE)),
            ),
        };

        Ok(Self {
            from: cli.from.or(file.from),
            output_dir: cli
                .output_dir
                .or(file.output_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            limits: StageLimits {
                max_concurrency,
                channel_capacity: cli.channel_capacity.or(file.channel_capacity).unwrap_or(0),
            },
            credentials,
            gmail: GmailConfig {
                base_url: cli
                    .api_base_url
                    .or(file.api_base_url)
                    .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
                user_id: cli
                    .user_id
                    .or(file.user_id)
                    .unwrap_or_else(|| DEFAULT_USER_ID.to_string()),
                request_timeout: Duration::from_secs(timeout_secs),
            },
            log_format: cli.log_format.or(file.log_format).unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;
    use serial_test::serial;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = ScraperConfig::merge(Cli::default(), FileConfig::default()).unwrap();

        assert_eq!(config.from, None);
        assert_eq!(config.output_dir, PathBuf::from("attachments"));
        assert_eq!(config.limits, StageLimits::default());
        assert_eq!(config.gmail.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.gmail.user_id, "me");
        assert_eq!(config.gmail.request_timeout, Duration::from_secs(30));
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(matches!(
            config.credentials,
            Credentials::TokenFile(ref path) if path == Path::new("token.json")
        ));
    }

    #[test]
    fn test_command_line_wins_over_file() {
        let cli = Cli {
            concurrency: Some(4),
            output_dir: Some(PathBuf::from("/tmp/cli")),
            ..Cli::default()
        };
        let file = FileConfig {
            concurrency: Some(8),
            channel_capacity: Some(2),
            output_dir: Some(PathBuf::from("/tmp/file")),
            access_token: Some("ya29.file".to_string()),
            log_format: Some(LogFormat::Json),
            ..FileConfig::default()
        };

        let config = ScraperConfig::merge(cli, file).unwrap();

        assert_eq!(config.limits.max_concurrency, 4);
        assert_eq!(config.limits.channel_capacity, 2);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/cli"));
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(matches!(config.credentials, Credentials::AccessToken(ref t) if t == "ya29.file"));
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let cli = Cli {
            concurrency: Some(0),
            ..Cli::default()
        };
        assert!(matches!(
            ScraperConfig::merge(cli, FileConfig::default()),
            Err(ConfigError::InvalidConcurrency)
        ));
    }

    #[test]
    fn test_file_config_parses_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "from = \"alice@example.com\"\nconcurrency = 2\nlog_format = \"json\"\ntoken_file = \"/secrets/token.json\""
        )
        .unwrap();

        let config = FileConfig::load(file.path()).unwrap();

        assert_eq!(
            config,
            FileConfig {
                from: Some("alice@example.com".to_string()),
                concurrency: Some(2),
                log_format: Some(LogFormat::Json),
                token_file: Some(PathBuf::from("/secrets/token.json")),
                ..FileConfig::default()
            }
        );
    }

    #[test]
    fn test_file_config_rejects_unknown_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "concurency = 2").unwrap();

        assert!(matches!(
            FileConfig::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    #[serial]
    fn test_environment_fills_in_flags() {
        std::env::set_var("SCRAPER_FROM", "bob@example.com");
        std::env::set_var("SCRAPER_CONCURRENCY", "3");

        let cli = Cli::try_parse_from(["attachment-scraper", "--channel-capacity", "1"]);

        std::env::remove_var("SCRAPER_FROM");
        std::env::remove_var("SCRAPER_CONCURRENCY");

        let config = ScraperConfig::load(cli.unwrap()).unwrap();
        assert_eq!(config.from.as_deref(), Some("bob@example.com"));
        assert_eq!(config.limits.max_concurrency, 3);
        assert_eq!(config.limits.channel_capacity, 1);
    }
}
