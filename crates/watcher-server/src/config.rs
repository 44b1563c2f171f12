//! Configuration loading and validation for webwatch

use common::logging::LogFormat;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationError};
use watcher::SchedulerConfig;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("No URLs to watch in {}", .0.display())]
    EmptyList(PathBuf),

    #[error("Invalid URL on line {line}: {url:?} ({reason})")]
    InvalidUrl {
        line: usize,
        url: String,
        reason: String,
    },
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub watcher: WatcherSettings,

    #[serde(default)]
    pub web: WebSettings,

    #[serde(default)]
    pub metrics: MetricsSettings,

    #[serde(default)]
    pub slack: SlackSettings,

    #[serde(default)]
    pub telegram: TelegramSettings,

    #[serde(default)]
    pub postmark: PostmarkSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Validate for Config {
    fn validate(&self) -> Result<(), validator::ValidationErrors> {
        self.watcher.validate()?;
        self.web.validate()?;
        self.slack.validate()?;
        self.telegram.validate()?;
        self.postmark.validate()?;
        Ok(())
    }
}

/// Polling and persistence settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_periods"))]
pub struct WatcherSettings {
    /// Recheck interval for good resources
    #[serde(with = "humantime_serde")]
    pub period: Duration,

    /// Recheck interval for failing resources
    #[serde(with = "humantime_serde")]
    pub error_period: Duration,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_tick")]
    pub tick: Duration,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_check_timeout")]
    pub check_timeout: Duration,

    #[validate(length(min = 1))]
    pub db_path: String,
}

/// Web API settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct WebSettings {
    pub enabled: bool,

    #[validate(custom = "validate_listen_addr")]
    pub listen_addr: String,

    /// Capacity of the live event channel
    #[validate(range(min = 1, max = 100000))]
    pub channel_size: usize,
}

/// Metrics settings. Metrics are served by the web listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,
}

/// Slack incoming webhook
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_slack"))]
pub struct SlackSettings {
    pub enabled: bool,
    pub webhook_url: Option<String>,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_message_period")]
    pub message_period: Duration,

    pub only_errors: bool,
}

/// Telegram bot
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_telegram"))]
pub struct TelegramSettings {
    pub enabled: bool,
    pub bot_token: Option<String>,

    /// Chat ids to message
    pub users: Vec<i64>,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_message_period")]
    pub message_period: Duration,

    pub only_errors: bool,
}

/// Postmark email API
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_postmark"))]
pub struct PostmarkSettings {
    pub enabled: bool,

    /// Server token
    pub api_key: Option<String>,

    /// Recipients. The first one is the `To` address, the rest are copied.
    pub emails: Vec<String>,

    pub from_email: Option<String>,
    pub subject: String,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_message_period")]
    pub message_period: Duration,

    pub only_errors: bool,
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: Option<String>,
    pub format: LogFormat,
}

// Default implementations

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(10),
            error_period: Duration::from_secs(1),
            tick: Duration::from_millis(100),
            check_timeout: Duration::from_secs(5),
            db_path: "./.watcher.db".to_string(),
        }
    }
}

impl Default for WebSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "0.0.0.0:8080".to_string(),
            channel_size: 256,
        }
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for SlackSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: None,
            message_period: Duration::from_secs(10),
            only_errors: false,
        }
    }
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: None,
            users: Vec::new(),
            message_period: Duration::from_secs(10),
            only_errors: false,
        }
    }
}

impl Default for PostmarkSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            emails: Vec::new(),
            from_email: None,
            subject: "Http checker errors".to_string(),
            message_period: Duration::from_secs(10),
            only_errors: true,
        }
    }
}

// Custom validators

fn validate_tick(tick: &Duration) -> Result<(), ValidationError> {
    let millis = tick.as_millis();
    if !(10..=10_000).contains(&millis) {
        return Err(ValidationError::new("tick_out_of_range"));
    }
    Ok(())
}

fn validate_check_timeout(timeout: &Duration) -> Result<(), ValidationError> {
    let millis = timeout.as_millis();
    if !(100..=60_000).contains(&millis) {
        return Err(ValidationError::new("check_timeout_out_of_range"));
    }
    Ok(())
}

fn validate_message_period(period: &Duration) -> Result<(), ValidationError> {
    if period.is_zero() {
        return Err(ValidationError::new("message_period_zero"));
    }
    Ok(())
}

fn validate_listen_addr(addr: &str) -> Result<(), ValidationError> {
    addr.parse::<SocketAddr>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("listen_addr_invalid"))
}

fn validate_periods(settings: &WatcherSettings) -> Result<(), ValidationError> {
    if settings.period < settings.tick {
        return Err(ValidationError::new("period_shorter_than_tick"));
    }
    if settings.error_period < settings.tick {
        return Err(ValidationError::new("error_period_shorter_than_tick"));
    }
    Ok(())
}

fn validate_slack(settings: &SlackSettings) -> Result<(), ValidationError> {
    if settings.enabled && is_blank(settings.webhook_url.as_deref()) {
        return Err(ValidationError::new("slack_webhook_url_missing"));
    }
    Ok(())
}

fn validate_telegram(settings: &TelegramSettings) -> Result<(), ValidationError> {
    if !settings.enabled {
        return Ok(());
    }
    if is_blank(settings.bot_token.as_deref()) {
        return Err(ValidationError::new("telegram_bot_token_missing"));
    }
    if settings.users.is_empty() {
        return Err(ValidationError::new("telegram_users_missing"));
    }
    Ok(())
}

fn validate_postmark(settings: &PostmarkSettings) -> Result<(), ValidationError> {
    if !settings.enabled {
        return Ok(());
    }
    if is_blank(settings.api_key.as_deref()) {
        return Err(ValidationError::new("postmark_api_key_missing"));
    }
    if settings.emails.is_empty() || settings.emails.iter().any(|e| e.trim().is_empty()) {
        return Err(ValidationError::new("postmark_emails_missing"));
    }
    if is_blank(settings.from_email.as_deref()) {
        return Err(ValidationError::new("postmark_from_email_missing"));
    }
    Ok(())
}

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

// Configuration loading implementation

impl Config {
    /// Load configuration from `path`, or from the default search paths
    /// when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load_from_file(path);
        }

        match Self::find_config_file() {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::FileNotFound(path.to_path_buf()),
            _ => ConfigError::IoError(e),
        })?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/webwatch/webwatch.yaml")];

        if let Some(home_path) = Self::home_config_path() {
            paths.push(home_path);
        }

        paths.push(PathBuf::from("./webwatch.yaml"));

        paths.into_iter().find(|p| p.is_file())
    }

    fn home_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/webwatch/webwatch.yaml"))
    }

    pub fn to_scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            healthy_interval: self.watcher.period,
            unhealthy_interval: self.watcher.error_period,
            tick: self.watcher.tick,
        }
    }

    /// Level used when RUST_LOG is not set
    pub fn log_level(&self) -> &str {
        self.logging.level.as_deref().unwrap_or("info")
    }
}
