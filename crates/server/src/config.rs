//! Environment-variable configuration.
//!
//! Every knob reads from an `ORRA_*` variable with a sensible default;
//! `validate` runs once at startup so misconfiguration fails fast.

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    MissingValue(String),

    #[error("invalid value for {0}")]
    InvalidValue(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub planner: PlannerSettings,
    pub channel: ChannelSettings,
    pub scheduler: SchedulerSettings,
    pub webhook: WebhookSettings,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            server: ServerConfig::from_env()?,
            planner: PlannerSettings::from_env()?,
            channel: ChannelSettings::from_env()?,
            scheduler: SchedulerSettings::from_env()?,
            webhook: WebhookSettings::from_env()?,
            logging: LoggingConfig::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.planner.url.is_empty() {
            return Err(ConfigError::MissingValue("ORRA_PLANNER_URL".to_string()));
        }
        if self.scheduler.dispatch_concurrency == 0 {
            return Err(ConfigError::InvalidValue(
                "ORRA_DISPATCH_CONCURRENCY".to_string(),
            ));
        }
        if self.channel.max_message_bytes == 0 {
            return Err(ConfigError::InvalidValue(
                "ORRA_MAX_MESSAGE_BYTES".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(name: &str, default: &str) -> Result<T> {
    env_or(name, default)
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue(name.to_string()))
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: env_or("ORRA_HOST", "0.0.0.0"),
            port: parse_env("ORRA_PORT", "8005")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PlannerSettings {
    pub url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl PlannerSettings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            url: env_or("ORRA_PLANNER_URL", ""),
            api_key: env_or("ORRA_PLANNER_API_KEY", ""),
            timeout: Duration::from_secs(parse_env("ORRA_PLANNER_TIMEOUT_SECS", "30")?),
            max_retries: parse_env("ORRA_PLANNER_MAX_RETRIES", "2")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub max_message_bytes: usize,
}

impl ChannelSettings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            ping_interval: Duration::from_secs(parse_env("ORRA_PING_INTERVAL_SECS", "15")?),
            pong_timeout: Duration::from_secs(parse_env("ORRA_PONG_TIMEOUT_SECS", "45")?),
            max_message_bytes: parse_env("ORRA_MAX_MESSAGE_BYTES", "10240")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub dispatch_concurrency: usize,
    pub task_timeout: Duration,
}

impl SchedulerSettings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            dispatch_concurrency: parse_env("ORRA_DISPATCH_CONCURRENCY", "32")?,
            task_timeout: Duration::from_secs(parse_env("ORRA_TASK_TIMEOUT_SECS", "60")?),
        })
    }
}

#[derive(Debug, Clone)]
pub struct WebhookSettings {
    pub timeout: Duration,
}

impl WebhookSettings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            timeout: Duration::from_secs(parse_env("ORRA_WEBHOOK_TIMEOUT_SECS", "10")?),
        })
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            level: env_or("ORRA_LOG_LEVEL", "info"),
            json: parse_env("ORRA_LOG_JSON", "false")?,
        })
    }
}
