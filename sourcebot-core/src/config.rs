use crate::{ConfigError, RetryConfig};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const API_KEY_ENV: &str = "SOURCEBOT_API_KEY";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub tumblr: TumblrConfig,
    pub scheduler: SchedulerConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://sourcebot.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TumblrConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    /// Requests allowed per `window_secs`
    pub max_requests: u32,
    pub window_secs: u64,
    pub burst: u32,
}

impl Default for TumblrConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: "https://api.tumblr.com/v2".to_string(),
            user_agent: format!("sourcebot/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 30,
            // Tumblr allows 1000 requests per hour per consumer key
            max_requests: 1000,
            window_secs: 3600,
            burst: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub refresh_interval_secs: u64,
    pub idle_delay_ms: u64,
    pub cache_ttl_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 60,
            idle_delay_ms: 1000,
            cache_ttl_secs: 2 * 60 * 60,
        }
    }
}

impl SchedulerConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "sourcebot=info,discovery=info,background_service=info,tumblr_client=info,database=info"
                .to_string(),
        }
    }
}

impl AppConfig {
    /// Reads the TOML file at `path`, applies environment overrides and
    /// validates the result.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(API_KEY_ENV).filter(|k| !k.is_empty()) {
            self.tumblr.api_key = Some(key);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "database.url".to_string(),
            });
        }
        if self.tumblr.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::MissingEnvironmentVariable {
                var_name: API_KEY_ENV.to_string(),
            });
        }
        if self.tumblr.max_requests == 0 || self.tumblr.window_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "tumblr.max_requests".to_string(),
                value: format!(
                    "{} per {}s",
                    self.tumblr.max_requests, self.tumblr.window_secs
                ),
            });
        }
        if self.tumblr.burst == 0 {
            return Err(ConfigError::InvalidValue {
                field: "tumblr.burst".to_string(),
                value: "0".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(ConfigError::InvalidValue {
                field: "retry.jitter_factor".to_string(),
                value: self.retry.jitter_factor.to_string(),
            });
        }
        Ok(())
    }
}
