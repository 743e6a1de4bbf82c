//! Configuration management.
//!
//! Settings come from three layers, later ones winning: built-in defaults,
//! a config file (TOML, YAML or JSON) discovered with `prefer` or passed
//! explicitly, and environment variables (a `.env` file is loaded first).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::repository::util::is_postgres_url;

/// Default database filename.
pub const DEFAULT_DATABASE_FILENAME: &str = "admissions.db";

/// Upstream statistics page.
pub const DEFAULT_BASE_URL: &str = "https://abiturient.kpfu.ru";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("Invalid value for {name}: '{value}'")]
    InvalidEnv { name: &'static str, value: String },
}

/// Browser session settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserSettings {
    /// Run Chrome headless.
    pub headless: bool,
    /// Remote DevTools URL (e.g. "ws://localhost:9222"). Launches locally when unset.
    pub remote_url: Option<String>,
    /// Page load timeout in seconds.
    pub timeout: u64,
    /// Extra Chrome arguments.
    pub chrome_args: Vec<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            remote_url: None,
            timeout: 30,
            chrome_args: Vec::new(),
        }
    }
}

impl BrowserSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename inside `data_dir`.
    pub database_filename: String,
    /// Database URL (overrides data_dir/database_filename if set).
    pub database_url: Option<String>,
    /// Filter page the crawler reads.
    pub base_url: String,
    /// HTTP request timeout in seconds.
    pub request_timeout: u64,
    /// Pause between combinations in a statistics refresh, in milliseconds.
    pub request_delay_ms: u64,
    /// Number of browser sessions in the pool.
    pub pool_size: usize,
    /// Blocking worker threads for browser work.
    pub max_workers: usize,
    /// Seconds to wait for a free browser session.
    pub acquire_timeout: u64,
    /// Days between combination refreshes in daemon mode.
    pub combinations_interval_days: u64,
    /// Hours between statistics refreshes in daemon mode.
    pub statistics_interval_hours: u64,
    pub browser: BrowserSettings,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("admission-crawler");

        Self {
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            database_url: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: 30,
            request_delay_ms: 500,
            pool_size: 2,
            max_workers: 5,
            acquire_timeout: 5,
            combinations_interval_days: 30,
            statistics_interval_hours: 24,
            browser: BrowserSettings::default(),
        }
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            ..Default::default()
        }
    }

    /// Get the database URL, constructing from path if not explicitly set.
    pub fn database_url(&self) -> String {
        if let Some(ref url) = self.database_url {
            url.clone()
        } else {
            format!("sqlite:{}", self.database_path().display())
        }
    }

    /// Full path of the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    pub fn is_postgres(&self) -> bool {
        self.database_url
            .as_ref()
            .is_some_and(|url| is_postgres_url(url))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout)
    }

    pub fn combinations_interval(&self) -> Duration {
        Duration::from_secs(self.combinations_interval_days.saturating_mul(24 * 60 * 60))
    }

    pub fn statistics_interval(&self) -> Duration {
        Duration::from_secs(self.statistics_interval_hours.saturating_mul(60 * 60))
    }

    /// Ensure the data directory exists (SQLite only).
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        if self.database_url.is_none() {
            std::fs::create_dir_all(&self.data_dir)?;
        }
        Ok(())
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(url) = var("CRAWLER_BASE_URL").or_else(|| var("PARSER_BASE_URL")) {
            self.base_url = url;
        }

        if let Some(url) = var("DATABASE_URL") {
            tracing::debug!("Using DATABASE_URL from environment");
            self.database_url = Some(url);
        } else if let Some(url) = postgres_url_from_parts(&var) {
            tracing::debug!("Using PostgreSQL from DB_* environment variables");
            self.database_url = Some(url);
        }

        if let Some(v) = var("CRAWLER_POOL_SIZE") {
            self.pool_size = parse_env("CRAWLER_POOL_SIZE", v)?;
        }
        if let Some(v) = var("CRAWLER_MAX_WORKERS") {
            self.max_workers = parse_env("CRAWLER_MAX_WORKERS", v)?;
        }
        if let Some(v) = var("CRAWLER_ACQUIRE_TIMEOUT") {
            self.acquire_timeout = parse_env("CRAWLER_ACQUIRE_TIMEOUT", v)?;
        }
        if let Some(v) = var("CRAWLER_REQUEST_DELAY_MS") {
            self.request_delay_ms = parse_env("CRAWLER_REQUEST_DELAY_MS", v)?;
        }
        if let Some(v) = var("CRAWLER_HEADLESS") {
            self.browser.headless = match v.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        name: "CRAWLER_HEADLESS",
                        value: v,
                    })
                }
            };
        }
        if let Some(url) = var("BROWSER_URL") {
            self.browser.remote_url = Some(url);
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { name, value })
}

/// PostgreSQL URL assembled from `DB_USER`, `DB_PASSWORD`, `DB_HOST`,
/// `DB_PORT` and `DB_NAME`. Requires at least user and database name.
fn postgres_url_from_parts(var: &impl Fn(&str) -> Option<String>) -> Option<String> {
    let user = var("DB_USER")?;
    let name = var("DB_NAME")?;
    let host = var("DB_HOST").unwrap_or_else(|| "localhost".to_string());
    let port = var("DB_PORT").unwrap_or_else(|| "5432".to_string());
    let auth = match var("DB_PASSWORD") {
        Some(password) => format!("{}:{}", user, password),
        None => user,
    };
    Some(format!("postgres://{}@{}:{}/{}", auth, host, port, name))
}

/// Configuration file contents. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquire_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combinations_interval_days: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics_interval_hours: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<BrowserConfig>,

    /// Path the config was loaded from.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

/// `[browser]` section of the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BrowserConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headless: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chrome_args: Vec<String>,
}

impl Config {
    /// Discover an `admission-crawler` config file in the standard locations.
    /// No file (or an unreadable one) yields the defaults.
    pub async fn load() -> Self {
        match prefer::load("admission-crawler").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => match Self::load_from_path(path).await {
                    Ok(config) => config,
                    Err(e) => {
                        tracing::warn!("{}", e);
                        Self::default()
                    }
                },
                None => Self::default(),
            },
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a specific file path.
    /// The format follows the extension: TOML, YAML, anything else is JSON.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let mut config = Self::parse(path, &contents)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    fn parse(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let parsed = match ext {
            "toml" => toml::from_str(contents).map_err(|e| e.to_string()),
            "yaml" | "yml" => serde_yaml::from_str(contents).map_err(|e| e.to_string()),
            _ => serde_json::from_str(contents).map_err(|e| e.to_string()),
        };
        parsed.map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Directory relative paths in the file are resolved against.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            let path = Path::new(data_dir);
            settings.data_dir = if path.is_absolute() {
                path.to_path_buf()
            } else {
                base_dir.join(path)
            };
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
        if let Some(ref url) = self.database_url {
            settings.database_url = Some(url.clone());
        }
        if let Some(ref url) = self.base_url {
            settings.base_url = url.clone();
        }
        if let Some(timeout) = self.request_timeout {
            settings.request_timeout = timeout;
        }
        if let Some(delay) = self.request_delay_ms {
            settings.request_delay_ms = delay;
        }
        if let Some(size) = self.pool_size {
            settings.pool_size = size;
        }
        if let Some(workers) = self.max_workers {
            settings.max_workers = workers;
        }
        if let Some(timeout) = self.acquire_timeout {
            settings.acquire_timeout = timeout;
        }
        if let Some(days) = self.combinations_interval_days {
            settings.combinations_interval_days = days;
        }
        if let Some(hours) = self.statistics_interval_hours {
            settings.statistics_interval_hours = hours;
        }
        if let Some(ref browser) = self.browser {
            if let Some(headless) = browser.headless {
                settings.browser.headless = headless;
            }
            if let Some(ref url) = browser.remote_url {
                settings.browser.remote_url = Some(url.clone());
            }
            if let Some(timeout) = browser.timeout {
                settings.browser.timeout = timeout;
            }
            if !browser.chrome_args.is_empty() {
                settings.browser.chrome_args = browser.chrome_args.clone();
            }
        }
    }
}

/// Load settings: defaults, then the config file, then the environment.
pub async fn load_settings(config_path: Option<&Path>) -> Result<(Settings, Config), ConfigError> {
    let config = match config_path {
        Some(path) => Config::load_from_path(path).await?,
        None => Config::load().await,
    };

    let mut settings = Settings::default();
    let base_dir = config
        .base_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    config.apply_to_settings(&mut settings, &base_dir);
    settings.apply_env()?;

    Ok((settings, config))
}
