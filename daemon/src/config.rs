use std::env;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::upload::{DEFAULT_CDN_URL, DEFAULT_UPLOAD_URL};

pub const API_BASE_ENV: &str = "PROCTOR_API_URL";
pub const UPLOAD_KEY_ENV: &str = "PROCTOR_UPLOAD_KEY";
const DEFAULT_API_BASE: &str = "http://localhost:5000/api/exam";

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse { path: PathBuf, message: String },
    InvalidUrl { field: &'static str, value: String },
    InvalidValue { field: &'static str, message: String },
    MissingHome,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "Filesystem error: {err}"),
            ConfigError::Parse { path, message } => {
                write!(f, "Failed to parse proctor config {}: {message}", path.display())
            }
            ConfigError::InvalidUrl { field, value } => {
                write!(f, "`{field}` is not a valid URL: {value}")
            }
            ConfigError::InvalidValue { field, message } => write!(f, "`{field}` {message}"),
            ConfigError::MissingHome => write!(
                f,
                "Home directory could not be determined to locate ~/.config/proctor.json"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        ConfigError::Io(value)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProctorConfig {
    /// Cheating log API base (e.g. "https://exams.example.com/api/exam").
    /// Falls back to PROCTOR_API_URL, then http://localhost:5000/api/exam.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    #[serde(default)]
    pub upload: UploadSettings,
    #[serde(default)]
    pub monitoring: MonitoringSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(default = "default_upload_url")]
    pub upload_url: String,
    #[serde(default = "default_cdn_url")]
    pub cdn_url: String,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            public_key: None,
            upload_url: default_upload_url(),
            cdn_url: default_cdn_url(),
        }
    }
}

fn default_upload_url() -> String {
    DEFAULT_UPLOAD_URL.to_string()
}

fn default_cdn_url() -> String {
    DEFAULT_CDN_URL.to_string()
}

/// Timing and threshold knobs. Debounce window and threshold are independent.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitoringSettings {
    pub tick_interval_ms: u64,
    pub debounce_window_ms: u64,
    pub termination_threshold: u32,
    pub upload_workers: usize,
    pub upload_settle_ms: u64,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            debounce_window_ms: 3000,
            termination_threshold: 5,
            upload_workers: 2,
            upload_settle_ms: 2000,
        }
    }
}

impl MonitoringSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms)
    }

    pub fn upload_settle(&self) -> Duration {
        Duration::from_millis(self.upload_settle_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("monitoring.tick_interval_ms", self.tick_interval_ms == 0),
            ("monitoring.debounce_window_ms", self.debounce_window_ms == 0),
            ("monitoring.termination_threshold", self.termination_threshold == 0),
            ("monitoring.upload_workers", self.upload_workers == 0),
        ];
        for (field, is_zero) in non_zero {
            if is_zero {
                return Err(ConfigError::InvalidValue {
                    field,
                    message: "must be greater than zero".into(),
                });
            }
        }
        Ok(())
    }
}

impl ProctorConfig {
    /// Resolve API base URL: config file -> env var -> default
    pub fn resolve_api_base(&self) -> String {
        self.resolve_api_base_with(env::var(API_BASE_ENV).ok())
    }

    fn resolve_api_base_with(&self, from_env: Option<String>) -> String {
        if let Some(url) = self.api_url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            return url.to_string();
        }
        from_env
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
    }

    /// Upload key: env var wins over the config file.
    pub fn upload_key(&self) -> Option<String> {
        self.upload_key_with(env::var(UPLOAD_KEY_ENV).ok())
    }

    fn upload_key_with(&self, from_env: Option<String>) -> Option<String> {
        non_blank(from_env).or_else(|| non_blank(self.upload.public_key.clone()))
    }

    pub fn api_token(&self) -> Option<String> {
        self.api_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_owned)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_url("api_url", &self.resolve_api_base())?;
        check_url("upload.upload_url", &self.upload.upload_url)?;
        check_url("upload.cdn_url", &self.upload.cdn_url)?;
        self.monitoring.validate()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn check_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        _ => Err(ConfigError::InvalidUrl {
            field,
            value: value.to_string(),
        }),
    }
}

pub fn config_path() -> Result<PathBuf, ConfigError> {
    let mut path = dirs::home_dir().ok_or(ConfigError::MissingHome)?;
    path.push(".config");
    path.push("proctor.json");
    Ok(path)
}

/// Loads `~/.config/proctor.json`. A missing file means all defaults.
pub fn load_config() -> Result<ProctorConfig, ConfigError> {
    load_config_from(&config_path()?)
}

pub fn load_config_from(path: &Path) -> Result<ProctorConfig, ConfigError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            log::info!("No proctor config at {}, using defaults", path.display());
            return Ok(ProctorConfig::default());
        }
        Err(err) => return Err(ConfigError::from(err)),
    };

    let config: ProctorConfig = serde_json::from_str(&contents).map_err(|err| ConfigError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}
