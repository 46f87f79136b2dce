use std::{fs, path::Path, str::FromStr, time::Duration};

use shared::domain::Credentials;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{rate_limit::RateLimitConfig, source::DEFAULT_QUOTE_URL, store::StorageMode};

pub const SETTINGS_FILE: &str = "quotes.toml";

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_url: String,
    pub database_url: String,
    pub storage_mode: StorageMode,
    pub request_timeout_seconds: u64,
    pub rate_limit: RateLimitConfig,
    pub email: Option<String>,
    pub password: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_QUOTE_URL.into(),
            database_url: "sqlite://./data/quotes.db".into(),
            storage_mode: StorageMode::Local,
            request_timeout_seconds: 10,
            rate_limit: RateLimitConfig::default(),
            email: None,
            password: None,
        }
    }
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Credentials from config, only when both halves are present.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.email, &self.password) {
            (Some(email), Some(password)) => Some(Credentials::new(email, password)),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file '{path}': {message}")]
    Read { path: String, message: String },
    #[error("failed to parse settings file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
    #[error("invalid quote API url '{0}'")]
    InvalidApiUrl(String),
}

/// Defaults, then `quotes.toml` in the working directory, then the process environment.
pub fn load_settings() -> Result<Settings, SettingsError> {
    load_settings_from(Path::new(SETTINGS_FILE), |key| std::env::var(key).ok())
}

pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Settings, SettingsError> {
    let mut settings = Settings::default();

    match fs::read_to_string(path) {
        Ok(raw) => apply_file(&mut settings, &raw)?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no settings file; using defaults");
        }
        Err(err) => {
            return Err(SettingsError::Read {
                path: path.display().to_string(),
                message: err.to_string(),
            })
        }
    }

    apply_env(&mut settings, env)?;

    settings.database_url = normalize_database_url(&settings.database_url);
    Url::parse(&settings.api_url)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .ok_or_else(|| SettingsError::InvalidApiUrl(settings.api_url.clone()))?;
    if settings.rate_limit.max_requests == 0 {
        return Err(SettingsError::InvalidValue {
            key: "rate_limit_max_requests".into(),
            value: "0".into(),
        });
    }

    Ok(settings)
}

fn apply_file(settings: &mut Settings, raw: &str) -> Result<(), SettingsError> {
    let table: toml::Table = toml::from_str(raw)?;
    for (key, value) in table {
        let value = match value {
            toml::Value::String(text) => text,
            toml::Value::Integer(number) => number.to_string(),
            other => {
                return Err(SettingsError::InvalidValue {
                    key,
                    value: other.to_string(),
                })
            }
        };
        apply_value(settings, &key, value)?;
    }
    Ok(())
}

fn apply_env(
    settings: &mut Settings,
    env: impl Fn(&str) -> Option<String>,
) -> Result<(), SettingsError> {
    const OVERRIDES: &[(&str, &str)] = &[
        ("QUOTES_API_URL", "api_url"),
        ("APP__API_URL", "api_url"),
        ("QUOTES_DATABASE_URL", "database_url"),
        ("APP__DATABASE_URL", "database_url"),
        ("APP__STORAGE_MODE", "storage_mode"),
        ("APP__REQUEST_TIMEOUT_SECONDS", "request_timeout_seconds"),
        ("APP__RATE_LIMIT_MAX_REQUESTS", "rate_limit_max_requests"),
        ("APP__RATE_LIMIT_WINDOW_SECONDS", "rate_limit_window_seconds"),
        ("APP__RATE_LIMIT_COOLDOWN_SECONDS", "rate_limit_cooldown_seconds"),
        ("QUOTES_EMAIL", "email"),
        ("QUOTES_PASSWORD", "password"),
    ];

    for (var, key) in OVERRIDES {
        if let Some(value) = env(var) {
            apply_value(settings, key, value)?;
        }
    }
    Ok(())
}

fn apply_value(settings: &mut Settings, key: &str, value: String) -> Result<(), SettingsError> {
    match key {
        "api_url" => settings.api_url = value.trim().to_string(),
        "database_url" => settings.database_url = value,
        "storage_mode" => settings.storage_mode = parse(key, &value)?,
        "request_timeout_seconds" => settings.request_timeout_seconds = parse(key, &value)?,
        "rate_limit_max_requests" => settings.rate_limit.max_requests = parse(key, &value)?,
        "rate_limit_window_seconds" => {
            settings.rate_limit.window = Duration::from_secs(parse(key, &value)?)
        }
        "rate_limit_cooldown_seconds" => {
            settings.rate_limit.cooldown = Duration::from_secs(parse(key, &value)?)
        }
        "email" => settings.email = Some(value),
        "password" => settings.password = Some(value),
        other => debug!(key = other, "ignoring unknown settings key"),
    }
    Ok(())
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, SettingsError> {
    value
        .trim()
        .parse()
        .map_err(|_| SettingsError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
}

pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        return format!("sqlite://{}", path.replace('\\', "/"));
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
