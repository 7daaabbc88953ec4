//! Process-environment configuration. `DATABASE_URL`, `HMAC_SECRET`,
//! `JWT_SECRET`, and the SMS provider credentials are required — start-up
//! fails otherwise, mirroring the bind-failure exit(1) path in `main`.

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub cache_url: String,
    pub hmac_secret: String,
    pub jwt_secret: String,
    pub sms_account_sid: String,
    pub sms_auth_token: String,
    pub sms_from_number: String,
    pub push_credentials_path: Option<String>,
    pub map_token: Option<String>,
    pub thresholds: Thresholds,
    pub port: u16,
}

#[derive(Clone, Copy, Debug)]
pub struct Thresholds {
    pub heartbeat_interval: Duration,
    pub heartbeat_window: Duration,
    pub last_gasp_timeout: Duration,
    pub silent_prompt_timeout: Duration,
    pub blackbox_retention: Duration,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(180),
            heartbeat_window: Duration::from_secs(600),
            last_gasp_timeout: Duration::from_secs(3600),
            silent_prompt_timeout: Duration::from_secs(10),
            blackbox_retention: Duration::from_secs(12 * 3600),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::Missing(key))
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn duration_seconds(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(key) {
        Ok(v) => v
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::Invalid("threshold", format!("{key}={v}"))),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Thresholds::default();
        let thresholds = Thresholds {
            heartbeat_interval: duration_seconds("HEARTBEAT_INTERVAL", defaults.heartbeat_interval)?,
            heartbeat_window: duration_seconds("HEARTBEAT_WINDOW", defaults.heartbeat_window)?,
            last_gasp_timeout: duration_seconds("LAST_GASP_TIMEOUT", defaults.last_gasp_timeout)?,
            silent_prompt_timeout: duration_seconds("SILENT_PROMPT", defaults.silent_prompt_timeout)?,
            blackbox_retention: duration_seconds("BLACKBOX_RETENTION", defaults.blackbox_retention)?,
        };

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            cache_url: optional("CACHE_URL").unwrap_or_else(|| "memory://local".into()),
            hmac_secret: required("HMAC_SECRET")?,
            jwt_secret: required("JWT_SECRET")?,
            sms_account_sid: required("SMS_ACCOUNT_SID")?,
            sms_auth_token: required("SMS_AUTH_TOKEN")?,
            sms_from_number: required("SMS_FROM_NUMBER")?,
            push_credentials_path: optional("PUSH_CREDENTIALS_PATH"),
            map_token: optional("MAP_TOKEN"),
            thresholds,
            port: optional("PORT").and_then(|p| p.parse().ok()).unwrap_or(8080),
        })
    }
}
