//! Application configuration loaded from environment variables.
//!
//! The backend URL and public API key are required; starting without them
//! is a fatal error rather than something the app can recover from later.

use crate::services::validation::UrlPolicy;
use std::env;
use std::time::Duration;

/// Default timeout applied to every backend call.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
/// Failed logins tolerated per window before the form locks.
const DEFAULT_LOGIN_MAX_ATTEMPTS: usize = 5;
/// Login lockout window (15 minutes).
const DEFAULT_LOGIN_WINDOW_SECS: u64 = 15 * 60;

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Some(Environment::Production),
            "development" | "dev" | "local" => Some(Environment::Development),
            _ => None,
        }
    }

    /// URL policy for user-supplied links. Production rejects internal hosts.
    pub fn url_policy(self) -> UrlPolicy {
        match self {
            Environment::Production => UrlPolicy::Production,
            Environment::Development => UrlPolicy::Permissive,
        }
    }
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Required ---
    /// Backend base URL (no trailing slash)
    pub supabase_url: String,
    /// Backend public (anon) API key
    pub supabase_anon_key: String,

    // --- Optional ---
    /// Deployment environment
    pub environment: Environment,
    /// Public site URL, used for password reset redirects
    pub site_url: String,
    /// Timeout applied to each backend call
    pub request_timeout: Duration,
    /// Failed logins allowed per lockout window
    pub login_max_attempts: usize,
    /// Login lockout window
    pub login_window: Duration,
}

impl Default for Config {
    /// Default config for testing only.
    fn default() -> Self {
        Self {
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test_anon_key".to_string(),
            environment: Environment::Development,
            site_url: "http://localhost:5173".to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            login_max_attempts: DEFAULT_LOGIN_MAX_ATTEMPTS,
            login_window: Duration::from_secs(DEFAULT_LOGIN_WINDOW_SECS),
        }
    }
}

impl Config {
    /// Load configuration from environment variables (and `.env` if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let supabase_url = required("SUPABASE_URL")?;
        let supabase_anon_key = required("SUPABASE_ANON_KEY")?;

        let environment = match env::var("SPORTSYNC_ENV") {
            Ok(value) => Environment::parse(&value).ok_or(ConfigError::Invalid {
                name: "SPORTSYNC_ENV",
                value,
            })?,
            Err(_) => Environment::Development,
        };

        Ok(Self {
            supabase_url: supabase_url.trim_end_matches('/').to_string(),
            supabase_anon_key,
            environment,
            site_url: env::var("SITE_URL")
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            request_timeout: Duration::from_secs(parse_or(
                "REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?),
            login_max_attempts: parse_nonzero("LOGIN_MAX_ATTEMPTS", DEFAULT_LOGIN_MAX_ATTEMPTS)?,
            login_window: Duration::from_secs(parse_or(
                "LOGIN_WINDOW_SECS",
                DEFAULT_LOGIN_WINDOW_SECS,
            )?),
        })
    }

    /// Where password reset emails send the user back to.
    pub fn password_reset_redirect(&self) -> String {
        format!("{}/reset-password", self.site_url)
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .map(|v| v.trim().to_string())
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}

/// Like [`parse_or`], but zero is rejected.
fn parse_nonzero(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    match parse_or(name, default)? {
        0 => Err(ConfigError::Invalid {
            name,
            value: "0".to_string(),
        }),
        n => Ok(n),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}
