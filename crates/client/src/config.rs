//! Client configuration.

use std::time::Duration;

use thiserror::Error;
use url::Url;

/// Default request timeout applied to every remote call.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default session lifetime when the server does not report a token TTL.
const DEFAULT_SESSION_TTL_DAYS: i64 = 7;

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is unset.
    #[error("missing required environment variable {0}")]
    MissingEnvVar(&'static str),

    /// An environment variable is set but unusable.
    #[error("invalid value for {name}: {reason}")]
    InvalidEnvVar {
        name: &'static str,
        reason: String,
    },
}

/// Settings shared by the HTTP transport and the login flow.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the commerce API.
    pub api_base_url: Url,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Session lifetime fallback.
    pub session_ttl: chrono::Duration,
}

impl ClientConfig {
    /// Configuration with defaults for everything but the API location.
    #[must_use]
    pub fn new(api_base_url: Url) -> Self {
        Self {
            api_base_url,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            session_ttl: chrono::Duration::days(DEFAULT_SESSION_TTL_DAYS),
        }
    }

    /// Override the per-request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Override the session lifetime fallback.
    #[must_use]
    pub const fn with_session_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Load configuration from the environment.
    ///
    /// `POMELO_API_BASE_URL` is required; `POMELO_API_TIMEOUT_SECS` and
    /// `POMELO_SESSION_TTL_SECS` override the defaults.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the base URL is missing or any value
    /// does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(|name| std::env::var(name).ok())
    }

    fn from_source<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let base_url = lookup("POMELO_API_BASE_URL")
            .ok_or(ConfigError::MissingEnvVar("POMELO_API_BASE_URL"))?;
        let api_base_url = base_url
            .parse::<Url>()
            .map_err(|e| ConfigError::InvalidEnvVar {
                name: "POMELO_API_BASE_URL",
                reason: e.to_string(),
            })?;

        let mut config = Self::new(api_base_url);

        if let Some(raw) = lookup("POMELO_API_TIMEOUT_SECS") {
            let secs = parse_secs("POMELO_API_TIMEOUT_SECS", &raw)?;
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = lookup("POMELO_SESSION_TTL_SECS") {
            let secs = parse_secs("POMELO_SESSION_TTL_SECS", &raw)?;
            config.session_ttl = chrono::Duration::seconds(i64::try_from(secs).map_err(
                |e| ConfigError::InvalidEnvVar {
                    name: "POMELO_SESSION_TTL_SECS",
                    reason: e.to_string(),
                },
            )?);
        }
        Ok(config)
    }
}

fn parse_secs(name: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.parse().map_err(|e: std::num::ParseIntError| {
        ConfigError::InvalidEnvVar {
            name,
            reason: e.to_string(),
        }
    })
}
