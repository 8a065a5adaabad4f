//! Configuration module for the chat history reporter.
//!
//! The reporter is configured from environment variables. The server URL and
//! signing secret are both optional: when either is missing the service is
//! disabled and every reporting operation becomes a no-op.

use std::env;
use std::time::Duration;

use thiserror::Error;

/// Environment variable holding `chat-history-server.url`.
pub const URL_ENV: &str = "CHAT_HISTORY_SERVER_URL";

/// Environment variable holding `chat-history-server.secret`.
pub const SECRET_ENV: &str = "CHAT_HISTORY_SERVER_SECRET";

const REQUEST_TIMEOUT_ENV: &str = "CHAT_HISTORY_REQUEST_TIMEOUT_SECS";
const POLL_INTERVAL_ENV: &str = "CHAT_HISTORY_POLL_INTERVAL_MS";
const SHUTDOWN_TIMEOUT_ENV: &str = "CHAT_HISTORY_SHUTDOWN_TIMEOUT_SECS";

/// Default timeout for a single delivery call.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Default bounded wait of the consumer between stop-flag checks.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Default upper bound on how long `stop()` waits for the consumer.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 2;

const REQUEST_TIMEOUT_RANGE: (u64, u64) = (1, 300);
const POLL_INTERVAL_RANGE: (u64, u64) = (10, 60_000);
const SHUTDOWN_TIMEOUT_RANGE: (u64, u64) = (1, 60);

/// Configuration for the chat history service and its report queue.
///
/// Read once at construction and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Base URL of the chat history server, without a trailing slash
    pub base_url: Option<String>,

    /// Symmetric key used to sign device tokens
    pub signing_secret: Option<String>,

    /// Timeout applied to each outbound call
    pub request_timeout: Duration,

    /// How long the consumer waits for an item before re-checking for stop
    pub poll_interval: Duration,

    /// How long `stop()` waits for the consumer to exit
    pub shutdown_timeout: Duration,
}

/// Error type for configuration loading failures.
#[derive(Debug, Error)]
#[error("Configuration error for {env_var}: {message}")]
pub struct ConfigError {
    pub message: String,
    pub env_var: String,
}

impl ServiceConfig {
    /// Build an enabled configuration for the given server and secret,
    /// keeping the default timeouts.
    pub fn new(base_url: impl Into<String>, signing_secret: impl Into<String>) -> Self {
        Self {
            base_url: normalize_url(Some(base_url.into())),
            signing_secret: non_blank(Some(signing_secret.into())),
            ..Self::default()
        }
    }

    /// A configuration with no server; every operation is a no-op.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if one of the numeric tunables is not a valid
    /// number or falls outside its allowed range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = normalize_url(lookup(URL_ENV));
        let signing_secret = non_blank(lookup(SECRET_ENV));

        let request_timeout = Duration::from_secs(parse_bounded(
            &lookup,
            REQUEST_TIMEOUT_ENV,
            DEFAULT_REQUEST_TIMEOUT_SECS,
            REQUEST_TIMEOUT_RANGE,
        )?);
        let poll_interval = Duration::from_millis(parse_bounded(
            &lookup,
            POLL_INTERVAL_ENV,
            DEFAULT_POLL_INTERVAL_MS,
            POLL_INTERVAL_RANGE,
        )?);
        let shutdown_timeout = Duration::from_secs(parse_bounded(
            &lookup,
            SHUTDOWN_TIMEOUT_ENV,
            DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            SHUTDOWN_TIMEOUT_RANGE,
        )?);

        Ok(Self {
            base_url,
            signing_secret,
            request_timeout,
            poll_interval,
            shutdown_timeout,
        })
    }

    /// True iff both the server URL and the signing secret are configured.
    pub fn enabled(&self) -> bool {
        self.base_url.is_some() && self.signing_secret.is_some()
    }

    /// Override the consumer poll interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Override the delivery timeout.
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Override the shutdown join timeout.
    pub fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            signing_secret: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn normalize_url(value: Option<String>) -> Option<String> {
    non_blank(value)
        .map(|url| url.trim().trim_end_matches('/').to_string())
        .filter(|url| !url.is_empty())
}

/// Parse an optional numeric variable and check it against `(min, max)`.
fn parse_bounded<F>(
    lookup: &F,
    env_var: &str,
    default: u64,
    (min, max): (u64, u64),
) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(env_var) else {
        return Ok(default);
    };

    let value: u64 = raw.trim().parse().map_err(|_| ConfigError {
        message: format!("'{}' is not a valid number", raw),
        env_var: env_var.to_string(),
    })?;

    if value < min {
        return Err(ConfigError {
            message: format!("{} is below minimum ({})", value, min),
            env_var: env_var.to_string(),
        });
    }

    if value > max {
        return Err(ConfigError {
            message: format!("{} exceeds maximum ({})", value, max),
            env_var: env_var.to_string(),
        });
    }

    Ok(value)
}
