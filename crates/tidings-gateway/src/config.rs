//! Environment-backed configuration for the sync engine.

use std::{env, error::Error, fmt, time::Duration};

use tidings_core::{ReconnectPolicy, Timeline};
use url::Url;

const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8000/api";
const DEFAULT_PUSH_URL: &str = "ws://127.0.0.1:8000/ws";
const DEFAULT_HISTORY_PAGE_SIZE: u16 = 50;
const HISTORY_PAGE_SIZE_CAP: u16 = 200;
const DEFAULT_DIALOG_LIMIT: u32 = 300;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 3_000;
const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_PAGINATION_THRESHOLD_PX: f32 = 100.0;
const DEFAULT_EVENT_BUFFER: usize = 512;

/// Runtime configuration for [`crate::SyncEngine`].
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    /// Base URL of the request/response API, e.g. `http://host/api`.
    pub api_base_url: Url,
    /// Push endpoint; the session handle is appended as `session_id`.
    pub push_url: Url,
    /// Pre-existing session handle, used by tooling that skips the login flow.
    pub session_id: Option<String>,
    pub history_page_size: u16,
    pub dialog_limit: u32,
    pub reconnect_delay_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub request_timeout_ms: u64,
    /// Scroll offset (px from the oldest loaded message) that triggers older-page loads.
    pub pagination_threshold_px: f32,
    pub event_buffer: usize,
}

impl GatewayConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Parse configuration from an arbitrary key lookup; unset keys take defaults.
    pub fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let api_base_url =
            parse_url("TIDINGS_API_BASE_URL", DEFAULT_API_BASE_URL, &mut lookup)?;
        let push_url = parse_url("TIDINGS_PUSH_URL", DEFAULT_PUSH_URL, &mut lookup)?;
        if !matches!(push_url.scheme(), "ws" | "wss") {
            return Err(ConfigError::InvalidValue {
                key: "TIDINGS_PUSH_URL",
                value: push_url.to_string(),
                reason: "scheme must be ws or wss".to_owned(),
            });
        }

        let session_id = optional_trimmed_env("TIDINGS_SESSION_ID", &mut lookup);

        let history_page_size = parse_with_default(
            "TIDINGS_HISTORY_PAGE_SIZE",
            DEFAULT_HISTORY_PAGE_SIZE,
            &mut lookup,
        )?;
        let dialog_limit =
            parse_with_default("TIDINGS_DIALOG_LIMIT", DEFAULT_DIALOG_LIMIT, &mut lookup)?;
        let reconnect_delay_ms = parse_with_default(
            "TIDINGS_RECONNECT_DELAY_MS",
            DEFAULT_RECONNECT_DELAY_MS,
            &mut lookup,
        )?;
        let heartbeat_interval_ms = parse_with_default(
            "TIDINGS_HEARTBEAT_INTERVAL_MS",
            DEFAULT_HEARTBEAT_INTERVAL_MS,
            &mut lookup,
        )?;
        let request_timeout_ms = parse_with_default(
            "TIDINGS_REQUEST_TIMEOUT_MS",
            DEFAULT_REQUEST_TIMEOUT_MS,
            &mut lookup,
        )?;
        let pagination_threshold_px = parse_with_default(
            "TIDINGS_PAGINATION_THRESHOLD_PX",
            DEFAULT_PAGINATION_THRESHOLD_PX,
            &mut lookup,
        )?;

        require_positive("TIDINGS_HISTORY_PAGE_SIZE", u64::from(history_page_size))?;
        if history_page_size > HISTORY_PAGE_SIZE_CAP {
            return Err(ConfigError::InvalidValue {
                key: "TIDINGS_HISTORY_PAGE_SIZE",
                value: history_page_size.to_string(),
                reason: format!("must be at most {HISTORY_PAGE_SIZE_CAP}"),
            });
        }
        require_positive("TIDINGS_DIALOG_LIMIT", u64::from(dialog_limit))?;
        require_positive("TIDINGS_RECONNECT_DELAY_MS", reconnect_delay_ms)?;
        require_positive("TIDINGS_HEARTBEAT_INTERVAL_MS", heartbeat_interval_ms)?;
        require_positive("TIDINGS_REQUEST_TIMEOUT_MS", request_timeout_ms)?;
        // `f64` parsing accepts "NaN" and "inf", which would disable or pin pagination.
        if !pagination_threshold_px.is_finite() || pagination_threshold_px <= 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "TIDINGS_PAGINATION_THRESHOLD_PX",
                value: pagination_threshold_px.to_string(),
                reason: "must be a finite number greater than 0".to_owned(),
            });
        }

        Ok(Self {
            api_base_url,
            push_url,
            session_id,
            history_page_size,
            dialog_limit,
            reconnect_delay_ms,
            heartbeat_interval_ms,
            request_timeout_ms,
            pagination_threshold_px,
            event_buffer: DEFAULT_EVENT_BUFFER,
        })
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(self.reconnect_delay_ms, self.heartbeat_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Page size clamped to what the gateway accepts.
    pub fn page_size(&self) -> u16 {
        Timeline::bounded_page_size(self.history_page_size, HISTORY_PAGE_SIZE_CAP)
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed or is out of range.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_with_default<T, F>(key: &'static str, default: T, lookup: &mut F) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value.parse::<T>().map_err(|err| ConfigError::InvalidValue {
        key,
        value,
        reason: err.to_string(),
    })
}

fn parse_url<F>(key: &'static str, default: &str, lookup: &mut F) -> Result<Url, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let value = optional_trimmed_env(key, lookup).unwrap_or_else(|| default.to_owned());
    Url::parse(&value).map_err(|err| ConfigError::InvalidValue {
        key,
        value,
        reason: err.to_string(),
    })
}

fn require_positive(key: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key,
            value: "0".to_owned(),
            reason: "must be at least 1".to_owned(),
        });
    }
    Ok(())
}
