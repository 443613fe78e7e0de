use std::{fmt::Display, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ChannelState;

/// What went wrong, coarse enough for presentation code to branch on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Rejected input or a request the gateway will never accept as sent.
    Config,
    /// Session missing, expired or rejected.
    Auth,
    /// Gateway unreachable, timed out or failing server-side.
    Network,
    /// Gateway asked us to slow down.
    RateLimited,
    /// A frame or response body could not be (de)serialized.
    Serialization,
    /// Peer sent something that does not follow the envelope protocol.
    Protocol,
    Internal,
}

impl ErrorCategory {
    /// Waiting and retrying the same request may succeed.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Network | Self::RateLimited)
    }
}

/// Error value shared by the cache, the push channel and the request layer.
///
/// `code` is a stable machine-readable identifier such as `history_fetch_failed`;
/// `message` is free text for logs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{code} ({category:?}): {message}")]
pub struct SyncError {
    pub category: ErrorCategory,
    pub code: String,
    pub message: String,
    /// Server-provided backoff hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl SyncError {
    pub fn new(category: ErrorCategory, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Error for a non-success HTTP response, categorized by status.
    pub fn from_http_status(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(classify_http_status(status), code, message)
    }

    /// A payload that failed to encode or decode.
    pub fn serialization(code: impl Into<String>, cause: impl Display) -> Self {
        Self::new(ErrorCategory::Serialization, code, cause.to_string())
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// A channel signal that is not valid in the current state.
    pub fn invalid_state(current: ChannelState, signal: impl Display) -> Self {
        Self::new(
            ErrorCategory::Internal,
            "invalid_state_transition",
            format!("signal '{signal}' is not valid while the push channel is {current:?}"),
        )
    }

    pub fn not_authenticated() -> Self {
        Self::new(
            ErrorCategory::Auth,
            "not_authenticated",
            "no authenticated session is available",
        )
    }

    /// Whether the failure is worth retrying without user action.
    pub fn is_recoverable(&self) -> bool {
        self.category.is_transient()
    }
}

/// Category for an HTTP status code.
///
/// 401/403 mean the session is gone, 408/429 mean back off, remaining 4xx are
/// permanent rejections and 5xx are gateway-side failures.
pub fn classify_http_status(status: u16) -> ErrorCategory {
    match status {
        401 | 403 => ErrorCategory::Auth,
        408 | 429 => ErrorCategory::RateLimited,
        400..=499 => ErrorCategory::Config,
        500..=599 => ErrorCategory::Network,
        _ => ErrorCategory::Internal,
    }
}
