//! Error taxonomy for listing synchronization.
//!
//! Remote calls on either side fail with an [`ApiError`]. The sync layers
//! re-classify it depending on where it happened: a failed read becomes a
//! [`FetchError`] (the cycle is aborted), a failed write becomes a
//! [`MutationError`] (only that plan entry fails).

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by the Airtable and Webflow HTTP clients.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP 429 from the remote.
    #[error("Rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    /// HTTP 401 or 403.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// HTTP 404.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other 4xx, typically a validation failure.
    #[error("Request rejected ({status}): {detail}")]
    Rejected { status: u16, detail: String },

    /// HTTP 5xx.
    #[error("Server error ({status}): {detail}")]
    Server { status: u16, detail: String },

    /// Connection, timeout or body transfer failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The response body could not be decoded.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The client could not be built from the supplied settings.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ApiError {
    /// Whether repeating the same call may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::RateLimited { .. } | ApiError::Server { .. } | ApiError::Transport(_)
        )
    }

    /// Server-suggested wait before the next attempt, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::RateLimited {
                retry_after_secs: Some(secs),
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Parse(err.to_string())
        } else if err.is_builder() {
            ApiError::InvalidConfig(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Parse(err.to_string())
    }
}

/// Result type for remote calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// Which collection a read was issued against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Source,
    Mirror,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Source => f.write_str("source"),
            Side::Mirror => f.write_str("mirror"),
        }
    }
}

/// A collection could not be read in full.
#[derive(Debug, Error)]
#[error("failed to read {side} collection: {source}")]
pub struct FetchError {
    pub side: Side,
    #[source]
    pub source: ApiError,
}

impl FetchError {
    #[must_use]
    pub fn new(side: Side, source: ApiError) -> Self {
        Self { side, source }
    }
}

/// A source record could not be normalized.
#[derive(Debug, Clone, Error)]
#[error("source record {record_id} skipped: {message}")]
pub struct MappingError {
    pub record_id: String,
    pub message: String,
}

impl MappingError {
    pub fn new(record_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            message: message.into(),
        }
    }
}

/// Classification of a failed mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationErrorKind {
    RateLimited,
    Rejected,
    Transport,
}

impl fmt::Display for MutationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationErrorKind::RateLimited => f.write_str("rate limited"),
            MutationErrorKind::Rejected => f.write_str("rejected"),
            MutationErrorKind::Transport => f.write_str("transport"),
        }
    }
}

/// A single create, update, delete, publish or write-back call failed.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct MutationError {
    pub kind: MutationErrorKind,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl MutationError {
    /// Create a rate-limited error.
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            kind: MutationErrorKind::RateLimited,
            message: message.into(),
            retry_after,
        }
    }

    /// Create a permanent rejection.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            kind: MutationErrorKind::Rejected,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: MutationErrorKind::Transport,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Rejections are permanent; everything else may be retried.
    #[must_use]
    pub fn retryable(&self) -> bool {
        self.kind != MutationErrorKind::Rejected
    }
}

impl From<ApiError> for MutationError {
    fn from(err: ApiError) -> Self {
        let retry_after = err.retry_after();
        let message = err.to_string();
        match err {
            ApiError::RateLimited { .. } => MutationError::rate_limited(message, retry_after),
            ApiError::Server { .. } | ApiError::Transport(_) => MutationError::transport(message),
            ApiError::Auth(_)
            | ApiError::NotFound(_)
            | ApiError::Rejected { .. }
            | ApiError::Parse(_)
            | ApiError::InvalidConfig(_) => MutationError::rejected(message),
        }
    }
}

/// Result type for mutations.
pub type MutationResult<T> = Result<T, MutationError>;

/// Publishing newly created items failed. The items stay unpublished.
#[derive(Debug, Clone, Error)]
#[error("publish failed for {item_ids:?}: {source}")]
pub struct PublishError {
    pub item_ids: Vec<String>,
    #[source]
    pub source: MutationError,
}

/// Cycle-level failure: nothing was mutated.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Reading both collections did not finish within the cycle timeout.
    #[error("read stage exceeded cycle timeout of {0:?}")]
    ReadTimeout(Duration),
}

/// Result type for sync cycles.
pub type SyncResult<T> = Result<T, SyncError>;
