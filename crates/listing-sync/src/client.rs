//! Shared HTTP plumbing for the Airtable and Webflow clients.
//!
//! Both remotes are plain JSON-over-HTTPS APIs with bearer authentication.
//! Status codes are classified here once so that readers and the mutation
//! executor see the same [`ApiError`] variants regardless of the side.

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::warn;

use crate::error::{ApiError, ApiResult};

const USER_AGENT: &str = concat!("listing-sync/", env!("CARGO_PKG_VERSION"));

/// Build the `reqwest::Client` used by both remotes.
pub fn build_http_client(timeout: Duration) -> ApiResult<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| ApiError::InvalidConfig(format!("Failed to build HTTP client: {e}")))
}

/// Normalize a base URL: strip trailing slash.
pub(crate) fn normalize_base_url(base_url: impl Into<String>) -> String {
    base_url.into().trim_end_matches('/').to_string()
}

/// Decode a successful JSON response or classify the failure.
pub(crate) async fn handle_response<T: DeserializeOwned>(
    response: reqwest::Response,
) -> ApiResult<T> {
    let status = response.status();

    if status.is_success() {
        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| ApiError::Parse(format!("Failed to parse response: {e}")))
    } else {
        handle_error_response(response).await
    }
}

/// Accept any 2xx response without decoding the body.
pub(crate) async fn handle_empty_response(response: reqwest::Response) -> ApiResult<()> {
    let status = response.status();
    if status == StatusCode::NO_CONTENT || status.is_success() {
        Ok(())
    } else {
        handle_error_response(response).await
    }
}

pub(crate) async fn handle_error_response<T>(response: reqwest::Response) -> ApiResult<T> {
    let status = response.status();

    // Check for Retry-After header (rate limiting).
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<no body>".to_string());
    let detail = if body.is_empty() {
        format!("HTTP {status}")
    } else {
        body
    };

    Err(match status {
        StatusCode::TOO_MANY_REQUESTS => {
            warn!(retry_after_secs = ?retry_after, "Remote rate limited request");
            ApiError::RateLimited {
                retry_after_secs: retry_after,
            }
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ApiError::Auth(format!("{} {detail}", status.as_u16()))
        }
        StatusCode::NOT_FOUND => ApiError::NotFound(detail),
        s if s.is_server_error() => ApiError::Server {
            status: s.as_u16(),
            detail,
        },
        s => ApiError::Rejected {
            status: s.as_u16(),
            detail,
        },
    })
}
