//! Environment configuration for the sync worker.

use std::env::VarError;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::ApiToken;
use crate::client::build_http_client;
use crate::mapper::FieldMapping;
use crate::mirror::webflow::{WebflowClient, DEFAULT_API_VERSION, DEFAULT_WEBFLOW_API_URL};
use crate::mirror::MirrorView;
use crate::retry::RetryPolicy;
use crate::source::airtable::{AirtableClient, DEFAULT_AIRTABLE_API_URL};
use crate::sync::{SyncService, SyncSettings};

/// Runtime configuration for one source table and one mirror collection.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub airtable_api_key: ApiToken,
    pub airtable_base_id: String,
    pub airtable_table_name: String,
    pub airtable_api_url: String,

    pub webflow_api_token: ApiToken,
    pub webflow_collection_id: String,
    pub webflow_api_url: String,
    /// Value of the `accept-version` header.
    pub webflow_api_version: String,

    /// Per-request HTTP timeout.
    pub http_timeout: Duration,

    /// Interval between cycles. `None` runs a single cycle and exits.
    pub sync_interval: Option<Duration>,

    pub max_concurrency: usize,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,

    /// `None` disables the cycle deadline.
    pub cycle_timeout: Option<Duration>,

    pub publish_changes: bool,
    pub mirror_view: MirrorView,

    pub mapping: FieldMapping,
}

impl SyncConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_reader(|key| std::env::var(key))
    }

    /// Load configuration from a custom variable reader.
    ///
    /// This allows tests to supply variables without mutating process-global
    /// environment state.
    pub fn from_reader<F>(reader: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, VarError>,
    {
        let airtable_api_key = ApiToken::new(required(&reader, "AIRTABLE_API_KEY")?);
        let airtable_base_id = required(&reader, "AIRTABLE_BASE_ID")?;
        let airtable_table_name = required(&reader, "AIRTABLE_TABLE_NAME")?;
        let airtable_api_url = optional(&reader, "AIRTABLE_API_URL")
            .unwrap_or_else(|| DEFAULT_AIRTABLE_API_URL.to_string());

        let webflow_api_token = optional(&reader, "WEBFLOW_API_TOKEN")
            .or_else(|| optional(&reader, "WEBFLOW_API_KEY"))
            .map(ApiToken::new)
            .ok_or_else(|| ConfigError::MissingVar("WEBFLOW_API_TOKEN".into()))?;
        let webflow_collection_id = required(&reader, "WEBFLOW_COLLECTION_ID")?;
        let webflow_api_url = optional(&reader, "WEBFLOW_API_URL")
            .unwrap_or_else(|| DEFAULT_WEBFLOW_API_URL.to_string());
        let webflow_api_version = optional(&reader, "WEBFLOW_API_VERSION")
            .unwrap_or_else(|| DEFAULT_API_VERSION.to_string());

        let http_timeout = Duration::from_secs(parse_or(&reader, "HTTP_TIMEOUT_SECS", 30)?);

        let sync_interval = match parse_or::<u64, _>(&reader, "SYNC_INTERVAL_SECS", 0)? {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        let max_concurrency = parse_or::<usize, _>(&reader, "SYNC_MAX_CONCURRENCY", 4)?;
        if max_concurrency == 0 {
            return Err(ConfigError::InvalidValue(
                "SYNC_MAX_CONCURRENCY".into(),
                "must be at least 1".into(),
            ));
        }

        let max_retries = parse_or(&reader, "SYNC_MAX_RETRIES", 5)?;
        let retry_base_delay =
            Duration::from_millis(parse_or(&reader, "SYNC_RETRY_BASE_DELAY_MS", 1000)?);
        let retry_max_delay =
            Duration::from_millis(parse_or(&reader, "SYNC_RETRY_MAX_DELAY_MS", 60_000)?);

        let cycle_timeout = match parse_or::<u64, _>(&reader, "SYNC_CYCLE_TIMEOUT_SECS", 300)? {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        let publish_changes = parse_or(&reader, "SYNC_PUBLISH", true)?;
        let mirror_view = parse_or(&reader, "SYNC_MIRROR_VIEW", MirrorView::Live)?;

        let mapping = FieldMapping::default();
        mapping.validate()?;

        Ok(Self {
            airtable_api_key,
            airtable_base_id,
            airtable_table_name,
            airtable_api_url,
            webflow_api_token,
            webflow_collection_id,
            webflow_api_url,
            webflow_api_version,
            http_timeout,
            sync_interval,
            max_concurrency,
            max_retries,
            retry_base_delay,
            retry_max_delay,
            cycle_timeout,
            publish_changes,
            mirror_view,
            mapping,
        })
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_base_delay).with_max_delay(self.retry_max_delay)
    }

    #[must_use]
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            retry: self.retry_policy(),
            max_concurrency: self.max_concurrency,
            publish_changes: self.publish_changes,
            mirror_view: self.mirror_view,
            cycle_timeout: self.cycle_timeout,
        }
    }

    /// Build the Airtable and Webflow clients and wire them into a service.
    pub fn build_service(&self) -> Result<SyncService, ConfigError> {
        let http_client = build_http_client(self.http_timeout)
            .map_err(|e| ConfigError::InvalidValue("HTTP_TIMEOUT_SECS".into(), e.to_string()))?;

        let source = AirtableClient::new(
            self.airtable_api_url.clone(),
            self.airtable_base_id.clone(),
            self.airtable_table_name.clone(),
            self.mapping.mirror_ref_field(),
            self.airtable_api_key.clone(),
            http_client.clone(),
        );
        let mirror = WebflowClient::new(
            self.webflow_api_url.clone(),
            self.webflow_collection_id.clone(),
            self.webflow_api_version.clone(),
            self.webflow_api_token.clone(),
            http_client,
        );

        Ok(SyncService::new(
            Arc::new(source),
            Arc::new(mirror),
            self.mapping.clone(),
            self.sync_settings(),
        ))
    }
}

/// A set, non-blank variable.
fn optional<F>(reader: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    reader(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required<F>(reader: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    optional(reader, key).ok_or_else(|| ConfigError::MissingVar(key.into()))
}

fn parse_or<T, F>(reader: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Result<String, VarError>,
{
    match optional(reader, key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.into(), e.to_string())),
        None => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("invalid field mapping: {0}")]
    InvalidMapping(String),
}
