//! Airtable REST client for the source listing table.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{RawSourceRecord, RecordPage, SourceStore};
use crate::auth::ApiToken;
use crate::client::{handle_empty_response, handle_response, normalize_base_url};
use crate::error::ApiResult;

/// Default Airtable API root.
pub const DEFAULT_AIRTABLE_API_URL: &str = "https://api.airtable.com/v0";

/// Airtable's maximum page size.
const PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
struct ListRecordsResponse {
    #[serde(default)]
    records: Vec<RawSourceRecord>,
    #[serde(default)]
    offset: Option<String>,
}

/// Client for one Airtable table.
#[derive(Debug, Clone)]
pub struct AirtableClient {
    base_url: String,
    base_id: String,
    table_name: String,
    mirror_ref_field: String,
    token: ApiToken,
    http_client: Client,
}

impl AirtableClient {
    /// Create a client for `{base_url}/{base_id}/{table_name}`.
    ///
    /// `mirror_ref_field` is the column that receives mirror item ids.
    pub fn new(
        base_url: impl Into<String>,
        base_id: impl Into<String>,
        table_name: impl Into<String>,
        mirror_ref_field: impl Into<String>,
        token: ApiToken,
        http_client: Client,
    ) -> Self {
        Self {
            base_url: normalize_base_url(base_url),
            base_id: base_id.into(),
            table_name: table_name.into(),
            mirror_ref_field: mirror_ref_field.into(),
            token,
            http_client,
        }
    }

    fn table_url(&self) -> String {
        format!("{}/{}/{}", self.base_url, self.base_id, self.table_name)
    }
}

#[async_trait]
impl SourceStore for AirtableClient {
    async fn list_records_page(&self, cursor: Option<&str>) -> ApiResult<RecordPage> {
        let url = self.table_url();
        debug!("Airtable GET {} (offset={:?})", url, cursor);

        let mut query: Vec<(&str, String)> = vec![("pageSize", PAGE_SIZE.to_string())];
        if let Some(offset) = cursor {
            query.push(("offset", offset.to_string()));
        }

        let builder = self.token.apply(self.http_client.get(&url)).query(&query);
        let response: ListRecordsResponse = handle_response(builder.send().await?).await?;

        Ok(RecordPage {
            records: response.records,
            next_cursor: response.offset,
        })
    }

    async fn set_mirror_ref(&self, record_id: &str, mirror_id: &str) -> ApiResult<()> {
        let url = format!("{}/{}", self.table_url(), record_id);
        debug!("Airtable PATCH {}", url);

        let mut fields = Map::new();
        fields.insert(
            self.mirror_ref_field.clone(),
            Value::String(mirror_id.to_string()),
        );
        let body = json!({ "fields": fields });
        let builder = self.token.apply(self.http_client.patch(&url)).json(&body);
        handle_empty_response(builder.send().await?).await
    }
}
