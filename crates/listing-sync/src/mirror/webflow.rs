//! Webflow CMS v2 client for the mirror collection.
//!
//! Every call is scoped to one collection and carries the bearer token and
//! the `accept-version` header.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ItemPage, MirrorItem, MirrorStore, MirrorView};
use crate::auth::ApiToken;
use crate::client::{handle_empty_response, handle_response, normalize_base_url};
use crate::error::ApiResult;
use crate::mapper::MappedFields;

/// Default Webflow API root.
pub const DEFAULT_WEBFLOW_API_URL: &str = "https://api.webflow.com/v2";

/// Default value of the `accept-version` header.
pub const DEFAULT_API_VERSION: &str = "1.0.0";

#[derive(Debug, Deserialize)]
struct ListItemsResponse {
    #[serde(default)]
    items: Vec<MirrorItem>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    #[serde(default)]
    total: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateItemRequest<'a> {
    is_archived: bool,
    is_draft: bool,
    field_data: &'a MappedFields,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateItemRequest<'a> {
    field_data: &'a MappedFields,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PublishRequest<'a> {
    item_ids: &'a [String],
}

#[derive(Debug, Deserialize)]
struct CreatedItem {
    id: String,
}

/// Client for one Webflow CMS collection.
#[derive(Debug, Clone)]
pub struct WebflowClient {
    base_url: String,
    collection_id: String,
    api_version: String,
    token: ApiToken,
    http_client: Client,
}

impl WebflowClient {
    pub fn new(
        base_url: impl Into<String>,
        collection_id: impl Into<String>,
        api_version: impl Into<String>,
        token: ApiToken,
        http_client: Client,
    ) -> Self {
        Self {
            base_url: normalize_base_url(base_url),
            collection_id: collection_id.into(),
            api_version: api_version.into(),
            token,
            http_client,
        }
    }

    /// Get the base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn items_url(&self) -> String {
        format!("{}/collections/{}/items", self.base_url, self.collection_id)
    }

    fn prepare(&self, builder: RequestBuilder) -> RequestBuilder {
        self.token
            .apply(builder)
            .header("accept-version", &self.api_version)
            .header(reqwest::header::ACCEPT, "application/json")
    }
}

#[async_trait]
impl MirrorStore for WebflowClient {
    async fn list_items_page(
        &self,
        view: MirrorView,
        offset: usize,
        limit: usize,
    ) -> ApiResult<ItemPage> {
        let url = match view {
            MirrorView::Live => format!("{}/live", self.items_url()),
            MirrorView::Staged => self.items_url(),
        };
        debug!("Webflow GET {} (offset={}, limit={})", url, offset, limit);

        let builder = self
            .prepare(self.http_client.get(&url))
            .query(&[("offset", offset), ("limit", limit)]);
        let response: ListItemsResponse = handle_response(builder.send().await?).await?;

        Ok(ItemPage {
            items: response.items,
            total: response.pagination.and_then(|p| p.total),
        })
    }

    async fn create_item(&self, fields: &MappedFields) -> ApiResult<String> {
        let url = self.items_url();
        debug!("Webflow POST {}", url);

        let body = CreateItemRequest {
            is_archived: false,
            is_draft: false,
            field_data: fields,
        };
        let builder = self.prepare(self.http_client.post(&url)).json(&body);
        let created: CreatedItem = handle_response(builder.send().await?).await?;
        Ok(created.id)
    }

    async fn update_item(&self, item_id: &str, fields: &MappedFields) -> ApiResult<()> {
        let url = format!("{}/{}", self.items_url(), item_id);
        debug!("Webflow PATCH {}", url);

        let body = UpdateItemRequest { field_data: fields };
        let builder = self.prepare(self.http_client.patch(&url)).json(&body);
        handle_empty_response(builder.send().await?).await
    }

    async fn delete_item(&self, item_id: &str) -> ApiResult<()> {
        let url = format!("{}/{}", self.items_url(), item_id);
        debug!("Webflow DELETE {}", url);

        let builder = self.prepare(self.http_client.delete(&url));
        handle_empty_response(builder.send().await?).await
    }

    async fn publish_items(&self, item_ids: &[String]) -> ApiResult<()> {
        let url = format!("{}/publish", self.items_url());
        debug!("Webflow POST {} ({} items)", url, item_ids.len());

        let body = PublishRequest { item_ids };
        let builder = self.prepare(self.http_client.post(&url)).json(&body);
        handle_empty_response(builder.send().await?).await
    }
}
