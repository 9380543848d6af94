//! Mock Webflow CMS server using wiremock for integration testing.

#![allow(dead_code)]

use serde_json::{json, Value};
use uuid::Uuid;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use listing_sync::auth::ApiToken;
use listing_sync::mirror::webflow::WebflowClient;

use super::test_data::{item_list, COLLECTION_ID, WEBFLOW_TOKEN};

/// A mock Webflow server scoped to one collection.
pub struct MockWebflowServer {
    server: MockServer,
}

impl MockWebflowServer {
    pub async fn new() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// Create a client configured to talk to this mock server.
    pub fn client(&self) -> WebflowClient {
        WebflowClient::new(
            self.uri(),
            COLLECTION_ID,
            "1.0.0",
            ApiToken::new(WEBFLOW_TOKEN),
            reqwest::Client::new(),
        )
    }

    pub fn items_path() -> String {
        format!("/collections/{COLLECTION_ID}/items")
    }

    pub fn live_items_path() -> String {
        format!("/collections/{COLLECTION_ID}/items/live")
    }

    pub fn item_path(item_id: &str) -> String {
        format!("/collections/{COLLECTION_ID}/items/{item_id}")
    }

    /// Mount single-page live and staged listings.
    pub async fn mock_listings(&self, live: Vec<Value>, staged: Vec<Value>) {
        for (listing_path, items) in [(Self::live_items_path(), live), (Self::items_path(), staged)] {
            let total = items.len();
            Mock::given(method("GET"))
                .and(path(listing_path))
                .and(header("authorization", format!("Bearer {WEBFLOW_TOKEN}").as_str()))
                .respond_with(ResponseTemplate::new(200).set_body_json(item_list(items, 0, total)))
                .mount(&self.server)
                .await;
        }
    }

    /// Mount listings where every item is published as is.
    pub async fn mock_list_published(&self, items: Vec<Value>) {
        self.mock_listings(items.clone(), items).await;
    }

    /// Mount live and staged listings that always fail with `status`.
    pub async fn mock_list_failure(&self, status: u16) {
        for listing_path in [Self::live_items_path(), Self::items_path()] {
            Mock::given(method("GET"))
                .and(path(listing_path))
                .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                    "code": "internal_error",
                    "message": "Something went wrong"
                })))
                .mount(&self.server)
                .await;
        }
    }

    /// Mount a create endpoint that echoes the field data with a fresh id.
    pub async fn mock_create_success(&self) {
        Mock::given(method("POST"))
            .and(path(Self::items_path()))
            .respond_with(|req: &Request| {
                let body: Value = serde_json::from_slice(&req.body).unwrap_or(json!({}));
                ResponseTemplate::new(202).set_body_json(json!({
                    "id": Uuid::new_v4().simple().to_string(),
                    "isArchived": false,
                    "isDraft": false,
                    "fieldData": body.get("fieldData").cloned().unwrap_or(json!({})),
                }))
            })
            .mount(&self.server)
            .await;
    }

    /// Mount a create endpoint that answers the next `times` calls with 429.
    pub async fn mock_create_rate_limited(&self, times: u64) {
        Mock::given(method("POST"))
            .and(path(Self::items_path()))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("Retry-After", "0")
                    .set_body_json(json!({ "code": "too_many_requests", "message": "Rate limit hit" })),
            )
            .up_to_n_times(times)
            .with_priority(1)
            .mount(&self.server)
            .await;
    }

    /// Mount a create endpoint that rejects items whose slug matches.
    pub async fn mock_create_rejected_for_slug(&self, slug: &str) {
        let slug = slug.to_string();
        Mock::given(method("POST"))
            .and(path(Self::items_path()))
            .and(move |req: &Request| {
                serde_json::from_slice::<Value>(&req.body)
                    .ok()
                    .and_then(|body| body["fieldData"]["slug"].as_str().map(|s| s == slug))
                    .unwrap_or(false)
            })
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "code": "validation_error",
                "message": "Validation Error",
                "details": [{ "param": "slug", "description": "Unique value is already in database" }]
            })))
            .with_priority(1)
            .mount(&self.server)
            .await;
    }

    pub async fn mock_update_success(&self, item_id: &str) {
        Mock::given(method("PATCH"))
            .and(path(Self::item_path(item_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": item_id })))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_delete_success(&self, item_id: &str) {
        Mock::given(method("DELETE"))
            .and(path(Self::item_path(item_id)))
            .respond_with(ResponseTemplate::new(204))
            .mount(&self.server)
            .await;
    }

    pub fn publish_path() -> String {
        format!("/collections/{COLLECTION_ID}/items/publish")
    }

    pub async fn mock_publish_success(&self) {
        Mock::given(method("POST"))
            .and(path(Self::publish_path()))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({ "publishedItemIds": [] })))
            .with_priority(1)
            .mount(&self.server)
            .await;
    }

    /// Requests received with the given method and path.
    pub async fn requests(&self, http_method: &str, request_path: &str) -> Vec<Request> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.method.as_str() == http_method && r.url.path() == request_path)
            .collect()
    }
}
