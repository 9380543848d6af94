//! Mock Airtable server using wiremock for integration testing.

#![allow(dead_code)]

use serde_json::{json, Value};
use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use listing_sync::auth::ApiToken;
use listing_sync::mapper::DEFAULT_MIRROR_REF_FIELD;
use listing_sync::source::airtable::AirtableClient;

use super::test_data::{AIRTABLE_TOKEN, BASE_ID, TABLE_NAME};

/// A mock Airtable server scoped to one table.
pub struct MockAirtableServer {
    server: MockServer,
}

impl MockAirtableServer {
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
    pub fn client(&self) -> AirtableClient {
        AirtableClient::new(
            self.uri(),
            BASE_ID,
            TABLE_NAME,
            DEFAULT_MIRROR_REF_FIELD,
            ApiToken::new(AIRTABLE_TOKEN),
            reqwest::Client::new(),
        )
    }

    pub fn table_path() -> String {
        format!("/{BASE_ID}/{TABLE_NAME}")
    }

    pub fn record_path(record_id: &str) -> String {
        format!("/{BASE_ID}/{TABLE_NAME}/{record_id}")
    }

    /// Mount a single-page listing.
    pub async fn mock_list(&self, records: Vec<Value>) {
        Mock::given(method("GET"))
            .and(path(Self::table_path()))
            .and(header("authorization", format!("Bearer {AIRTABLE_TOKEN}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "records": records })))
            .mount(&self.server)
            .await;
    }

    /// Mount a two-page listing joined by `cursor`.
    pub async fn mock_list_two_pages(&self, first: Vec<Value>, cursor: &str, second: Vec<Value>) {
        Mock::given(method("GET"))
            .and(path(Self::table_path()))
            .and(query_param_is_missing("offset"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "records": first, "offset": cursor })),
            )
            .mount(&self.server)
            .await;

        Mock::given(method("GET"))
            .and(path(Self::table_path()))
            .and(query_param("offset", cursor))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "records": second })))
            .mount(&self.server)
            .await;
    }

    /// Mount a listing that always fails with `status`.
    pub async fn mock_list_failure(&self, status: u16) {
        Mock::given(method("GET"))
            .and(path(Self::table_path()))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "error": { "type": "SERVER_ERROR", "message": "Try again later" }
            })))
            .mount(&self.server)
            .await;
    }

    /// Accept every write-back PATCH, echoing the record.
    pub async fn mock_write_back_success(&self) {
        Mock::given(method("PATCH"))
            .respond_with(|req: &Request| {
                let body: Value = serde_json::from_slice(&req.body).unwrap_or(json!({}));
                let id = req.url.path().rsplit('/').next().unwrap_or_default().to_string();
                ResponseTemplate::new(200).set_body_json(json!({
                    "id": id,
                    "fields": body.get("fields").cloned().unwrap_or(json!({})),
                }))
            })
            .mount(&self.server)
            .await;
    }

    /// Received write-backs as `(record_id, mirror_id)` pairs.
    pub async fn write_backs(&self) -> Vec<(String, String)> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.method.as_str() == "PATCH")
            .filter_map(|r| {
                let record_id = r.url.path().rsplit('/').next()?.to_string();
                let body: Value = serde_json::from_slice(&r.body).ok()?;
                let mirror_id = body["fields"][DEFAULT_MIRROR_REF_FIELD].as_str()?.to_string();
                Some((record_id, mirror_id))
            })
            .collect()
    }
}
