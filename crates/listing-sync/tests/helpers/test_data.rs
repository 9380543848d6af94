//! Test data builders for listing sync integration tests.

#![allow(dead_code)]

use serde_json::{json, Value};

pub const BASE_ID: &str = "appTEST";
pub const TABLE_NAME: &str = "Listings";
pub const COLLECTION_ID: &str = "col-listings";
pub const AIRTABLE_TOKEN: &str = "patTEST.secret";
pub const WEBFLOW_TOKEN: &str = "wf-test-token";

/// An Airtable record as returned by the list endpoint.
pub fn airtable_record(id: &str, name: &str, city: &str) -> Value {
    json!({
        "id": id,
        "createdTime": "2024-05-01T10:00:00.000Z",
        "fields": {
            "Name": name,
            "City": city,
        }
    })
}

/// An Airtable record that already stores its Webflow item id.
pub fn linked_airtable_record(id: &str, name: &str, city: &str, item_id: &str) -> Value {
    let mut record = airtable_record(id, name, city);
    record["fields"]["Webflow Item ID"] = json!(item_id);
    record
}

/// A Webflow CMS item as returned by the list endpoints.
pub fn webflow_item(id: &str, slug: &str, name: &str, city: &str) -> Value {
    json!({
        "id": id,
        "cmsLocaleId": "loc1",
        "lastPublished": "2024-05-01T10:00:00.000Z",
        "isArchived": false,
        "isDraft": false,
        "fieldData": {
            "name": name,
            "slug": slug,
            "city": city,
        }
    })
}

/// A list-items response body.
pub fn item_list(items: Vec<Value>, offset: usize, total: usize) -> Value {
    let count = items.len();
    json!({
        "items": items,
        "pagination": { "limit": 100, "offset": offset, "total": total.max(count) }
    })
}
