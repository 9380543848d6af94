//! Source side: the authoritative listing table.
//!
//! [`SourceStore`] is the transport seam; [`SourceReader`] pages through it
//! and normalizes raw rows into [`SourceRecord`]s. A read is all or nothing:
//! any page failing after retries fails the whole read.

pub mod airtable;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{ApiResult, FetchError, MappingError, Side};
use crate::mapper::{FieldMapping, SourceRecord};
use crate::retry::RetryPolicy;

/// Maximum number of source records a single cycle will hold in memory.
const MAX_SOURCE_RECORDS: usize = 50_000;

/// A row as returned by the source transport.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawSourceRecord {
    pub id: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

/// One page of source rows plus the cursor for the next page.
#[derive(Debug, Clone, Default)]
pub struct RecordPage {
    pub records: Vec<RawSourceRecord>,
    pub next_cursor: Option<String>,
}

/// Transport for the source collection.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Fetch one page of rows starting at `cursor` (`None` for the first page).
    async fn list_records_page(&self, cursor: Option<&str>) -> ApiResult<RecordPage>;

    /// Store the mirror item id on a source row.
    async fn set_mirror_ref(&self, record_id: &str, mirror_id: &str) -> ApiResult<()>;
}

/// Fully materialized, normalized source state.
#[derive(Debug, Clone, Default)]
pub struct SourceSnapshot {
    pub records: Vec<SourceRecord>,
    /// Rows that could not be normalized, with their stored mirror reference.
    pub rejected: Vec<RejectedRecord>,
}

/// A source row skipped because of a [`MappingError`].
#[derive(Debug, Clone)]
pub struct RejectedRecord {
    pub error: MappingError,
    pub mirror_ref: Option<String>,
}

/// Reads and normalizes every source row.
pub struct SourceReader {
    store: Arc<dyn SourceStore>,
    mapping: FieldMapping,
    retry: RetryPolicy,
}

impl SourceReader {
    pub fn new(store: Arc<dyn SourceStore>, mapping: FieldMapping, retry: RetryPolicy) -> Self {
        Self {
            store,
            mapping,
            retry,
        }
    }

    /// Read all source rows, following the page cursor to the end.
    pub async fn read_all(&self) -> Result<SourceSnapshot, FetchError> {
        let mut raw = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = self
                .retry
                .execute_read("source.list_records", || {
                    self.store.list_records_page(cursor.as_deref())
                })
                .await
                .map_err(|e| FetchError::new(Side::Source, e))?;

            raw.extend(page.records);

            if raw.len() > MAX_SOURCE_RECORDS {
                return Err(FetchError::new(
                    Side::Source,
                    crate::error::ApiError::InvalidConfig(format!(
                        "source table exceeds {MAX_SOURCE_RECORDS} records"
                    )),
                ));
            }

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        debug!(count = raw.len(), "Fetched source records");

        let mut snapshot = SourceSnapshot::default();
        for row in raw {
            match normalize(row, &self.mapping) {
                Ok(record) => snapshot.records.push(record),
                Err(rejected) => {
                    warn!(
                        record_id = %rejected.error.record_id,
                        error = %rejected.error,
                        "Skipping malformed source record"
                    );
                    snapshot.rejected.push(rejected);
                }
            }
        }

        Ok(snapshot)
    }
}

/// Normalize a raw row into a [`SourceRecord`].
pub fn normalize(row: RawSourceRecord, mapping: &FieldMapping) -> Result<SourceRecord, RejectedRecord> {
    let mirror_ref = row
        .fields
        .get(mapping.mirror_ref_field())
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let name = row
        .fields
        .get(mapping.name_field())
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let Some(name) = name else {
        return Err(RejectedRecord {
            error: MappingError::new(
                row.id,
                format!("missing required field '{}'", mapping.name_field()),
            ),
            mirror_ref,
        });
    };

    let mut attributes = row.fields;
    attributes.remove(mapping.mirror_ref_field());

    Ok(SourceRecord {
        id: row.id,
        name,
        attributes: attributes.into_iter().collect(),
        mirror_ref,
    })
}
