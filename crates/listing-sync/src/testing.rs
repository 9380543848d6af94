//! In-memory source and mirror stores for unit tests.
//!
//! The mirror keeps a staged and a live copy of every item so publish
//! behaviour is observable through [`MirrorView::Live`] listings.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::{ApiError, ApiResult};
use crate::mapper::{MappedFields, DEFAULT_MIRROR_REF_FIELD};
use crate::mirror::{ItemPage, MirrorItem, MirrorStore, MirrorView};
use crate::source::{RawSourceRecord, RecordPage, SourceStore};

fn object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[derive(Default)]
struct SourceState {
    records: Vec<RawSourceRecord>,
    fail_reads: bool,
    fail_write_backs: bool,
}

/// Source table held in memory, served two rows per page.
pub(crate) struct InMemorySource {
    state: Mutex<SourceState>,
    page_size: usize,
    write_back_calls: AtomicUsize,
}

impl InMemorySource {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SourceState::default()),
            page_size: 2,
            write_back_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn insert(&self, id: &str, fields: Value) {
        self.state.lock().unwrap().records.push(RawSourceRecord {
            id: id.to_string(),
            fields: object(fields),
        });
    }

    pub(crate) fn set_field(&self, id: &str, field: &str, value: Value) {
        let mut state = self.state.lock().unwrap();
        let record = state.records.iter_mut().find(|r| r.id == id).unwrap();
        record.fields.insert(field.to_string(), value);
    }

    pub(crate) fn remove(&self, id: &str) {
        self.state.lock().unwrap().records.retain(|r| r.id != id);
    }

    pub(crate) fn mirror_ref(&self, id: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .records
            .iter()
            .find(|r| r.id == id)
            .and_then(|r| r.fields.get(DEFAULT_MIRROR_REF_FIELD))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub(crate) fn fail_reads(&self) {
        self.state.lock().unwrap().fail_reads = true;
    }

    pub(crate) fn fail_write_backs(&self) {
        self.state.lock().unwrap().fail_write_backs = true;
    }

    pub(crate) fn write_back_calls(&self) -> usize {
        self.write_back_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceStore for InMemorySource {
    async fn list_records_page(&self, cursor: Option<&str>) -> ApiResult<RecordPage> {
        let state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(ApiError::Server {
                status: 503,
                detail: "source unavailable".into(),
            });
        }
        let start: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let end = (start + self.page_size).min(state.records.len());
        Ok(RecordPage {
            records: state.records[start..end].to_vec(),
            next_cursor: (end < state.records.len()).then(|| end.to_string()),
        })
    }

    async fn set_mirror_ref(&self, record_id: &str, mirror_id: &str) -> ApiResult<()> {
        self.write_back_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if state.fail_write_backs {
            return Err(ApiError::Rejected {
                status: 422,
                detail: "field is read-only".into(),
            });
        }
        match state.records.iter_mut().find(|r| r.id == record_id) {
            Some(record) => {
                record.fields.insert(
                    DEFAULT_MIRROR_REF_FIELD.to_string(),
                    Value::String(mirror_id.to_string()),
                );
                Ok(())
            }
            None => Err(ApiError::NotFound(record_id.to_string())),
        }
    }
}

#[derive(Default)]
struct MirrorState {
    staged: Vec<MirrorItem>,
    live: HashMap<String, MirrorItem>,
    published: Vec<String>,
    next_id: usize,
    create_errors: VecDeque<ApiError>,
    publish_errors: VecDeque<ApiError>,
    rejected_slugs: HashSet<String>,
    fail_reads: bool,
}

/// Mirror collection held in memory.
pub(crate) struct InMemoryMirror {
    state: Mutex<MirrorState>,
    create_calls: AtomicUsize,
    update_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl InMemoryMirror {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(MirrorState::default()),
            create_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }

    /// Insert a published item with the given slug; returns its id.
    pub(crate) fn seed(&self, slug: &str, fields: Value) -> String {
        let id = self.seed_unpublished(slug, fields);
        let mut state = self.state.lock().unwrap();
        let item = state.staged.iter().find(|item| item.id == id).cloned();
        if let Some(item) = item {
            state.live.insert(id.clone(), item);
        }
        id
    }

    /// Insert a staged item that is not on the live listing; returns its id.
    pub(crate) fn seed_unpublished(&self, slug: &str, fields: Value) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("wf-{:04}", state.next_id);
        let mut field_data = object(fields);
        field_data.insert("slug".into(), Value::String(slug.to_string()));
        let item = MirrorItem {
            id: id.clone(),
            is_archived: false,
            is_draft: false,
            field_data,
        };
        state.staged.push(item);
        id
    }

    /// Staged items in insertion order.
    pub(crate) fn items(&self) -> Vec<MirrorItem> {
        self.state.lock().unwrap().staged.clone()
    }

    pub(crate) fn published(&self) -> Vec<String> {
        self.state.lock().unwrap().published.clone()
    }

    pub(crate) fn fail_next_creates(&self, errors: Vec<ApiError>) {
        self.state.lock().unwrap().create_errors.extend(errors);
    }

    /// Ids currently on the live listing.
    pub(crate) fn live_ids(&self) -> HashSet<String> {
        self.state.lock().unwrap().live.keys().cloned().collect()
    }

    pub(crate) fn fail_next_publishes(&self, errors: Vec<ApiError>) {
        self.state.lock().unwrap().publish_errors.extend(errors);
    }

    pub(crate) fn reject_slug(&self, slug: &str) {
        self.state
            .lock()
            .unwrap()
            .rejected_slugs
            .insert(slug.to_string());
    }

    pub(crate) fn fail_reads(&self) {
        self.state.lock().unwrap().fail_reads = true;
    }

    pub(crate) fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Total create, update and delete calls.
    pub(crate) fn write_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
            + self.update_calls.load(Ordering::SeqCst)
            + self.delete_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MirrorStore for InMemoryMirror {
    async fn list_items_page(
        &self,
        view: MirrorView,
        offset: usize,
        limit: usize,
    ) -> ApiResult<ItemPage> {
        let state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(ApiError::Transport("connection refused".into()));
        }
        let listing: Vec<MirrorItem> = match view {
            MirrorView::Staged => state.staged.clone(),
            MirrorView::Live => state
                .staged
                .iter()
                .filter_map(|item| state.live.get(&item.id).cloned())
                .collect(),
        };
        let total = listing.len();
        Ok(ItemPage {
            items: listing.into_iter().skip(offset).take(limit).collect(),
            total: Some(total),
        })
    }

    async fn create_item(&self, fields: &MappedFields) -> ApiResult<String> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.create_errors.pop_front() {
            return Err(error);
        }

        let slug = fields
            .get("slug")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if state.rejected_slugs.contains(&slug) {
            return Err(ApiError::Rejected {
                status: 400,
                detail: format!("Validation failure for slug '{slug}'"),
            });
        }
        let taken = state
            .staged
            .iter()
            .any(|item| item.field_data.get("slug").and_then(Value::as_str) == Some(slug.as_str()));
        if taken {
            return Err(ApiError::Rejected {
                status: 409,
                detail: format!("Unique value is already in database: '{slug}'"),
            });
        }

        state.next_id += 1;
        let id = format!("wf-{:04}", state.next_id);
        state.staged.push(MirrorItem {
            id: id.clone(),
            is_archived: false,
            is_draft: false,
            field_data: fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        });
        Ok(id)
    }

    async fn update_item(&self, item_id: &str, fields: &MappedFields) -> ApiResult<()> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        let item = state
            .staged
            .iter_mut()
            .find(|item| item.id == item_id)
            .ok_or_else(|| ApiError::NotFound(item_id.to_string()))?;
        for (field, value) in fields.iter() {
            item.field_data.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn delete_item(&self, item_id: &str) -> ApiResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        let before = state.staged.len();
        state.staged.retain(|item| item.id != item_id);
        state.live.remove(item_id);
        if state.staged.len() == before {
            return Err(ApiError::NotFound(item_id.to_string()));
        }
        Ok(())
    }

    async fn publish_items(&self, item_ids: &[String]) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.publish_errors.pop_front() {
            return Err(error);
        }
        for id in item_ids {
            let item = state
                .staged
                .iter()
                .find(|item| &item.id == id)
                .cloned()
                .ok_or_else(|| ApiError::NotFound(id.clone()))?;
            state.live.insert(id.clone(), item);
            state.published.push(id.clone());
        }
        Ok(())
    }
}
