//! Mirror side: the CMS collection kept in line with the source.
//!
//! [`MirrorStore`] is the transport seam used by both the reader and the
//! mutation executor. [`MirrorReader`] pages through the collection and
//! normalizes items into [`MirrorRecord`]s. When publishing is tracked it
//! reads both listings, so items that never made it to the live site are
//! still seen (and can be published or deleted).

pub mod webflow;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

use crate::error::{ApiError, ApiResult, FetchError, Side};
use crate::mapper::MappedFields;
use crate::retry::RetryPolicy;

/// Page size used when listing mirror items.
pub const FETCH_PAGE_SIZE: usize = 100;

/// Maximum number of mirror items a single cycle will hold in memory.
///
/// Exceeding it fails the read instead of truncating, since a truncated
/// listing would turn unseen items into deletes.
const MAX_MIRROR_ITEMS: usize = 50_000;

/// Which listing of the collection to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MirrorView {
    /// Published items only.
    #[default]
    Live,
    /// All items, including drafts.
    Staged,
}

impl std::str::FromStr for MirrorView {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "live" => Ok(MirrorView::Live),
            "staged" => Ok(MirrorView::Staged),
            _ => Err(format!("Unknown mirror view: {s}")),
        }
    }
}

/// An item as returned by the mirror transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorItem {
    pub id: String,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub is_draft: bool,
    #[serde(default)]
    pub field_data: Map<String, Value>,
}

/// One page of mirror items.
#[derive(Debug, Clone, Default)]
pub struct ItemPage {
    pub items: Vec<MirrorItem>,
    /// Total number of items in the listing, when reported.
    pub total: Option<usize>,
}

/// Transport for the mirror collection.
#[async_trait]
pub trait MirrorStore: Send + Sync {
    /// Fetch one page of items.
    async fn list_items_page(&self, view: MirrorView, offset: usize, limit: usize)
        -> ApiResult<ItemPage>;

    /// Create an item (not archived, not draft) and return its id.
    async fn create_item(&self, fields: &MappedFields) -> ApiResult<String>;

    /// Overwrite the given fields on an existing item.
    async fn update_item(&self, item_id: &str, fields: &MappedFields) -> ApiResult<()>;

    /// Remove an item.
    async fn delete_item(&self, item_id: &str) -> ApiResult<()>;

    /// Publish staged items.
    async fn publish_items(&self, item_ids: &[String]) -> ApiResult<()>;
}

/// A normalized mirror item.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorRecord {
    pub id: String,
    pub slug: String,
    /// Field values excluding the slug.
    pub fields: BTreeMap<String, Value>,
    pub archived: bool,
    pub draft: bool,
    /// Staged changes are not on the live site yet.
    pub pending_publish: bool,
}

impl MirrorRecord {
    /// Split the slug out of an item's field data.
    #[must_use]
    pub fn from_item(item: MirrorItem, slug_field: &str) -> Self {
        let mut fields: BTreeMap<String, Value> = item.field_data.into_iter().collect();
        let slug = match fields.remove(slug_field) {
            Some(Value::String(s)) => s,
            _ => String::new(),
        };
        Self {
            id: item.id,
            slug,
            fields,
            archived: item.is_archived,
            draft: item.is_draft,
            pending_publish: false,
        }
    }
}

/// Reads every item of the mirror collection.
pub struct MirrorReader {
    store: Arc<dyn MirrorStore>,
    view: MirrorView,
    slug_field: String,
    retry: RetryPolicy,
    track_publication: bool,
}

impl MirrorReader {
    pub fn new(
        store: Arc<dyn MirrorStore>,
        view: MirrorView,
        slug_field: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            view,
            slug_field: slug_field.into(),
            retry,
            track_publication: false,
        }
    }

    /// Read the live and staged listings together and flag items whose
    /// staged state has not been published.
    #[must_use]
    pub fn with_publish_tracking(mut self, track_publication: bool) -> Self {
        self.track_publication = track_publication;
        self
    }

    /// Read all items of the collection.
    pub async fn read_all(&self) -> Result<Vec<MirrorRecord>, FetchError> {
        if !self.track_publication {
            let items = self.read_listing(self.view).await?;
            return Ok(items
                .into_iter()
                .map(|item| MirrorRecord::from_item(item, &self.slug_field))
                .collect());
        }

        let (live, staged) = tokio::try_join!(
            self.read_listing(MirrorView::Live),
            self.read_listing(MirrorView::Staged)
        )?;
        Ok(self.merge_listings(live, staged))
    }

    /// Combine both listings into one record per item.
    ///
    /// Field values come from the configured view. An item missing from the
    /// live listing is pending; with the staged view so is one whose live
    /// copy differs from the staged one. Live items absent from the staged
    /// listing are kept as they are.
    fn merge_listings(&self, live: Vec<MirrorItem>, staged: Vec<MirrorItem>) -> Vec<MirrorRecord> {
        let mut live: HashMap<String, MirrorItem> =
            live.into_iter().map(|item| (item.id.clone(), item)).collect();
        let mut records = Vec::with_capacity(staged.len().max(live.len()));

        for staged_item in staged {
            let (item, pending_publish) = match live.remove(&staged_item.id) {
                None => (staged_item, true),
                Some(live_item) => match self.view {
                    MirrorView::Live => (live_item, false),
                    MirrorView::Staged => {
                        let stale = live_item.field_data != staged_item.field_data;
                        (staged_item, stale)
                    }
                },
            };
            records.push(MirrorRecord {
                pending_publish,
                ..MirrorRecord::from_item(item, &self.slug_field)
            });
        }

        let mut orphans: Vec<MirrorItem> = live.into_values().collect();
        orphans.sort_by(|a, b| a.id.cmp(&b.id));
        records.extend(
            orphans
                .into_iter()
                .map(|item| MirrorRecord::from_item(item, &self.slug_field)),
        );

        let pending = records.iter().filter(|r| r.pending_publish).count();
        debug!(count = records.len(), pending, "Merged live and staged listings");
        records
    }

    /// Read one listing, following offset pagination to the end.
    async fn read_listing(&self, view: MirrorView) -> Result<Vec<MirrorItem>, FetchError> {
        let mut items: Vec<MirrorItem> = Vec::new();
        let mut offset: usize = 0;

        loop {
            let page = self
                .retry
                .execute_read("mirror.list_items", || {
                    self.store.list_items_page(view, offset, FETCH_PAGE_SIZE)
                })
                .await
                .map_err(|e| FetchError::new(Side::Mirror, e))?;

            let fetched = page.items.len();
            items.extend(page.items);

            if items.len() > MAX_MIRROR_ITEMS {
                return Err(FetchError::new(
                    Side::Mirror,
                    ApiError::InvalidConfig(format!(
                        "mirror collection exceeds {MAX_MIRROR_ITEMS} items"
                    )),
                ));
            }

            let reached_total = page.total.is_some_and(|total| items.len() >= total);
            if fetched < FETCH_PAGE_SIZE || reached_total {
                break;
            }
            offset += fetched;
        }

        debug!(count = items.len(), view = ?view, "Fetched mirror items");
        Ok(items)
    }
}
