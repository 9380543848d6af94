//! One-way reconciliation of an Airtable listing table into a Webflow CMS
//! collection.
//!
//! The source table is authoritative. Each cycle reads both sides,
//! computes a [`reconciler::MutationPlan`] and applies it with
//! [`executor::MutationExecutor`]; [`sync::SyncService`] drives cycles once or
//! on an interval.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod mapper;
pub mod mirror;
pub mod reconciler;
pub mod retry;
pub mod slug;
pub mod source;
pub mod sync;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, SyncConfig};
pub use error::{ApiError, FetchError, MappingError, MutationError, SyncError, SyncResult};
pub use executor::{FailedItem, MutationExecutor, Operation, RetryNote};
pub use mapper::{FieldMapping, MappedFields, SourceRecord};
pub use mirror::{MirrorRecord, MirrorStore, MirrorView};
pub use reconciler::{Mutation, MutationKind, MutationPlan, Reconciler};
pub use retry::RetryPolicy;
pub use slug::slugify;
pub use source::{SourceStore, SourceSnapshot};
pub use sync::{CycleSummary, SyncService, SyncSettings};
