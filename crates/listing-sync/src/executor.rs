//! Mutation executor.
//!
//! Applies a [`MutationPlan`] against the mirror with bounded concurrency.
//! Every entry runs in its own task and fails independently; the outcome of
//! each call (including how many attempts it took) is folded into an
//! [`ExecutionReport`]. Creates, updates, publishes and re-links form the
//! first phase, deletes the second, and the second phase only starts once
//! the first has drained.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, error, instrument, warn};

use crate::error::{ApiError, MutationError, MutationErrorKind, PublishError};
use crate::mapper::MappedFields;
use crate::mirror::MirrorStore;
use crate::reconciler::{Mutation, MutationKind, MutationPlan, Relink};
use crate::retry::RetryPolicy;
use crate::source::SourceStore;

/// Default number of mutation calls in flight.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Remote operation a failure or retry note refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Source record normalization.
    Map,
    Create,
    Update,
    Delete,
    Publish,
    /// Storing the mirror id on the source record.
    WriteBack,
}

impl Operation {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Map => "map",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Publish => "publish",
            Operation::WriteBack => "write_back",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A plan entry (or follow-up call) that did not succeed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedItem {
    pub operation: Operation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirror_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<MutationErrorKind>,
    pub cause: String,
}

impl FailedItem {
    fn from_error(
        operation: Operation,
        source_id: Option<&str>,
        mirror_id: Option<&str>,
        error: &MutationError,
    ) -> Self {
        Self {
            operation,
            source_id: source_id.map(str::to_string),
            mirror_id: mirror_id.map(str::to_string),
            kind: Some(error.kind),
            cause: error.message.clone(),
        }
    }
}

/// A call that needed more than one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryNote {
    pub operation: Operation,
    pub key: String,
    pub attempts: u32,
}

/// Aggregated outcome of executing a plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub published: usize,
    pub relinked: usize,
    /// Entries abandoned because the cycle deadline passed before they started.
    pub skipped: usize,
    pub failed: Vec<FailedItem>,
    pub retried: Vec<RetryNote>,
}

impl ExecutionReport {
    fn merge(&mut self, other: ExecutionReport) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.published += other.published;
        self.relinked += other.relinked;
        self.skipped += other.skipped;
        self.failed.extend(other.failed);
        self.retried.extend(other.retried);
    }

    fn skipped_one() -> Self {
        Self {
            skipped: 1,
            ..Self::default()
        }
    }

    fn note_attempts(&mut self, operation: Operation, key: &str, attempts: u32) {
        if attempts > 1 {
            self.retried.push(RetryNote {
                operation,
                key: key.to_string(),
                attempts,
            });
        }
    }
}

/// Unit of work scheduled on the executor.
#[derive(Debug)]
enum Job {
    Mutation(Mutation),
    Relink(Relink),
}

impl Job {
    fn operation(&self) -> Operation {
        match self {
            Job::Mutation(Mutation::Create { .. }) => Operation::Create,
            Job::Mutation(Mutation::Update { .. }) => Operation::Update,
            Job::Mutation(Mutation::Publish { .. }) => Operation::Publish,
            Job::Mutation(Mutation::Delete { .. }) => Operation::Delete,
            Job::Relink(_) => Operation::WriteBack,
        }
    }

    fn source_id(&self) -> Option<String> {
        match self {
            Job::Mutation(m) => m.source_id().map(str::to_string),
            Job::Relink(r) => Some(r.source_id.clone()),
        }
    }

    fn mirror_id(&self) -> Option<String> {
        match self {
            Job::Mutation(m) => m.mirror_id().map(str::to_string),
            Job::Relink(r) => Some(r.mirror_id.clone()),
        }
    }
}

/// Applies mutation plans to the mirror and writes references back to the source.
#[derive(Clone)]
pub struct MutationExecutor {
    mirror: Arc<dyn MirrorStore>,
    source: Arc<dyn SourceStore>,
    retry: RetryPolicy,
    max_concurrency: usize,
    publish_changes: bool,
}

impl MutationExecutor {
    pub fn new(
        mirror: Arc<dyn MirrorStore>,
        source: Arc<dyn SourceStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            mirror,
            source,
            retry,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            publish_changes: true,
        }
    }

    /// Limit the number of calls in flight (at least one).
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Publish each created or updated item right after the write, so the
    /// live listing reflects it on the next read.
    #[must_use]
    pub fn with_publish_changes(mut self, publish_changes: bool) -> Self {
        self.publish_changes = publish_changes;
        self
    }

    /// Execute a plan. Entries that have not started by `deadline` are skipped.
    #[instrument(skip_all, fields(entries = plan.entries.len(), relinks = plan.relinks.len()))]
    pub async fn execute(&self, plan: MutationPlan, deadline: Option<Instant>) -> ExecutionReport {
        let MutationPlan { entries, relinks } = plan;
        let (upserts, deletes): (Vec<Mutation>, Vec<Mutation>) = entries
            .into_iter()
            .partition(|m| m.kind() != MutationKind::Delete);

        let first: Vec<Job> = upserts
            .into_iter()
            .map(Job::Mutation)
            .chain(relinks.into_iter().map(Job::Relink))
            .collect();
        let mut report = self.run_phase(first, deadline).await;

        let second: Vec<Job> = deletes.into_iter().map(Job::Mutation).collect();
        report.merge(self.run_phase(second, deadline).await);

        report
    }

    async fn run_phase(&self, jobs: Vec<Job>, deadline: Option<Instant>) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        if jobs.is_empty() {
            return report;
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut handles = Vec::with_capacity(jobs.len());

        for job in jobs {
            let label = (job.operation(), job.source_id(), job.mirror_id());
            let executor = self.clone();
            let semaphore = semaphore.clone();

            let handle = tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return ExecutionReport::skipped_one();
                };
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    debug!(operation = %job.operation(), "Cycle deadline passed, skipping entry");
                    return ExecutionReport::skipped_one();
                }
                executor.run_job(job).await
            });
            handles.push((label, handle));
        }

        for ((operation, source_id, mirror_id), handle) in handles {
            match handle.await {
                Ok(outcome) => report.merge(outcome),
                Err(e) => {
                    error!(operation = %operation, error = %e, "Mutation task aborted");
                    report.failed.push(FailedItem {
                        operation,
                        source_id,
                        mirror_id,
                        kind: None,
                        cause: e.to_string(),
                    });
                }
            }
        }

        report
    }

    async fn run_job(&self, job: Job) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        match job {
            Job::Mutation(Mutation::Create {
                source_id,
                slug,
                fields,
                stale_ref,
            }) => {
                if let Some(stale) = &stale_ref {
                    debug!(source_id = %source_id, stale_ref = %stale, "Stored mirror reference is stale, creating new item");
                }
                self.create(&mut report, &source_id, &slug, &fields).await;
            }
            Job::Mutation(Mutation::Update {
                source_id,
                mirror_id,
                fields,
            }) => self.update(&mut report, &source_id, &mirror_id, &fields).await,
            Job::Mutation(Mutation::Publish {
                source_id,
                mirror_id,
            }) => {
                debug!(source_id = %source_id, mirror_id = %mirror_id, "Publishing item left unpublished by an earlier cycle");
                self.publish(&mut report, &source_id, &mirror_id).await;
            }
            Job::Mutation(Mutation::Delete { mirror_id, slug }) => {
                self.delete(&mut report, &mirror_id, &slug).await;
            }
            Job::Relink(relink) => {
                if self
                    .write_back(&mut report, &relink.source_id, &relink.mirror_id)
                    .await
                {
                    report.relinked += 1;
                }
            }
        }
        report
    }

    async fn create(
        &self,
        report: &mut ExecutionReport,
        source_id: &str,
        slug: &str,
        fields: &MappedFields,
    ) {
        let outcome = self
            .retry
            .execute("mirror.create_item", || self.mirror.create_item(fields))
            .await;
        report.note_attempts(Operation::Create, source_id, outcome.attempts);

        let mirror_id = match outcome.result {
            Ok(id) => id,
            Err(e) => {
                warn!(source_id = %source_id, slug = %slug, attempts = outcome.attempts, error = %e, "Create failed");
                report.failed.push(FailedItem::from_error(
                    Operation::Create,
                    Some(source_id),
                    None,
                    &e,
                ));
                return;
            }
        };

        debug!(source_id = %source_id, mirror_id = %mirror_id, slug = %slug, "Created mirror item");
        report.created += 1;

        if self.publish_changes {
            self.publish(report, source_id, &mirror_id).await;
        }

        self.write_back(report, source_id, &mirror_id).await;
    }

    async fn publish(&self, report: &mut ExecutionReport, source_id: &str, mirror_id: &str) {
        let item_ids = [mirror_id.to_string()];
        let outcome = self
            .retry
            .execute("mirror.publish_items", || self.mirror.publish_items(&item_ids))
            .await;
        report.note_attempts(Operation::Publish, mirror_id, outcome.attempts);

        match outcome.result {
            Ok(()) => report.published += 1,
            Err(source) => {
                let e = PublishError {
                    item_ids: item_ids.to_vec(),
                    source,
                };
                warn!(mirror_id = %mirror_id, error = %e, "Publish failed, item stays staged");
                report.failed.push(FailedItem {
                    operation: Operation::Publish,
                    source_id: Some(source_id.to_string()),
                    mirror_id: Some(mirror_id.to_string()),
                    kind: Some(e.source.kind),
                    cause: e.to_string(),
                });
            }
        }
    }

    async fn update(
        &self,
        report: &mut ExecutionReport,
        source_id: &str,
        mirror_id: &str,
        fields: &MappedFields,
    ) {
        let outcome = self
            .retry
            .execute("mirror.update_item", || {
                self.mirror.update_item(mirror_id, fields)
            })
            .await;
        report.note_attempts(Operation::Update, mirror_id, outcome.attempts);

        match outcome.result {
            Ok(()) => {
                debug!(source_id = %source_id, mirror_id = %mirror_id, "Updated mirror item");
                report.updated += 1;
                if self.publish_changes {
                    self.publish(report, source_id, mirror_id).await;
                }
            }
            Err(e) => {
                warn!(source_id = %source_id, mirror_id = %mirror_id, attempts = outcome.attempts, error = %e, "Update failed");
                report.failed.push(FailedItem::from_error(
                    Operation::Update,
                    Some(source_id),
                    Some(mirror_id),
                    &e,
                ));
            }
        }
    }

    async fn delete(&self, report: &mut ExecutionReport, mirror_id: &str, slug: &str) {
        let mirror = &self.mirror;
        let outcome = self
            .retry
            .execute("mirror.delete_item", move || async move {
                match mirror.delete_item(mirror_id).await {
                    // Already gone: the desired end state holds.
                    Err(ApiError::NotFound(_)) => Ok(()),
                    other => other,
                }
            })
            .await;
        report.note_attempts(Operation::Delete, mirror_id, outcome.attempts);

        match outcome.result {
            Ok(()) => {
                debug!(mirror_id = %mirror_id, slug = %slug, "Deleted mirror item");
                report.deleted += 1;
            }
            Err(e) => {
                warn!(mirror_id = %mirror_id, slug = %slug, attempts = outcome.attempts, error = %e, "Delete failed");
                report.failed.push(FailedItem::from_error(
                    Operation::Delete,
                    None,
                    Some(mirror_id),
                    &e,
                ));
            }
        }
    }

    /// Store `mirror_id` on the source record. Returns whether it succeeded.
    async fn write_back(
        &self,
        report: &mut ExecutionReport,
        source_id: &str,
        mirror_id: &str,
    ) -> bool {
        let outcome = self
            .retry
            .execute("source.set_mirror_ref", || {
                self.source.set_mirror_ref(source_id, mirror_id)
            })
            .await;
        report.note_attempts(Operation::WriteBack, source_id, outcome.attempts);

        match outcome.result {
            Ok(()) => {
                debug!(source_id = %source_id, mirror_id = %mirror_id, "Stored mirror reference on source record");
                true
            }
            Err(e) => {
                warn!(source_id = %source_id, mirror_id = %mirror_id, error = %e, "Mirror reference write-back failed");
                report.failed.push(FailedItem::from_error(
                    Operation::WriteBack,
                    Some(source_id),
                    Some(mirror_id),
                    &e,
                ));
                false
            }
        }
    }
}
