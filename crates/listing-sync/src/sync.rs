//! Sync orchestrator.
//!
//! One cycle reads both collections concurrently, reconciles them, applies
//! the resulting plan and reports a [`CycleSummary`]. A read failure on
//! either side aborts the cycle before anything is mutated; failures of
//! individual mutations are collected in the summary instead.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::executor::{
    ExecutionReport, FailedItem, MutationExecutor, Operation, RetryNote, DEFAULT_MAX_CONCURRENCY,
};
use crate::mapper::FieldMapping;
use crate::mirror::{MirrorReader, MirrorStore, MirrorView};
use crate::reconciler::Reconciler;
use crate::retry::RetryPolicy;
use crate::source::{SourceReader, SourceStore};

/// Default bound on the duration of one cycle.
pub const DEFAULT_CYCLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Tunables for a [`SyncService`].
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub retry: RetryPolicy,
    pub max_concurrency: usize,
    /// Publish created and updated items right after writing them.
    pub publish_changes: bool,
    pub mirror_view: MirrorView,
    /// `None` disables the cycle deadline.
    pub cycle_timeout: Option<Duration>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            publish_changes: true,
            mirror_view: MirrorView::default(),
            cycle_timeout: Some(DEFAULT_CYCLE_TIMEOUT),
        }
    }
}

/// Outcome of one completed cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleSummary {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub source_records: usize,
    pub mirror_records: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub published: usize,
    pub relinked: usize,
    pub skipped: usize,
    pub failed: Vec<FailedItem>,
    pub retried: Vec<RetryNote>,
}

impl CycleSummary {
    /// Number of create, update and delete calls that succeeded.
    #[must_use]
    pub fn mutations(&self) -> usize {
        self.created + self.updated + self.deleted
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    fn log(&self) {
        let duration_ms = (self.finished_at - self.started_at).num_milliseconds();
        let json = serde_json::to_string(self).unwrap_or_default();
        if self.has_failures() || self.skipped > 0 {
            warn!(
                cycle_id = %self.cycle_id,
                created = self.created,
                updated = self.updated,
                deleted = self.deleted,
                failed = self.failed.len(),
                skipped = self.skipped,
                duration_ms,
                summary = %json,
                "Sync cycle finished with failures"
            );
        } else {
            info!(
                cycle_id = %self.cycle_id,
                created = self.created,
                updated = self.updated,
                deleted = self.deleted,
                duration_ms,
                summary = %json,
                "Sync cycle finished"
            );
        }
    }
}

/// Keeps the mirror collection in line with the source.
pub struct SyncService {
    source_reader: SourceReader,
    mirror_reader: MirrorReader,
    mapping: FieldMapping,
    executor: MutationExecutor,
    cycle_timeout: Option<Duration>,
}

impl SyncService {
    pub fn new(
        source: Arc<dyn SourceStore>,
        mirror: Arc<dyn MirrorStore>,
        mapping: FieldMapping,
        settings: SyncSettings,
    ) -> Self {
        let source_reader = SourceReader::new(source.clone(), mapping.clone(), settings.retry.clone());
        let mirror_reader = MirrorReader::new(
            mirror.clone(),
            settings.mirror_view,
            mapping.slug_field(),
            settings.retry.clone(),
        )
        .with_publish_tracking(settings.publish_changes);
        let executor = MutationExecutor::new(mirror, source, settings.retry)
            .with_max_concurrency(settings.max_concurrency)
            .with_publish_changes(settings.publish_changes);

        Self {
            source_reader,
            mirror_reader,
            mapping,
            executor,
            cycle_timeout: settings.cycle_timeout,
        }
    }

    /// Run one full cycle.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] when either collection cannot be read in full.
    /// Nothing is mutated in that case.
    pub async fn run_cycle(&self) -> SyncResult<CycleSummary> {
        let cycle_id = Uuid::new_v4();
        let span = info_span!("sync_cycle", cycle_id = %cycle_id);

        async move {
            let result = self.cycle(cycle_id).await;
            match &result {
                Ok(summary) => summary.log(),
                Err(e) => error!(cycle_id = %cycle_id, error = %e, "Sync cycle aborted at read stage"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn cycle(&self, cycle_id: Uuid) -> SyncResult<CycleSummary> {
        let started_at = Utc::now();
        let deadline = self.cycle_timeout.map(|timeout| Instant::now() + timeout);
        info!(cycle_id = %cycle_id, "Starting sync cycle");

        let reads = async {
            tokio::try_join!(self.source_reader.read_all(), self.mirror_reader.read_all())
        };
        let (source, mirror) = match (deadline, self.cycle_timeout) {
            (Some(deadline), Some(timeout)) => tokio::time::timeout_at(deadline, reads)
                .await
                .map_err(|_| SyncError::ReadTimeout(timeout))??,
            _ => reads.await?,
        };

        let plan = Reconciler::new(&self.mapping)
            .with_protected(source.rejected.iter().filter_map(|r| r.mirror_ref.clone()))
            .plan(&source.records, &mirror);

        let ExecutionReport {
            created,
            updated,
            deleted,
            published,
            relinked,
            skipped,
            failed: mutation_failures,
            retried,
        } = self.executor.execute(plan, deadline).await;

        let mut failed: Vec<FailedItem> = source
            .rejected
            .iter()
            .map(|rejected| FailedItem {
                operation: Operation::Map,
                source_id: Some(rejected.error.record_id.clone()),
                mirror_id: rejected.mirror_ref.clone(),
                kind: None,
                cause: rejected.error.message.clone(),
            })
            .collect();
        failed.extend(mutation_failures);

        Ok(CycleSummary {
            cycle_id,
            started_at,
            finished_at: Utc::now(),
            source_records: source.records.len() + source.rejected.len(),
            mirror_records: mirror.len(),
            created,
            updated,
            deleted,
            published,
            relinked,
            skipped,
            failed,
            retried,
        })
    }

    /// Run cycles every `period` until `shutdown` resolves.
    ///
    /// Cycles never overlap: a cycle that outlasts the period delays the
    /// next tick instead of queueing a burst. An aborted cycle is logged and
    /// the loop carries on with the next tick.
    pub async fn run_forever<F>(&self, period: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(period_secs = period.as_secs(), "Starting sync loop");

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown requested, stopping sync loop");
                    break;
                }
                _ = ticker.tick() => {
                    // Errors are already logged by run_cycle.
                    let _ = self.run_cycle().await;
                }
            }
        }
    }
}
