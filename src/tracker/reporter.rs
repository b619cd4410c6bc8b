//! The dedup rule and the single-document write behind it.
//!
//! A candidate is either a real fix or the (0,0) sentinel. It is written
//! only when it changes what the remote document last said, and flags
//! advance only after the write succeeded, so a failed write is retried
//! by the next qualifying trigger.

use super::Trigger;
use crate::document::{DocumentStore, Fields};
use crate::error::{Error, Result};
use crate::model::{Coordinates, ReportState, TrackingFlags, WorkerLocationDocument};
use crate::storage::{FlagStore, KeyValueStore};
use crate::telemetry::metrics;
use crate::telemetry::tracking::record_report_transition;
use chrono::{FixedOffset, Utc};
use opentelemetry::KeyValue;
use serde_json::json;
use std::time::Instant;
use tracing::{Span, debug, error, info, warn};

/// Why the sentinel is being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsentReason {
    /// The user switched tracking off.
    TrackingDisabled,
    /// The device left a service area. Reported even while tracking.
    GeofenceExit,
    /// OS location services were switched off.
    ProviderDisabled,
}

/// A value proposed for the worker's document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Candidate {
    Present(Coordinates),
    Absent(AbsentReason),
}

impl Candidate {
    fn coordinates(&self) -> Coordinates {
        match self {
            Candidate::Present(coords) => *coords,
            Candidate::Absent(_) => Coordinates::SENTINEL,
        }
    }

    fn target_state(&self) -> ReportState {
        match self {
            Candidate::Present(_) => ReportState::SentPresent,
            Candidate::Absent(_) => ReportState::SentAbsent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadySentAbsent,
    AlreadySentPresent,
    /// Sentinel refused while continuous tracking is running.
    TrackingActive,
    /// A real fix that reads exactly (0,0).
    SentinelFix,
    /// No usable worker id in the key-value store.
    NoWorkerId,
}

/// How a trigger ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    Inserted { document_id: String },
    Updated { document_id: String },
    Skipped(SkipReason),
    Failed(String),
    /// The trigger did not call for a report.
    NoReport,
}

impl ReportOutcome {
    pub fn wrote(&self) -> bool {
        matches!(
            self,
            ReportOutcome::Inserted { .. } | ReportOutcome::Updated { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReportOutcome::Inserted { .. } => "inserted",
            ReportOutcome::Updated { .. } => "updated",
            ReportOutcome::Skipped(_) => "skipped",
            ReportOutcome::Failed(_) => "failed",
            ReportOutcome::NoReport => "no_report",
        }
    }
}

/// Decide whether `candidate` needs writing given the last recorded write.
pub fn decide(
    candidate: &Candidate,
    flags: &TrackingFlags,
    tracking_active: bool,
) -> std::result::Result<(), SkipReason> {
    match candidate {
        Candidate::Absent(_) if flags.null_coordinates() => Err(SkipReason::AlreadySentAbsent),
        Candidate::Absent(reason) if tracking_active && *reason != AbsentReason::GeofenceExit => {
            Err(SkipReason::TrackingActive)
        }
        Candidate::Absent(_) => Ok(()),
        Candidate::Present(coords) if coords.is_sentinel() => Err(SkipReason::SentinelFix),
        Candidate::Present(_) if flags.previous_enabled() => Err(SkipReason::AlreadySentPresent),
        Candidate::Present(_) => Ok(()),
    }
}

enum Written {
    Inserted(String),
    Updated(String),
}

/// Applies the dedup rule and owns the write path to the worker's document.
pub struct Reporter<K, D> {
    flags: FlagStore<K>,
    documents: D,
    collection: String,
    offset: FixedOffset,
}

impl<K: KeyValueStore, D: DocumentStore> Reporter<K, D> {
    pub fn new(kv: K, documents: D, collection: impl Into<String>, offset: FixedOffset) -> Self {
        Self {
            flags: FlagStore::new(kv),
            documents,
            collection: collection.into(),
            offset,
        }
    }

    pub async fn flags(&self) -> TrackingFlags {
        self.flags.load().await
    }

    /// Persist the user's toggle. Failures are logged; the toggle still
    /// applies for this process.
    ///
    /// An unreadable record is left alone: saving over it would replace the
    /// last report state and document id with defaults.
    pub async fn set_tracking_enabled(&self, enabled: bool) {
        let mut flags = match self.flags.try_load().await {
            Ok(flags) => flags,
            Err(e) => {
                warn!(enabled, "tracking toggle not persisted, flags unreadable: {e}");
                return;
            }
        };
        if flags.tracking_enabled == enabled {
            return;
        }
        flags.tracking_enabled = enabled;
        if let Err(e) = self.flags.save(&flags).await {
            warn!(enabled, "failed to persist tracking toggle: {e}");
        }
    }

    /// Run one candidate through the rule and, if it passes, write it.
    pub async fn report(
        &self,
        candidate: Candidate,
        tracking_active: bool,
        trigger: Trigger,
    ) -> ReportOutcome {
        let flags = self.flags.load().await;
        let outcome = self.apply(candidate, &flags, tracking_active).await;

        metrics::location_reports().add(
            1,
            &[
                KeyValue::new("trigger", trigger.as_str()),
                KeyValue::new("result", outcome.label()),
            ],
        );
        match &outcome {
            ReportOutcome::Skipped(reason) => {
                debug!(%trigger, ?reason, last_report = %flags.last_report, "report skipped");
            }
            ReportOutcome::Failed(e) => {
                error!(%trigger, "location report failed: {e}");
            }
            ReportOutcome::Inserted { document_id } | ReportOutcome::Updated { document_id } => {
                info!(
                    %trigger,
                    document_id = %document_id,
                    coords = %candidate.coordinates(),
                    "location reported"
                );
            }
            ReportOutcome::NoReport => {}
        }
        outcome
    }

    async fn apply(
        &self,
        candidate: Candidate,
        flags: &TrackingFlags,
        tracking_active: bool,
    ) -> ReportOutcome {
        if let Err(reason) = decide(&candidate, flags, tracking_active) {
            return ReportOutcome::Skipped(reason);
        }

        let worker_id = match self.flags.worker_id().await {
            Ok(id) => id,
            Err(e) => {
                warn!("cannot report location without a worker id: {e}");
                return ReportOutcome::Skipped(SkipReason::NoWorkerId);
            }
        };

        let document = WorkerLocationDocument::new(
            worker_id,
            candidate.coordinates(),
            Utc::now(),
            self.offset,
        );
        let written = match self.write(worker_id, &document, flags).await {
            Ok(written) => written,
            Err(e) => return ReportOutcome::Failed(e.to_string()),
        };

        let document_id = match &written {
            Written::Inserted(id) | Written::Updated(id) => id.as_str(),
        };
        let target = candidate.target_state();
        let next = flags.after_write(target, document_id);
        // The write happened; a lost flag update only costs a duplicate
        // (idempotent) write later.
        if let Err(e) = self.flags.save(&next).await {
            warn!(document_id, "failed to persist tracking flags: {e}");
        }
        record_report_transition(
            &Span::current(),
            &flags.last_report.to_string(),
            &target.to_string(),
        );

        match written {
            Written::Inserted(document_id) => ReportOutcome::Inserted { document_id },
            Written::Updated(document_id) => ReportOutcome::Updated { document_id },
        }
    }

    /// Update the worker's single document, discovering or creating it on
    /// first use.
    async fn write(
        &self,
        worker_id: i64,
        document: &WorkerLocationDocument,
        flags: &TrackingFlags,
    ) -> Result<Written> {
        let fields = document.to_fields()?;

        if let Some(id) = &flags.document_id {
            match self.update(id, &fields).await {
                Ok(()) => return Ok(Written::Updated(id.clone())),
                Err(Error::NotFound(_)) => {
                    warn!(document_id = %id, "cached location document is gone, looking up again");
                }
                Err(e) => return Err(e),
            }
        }

        let existing = self
            .documents
            .query_by_field(&self.collection, "worker_id", &json!(worker_id), 1)
            .await?;
        if let Some(doc) = existing.into_iter().next() {
            self.update(&doc.id, &fields).await?;
            return Ok(Written::Updated(doc.id));
        }

        let id = self
            .timed("insert", self.documents.insert(&self.collection, &fields))
            .await?;
        Ok(Written::Inserted(id))
    }

    async fn update(&self, id: &str, fields: &Fields) -> Result<()> {
        self.timed("update", self.documents.update_by_id(&self.collection, id, fields))
            .await
    }

    async fn timed<T>(
        &self,
        operation: &'static str,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        let start = Instant::now();
        let result = fut.await;
        metrics::document_write_ms().record(
            start.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", operation)],
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::MemoryDocumentStore;
    use crate::storage::MemoryKv;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Memory store whose next `failing_reads` reads fail.
    #[derive(Clone, Default)]
    struct FlakyReads {
        inner: MemoryKv,
        failing_reads: Arc<AtomicUsize>,
    }

    impl KeyValueStore for FlakyReads {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            let fail = self
                .failing_reads
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if fail {
                return Err(Error::KeyValue("read timed out".to_string()));
            }
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<()> {
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> Result<()> {
            self.inner.remove(key).await
        }
    }

    fn flags(state: ReportState) -> TrackingFlags {
        TrackingFlags {
            last_report: state,
            ..TrackingFlags::default()
        }
    }

    const HERE: Candidate = Candidate::Present(Coordinates {
        latitude: 12.97,
        longitude: 77.59,
    });

    #[test]
    fn sentinel_sent_once() {
        let exit = Candidate::Absent(AbsentReason::GeofenceExit);
        assert_eq!(decide(&exit, &flags(ReportState::Unknown), false), Ok(()));
        assert_eq!(decide(&exit, &flags(ReportState::SentPresent), false), Ok(()));
        assert_eq!(
            decide(&exit, &flags(ReportState::SentAbsent), false),
            Err(SkipReason::AlreadySentAbsent)
        );
    }

    #[test]
    fn presence_sent_once() {
        assert_eq!(decide(&HERE, &flags(ReportState::Unknown), true), Ok(()));
        assert_eq!(decide(&HERE, &flags(ReportState::SentAbsent), true), Ok(()));
        assert_eq!(
            decide(&HERE, &flags(ReportState::SentPresent), true),
            Err(SkipReason::AlreadySentPresent)
        );
    }

    #[test]
    fn active_tracking_blocks_sentinel_except_on_exit() {
        let state = flags(ReportState::SentPresent);
        assert_eq!(
            decide(&Candidate::Absent(AbsentReason::TrackingDisabled), &state, true),
            Err(SkipReason::TrackingActive)
        );
        assert_eq!(
            decide(&Candidate::Absent(AbsentReason::ProviderDisabled), &state, true),
            Err(SkipReason::TrackingActive)
        );
        assert_eq!(
            decide(&Candidate::Absent(AbsentReason::GeofenceExit), &state, true),
            Ok(())
        );
    }

    #[test]
    fn zero_fix_is_never_written_as_presence() {
        assert_eq!(
            decide(
                &Candidate::Present(Coordinates::SENTINEL),
                &flags(ReportState::Unknown),
                false
            ),
            Err(SkipReason::SentinelFix)
        );
    }

    #[tokio::test]
    async fn toggle_not_saved_over_unreadable_flags() {
        let kv = FlakyReads::default();
        let store = FlagStore::new(kv.clone());
        let stored = TrackingFlags::default().after_write(ReportState::SentPresent, "doc-7");
        store.save(&stored).await.unwrap();

        let reporter = Reporter::new(
            kv.clone(),
            MemoryDocumentStore::new(),
            "worker_locations",
            FixedOffset::east_opt(330 * 60).unwrap(),
        );

        kv.failing_reads.store(1, Ordering::SeqCst);
        reporter.set_tracking_enabled(true).await;
        assert_eq!(store.try_load().await.unwrap(), stored);

        reporter.set_tracking_enabled(true).await;
        let flags = store.try_load().await.unwrap();
        assert!(flags.tracking_enabled);
        assert_eq!(flags.last_report, ReportState::SentPresent);
        assert_eq!(flags.document_id.as_deref(), Some("doc-7"));
    }
}
