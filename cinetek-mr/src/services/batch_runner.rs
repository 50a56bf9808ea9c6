//! Batch driver
//!
//! Claims records page by page and feeds them to a bounded pool of
//! concurrent record tasks. A record failure becomes that record's ERROR
//! transition and the batch moves on; only claim/bookkeeping failures
//! abort the whole batch. Cancellation is checked between records and
//! between pages; in-flight records finish before the driver stops.

use chrono::Utc;
use cinetek_common::events::{EventBus, ReconcileEvent};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::db::{batches, MatchStateStore};
use crate::models::{BatchKind, BatchState, ImportRecord, MatchStatus, ReconcileBatch};
use crate::services::applier::{Applier, ApplyOutcome};
use crate::services::catalog::MovieCatalog;
use crate::services::matcher::RecordMatcher;
use crate::services::PipelineResult;
use crate::sources::AdapterRegistry;

/// What one record task produced
enum RecordOutcome {
    Final(MatchStatus, Option<i64>),
    /// Claim consumed without a transition (already applied)
    Skipped,
}

/// Drives one batch to a terminal state
pub struct BatchRunner {
    store: MatchStateStore,
    matcher: RecordMatcher,
    applier: Applier,
    event_bus: EventBus,
}

impl BatchRunner {
    pub fn new(
        store: MatchStateStore,
        catalog: Arc<dyn MovieCatalog>,
        event_bus: EventBus,
        user_id: i64,
    ) -> Self {
        Self {
            store,
            matcher: RecordMatcher::new(catalog.clone()),
            applier: Applier::new(catalog, AdapterRegistry::defaults(), user_id),
            event_bus,
        }
    }

    /// Run the batch to completion, cancellation, or failure. The returned
    /// batch is in a terminal state and already persisted.
    pub async fn run(&self, mut batch: ReconcileBatch, cancel: CancellationToken) -> ReconcileBatch {
        let (state, message) = match self.drive(&mut batch, &cancel).await {
            Ok(state) => (state, None),
            Err(e) => {
                error!(batch_id = %batch.batch_id, error = %e, "Batch driver failed");
                (BatchState::Failed, Some(e.to_string()))
            }
        };

        // Claims of unprocessed records (cancel, failure, skip paths)
        if let Err(e) = self.store.release_claims(batch.batch_id).await {
            error!(batch_id = %batch.batch_id, error = %e, "Failed to release batch claims");
        }

        batch.finish(state, message.clone());

        let timestamp = Utc::now();
        match state {
            BatchState::Completed => {
                info!(
                    batch_id = %batch.batch_id,
                    processed = batch.processed,
                    matched = batch.tally.matched,
                    applied = batch.tally.applied,
                    error = batch.tally.error,
                    "Batch completed"
                );
                self.event_bus.emit(ReconcileEvent::BatchCompleted {
                    batch_id: batch.batch_id,
                    processed: batch.processed,
                    matched: batch.tally.matched,
                    ambiguous: batch.tally.ambiguous,
                    not_found: batch.tally.not_found,
                    applied: batch.tally.applied,
                    error: batch.tally.error,
                    skipped: batch.tally.skipped,
                    timestamp,
                });
            }
            BatchState::Cancelled => {
                info!(
                    batch_id = %batch.batch_id,
                    processed = batch.processed,
                    "Batch cancelled"
                );
                self.event_bus.emit(ReconcileEvent::BatchCancelled {
                    batch_id: batch.batch_id,
                    processed: batch.processed,
                    timestamp,
                });
            }
            BatchState::Failed => {
                self.event_bus.emit(ReconcileEvent::BatchFailed {
                    batch_id: batch.batch_id,
                    message: message.unwrap_or_default(),
                    timestamp,
                });
            }
            BatchState::Running => {}
        }

        if let Err(e) = batches::save_batch(self.store.pool(), &batch).await {
            error!(batch_id = %batch.batch_id, error = %e, "Failed to persist batch outcome");
        }

        batch
    }

    async fn drive(
        &self,
        batch: &mut ReconcileBatch,
        cancel: &CancellationToken,
    ) -> PipelineResult<BatchState> {
        let params = batch.parameters.clone();
        // Match batches re-enter claimed records into PENDING; apply
        // batches consume MATCHED records as they are
        let reenter_pending = batch.kind == BatchKind::Match;

        info!(
            batch_id = %batch.batch_id,
            kind = batch.kind.as_str(),
            limit = params.limit,
            workers = params.workers,
            "Batch started"
        );
        self.event_bus.emit(ReconcileEvent::BatchStarted {
            batch_id: batch.batch_id,
            kind: batch.kind.as_str().to_string(),
            timestamp: Utc::now(),
        });

        while batch.processed < params.limit {
            if cancel.is_cancelled() {
                return Ok(BatchState::Cancelled);
            }

            let page_size = params.page_size.min(params.limit - batch.processed);
            let page = self
                .store
                .claim_page(
                    batch.batch_id,
                    &params.statuses,
                    params.source,
                    page_size,
                    reenter_pending,
                )
                .await?;
            if page.is_empty() {
                break;
            }
            debug!(batch_id = %batch.batch_id, claimed = page.len(), "Claimed page");

            let mut queue = page.into_iter();
            let mut in_flight = FuturesUnordered::new();
            for _ in 0..params.workers {
                match queue.next() {
                    Some(record) => in_flight.push(self.process_one(batch.kind, record)),
                    None => break,
                }
            }

            while let Some((record_id, outcome)) = in_flight.next().await {
                batch.processed += 1;
                match outcome {
                    RecordOutcome::Final(status, external_id) => {
                        batch.tally.record(status);
                        self.event_bus.emit(ReconcileEvent::RecordResolved {
                            batch_id: batch.batch_id,
                            record_id,
                            status: status.as_str().to_string(),
                            external_id,
                            timestamp: Utc::now(),
                        });
                    }
                    RecordOutcome::Skipped => batch.tally.skip(),
                }
                self.event_bus.emit(ReconcileEvent::BatchProgress {
                    batch_id: batch.batch_id,
                    processed: batch.processed,
                    limit: params.limit,
                    timestamp: Utc::now(),
                });

                // Stop refilling once cancelled; in-flight tasks drain
                if !cancel.is_cancelled() {
                    if let Some(record) = queue.next() {
                        in_flight.push(self.process_one(batch.kind, record));
                    }
                }
            }

            batches::save_batch(self.store.pool(), batch).await?;
            if cancel.is_cancelled() {
                return Ok(BatchState::Cancelled);
            }
        }

        Ok(BatchState::Completed)
    }

    async fn process_one(&self, kind: BatchKind, record: ImportRecord) -> (i64, RecordOutcome) {
        let record_id = record.record_id;
        let outcome = match kind {
            BatchKind::Match => self.match_one(&record).await,
            BatchKind::Apply => self.apply_one(&record).await,
        };
        (record_id, outcome)
    }

    async fn match_one(&self, record: &ImportRecord) -> RecordOutcome {
        match self.matcher.resolve(record).await {
            Ok(decision) => {
                self.settle(
                    record.record_id,
                    decision.status(),
                    decision.external_id(),
                    decision.note(),
                )
                .await
            }
            Err(e) => {
                warn!(record_id = record.record_id, error = %e, "Resolution failed");
                let note = format!("error: {}", e);
                self.settle(record.record_id, MatchStatus::Error, None, &note)
                    .await
            }
        }
    }

    async fn apply_one(&self, record: &ImportRecord) -> RecordOutcome {
        match self.applier.apply(&self.store, record).await {
            Ok(ApplyOutcome::Applied { .. }) => {
                RecordOutcome::Final(MatchStatus::Applied, record.external_id)
            }
            Ok(ApplyOutcome::AlreadyApplied) => {
                debug!(record_id = record.record_id, "Already applied, skipping");
                RecordOutcome::Skipped
            }
            Err(e) => {
                warn!(record_id = record.record_id, error = %e, "Apply failed");
                let note = format!("apply: {}", e);
                self.settle(record.record_id, MatchStatus::Error, None, &note)
                    .await
            }
        }
    }

    /// Persist an outcome transition; on failure fall back to ERROR so the
    /// record is never silently dropped.
    async fn settle(
        &self,
        record_id: i64,
        status: MatchStatus,
        external_id: Option<i64>,
        note: &str,
    ) -> RecordOutcome {
        match self
            .store
            .transition(record_id, status, external_id, Some(note))
            .await
        {
            Ok(_) => RecordOutcome::Final(status, external_id),
            Err(first) => {
                warn!(record_id, status = %status, error = %first, "Outcome transition failed");
                if status != MatchStatus::Error {
                    let note = format!("error: {}", first);
                    let _ = self
                        .store
                        .transition(record_id, MatchStatus::Error, None, Some(&note))
                        .await;
                }
                RecordOutcome::Final(MatchStatus::Error, None)
            }
        }
    }
}
