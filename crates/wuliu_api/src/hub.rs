//! The station synchronization pipeline.
//!
//! [`StationHub`] owns the snapshot and is the only writer to it. Each
//! telemetry batch runs diff, snapshot update, persistence and broadcast as
//! one critical section, and the cold-start load of a late-joining viewer
//! takes the same gate. A second batch therefore never mutates the snapshot
//! while an earlier one is still persisting or broadcasting.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Utf8Bytes;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::{Mutex, broadcast, mpsc};
use wuliu_core::{HistoryRecord, SnapshotStore, StationIndex, StationState};
use wuliu_store::{StationRepository, StoreError};

use crate::broadcast::{Broadcaster, encode_update};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("persistence call did not finish within {0:?}")]
    Timeout(Duration),
    #[error("persistence task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// What happened to one telemetry batch.
#[derive(Debug)]
pub struct BatchOutcome {
    pub received: usize,
    pub rejected: usize,
    pub changed: usize,
    /// `None` when nothing changed and persistence was skipped.
    pub persisted: Option<Result<(), PipelineError>>,
    /// The write outlived the persistence timeout and viewers were updated
    /// before it finished.
    pub persisted_late: bool,
    /// Viewers the refreshed snapshot was sent to.
    pub delivered: usize,
}

pub struct StationHub {
    snapshot: SnapshotStore,
    repository: Arc<dyn StationRepository>,
    broadcaster: Broadcaster,
    gate: Mutex<()>,
    persist_timeout: Duration,
}

impl StationHub {
    pub fn new(
        repository: Arc<dyn StationRepository>,
        broadcaster: Broadcaster,
        persist_timeout: Duration,
    ) -> Self {
        StationHub {
            snapshot: SnapshotStore::new(),
            repository,
            broadcaster,
            gate: Mutex::new(()),
            persist_timeout,
        }
    }

    pub fn snapshot(&self) -> &SnapshotStore {
        &self.snapshot
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    async fn with_repository<T, F>(&self, f: F) -> Result<T, PipelineError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn StationRepository) -> Result<T, StoreError> + Send + 'static,
    {
        let repository = Arc::clone(&self.repository);
        let task = tokio::task::spawn_blocking(move || f(repository.as_ref()));
        match tokio::time::timeout(self.persist_timeout, task).await {
            Ok(joined) => flatten(joined),
            Err(_) => Err(PipelineError::Timeout(self.persist_timeout)),
        }
    }

    /// Runs one raw broker payload through the pipeline.
    ///
    /// Fails only when the payload is not JSON; invalid records inside a
    /// valid payload are dropped one by one. A persistence failure is
    /// reported in the outcome and does not stop the broadcast. A write that
    /// outlives the timeout is broadcast at the timeout and then awaited
    /// before the gate is released.
    pub async fn ingest(&self, payload: &[u8]) -> Result<BatchOutcome, serde_json::Error> {
        let records = wuliu_core::parse_payload(payload)?;
        let received = records.len();

        let _gate = self.gate.lock().await;

        let received_at = Utc::now();
        let candidates: Vec<StationState> = records
            .iter()
            .filter_map(|record| match wuliu_core::validate(record, received_at) {
                Ok(state) => Some(state),
                Err(reason) => {
                    tracing::warn!(%reason, "dropping telemetry record");
                    None
                }
            })
            .collect();
        let rejected = received - candidates.len();

        let changed = self.snapshot.detect_changes(candidates);
        if changed.is_empty() {
            return Ok(BatchOutcome {
                received,
                rejected,
                changed: 0,
                persisted: None,
                persisted_late: false,
                delivered: 0,
            });
        }

        let count = changed.len();
        let repository = Arc::clone(&self.repository);
        let mut write = tokio::task::spawn_blocking(move || repository.save_changes(&changed));

        let (persisted, delivered, late) =
            match tokio::time::timeout(self.persist_timeout, &mut write).await {
                Ok(joined) => (flatten(joined), self.broadcast_snapshot(), false),
                Err(_) => {
                    tracing::warn!(
                        count,
                        timeout = ?self.persist_timeout,
                        "persistence is slow, broadcasting before it completes"
                    );
                    let delivered = self.broadcast_snapshot();
                    // The gate stays held until the write lands so the next
                    // batch cannot commit ahead of it.
                    (flatten(write.await), delivered, true)
                }
            };
        match &persisted {
            Ok(()) => tracing::info!(count, late, "persisted station changes"),
            Err(error) => tracing::error!(count, %error, "failed to persist station changes"),
        }

        Ok(BatchOutcome {
            received,
            rejected,
            changed: count,
            persisted: Some(persisted),
            persisted_late: late,
            delivered,
        })
    }

    fn broadcast_snapshot(&self) -> usize {
        match self.broadcaster.publish(self.snapshot.snapshot()) {
            Ok(delivered) => delivered,
            Err(error) => {
                tracing::error!(%error, "failed to encode station update");
                0
            }
        }
    }

    /// The full view a newly connected viewer starts from.
    ///
    /// When nothing is held in memory yet, the last persisted state is
    /// loaded, range-filtered and used to populate the snapshot first.
    pub async fn late_join(&self) -> Result<Vec<StationState>, PipelineError> {
        if !self.snapshot.is_empty() {
            return Ok(self.snapshot.snapshot());
        }

        let _gate = self.gate.lock().await;
        // A batch may have filled the snapshot while we waited.
        if self.snapshot.is_empty() {
            let rows = self
                .with_repository(|repository| repository.load_current())
                .await?;
            let total = rows.len();
            let states: Vec<StationState> =
                rows.into_iter().filter_map(wuliu_core::from_stored).collect();
            let skipped = total - states.len();
            let loaded = self.snapshot.populate(states);
            tracing::info!(loaded, skipped, "restored station snapshot from database");
        }
        Ok(self.snapshot.snapshot())
    }

    /// Subscribes a viewer to future updates and returns its first frame.
    ///
    /// The subscription is taken before the snapshot is read, so no change
    /// accepted after the first frame can be missed.
    pub async fn connect_viewer(
        &self,
    ) -> (broadcast::Receiver<Utf8Bytes>, Result<Utf8Bytes, PipelineError>) {
        let updates = self.broadcaster.subscribe();
        let first = match self.late_join().await {
            Ok(stations) => Ok(self.encode(stations)),
            Err(error) => Err(error),
        };
        (updates, first)
    }

    /// The current snapshot as an update frame.
    pub fn current_frame(&self) -> Utf8Bytes {
        self.encode(self.snapshot.snapshot())
    }

    fn encode(&self, stations: Vec<StationState>) -> Utf8Bytes {
        encode_update(stations).unwrap_or_else(|error| {
            tracing::error!(%error, "failed to encode station update");
            Utf8Bytes::from_static(r#"{"event":"update","data":[]}"#)
        })
    }

    pub async fn history(
        &self,
        index: StationIndex,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>, PipelineError> {
        self.with_repository(move |repository| repository.history(index, limit))
            .await
    }
}

fn flatten<T>(
    joined: Result<Result<T, StoreError>, tokio::task::JoinError>,
) -> Result<T, PipelineError> {
    Ok(joined??)
}

/// Feeds broker payloads into the hub, one batch at a time, until the
/// ingress channel closes.
pub async fn run_pipeline(hub: Arc<StationHub>, mut payloads: mpsc::Receiver<Vec<u8>>) {
    while let Some(payload) = payloads.recv().await {
        match hub.ingest(&payload).await {
            Ok(outcome) => tracing::debug!(
                received = outcome.received,
                rejected = outcome.rejected,
                changed = outcome.changed,
                delivered = outcome.delivered,
                "telemetry batch processed"
            ),
            Err(error) => tracing::warn!(
                %error,
                bytes = payload.len(),
                "dropping unparseable telemetry payload"
            ),
        }
    }
    tracing::info!("ingress channel closed, pipeline stopped");
}
