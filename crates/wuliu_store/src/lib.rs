//! Durable storage of station state: one current-state row per station and
//! an append-only change history.

mod pool;
mod sqlite;

pub use crate::pool::{ConnectionPool, PooledConnection};
pub use crate::sqlite::SqliteRepository;

use std::time::Duration;

use thiserror::Error;
use wuliu_core::{HistoryRecord, StationIndex, StationState, StoredStation};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("could not serialize station snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("no database connection available within {0:?}")]
    PoolTimeout(Duration),
}

/// Persistence gateway for station state.
///
/// Methods block; async callers run them on a blocking thread.
pub trait StationRepository: Send + Sync + 'static {
    /// Upserts the current row and appends one history row for every state.
    ///
    /// The whole slice is written in one transaction: either every row
    /// commits or none does.
    fn save_changes(&self, changed: &[StationState]) -> Result<(), StoreError>;

    /// All persisted current-state rows, ordered by station index.
    fn load_current(&self) -> Result<Vec<StoredStation>, StoreError>;

    /// Most recent history rows of one station, newest first.
    fn history(&self, index: StationIndex, limit: usize) -> Result<Vec<HistoryRecord>, StoreError>;
}
