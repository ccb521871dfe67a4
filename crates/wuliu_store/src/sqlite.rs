use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Transaction, params};
use wuliu_core::{HistoryRecord, StationIndex, StationState, StoredStation};

use crate::pool::ConnectionPool;
use crate::{StationRepository, StoreError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS station_data (
    station_index INTEGER PRIMARY KEY CHECK (station_index >= 0 AND station_index < 40),
    occupied      INTEGER NOT NULL,
    call_station  INTEGER NOT NULL,
    station_type  INTEGER NOT NULL,
    old_station   INTEGER NOT NULL,
    created_at    TEXT    NOT NULL,
    updated_at    TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_station_data_updated_at ON station_data (updated_at);

CREATE TABLE IF NOT EXISTS station_history (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    station_index INTEGER NOT NULL CHECK (station_index >= 0 AND station_index < 40),
    occupied      INTEGER NOT NULL,
    call_station  INTEGER NOT NULL,
    station_type  INTEGER NOT NULL,
    old_station   INTEGER NOT NULL,
    data_snapshot TEXT    NOT NULL,
    created_at    TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_station_history_station_index ON station_history (station_index);
CREATE INDEX IF NOT EXISTS idx_station_history_created_at ON station_history (created_at);
";

const UPSERT_CURRENT: &str = "
INSERT INTO station_data
    (station_index, occupied, call_station, station_type, old_station, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
ON CONFLICT (station_index) DO UPDATE SET
    occupied     = excluded.occupied,
    call_station = excluded.call_station,
    station_type = excluded.station_type,
    old_station  = excluded.old_station,
    updated_at   = excluded.updated_at
";

const APPEND_HISTORY: &str = "
INSERT INTO station_history
    (station_index, occupied, call_station, station_type, old_station, data_snapshot, created_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
";

/// SQLite-backed station repository.
pub struct SqliteRepository {
    pool: ConnectionPool,
}

impl SqliteRepository {
    /// Opens the database and makes sure both tables exist.
    pub fn open(path: &Path, pool_size: usize, timeout: Duration) -> Result<Self, StoreError> {
        let repository = SqliteRepository {
            pool: ConnectionPool::open(path, pool_size, timeout)?,
        };
        repository.init_schema()?;
        Ok(repository)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.pool.get()?.execute_batch(SCHEMA)?;
        tracing::info!(pool_size = self.pool.size(), "database schema ready");
        Ok(())
    }

    fn write_station(
        tx: &Transaction<'_>,
        state: &StationState,
        created_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        tx.execute(
            UPSERT_CURRENT,
            params![
                state.index.get(),
                state.occupied,
                state.call_station,
                state.station_type,
                state.old_station,
                state.updated_at,
            ],
        )?;
        tx.execute(
            APPEND_HISTORY,
            params![
                state.index.get(),
                state.occupied,
                state.call_station,
                state.station_type,
                state.old_station,
                serde_json::to_string(state)?,
                created_at,
            ],
        )?;
        Ok(())
    }
}

impl StationRepository for SqliteRepository {
    fn save_changes(&self, changed: &[StationState]) -> Result<(), StoreError> {
        if changed.is_empty() {
            return Ok(());
        }
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let created_at = Utc::now();
        for state in changed {
            Self::write_station(&tx, state, created_at)?;
        }
        // Dropping an uncommitted transaction rolls it back.
        tx.commit()?;
        Ok(())
    }

    fn load_current(&self) -> Result<Vec<StoredStation>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT station_index, occupied, call_station, station_type, old_station, updated_at
             FROM station_data
             ORDER BY station_index ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(StoredStation {
                index: row.get(0)?,
                occupied: row.get(1)?,
                call_station: row.get(2)?,
                station_type: row.get(3)?,
                old_station: row.get(4)?,
                updated_at: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn history(&self, index: StationIndex, limit: usize) -> Result<Vec<HistoryRecord>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, occupied, call_station, station_type, old_station, data_snapshot, created_at
             FROM station_history
             WHERE station_index = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![index.get(), limit], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, bool>(1)?,
                row.get::<_, bool>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, DateTime<Utc>>(6)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, occupied, call_station, station_type, old_station, snapshot, created_at) =
                row?;
            records.push(HistoryRecord {
                id,
                index,
                occupied,
                call_station,
                station_type,
                old_station,
                data_snapshot: serde_json::from_str(&snapshot)?,
                created_at,
            });
        }
        Ok(records)
    }
}
