use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::names::station_name;

/// Number of physical station slots on the line.
pub const STATION_COUNT: u8 = 40;

/// Index of a station slot, always in `0..STATION_COUNT`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(try_from = "i64", into = "u8")]
pub struct StationIndex(u8);

impl StationIndex {
    pub fn new(index: i64) -> Option<Self> {
        if (0..i64::from(STATION_COUNT)).contains(&index) {
            Some(StationIndex(index as u8))
        } else {
            None
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Every valid index, in ascending order.
    pub fn all() -> impl Iterator<Item = StationIndex> {
        (0..STATION_COUNT).map(StationIndex)
    }
}

impl TryFrom<i64> for StationIndex {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        StationIndex::new(value)
            .ok_or_else(|| format!("station index {value} is outside 0..{STATION_COUNT}"))
    }
}

impl From<StationIndex> for u8 {
    fn from(index: StationIndex) -> u8 {
        index.0
    }
}

impl fmt::Display for StationIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current state of one station, as held in the snapshot and pushed to viewers.
///
/// Field names on the wire follow the telemetry source (`Occupied`,
/// `CallStation`, ...), with the derived `stationName` added.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StationState {
    pub index: StationIndex,
    #[serde(rename = "Occupied")]
    pub occupied: bool,
    #[serde(rename = "CallStation")]
    pub call_station: bool,
    #[serde(rename = "Type")]
    pub station_type: i64,
    #[serde(rename = "OldStation")]
    pub old_station: i64,
    #[serde(rename = "stationName")]
    pub station_name: String,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl StationState {
    pub fn new(
        index: StationIndex,
        occupied: bool,
        call_station: bool,
        station_type: i64,
        old_station: i64,
        updated_at: DateTime<Utc>,
    ) -> Self {
        StationState {
            index,
            occupied,
            call_station,
            station_type,
            old_station,
            station_name: station_name(index).to_string(),
            updated_at,
        }
    }

    /// Compares every reported field and the derived name, ignoring `updated_at`.
    pub fn same_state(&self, other: &StationState) -> bool {
        self.index == other.index
            && self.occupied == other.occupied
            && self.call_station == other.call_station
            && self.station_type == other.station_type
            && self.old_station == other.old_station
            && self.station_name == other.station_name
    }
}

/// A current-state row as read back from storage.
///
/// The index is kept raw: rows are range-filtered before they reach the snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredStation {
    pub index: i64,
    pub occupied: bool,
    pub call_station: bool,
    pub station_type: i64,
    pub old_station: i64,
    pub updated_at: DateTime<Utc>,
}

/// One immutable row of the per-station change log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub id: i64,
    pub index: StationIndex,
    pub occupied: bool,
    pub call_station: bool,
    #[serde(rename = "type")]
    pub station_type: i64,
    pub old_station: i64,
    /// Full serialized copy of the station state at the moment of change.
    pub data_snapshot: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
