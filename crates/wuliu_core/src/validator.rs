use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::{StationIndex, StationState, StoredStation};

/// Why a candidate record was dropped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RejectReason {
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("record has no index")]
    MissingIndex,
    #[error("index {0} is not an integer")]
    IndexNotInteger(Value),
    #[error("index {0} is outside the station range 0..40")]
    IndexOutOfRange(i64),
    #[error("field {0} is missing")]
    MissingField(&'static str),
    #[error("field {field} should be {expected}, got {value}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
        value: Value,
    },
}

// Largest integer a JSON producer can represent exactly as a double.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

fn as_integer(value: &Value) -> Option<i64> {
    let Value::Number(number) = value else {
        return None;
    };
    if let Some(i) = number.as_i64() {
        return Some(i);
    }
    // Producers serializing through doubles send `5.0` for 5.
    number
        .as_f64()
        .filter(|f| f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER)
        .map(|f| f as i64)
}

fn bool_field(record: &Map<String, Value>, field: &'static str) -> Result<bool, RejectReason> {
    match record.get(field) {
        None => Err(RejectReason::MissingField(field)),
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(RejectReason::WrongType {
            field,
            expected: "a boolean",
            value: other.clone(),
        }),
    }
}

fn integer_field(record: &Map<String, Value>, field: &'static str) -> Result<i64, RejectReason> {
    let value = record.get(field).ok_or(RejectReason::MissingField(field))?;
    as_integer(value).ok_or_else(|| RejectReason::WrongType {
        field,
        expected: "an integer",
        value: value.clone(),
    })
}

/// Checks one raw telemetry record and normalizes it into a station state.
///
/// The returned state carries its resolved station name and `received_at` as
/// its update time. Fields the source sends beyond the five tracked ones
/// are ignored.
pub fn validate(record: &Value, received_at: DateTime<Utc>) -> Result<StationState, RejectReason> {
    let record = record.as_object().ok_or(RejectReason::NotAnObject)?;

    let raw_index = record.get("index").ok_or(RejectReason::MissingIndex)?;
    let index = as_integer(raw_index).ok_or_else(|| RejectReason::IndexNotInteger(raw_index.clone()))?;
    let index = StationIndex::new(index).ok_or(RejectReason::IndexOutOfRange(index))?;

    Ok(StationState::new(
        index,
        bool_field(record, "Occupied")?,
        bool_field(record, "CallStation")?,
        integer_field(record, "Type")?,
        integer_field(record, "OldStation")?,
        received_at,
    ))
}

/// Range-filters a persisted row and enriches it with its station name.
pub fn from_stored(row: StoredStation) -> Option<StationState> {
    let index = StationIndex::new(row.index)?;
    Some(StationState::new(
        index,
        row.occupied,
        row.call_station,
        row.station_type,
        row.old_station,
        row.updated_at,
    ))
}
