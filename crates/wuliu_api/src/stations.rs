use std::collections::BTreeMap;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use wuliu_core::{HistoryRecord, StationIndex, all_station_names};

use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_HISTORY_LIMIT: usize = 100;
const MAX_HISTORY_LIMIT: usize = 1000;

#[derive(Serialize, Deserialize)]
pub struct StationNamesResponse {
    pub success: bool,
    pub data: BTreeMap<u8, String>,
}

#[derive(Serialize, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize, Deserialize)]
pub struct HistoryResponse {
    pub success: bool,
    pub data: Vec<HistoryRecord>,
}

/// Get the display name of every station
pub async fn get_station_names() -> Json<StationNamesResponse> {
    let data = all_station_names()
        .into_iter()
        .map(|(index, name)| (index, name.to_string()))
        .collect();
    Json(StationNamesResponse {
        success: true,
        data,
    })
}

/// Get the most recent recorded changes of one station, newest first
pub async fn get_station_history(
    State(state): State<AppState>,
    Path(index): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let station = StationIndex::new(index)
        .ok_or_else(|| ApiError::NotFound(format!("Station {index} does not exist")))?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    tracing::info!(index, limit, "Getting station history");
    let data = state.hub.history(station, limit).await?;
    Ok(Json(HistoryResponse {
        success: true,
        data,
    }))
}
