//! Wuliu dashboard service
//!
//! HTTP and WebSocket surface of the station dashboard, the synchronization
//! hub behind it and the MQTT ingress that feeds it.

pub mod broadcast;
pub mod config;
mod error;
pub mod hub;
pub mod mqtt;
pub mod state;
mod stations;
mod viewer;

use std::path::Path;

use axum::{Router, routing::get};
use tower_http::{services::ServeDir, trace::TraceLayer};

pub use crate::state::AppState;

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "OK"
}

/// Create the application router with all endpoints
///
/// When `static_dir` is given, unmatched paths are served from it.
pub fn create_app(app_state: AppState, static_dir: Option<&Path>) -> Router {
    let router = Router::new()
        .route("/health", get(health_check))
        .route("/api/stations", get(stations::get_station_names))
        .route(
            "/api/stations/{index}/history",
            get(stations::get_station_history),
        )
        .route("/ws", get(viewer::ws_handler));

    let router = match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    };

    router.layer(TraceLayer::new_for_http()).with_state(app_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::Broadcaster;
    use crate::error::ErrorResponse;
    use crate::hub::StationHub;
    use crate::stations::{HistoryResponse, StationNamesResponse};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::util::ServiceExt;
    use wuliu_store::SqliteRepository;

    fn test_state() -> (TempDir, AppState) {
        let dir = tempfile::tempdir().unwrap();
        let repository =
            SqliteRepository::open(&dir.path().join("stations.db"), 2, Duration::from_secs(1))
                .unwrap();
        let hub = StationHub::new(
            Arc::new(repository),
            Broadcaster::new(8),
            Duration::from_secs(1),
        );
        (dir, AppState::new(Arc::new(hub)))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(app: Router, uri: &str) -> (StatusCode, T) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (_dir, state) = test_state();
        let app = create_app(state, None);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_station_names_endpoint() {
        let (_dir, state) = test_state();
        let (status, names): (_, StationNamesResponse) =
            get_json(create_app(state, None), "/api/stations").await;

        assert_eq!(status, StatusCode::OK);
        assert!(names.success);
        assert_eq!(names.data.len(), 40);
        assert_eq!(names.data[&16], "17号对接站台");
    }

    #[tokio::test]
    async fn test_station_history_endpoint() {
        let (_dir, state) = test_state();
        let hub = Arc::clone(&state.hub);
        hub.ingest(br#"{"index":5,"Occupied":true,"CallStation":false,"Type":1,"OldStation":5}"#)
            .await
            .unwrap();
        hub.ingest(br#"{"index":5,"Occupied":false,"CallStation":false,"Type":1,"OldStation":5}"#)
            .await
            .unwrap();

        let app = create_app(state, None);
        let (status, history): (_, HistoryResponse) =
            get_json(app.clone(), "/api/stations/5/history").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(history.data.len(), 2);
        assert!(!history.data[0].occupied);

        let (_, limited): (_, HistoryResponse) =
            get_json(app, "/api/stations/5/history?limit=1").await;
        assert_eq!(limited.data.len(), 1);
    }

    #[tokio::test]
    async fn test_history_of_unknown_station() {
        let (_dir, state) = test_state();
        let (status, error): (_, ErrorResponse) =
            get_json(create_app(state, None), "/api/stations/45/history").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(error.error, "NOT_FOUND");
        assert!(error.message.contains("45"));
    }
}
