use axum::{
    extract::{
        State,
        ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use crate::hub::StationHub;
use crate::state::AppState;

/// Upgrades a viewer to the live update stream.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_viewer(socket, state))
}

async fn handle_viewer(socket: WebSocket, state: AppState) {
    let viewer = Uuid::new_v4();
    let hub = state.hub;
    let (mut sender, mut receiver) = socket.split();

    let (mut updates, first) = hub.connect_viewer().await;
    tracing::info!(%viewer, viewers = hub.broadcaster().viewer_count(), "viewer connected");
    match first {
        Ok(frame) => {
            if sender.send(Message::Text(frame)).await.is_err() {
                tracing::info!(%viewer, "viewer left before the first update");
                return;
            }
        }
        // The viewer still gets the next broadcast.
        Err(error) => tracing::error!(%viewer, %error, "failed to build initial station view"),
    }

    loop {
        tokio::select! {
            frame = next_frame(&hub, &mut updates, viewer) => {
                let Some(frame) = frame else { break };
                if sender.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Viewers only listen.
                Some(Ok(_)) => {}
            }
        }
    }

    tracing::info!(%viewer, "viewer disconnected");
}

/// The next frame for one viewer, or `None` once the hub is gone.
///
/// A viewer that fell behind the channel gets the full current view in
/// place of the frames it missed.
async fn next_frame(
    hub: &StationHub,
    updates: &mut broadcast::Receiver<Utf8Bytes>,
    viewer: Uuid,
) -> Option<Utf8Bytes> {
    match updates.recv().await {
        Ok(frame) => Some(frame),
        Err(RecvError::Lagged(skipped)) => {
            tracing::warn!(%viewer, skipped, "viewer lagged, resending full view");
            Some(hub.current_frame())
        }
        Err(RecvError::Closed) => None,
    }
}
