use axum::extract::ws::Utf8Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use wuliu_core::StationState;

/// Events pushed to viewers.
///
/// Encoded as `{"event": "update", "data": [...]}`, where `data` is always
/// the full list of known stations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ViewerEvent {
    Update(Vec<StationState>),
}

pub fn encode_update(stations: Vec<StationState>) -> Result<Utf8Bytes, serde_json::Error> {
    let json = serde_json::to_string(&ViewerEvent::Update(stations))?;
    Ok(Utf8Bytes::from(json))
}

/// Fans encoded update frames out to every connected viewer.
///
/// Frames are encoded once and shared; a viewer that falls more than
/// `capacity` frames behind is told it lagged and resynchronizes from the
/// snapshot.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    sender: broadcast::Sender<Utf8Bytes>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Broadcaster { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Utf8Bytes> {
        self.sender.subscribe()
    }

    pub fn viewer_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Sends the given stations to all viewers. Returns how many received it.
    pub fn publish(&self, stations: Vec<StationState>) -> Result<usize, serde_json::Error> {
        let frame = encode_update(stations)?;
        // An error only means nobody is listening.
        Ok(self.sender.send(frame).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wuliu_core::StationIndex;

    fn stations() -> Vec<StationState> {
        vec![StationState::new(
            StationIndex::new(5).unwrap(),
            true,
            false,
            1,
            5,
            Utc::now(),
        )]
    }

    #[test]
    fn test_update_frame_format() {
        let frame = encode_update(stations()).unwrap();
        let json: serde_json::Value = serde_json::from_str(frame.as_str()).unwrap();
        assert_eq!(json["event"], "update");
        assert_eq!(json["data"][0]["index"], 5);
        assert_eq!(json["data"][0]["stationName"], "6号自动烟管焊04");
    }

    #[test]
    fn test_publish_without_viewers() {
        let broadcaster = Broadcaster::new(4);
        assert_eq!(broadcaster.viewer_count(), 0);
        assert_eq!(broadcaster.publish(stations()).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_every_viewer_receives_frame() {
        let broadcaster = Broadcaster::new(4);
        let mut first = broadcaster.subscribe();
        let mut second = broadcaster.subscribe();

        assert_eq!(broadcaster.publish(stations()).unwrap(), 2);

        for receiver in [&mut first, &mut second] {
            let frame = receiver.recv().await.unwrap();
            let event: ViewerEvent = serde_json::from_str(frame.as_str()).unwrap();
            let ViewerEvent::Update(data) = event;
            assert_eq!(data.len(), 1);
        }
    }
}
