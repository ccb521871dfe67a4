//! Broker side of ingress: keeps an MQTT subscription alive and forwards
//! every publish on the telemetry topic into the pipeline queue.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::config::Config;

// Large enough for a full 40-station batch with room to spare.
const MAX_PACKET_SIZE: usize = 256 * 1024;

/// Doubling reconnect delay between `min` and `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Backoff { min, max, next: min }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.min;
    }
}

/// Runs the broker event loop until the pipeline side of the queue closes.
///
/// Connection errors never end the loop: the client reconnects after a
/// backoff delay and subscribes again on every connection acknowledgement.
///
/// The event loop is not polled while a payload waits for room in the
/// bounded queue, so no keep-alive pings go out during that time. A stall
/// longer than the keep-alive interval makes the broker drop the
/// connection, which is then re-established through the backoff path.
/// `INGRESS_QUEUE` should be large enough to absorb bursts while a slow
/// persistence call holds the pipeline.
pub async fn run(config: Config, ingress: mpsc::Sender<Vec<u8>>) {
    let broker = &config.mqtt_broker;
    let mut options = MqttOptions::new(&config.mqtt_client_id, &broker.host, broker.port);
    options
        .set_keep_alive(config.mqtt_keep_alive())
        .set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);

    let (client, mut eventloop) = AsyncClient::new(options, 10);
    let (min, max) = config.mqtt_reconnect_bounds();
    let mut backoff = Backoff::new(min, max);

    tracing::info!(%broker, topic = %config.mqtt_topic, "connecting to broker");
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                backoff.reset();
                tracing::info!(%broker, "connected to broker");
                if let Err(error) = client.try_subscribe(&config.mqtt_topic, QoS::AtMostOnce) {
                    tracing::error!(%error, topic = %config.mqtt_topic, "failed to subscribe");
                }
            }
            Ok(Event::Incoming(Packet::SubAck(_))) => {
                tracing::info!(topic = %config.mqtt_topic, "subscribed");
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                tracing::debug!(topic = %publish.topic, bytes = publish.payload.len(), "telemetry received");
                if !forward(&ingress, publish.payload.to_vec()).await {
                    tracing::info!("pipeline stopped, leaving broker loop");
                    return;
                }
            }
            Ok(_) => {}
            Err(error) => {
                let delay = backoff.next_delay();
                tracing::warn!(%error, ?delay, "broker connection lost, reconnecting");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Queues one payload for the pipeline, waiting while the queue is full.
///
/// Returns `false` once the pipeline has stopped.
async fn forward(ingress: &mpsc::Sender<Vec<u8>>, payload: Vec<u8>) -> bool {
    match ingress.try_send(payload) {
        Ok(()) => true,
        Err(TrySendError::Full(payload)) => {
            tracing::warn!(
                capacity = ingress.max_capacity(),
                "ingress queue full, broker loop paused"
            );
            ingress.send(payload).await.is_ok()
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_forward_waits_for_room() {
        let (tx, mut rx) = mpsc::channel(1);
        assert!(forward(&tx, b"first".to_vec()).await);

        let pending = tokio::spawn({
            let tx = tx.clone();
            async move { forward(&tx, b"second".to_vec()).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        assert_eq!(rx.recv().await.unwrap(), b"first");
        assert!(pending.await.unwrap());
        assert_eq!(rx.recv().await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_forward_stops_when_pipeline_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        assert!(!forward(&tx, b"payload".to_vec()).await);
    }

    #[test]
    fn test_backoff_doubles_up_to_max() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(500));
        let delays: Vec<u64> = (0..5)
            .map(|_| backoff.next_delay().as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }
}
