//! Push notifications to whoever is watching: the web event stream and,
//! optionally, an MQTT broker.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

pub const SENSOR_UPDATE: &str = "sensor_update";

/// Fire-and-forget event sink. Publishing never blocks and never fails the
/// caller; delivery problems are logged by the implementation.
pub trait Publisher: Send + Sync {
    fn publish(&self, event: &str, payload: &Value);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushEvent {
    pub event: String,
    pub payload: Value,
}

// ---------------------------------------------------------------------------
// In-process broadcast (feeds the SSE endpoint)
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<PushEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.tx.subscribe()
    }
}

impl Publisher for BroadcastPublisher {
    fn publish(&self, event: &str, payload: &Value) {
        // Err only means nobody is subscribed right now.
        let _ = self.tx.send(PushEvent {
            event: event.to_string(),
            payload: payload.clone(),
        });
    }
}

// ---------------------------------------------------------------------------
// MQTT
// ---------------------------------------------------------------------------

/// Publishes each event as JSON to `<prefix>/<event>`.
pub struct MqttPublisher {
    client: AsyncClient,
    prefix: String,
}

impl MqttPublisher {
    /// Returns the publisher and the event loop that must be driven with
    /// [`run_mqtt_loop`] for anything to reach the broker.
    pub fn new(host: &str, port: u16, prefix: &str) -> (Self, EventLoop) {
        let mut options = MqttOptions::new("irrigation-controller", host, port);
        options.set_keep_alive(Duration::from_secs(30));
        let (client, eventloop) = AsyncClient::new(options, 20);
        (
            Self {
                client,
                prefix: prefix.trim_end_matches('/').to_string(),
            },
            eventloop,
        )
    }

    pub fn topic(&self, event: &str) -> String {
        format!("{}/{event}", self.prefix)
    }
}

impl Publisher for MqttPublisher {
    fn publish(&self, event: &str, payload: &Value) {
        let topic = self.topic(event);
        let bytes = payload.to_string().into_bytes();
        if let Err(e) = self.client.try_publish(&topic, QoS::AtMostOnce, false, bytes) {
            warn!(%topic, "mqtt publish dropped: {e}");
        }
    }
}

/// Keep the MQTT connection alive, reconnecting after errors.
pub async fn run_mqtt_loop(mut eventloop: EventLoop) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => info!("mqtt connected"),
            Ok(Event::Incoming(Packet::Disconnect)) => warn!("mqtt disconnected"),
            Ok(_) => {}
            Err(e) => {
                error!("mqtt error: {e}. reconnecting...");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct Fanout {
    sinks: Vec<Arc<dyn Publisher>>,
}

impl Fanout {
    pub fn with(mut self, sink: Arc<dyn Publisher>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl Publisher for Fanout {
    fn publish(&self, event: &str, payload: &Value) {
        debug!(event, sinks = self.sinks.len(), "publish");
        for sink in &self.sinks {
            sink.publish(event, payload);
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
