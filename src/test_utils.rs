use crate::broadcast::{DeliveryError, ObserverSink};
use crate::reading::{BroadcastEvent, LogEntry, RawTelemetryMessage};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

/// Payload published by the simulated tracker.
pub const KNOWN_PAYLOAD: &str = "B1C84F6E64";

/// Topic the simulated tracker publishes on.
pub const TEST_TOPIC: &str = "v1/devices/ESP32_001/telemetry";

/// A log entry received `secs` seconds after the epoch.
pub fn entry(secs: i64, latitude: f64, longitude: f64) -> LogEntry {
    LogEntry {
        received_at: DateTime::<Utc>::from_timestamp(secs, 0).unwrap(),
        latitude,
        longitude,
    }
}

/// A broadcast event tagged with `seq` in the battery field so tests can
/// check ordering.
pub fn event(seq: u8) -> BroadcastEvent {
    BroadcastEvent {
        topic: TEST_TOPIC.to_string(),
        device_id: "ESP32_001".to_string(),
        reported_date: "2025-11-03".to_string(),
        reported_time: "20:16:05".to_string(),
        latitude: -34.15,
        longitude: 70.0,
        battery_percent: seq,
    }
}

/// A message from the simulated tracker carrying `payload_hex`.
pub fn message(payload_hex: &str) -> RawTelemetryMessage {
    RawTelemetryMessage {
        device_id: "ESP32_001".to_string(),
        payload_hex: payload_hex.to_string(),
        reported_date: "2025-11-03".to_string(),
        reported_time: "20:16:05".to_string(),
        bus_topic: TEST_TOPIC.to_string(),
    }
}

/// JSON body as the simulated tracker publishes it.
pub fn body(payload_hex: &str) -> Vec<u8> {
    format!(
        r#"{{"id":"ESP32_001","payload":"{payload_hex}","date":"2025-11-03","time":"20:16:05"}}"#
    )
    .into_bytes()
}

/// Sink that records every event it is given.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<BroadcastEvent>>>,
    fail: bool,
}

impl RecordingSink {
    /// A sink whose every send fails as if the peer disconnected.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Arc<Mutex<Vec<BroadcastEvent>>> {
        Arc::clone(&self.events)
    }
}

impl ObserverSink for RecordingSink {
    fn send<'a>(
        &'a mut self,
        event: &'a BroadcastEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), DeliveryError>> + Send + 'a>> {
        Box::pin(async move {
            if self.fail {
                return Err(DeliveryError::Disconnected);
            }
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        })
    }
}

/// Sink whose sends never complete.
#[derive(Debug, Default)]
pub struct StalledSink;

impl ObserverSink for StalledSink {
    fn send<'a>(
        &'a mut self,
        _event: &'a BroadcastEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), DeliveryError>> + Send + 'a>> {
        Box::pin(std::future::pending())
    }
}
