//! Telemetry data types flowing through the pipeline.
//!
//! Coordinates are in decimal degrees (WGS84 range) and battery level is a
//! percentage:
//! - Longitude in [-180, 180]
//! - Latitude in [-90, 90]
//! - Battery in [0, 100]

use crate::codec::DecodeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Device id used when an inbound message does not carry one.
pub const UNKNOWN_DEVICE_ID: &str = "unknown";

/// JSON body published by a tracker, as it appears on the bus.
///
/// Every field is optional on the wire. Defaults are applied by
/// [`RawTelemetryMessage::from_body`]:
/// - `id` defaults to [`UNKNOWN_DEVICE_ID`]
/// - `payload`, `date` and `time` default to an empty string
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TelemetryBody {
    pub id: Option<String>,
    pub payload: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
}

/// One inbound telemetry message with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTelemetryMessage {
    /// Device identifier reported by the tracker
    pub device_id: String,
    /// Hex-encoded position/battery payload
    pub payload_hex: String,
    /// Date as reported by the device (opaque)
    pub reported_date: String,
    /// Time of day as reported by the device (opaque)
    pub reported_time: String,
    /// Bus topic the message arrived on
    pub bus_topic: String,
}

impl RawTelemetryMessage {
    pub fn from_body(bus_topic: impl Into<String>, body: TelemetryBody) -> Self {
        Self {
            device_id: body.id.unwrap_or_else(|| UNKNOWN_DEVICE_ID.to_string()),
            payload_hex: body.payload.unwrap_or_default(),
            reported_date: body.date.unwrap_or_default(),
            reported_time: body.time.unwrap_or_default(),
            bus_topic: bus_topic.into(),
        }
    }
}

/// Integer codes carried in the payload before scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadCodes {
    pub lon16: u16,
    pub lat16: u16,
    pub batt8: u8,
}

/// A successfully decoded position fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    /// Longitude in degrees
    pub longitude: f64,
    /// Latitude in degrees
    pub latitude: f64,
    /// Battery level in percent (0-100)
    pub battery_percent: u8,
    /// Raw codes the values were scaled from
    pub codes: PayloadCodes,
    /// True when the payload was shorter than 10 digits and zero-filled
    pub padded: bool,
}

/// Result of decoding one payload: either a fix or the reason it failed.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedReading {
    /// Payload exactly as received
    pub raw_hex: String,
    pub outcome: Result<Fix, DecodeError>,
}

impl DecodedReading {
    pub fn fix(&self) -> Option<&Fix> {
        self.outcome.as_ref().ok()
    }

    pub fn decode_error(&self) -> Option<&DecodeError> {
        self.outcome.as_ref().err()
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// A stored position, immutable once appended to the readings store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogEntry {
    /// Reception time (UTC) at the relay, not the device-reported time
    pub received_at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
}

/// Live event pushed to every connected observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastEvent {
    pub topic: String,
    pub device_id: String,
    #[serde(rename = "date")]
    pub reported_date: String,
    #[serde(rename = "time")]
    pub reported_time: String,
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lon")]
    pub longitude: f64,
    #[serde(rename = "battery")]
    pub battery_percent: u8,
}

impl BroadcastEvent {
    pub fn new(message: &RawTelemetryMessage, fix: &Fix) -> Self {
        Self {
            topic: message.bus_topic.clone(),
            device_id: message.device_id.clone(),
            reported_date: message.reported_date.clone(),
            reported_time: message.reported_time.clone(),
            latitude: fix.latitude,
            longitude: fix.longitude,
            battery_percent: fix.battery_percent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_body_applies_defaults() {
        let msg = RawTelemetryMessage::from_body("t", TelemetryBody::default());
        assert_eq!(msg.device_id, "unknown");
        assert_eq!(msg.payload_hex, "");
        assert_eq!(msg.reported_date, "");
        assert_eq!(msg.reported_time, "");
        assert_eq!(msg.bus_topic, "t");
    }

    #[test]
    fn test_from_body_keeps_present_fields() {
        let body: TelemetryBody = serde_json::from_str(
            r#"{"id":"ESP32_001","payload":"B1C84F6E64","date":"2025-11-03","time":"20:16:05"}"#,
        )
        .unwrap();
        let msg = RawTelemetryMessage::from_body("v1/devices/ESP32_001/telemetry", body);
        assert_eq!(msg.device_id, "ESP32_001");
        assert_eq!(msg.payload_hex, "B1C84F6E64");
        assert_eq!(msg.reported_date, "2025-11-03");
        assert_eq!(msg.reported_time, "20:16:05");
    }

    #[test]
    fn test_body_ignores_unknown_fields() {
        let body: TelemetryBody =
            serde_json::from_str(r#"{"id":"a","rssi":-70,"extra":{"x":1}}"#).unwrap();
        assert_eq!(body.id.as_deref(), Some("a"));
        assert!(body.payload.is_none());
    }

    #[test]
    fn test_broadcast_event_wire_names() {
        let event = BroadcastEvent {
            topic: "t".to_string(),
            device_id: "d".to_string(),
            reported_date: "2025-11-03".to_string(),
            reported_time: "20:16:05".to_string(),
            latitude: 1.5,
            longitude: -2.5,
            battery_percent: 42,
        };
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["topic"], "t");
        assert_eq!(json["device_id"], "d");
        assert_eq!(json["date"], "2025-11-03");
        assert_eq!(json["time"], "20:16:05");
        assert_eq!(json["lat"], 1.5);
        assert_eq!(json["lon"], -2.5);
        assert_eq!(json["battery"], 42);
    }
}
