//! Per-message ingestion: parse, decode, store, broadcast.
//!
//! Nothing in here returns an error to the bus transport. Every failure ends
//! up as an [`IngestOutcome`] variant plus a log line, and the next message is
//! handled as usual.

use crate::broadcast::{Broadcaster, PublishReport};
use crate::codec::{self, DecodeError};
use crate::reading::{BroadcastEvent, Fix, RawTelemetryMessage, TelemetryBody};
use crate::store::ReadingsStore;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Error types for inbound messages that cannot be read at all.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Message body is not UTF-8: {0}")]
    NotUtf8(#[from] std::str::Utf8Error),
    #[error("Message body is not a telemetry object: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Parse a bus message body into a [`RawTelemetryMessage`].
pub fn parse_message(topic: &str, body: &[u8]) -> Result<RawTelemetryMessage, IngestError> {
    let text = std::str::from_utf8(body)?;
    let body: TelemetryBody = serde_json::from_str(text.trim_end())?;
    Ok(RawTelemetryMessage::from_body(topic, body))
}

/// What happened to one inbound message.
#[derive(Debug)]
pub enum IngestOutcome {
    /// Decoded, appended to the store and handed to the broadcaster
    Stored { fix: Fix, publish: PublishReport },
    /// The payload did not decode; nothing was stored or broadcast
    RejectedPayload(DecodeError),
    /// The message itself could not be parsed
    Malformed(IngestError),
}

/// Running totals over handled messages.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    pub received: u64,
    pub stored: u64,
    pub rejected_payloads: u64,
    pub malformed_messages: u64,
}

impl IngestStats {
    pub fn record(&mut self, outcome: &IngestOutcome) {
        self.received += 1;
        match outcome {
            IngestOutcome::Stored { .. } => self.stored += 1,
            IngestOutcome::RejectedPayload(_) => self.rejected_payloads += 1,
            IngestOutcome::Malformed(_) => self.malformed_messages += 1,
        }
    }
}

/// Ties the codec to the two sinks of a decoded reading.
///
/// Cheap to clone; clones share the same store and broadcaster. Safe to call
/// from several tasks at once since all shared state sits behind the store's
/// and the broadcaster's own locks.
#[derive(Debug, Clone)]
pub struct IngestionHandler {
    store: Arc<ReadingsStore>,
    broadcaster: Arc<Broadcaster>,
}

impl IngestionHandler {
    pub fn new(store: Arc<ReadingsStore>, broadcaster: Arc<Broadcaster>) -> Self {
        Self { store, broadcaster }
    }

    /// Handle one parsed message.
    pub fn handle(&self, message: &RawTelemetryMessage) -> IngestOutcome {
        let reading = codec::decode(&message.payload_hex);

        let fix = match reading.outcome {
            Ok(fix) => fix,
            Err(error) => {
                warn!(
                    device_id = %message.device_id,
                    topic = %message.bus_topic,
                    payload = %reading.raw_hex,
                    error = %error,
                    "dropping undecodable payload"
                );
                return IngestOutcome::RejectedPayload(error);
            }
        };

        if fix.padded {
            debug!(
                device_id = %message.device_id,
                payload = %reading.raw_hex,
                "short payload zero-filled"
            );
        }

        self.store.record(fix.latitude, fix.longitude);

        let publish = self.broadcaster.publish(BroadcastEvent::new(message, &fix));
        debug!(
            device_id = %message.device_id,
            lat = fix.latitude,
            lon = fix.longitude,
            battery = fix.battery_percent,
            observers = publish.queued,
            "reading stored"
        );

        IngestOutcome::Stored { fix, publish }
    }

    /// Parse and handle a raw bus message.
    pub fn handle_raw(&self, topic: &str, body: &[u8]) -> IngestOutcome {
        match parse_message(topic, body) {
            Ok(message) => self.handle(&message),
            Err(error) => {
                warn!(topic = %topic, error = %error, "dropping malformed message");
                IngestOutcome::Malformed(error)
            }
        }
    }
}
