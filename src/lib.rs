//! `gps-telemetry-relay` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup
//! and process exit codes. The pipeline itself lives here:
//!
//! - [`codec`] turns a tracker's hex payload into a position fix
//! - [`store`] keeps every decoded position in arrival order
//! - [`broadcast`] fans new readings out to live observers
//! - [`ingest`] ties the three together for each bus message
//! - [`export`] renders the stored history as CSV
//!
//! [`app`] runs the pipeline against a [`source::TelemetrySource`] and can be
//! tested deterministically with an injected source and observer.

pub mod app;
pub mod broadcast;
pub mod codec;
pub mod duration;
pub mod export;
pub mod ingest;
pub mod reading;
pub mod source;
pub mod store;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use broadcast::{Broadcaster, JsonLinesSink, ObserverSink, Subscription, run_observer};
pub use codec::{DecodeError, decode};
pub use export::{CsvFormatter, OutputFormatter, render_csv};
pub use ingest::{IngestOutcome, IngestStats, IngestionHandler};
pub use reading::{BroadcastEvent, DecodedReading, Fix, LogEntry, RawTelemetryMessage};
pub use source::{BusMessage, SourceError, TelemetrySource};
pub use store::ReadingsStore;
