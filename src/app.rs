//! Core application runner for `gps-telemetry-relay`.
//!
//! This module is decoupled from CLI parsing, signal handling and process
//! exit codes so the whole pipeline can be driven from tests with a fake
//! source and a recording observer.

use crate::broadcast::{
    Broadcaster, DELIVERY_TIMEOUT, OBSERVER_BUFFER_SIZE, ObserverSink, ObserverStats, run_observer,
};
use crate::duration::parse_duration;
use crate::export::{self, ExportError};
use crate::ingest::{IngestStats, IngestionHandler};
use crate::source::{SourceError, TelemetrySource};
use crate::store::ReadingsStore;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

/// Topic the trackers publish on by default.
pub const DEFAULT_TOPIC: &str = "v1/devices/ESP32_001/telemetry";

/// Configuration for the relay.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// MQTT broker host name or address
    #[arg(long, default_value = "localhost")]
    pub mqtt_host: String,

    /// MQTT broker port
    #[arg(long, default_value_t = 1883)]
    pub mqtt_port: u16,

    /// Topic to subscribe to for tracker telemetry
    #[arg(long, default_value = DEFAULT_TOPIC)]
    pub topic: String,

    /// MQTT client id
    #[arg(long, default_value = "gps-telemetry-relay")]
    pub client_id: String,

    /// MQTT keep-alive interval.
    /// Accepts duration with suffix: 3s, 1m, 500ms, 2h.
    #[arg(long, value_parser = parse_duration, default_value = "60s")]
    pub keep_alive: Duration,

    /// Delay before polling the broker again after a connection error
    #[arg(long, value_parser = parse_duration, default_value = "3s")]
    pub retry_delay: Duration,

    /// Skip the retained message the broker replays on subscribe
    #[arg(long)]
    pub ignore_retained: bool,

    /// Number of events buffered per observer before events are dropped for it
    #[arg(long, default_value_t = OBSERVER_BUFFER_SIZE)]
    pub observer_buffer: usize,

    /// Longest time a single delivery to one observer may take
    #[arg(long, value_parser = parse_duration, default_value = "2s")]
    pub delivery_timeout: Duration,

    /// Write the readings history as CSV to this file on shutdown
    #[arg(long, value_name = "PATH")]
    pub export_path: Option<PathBuf>,

    /// Also rewrite the export file at this interval
    #[arg(long, value_parser = parse_duration, requires = "export_path")]
    pub export_interval: Option<Duration>,

    /// Do not print live events to stdout
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    /// Verbose output, log every reading and skipped payload
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            mqtt_host: "localhost".to_string(),
            mqtt_port: 1883,
            topic: DEFAULT_TOPIC.to_string(),
            client_id: "gps-telemetry-relay".to_string(),
            keep_alive: Duration::from_secs(60),
            retry_delay: Duration::from_secs(3),
            ignore_retained: false,
            observer_buffer: OBSERVER_BUFFER_SIZE,
            delivery_timeout: DELIVERY_TIMEOUT,
            export_path: None,
            export_interval: None,
            quiet: false,
            verbose: false,
        }
    }
}

#[cfg(feature = "mqtt")]
impl Options {
    /// Broker settings for [`crate::source::mqtt::MqttSource`].
    pub fn mqtt_config(&self) -> crate::source::mqtt::MqttConfig {
        crate::source::mqtt::MqttConfig {
            host: self.mqtt_host.clone(),
            port: self.mqtt_port,
            topic: self.topic.clone(),
            client_id: self.client_id.clone(),
            keep_alive: self.keep_alive,
            retry_delay: self.retry_delay,
            ignore_retained: self.ignore_retained,
        }
    }
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error("Background task failed: {0}")]
    Task(#[from] JoinError),
}

/// What a finished run did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub ingest: IngestStats,
    /// Present when an observer sink was attached
    pub observer: Option<ObserverStats>,
    /// Rows in the final export, when an export path was set
    pub exported_rows: Option<usize>,
}

/// Consume messages from `source` until it closes or `cancel` fires.
#[instrument(name = "ingestion", skip_all)]
pub async fn run_ingestion(
    source: &dyn TelemetrySource,
    handler: &IngestionHandler,
    cancel: CancellationToken,
) -> Result<IngestStats, RunError> {
    let mut messages = source.start(cancel.clone()).await?;
    let mut stats = IngestStats::default();

    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            message = messages.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };
        stats.record(&handler.handle_raw(&message.topic, &message.payload));
    }

    info!(
        received = stats.received,
        stored = stats.stored,
        rejected_payloads = stats.rejected_payloads,
        malformed_messages = stats.malformed_messages,
        "ingestion stopped"
    );
    Ok(stats)
}

/// Rewrite the export file every `interval` until cancelled.
///
/// A failed write is logged and retried on the next tick.
#[instrument(name = "export_schedule", skip_all, fields(path = %path.display()))]
pub async fn run_export_schedule(
    store: Arc<ReadingsStore>,
    path: PathBuf,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = export::write_csv(&store, &path).await {
                    error!(error = %e, "periodic export failed");
                }
            }
        }
    }
}

async fn final_export(store: &ReadingsStore, path: &Path) -> Result<usize, RunError> {
    Ok(export::write_csv(store, path).await?)
}

/// Run the relay: ingest from `source`, fan out to `sink`, export on exit.
///
/// - Every inbound message goes through the ingestion handler.
/// - When `sink` is given, one observer forwards every live event to it.
/// - When `options.export_path` is set, the history is written there on
///   exit (and every `options.export_interval`, if set).
///
/// After the source closes, buffered events are still delivered. After
/// `cancel` fires, delivery stops at the next event boundary.
pub async fn run_with_io<S>(
    options: Options,
    source: &dyn TelemetrySource,
    sink: Option<S>,
    cancel: CancellationToken,
) -> Result<RunSummary, RunError>
where
    S: ObserverSink + 'static,
{
    let store = Arc::new(ReadingsStore::new());
    let broadcaster = Arc::new(Broadcaster::new(options.observer_buffer));
    let handler = IngestionHandler::new(Arc::clone(&store), Arc::clone(&broadcaster));

    let observer = sink.map(|sink| {
        tokio::spawn(run_observer(
            broadcaster.subscribe(),
            sink,
            options.delivery_timeout,
            cancel.child_token(),
        ))
    });

    let export_cancel = cancel.child_token();
    let schedule = match (&options.export_path, options.export_interval) {
        (Some(path), Some(interval)) => Some(tokio::spawn(run_export_schedule(
            Arc::clone(&store),
            path.clone(),
            interval,
            export_cancel.clone(),
        ))),
        _ => None,
    };

    let ingest = run_ingestion(source, &handler, cancel).await;

    // Dropping the last broadcaster handle closes every observer channel,
    // letting observers drain what is already buffered.
    drop(handler);
    drop(broadcaster);

    export_cancel.cancel();
    if let Some(schedule) = schedule {
        schedule.await?;
    }

    let observer = match observer {
        Some(task) => Some(task.await?),
        None => None,
    };

    let ingest = ingest?;

    let exported_rows = match &options.export_path {
        Some(path) => Some(final_export(&store, path).await?),
        None => None,
    };

    Ok(RunSummary {
        ingest,
        observer,
        exported_rows,
    })
}
