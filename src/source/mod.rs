//! Message bus abstraction for tracker telemetry.
//!
//! A source delivers raw bus messages over a channel. The ingestion loop does
//! not care which bus produced them, which also lets tests feed messages
//! without a broker.

#[cfg(feature = "mqtt")]
pub mod mqtt;

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Channel buffer size for inbound bus messages.
pub const MESSAGE_CHANNEL_BUFFER_SIZE: usize = 100;

/// One message as received from the bus, body still undecoded.
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Error type for source operations.
#[derive(Error, Debug)]
pub enum SourceError {
    /// Broker connection or protocol error
    #[error("Bus error: {0}")]
    Bus(String),
    /// Invalid source configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// A stream of bus messages.
///
/// The returned receiver closes once the source stops, either because
/// `cancel` fired or because the bus gave up.
pub trait TelemetrySource: Send + Sync {
    fn start(
        &self,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<BusMessage>, SourceError>> + Send + '_>>;
}
