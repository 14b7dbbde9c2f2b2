//! MQTT source backed by `rumqttc`.
//!
//! Subscribes to a single topic and forwards every publish. The broker's
//! retained message (the last position it saw) is forwarded too, unless
//! `ignore_retained` is set.
//! Connection errors are logged and retried after a delay; `rumqttc`
//! reconnects on the next poll, and the subscription is renewed on every
//! ConnAck since the session is clean.

use super::{BusMessage, MESSAGE_CHANNEL_BUFFER_SIZE, SourceError, TelemetrySource};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, Publish, QoS};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Capacity of the request channel between client handle and event loop.
const CLIENT_REQUEST_CAPACITY: usize = 10;

/// How long to keep polling after a disconnect request on shutdown.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub client_id: String,
    pub keep_alive: Duration,
    pub retry_delay: Duration,
    /// Skip retained publishes replayed by the broker on subscribe
    pub ignore_retained: bool,
}

impl MqttConfig {
    fn validate(&self) -> Result<(), SourceError> {
        if self.topic.trim().is_empty() {
            return Err(SourceError::Config("MQTT topic must not be empty".into()));
        }
        if self.client_id.is_empty() {
            return Err(SourceError::Config("MQTT client id must not be empty".into()));
        }
        if !self.keep_alive.is_zero() && self.keep_alive < Duration::from_secs(1) {
            return Err(SourceError::Config(format!(
                "MQTT keep-alive must be zero or at least one second, got {:?}",
                self.keep_alive
            )));
        }
        Ok(())
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        options
    }
}

/// Telemetry source reading from an MQTT broker.
#[derive(Debug, Clone)]
pub struct MqttSource {
    config: MqttConfig,
}

impl MqttSource {
    pub fn new(config: MqttConfig) -> Self {
        Self { config }
    }
}

impl TelemetrySource for MqttSource {
    fn start(
        &self,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<BusMessage>, SourceError>> + Send + '_>>
    {
        Box::pin(async move {
            self.config.validate()?;

            let (client, eventloop) = AsyncClient::new(self.config.options(), CLIENT_REQUEST_CAPACITY);
            let (tx, rx) = mpsc::channel(MESSAGE_CHANNEL_BUFFER_SIZE);

            info!(
                host = %self.config.host,
                port = self.config.port,
                topic = %self.config.topic,
                "starting MQTT source"
            );

            // The task owns the client and event loop for the life of the source
            tokio::spawn(run_event_loop(
                client,
                eventloop,
                self.config.topic.clone(),
                self.config.retry_delay,
                self.config.ignore_retained,
                tx,
                cancel,
            ));

            Ok(rx)
        })
    }
}

/// Turn a publish into a bus message, or `None` when it is to be skipped.
fn accept_publish(publish: Publish, ignore_retained: bool) -> Option<BusMessage> {
    if publish.retain && ignore_retained {
        debug!(topic = %publish.topic, "ignoring retained message");
        return None;
    }
    Some(BusMessage {
        topic: publish.topic,
        payload: publish.payload.to_vec(),
    })
}

#[instrument(name = "mqtt_source", skip_all, fields(topic = %topic))]
async fn run_event_loop(
    client: AsyncClient,
    mut eventloop: EventLoop,
    topic: String,
    retry_delay: Duration,
    ignore_retained: bool,
    tx: mpsc::Sender<BusMessage>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("MQTT source cancelled");
                break;
            }
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("connected to MQTT broker");
                if let Err(e) = client.try_subscribe(&topic, QoS::AtLeastOnce) {
                    error!(error = %e, "failed to request subscription");
                }
            }
            Ok(Event::Incoming(Packet::SubAck(_))) => {
                info!("subscribed to MQTT topic");
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let Some(message) = accept_publish(publish, ignore_retained) else {
                    continue;
                };
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = tx.send(message) => {
                        if sent.is_err() {
                            debug!("message receiver dropped, stopping MQTT source");
                            break;
                        }
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, retry_in = ?retry_delay, "MQTT connection error");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(retry_delay) => {}
                }
            }
        }
    }

    if client.try_disconnect().is_ok() {
        // drive the event loop long enough to flush the DISCONNECT packet
        let _ = tokio::time::timeout(DISCONNECT_GRACE, eventloop.poll()).await;
    }
    info!("MQTT source stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MqttConfig {
        MqttConfig {
            host: "localhost".to_string(),
            port: 1883,
            topic: "v1/devices/ESP32_001/telemetry".to_string(),
            client_id: "gps-telemetry-relay".to_string(),
            keep_alive: Duration::from_secs(60),
            retry_delay: Duration::from_secs(3),
            ignore_retained: false,
        }
    }

    fn publish(retain: bool) -> Publish {
        let mut publish = Publish::new(
            "v1/devices/ESP32_001/telemetry",
            QoS::AtLeastOnce,
            br#"{"payload":"B1C84F6E64"}"#.to_vec(),
        );
        publish.retain = retain;
        publish
    }

    #[test]
    fn test_retained_publish_forwarded_by_default() {
        let message = accept_publish(publish(true), false).unwrap();
        assert_eq!(message.topic, "v1/devices/ESP32_001/telemetry");
        assert_eq!(message.payload, br#"{"payload":"B1C84F6E64"}"#.to_vec());
    }

    #[test]
    fn test_retained_publish_skipped_when_ignored() {
        assert!(accept_publish(publish(true), true).is_none());
        assert!(accept_publish(publish(false), true).is_some());
    }

    #[test]
    fn test_valid_config() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_empty_topic_rejected() {
        let mut cfg = config();
        cfg.topic = "  ".to_string();
        assert!(matches!(cfg.validate(), Err(SourceError::Config(_))));
    }

    #[test]
    fn test_empty_client_id_rejected() {
        let mut cfg = config();
        cfg.client_id.clear();
        assert!(matches!(cfg.validate(), Err(SourceError::Config(_))));
    }

    #[test]
    fn test_sub_second_keep_alive_rejected() {
        let mut cfg = config();
        cfg.keep_alive = Duration::from_millis(500);
        assert!(matches!(cfg.validate(), Err(SourceError::Config(_))));

        cfg.keep_alive = Duration::ZERO;
        assert!(cfg.validate().is_ok());
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let mut cfg = config();
        cfg.topic.clear();
        let source = MqttSource::new(cfg);
        assert!(source.start(CancellationToken::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_cancelled_source_closes_channel() {
        // nothing listens on port 1; the loop sits in retry until cancelled
        let mut cfg = config();
        cfg.host = "127.0.0.1".to_string();
        cfg.port = 1;
        let source = MqttSource::new(cfg);
        let cancel = CancellationToken::new();

        let mut rx = source.start(cancel.clone()).await.unwrap();
        cancel.cancel();
        assert!(rx.recv().await.is_none());
    }
}
