//! Fan-out of decoded readings to live observers.
//!
//! Each observer owns a bounded channel. [`Broadcaster::publish`] only ever
//! calls `try_send`, so a slow or stalled observer loses events instead of
//! holding up ingestion or the other observers. The observer set has its own
//! lock, which is released before any event is handed over.
//!
//! A transport (stdout, WebSocket, ...) plugs in through [`ObserverSink`] and
//! is driven by [`run_observer`], which bounds every send with a timeout.

use crate::reading::BroadcastEvent;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default per-observer buffer size.
pub const OBSERVER_BUFFER_SIZE: usize = 16;

/// Default bound on a single delivery to one observer.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(2);

type EventSender = mpsc::Sender<Arc<BroadcastEvent>>;

#[derive(Debug, Default)]
struct ObserverSet {
    senders: Mutex<HashMap<ObserverId, EventSender>>,
}

impl ObserverSet {
    fn lock(&self) -> MutexGuard<'_, HashMap<ObserverId, EventSender>> {
        self.senders.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Identifier of a connected observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer-{}", self.0)
    }
}

/// Receiving end held by one observer.
///
/// Dropping the subscription removes the observer from the broadcaster.
#[derive(Debug)]
pub struct Subscription {
    id: ObserverId,
    rx: mpsc::Receiver<Arc<BroadcastEvent>>,
    set: Weak<ObserverSet>,
}

impl Subscription {
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Wait for the next event. `None` once the broadcaster is gone.
    pub async fn recv(&mut self) -> Option<Arc<BroadcastEvent>> {
        self.rx.recv().await
    }

    /// Take the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<BroadcastEvent>> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(set) = self.set.upgrade() {
            set.lock().remove(&self.id);
        }
    }
}

/// Outcome of a single [`Broadcaster::publish`] call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    /// Observers whose buffer accepted the event
    pub queued: usize,
    /// Observers whose buffer was full; the event was dropped for them
    pub dropped: usize,
    /// Observers found disconnected and removed
    pub removed: usize,
}

/// Set of live observers and the fan-out over them.
#[derive(Debug)]
pub struct Broadcaster {
    observers: Arc<ObserverSet>,
    next_id: AtomicU64,
    buffer: usize,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(OBSERVER_BUFFER_SIZE)
    }
}

impl Broadcaster {
    /// Create a broadcaster whose observers each buffer up to `buffer` events.
    pub fn new(buffer: usize) -> Self {
        Self {
            observers: Arc::default(),
            next_id: AtomicU64::new(1),
            // tokio channels reject a zero capacity
            buffer: buffer.max(1),
        }
    }

    /// Register a new observer. It receives every event published from now on.
    pub fn subscribe(&self) -> Subscription {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.buffer);
        self.observers.lock().insert(id, tx);
        debug!(observer = %id, "observer subscribed");

        Subscription {
            id,
            rx,
            set: Arc::downgrade(&self.observers),
        }
    }

    /// Remove an observer. Events still buffered for it are discarded.
    pub fn unsubscribe(&self, subscription: Subscription) {
        let id = subscription.id;
        self.observers.lock().remove(&id);
        debug!(observer = %id, "observer unsubscribed");
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    /// Queue `event` for every current observer without waiting on any.
    pub fn publish(&self, event: BroadcastEvent) -> PublishReport {
        let event = Arc::new(event);
        let targets: Vec<(ObserverId, EventSender)> = self
            .observers
            .lock()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut report = PublishReport::default();
        let mut closed = Vec::new();

        for (id, tx) in targets {
            match tx.try_send(Arc::clone(&event)) {
                Ok(()) => report.queued += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(observer = %id, device_id = %event.device_id, "observer buffer full, dropping event");
                    report.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => closed.push(id),
            }
        }

        if !closed.is_empty() {
            let mut observers = self.observers.lock();
            for id in &closed {
                observers.remove(id);
                debug!(observer = %id, "removed disconnected observer");
            }
            report.removed = closed.len();
        }

        report
    }
}

/// Error types for delivering an event to one observer.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),
    /// The peer went away
    #[error("Observer disconnected")]
    Disconnected,
}

/// Transport that pushes events to one observer.
pub trait ObserverSink: Send {
    fn send<'a>(
        &'a mut self,
        event: &'a BroadcastEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), DeliveryError>> + Send + 'a>>;

    /// Whether the sink can take another event after a send was abandoned
    /// midway. A byte stream that may hold part of an event cannot.
    fn can_resume(&self) -> bool {
        true
    }
}

/// Sink writing each event as one line of JSON.
///
/// A send abandoned partway through leaves a torn line on the stream, after
/// which the sink refuses to resume.
#[derive(Debug)]
pub struct JsonLinesSink<W> {
    writer: W,
    torn: bool,
}

impl<W> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            torn: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: AsyncWrite + Unpin + Send> ObserverSink for JsonLinesSink<W> {
    fn send<'a>(
        &'a mut self,
        event: &'a BroadcastEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), DeliveryError>> + Send + 'a>> {
        Box::pin(async move {
            let mut line = serde_json::to_vec(event)?;
            line.push(b'\n');
            self.torn = true;
            self.writer.write_all(&line).await?;
            self.writer.flush().await?;
            self.torn = false;
            Ok(())
        })
    }

    fn can_resume(&self) -> bool {
        !self.torn
    }
}

/// Counters for one observer's delivery loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ObserverStats {
    pub delivered: u64,
    pub timed_out: u64,
}

/// Drive one observer: forward its events to `sink` until cancelled, the
/// broadcaster goes away, or the sink fails.
///
/// Cancellation is only checked between events, so an event is either handed
/// to the sink in full or not at all. A send that exceeds `timeout` is
/// abandoned and the event is skipped for this observer, unless the sink
/// reports it cannot resume, in which case the observer is dropped.
#[instrument(name = "observer", skip_all, fields(observer = %subscription.id()))]
pub async fn run_observer<S: ObserverSink>(
    mut subscription: Subscription,
    mut sink: S,
    timeout: Duration,
    cancel: CancellationToken,
) -> ObserverStats {
    let mut stats = ObserverStats::default();

    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = subscription.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let sent = tokio::time::timeout(timeout, sink.send(&event)).await;
        match sent {
            Ok(Ok(())) => stats.delivered += 1,
            Ok(Err(error)) => {
                warn!(error = %error, "delivery failed, dropping observer");
                break;
            }
            Err(_) => {
                stats.timed_out += 1;
                if !sink.can_resume() {
                    warn!(device_id = %event.device_id, ?timeout, "delivery timed out mid-event, dropping observer");
                    break;
                }
                warn!(device_id = %event.device_id, ?timeout, "delivery timed out, skipping event");
            }
        }
    }

    info!(
        delivered = stats.delivered,
        timed_out = stats.timed_out,
        "observer stopped"
    );
    stats
}
