//! Relay channel: a persistent bidirectional message connection to the
//! signaling relay, speaking [`Envelope`]s instead of raw text frames.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::calls::envelope::{self, Envelope};
use crate::calls::error::{CallError, DecodeError};
use crate::transport::{Transport, TransportEvent, TransportFactory};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// The connection is up and presence has been queued.
    Opened,
    Envelope(Envelope),
    Closed,
}

/// Sending half of the relay connection. Cheap to clone; all clones feed the
/// same serialized outbound queue.
#[derive(Clone)]
pub struct RelayChannel {
    queue: mpsc::Sender<Envelope>,
    open: Arc<AtomicBool>,
    transport: Arc<dyn Transport>,
}

impl RelayChannel {
    pub async fn connect(
        factory: &dyn TransportFactory,
        identity: &str,
        capacity: usize,
    ) -> Result<(Self, mpsc::Receiver<RelayEvent>), CallError> {
        let (transport, transport_events) = factory
            .create_transport()
            .await
            .map_err(|e| CallError::Connection(e.to_string()))?;

        let capacity = capacity.max(1);
        let (queue_tx, queue_rx) = mpsc::channel(capacity);
        let (event_tx, event_rx) = mpsc::channel(capacity);
        let open = Arc::new(AtomicBool::new(false));

        tokio::spawn(write_pump(transport.clone(), queue_rx));
        tokio::spawn(read_pump(
            identity.to_string(),
            transport_events,
            event_tx,
            queue_tx.clone(),
            open.clone(),
        ));

        let channel = Self {
            queue: queue_tx,
            open,
            transport,
        };
        Ok((channel, event_rx))
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Queue an envelope for delivery.
    pub async fn send(&self, envelope: Envelope) -> Result<(), CallError> {
        if !self.is_open() {
            return Err(CallError::Send);
        }
        self.queue.send(envelope).await.map_err(|_| CallError::Send)
    }

    pub async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.transport.disconnect().await;
    }
}

async fn write_pump(transport: Arc<dyn Transport>, mut queue: mpsc::Receiver<Envelope>) {
    while let Some(envelope) = queue.recv().await {
        let text = envelope::encode(&envelope);
        debug!(target: "Relay", "--> {} to {:?}", envelope.kind(), envelope.target);
        if let Err(e) = transport.send_text(&text).await {
            warn!(target: "Relay", "Failed to send {}: {e}", envelope.kind());
        }
    }
    debug!(target: "Relay", "Send queue closed, write pump exiting");
}

async fn read_pump(
    identity: String,
    mut transport_events: mpsc::Receiver<TransportEvent>,
    event_tx: mpsc::Sender<RelayEvent>,
    queue_tx: mpsc::Sender<Envelope>,
    open: Arc<AtomicBool>,
) {
    let mut opened = false;
    while let Some(event) = transport_events.recv().await {
        match event {
            TransportEvent::Connected => {
                if opened {
                    warn!(target: "Relay", "Ignoring duplicate connected event");
                    continue;
                }
                opened = true;
                open.store(true, Ordering::SeqCst);
                info!(target: "Relay", "Connected, registering presence as {identity}");
                if queue_tx
                    .send(Envelope::register_presence(&identity))
                    .await
                    .is_err()
                {
                    warn!(target: "Relay", "Send queue closed before presence was registered");
                }
                if event_tx.send(RelayEvent::Opened).await.is_err() {
                    break;
                }
            }
            TransportEvent::MessageReceived(text) => match envelope::decode(&text) {
                Ok(envelope) => {
                    debug!(target: "Relay", "<-- {} from {:?}", envelope.kind(), envelope.sender);
                    if event_tx.send(RelayEvent::Envelope(envelope)).await.is_err() {
                        break;
                    }
                }
                Err(DecodeError::UnknownKind(kind)) => {
                    warn!(target: "Relay", "Dropping message of unknown kind {kind:?}");
                }
                Err(e) => {
                    warn!(target: "Relay", "Dropping undecodable message: {e}");
                }
            },
            TransportEvent::Disconnected => {
                info!(target: "Relay", "Connection to relay lost");
                break;
            }
        }
    }

    open.store(false, Ordering::SeqCst);
    let _ = event_tx.send(RelayEvent::Closed).await;
}
