use std::sync::Arc;

use tokio::sync::broadcast;

use crate::calls::error::CallError;

// The size of the broadcast channel buffer.
pub const CHANNEL_CAPACITY: usize = 100;

/// Everything the UI layer needs to know about the call client.
#[derive(Debug, Clone)]
pub enum Event {
    /// The relay connection is open and presence is registered.
    Connected,
    /// The relay connection was lost.
    Disconnected,
    /// A peer is calling. Answer with `accept` or `reject`.
    IncomingCall { from: String },
    /// The relay reported the target as not online.
    PeerUnreachable { target: String },
    /// The target is online; the offer is being produced.
    CallProceeding { target: String },
    /// Offer and answer are both applied.
    CallConnected { peer: String },
    /// The media engine attached the remote media.
    RemoteMedia { peer: Option<String>, track_id: String },
    CallEnded { peer: String, duration_secs: i64 },
    CallFailed {
        peer: Option<String>,
        error: Arc<CallError>,
    },
}

/// Broadcast bus shared by the client handle and the call manager.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn dispatch(&self, event: Event) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
