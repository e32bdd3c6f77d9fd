use std::sync::Arc;

use log::info;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::calls::error::CallError;
use crate::calls::manager::{CallManager, CallSnapshot, Command};
use crate::calls::media::{MediaEngine, MediaEvent};
use crate::config::ClientConfig;
use crate::relay::RelayChannel;
use crate::transport::TransportFactory;
use crate::types::events::{Event, EventBus};

const COMMAND_CHANNEL_CAPACITY: usize = 16;

/// Handle to a running call client.
///
/// Every method is a request to the call manager task; the handle itself
/// holds no call state and can be cloned freely.
#[derive(Clone)]
pub struct CallClient {
    identity: Arc<str>,
    commands: mpsc::Sender<Command>,
    events: EventBus,
}

impl CallClient {
    /// Connect to the relay, register presence and start the call manager.
    ///
    /// `media_events` is the stream of events the media engine raises on its
    /// own schedule (local candidates, remote tracks).
    pub async fn connect(
        config: ClientConfig,
        transport_factory: &dyn TransportFactory,
        media: Arc<dyn MediaEngine>,
        media_events: mpsc::Receiver<MediaEvent>,
    ) -> Result<(Self, broadcast::Receiver<Event>), CallError> {
        let (relay, relay_events) = RelayChannel::connect(
            transport_factory,
            &config.identity,
            config.send_queue_capacity,
        )
        .await?;

        let events = EventBus::new();
        let subscription = events.subscribe();
        let identity: Arc<str> = Arc::from(config.identity.as_str());

        let (manager, outcomes) = CallManager::new(config, media, relay, events.clone());
        let (commands, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        tokio::spawn(manager.run(command_rx, relay_events, outcomes, media_events));

        info!(target: "Calls", "Call client started for {identity}");
        let client = Self {
            identity,
            commands,
            events,
        };
        Ok((client, subscription))
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Ask the relay whether `target` is online. The outcome arrives as
    /// [`Event::CallProceeding`], [`Event::PeerUnreachable`] or a timeout
    /// reported through [`Event::CallFailed`].
    pub async fn start_call(&self, target: impl Into<String>) -> Result<(), CallError> {
        let target = target.into();
        self.request(|reply| Command::StartCall { target, reply })
            .await
    }

    /// Answer the ringing incoming call.
    pub async fn accept(&self) -> Result<(), CallError> {
        self.request(|reply| Command::Accept { reply }).await
    }

    /// Decline the ringing incoming call. Nothing is sent to the caller.
    pub async fn reject(&self) -> Result<(), CallError> {
        self.request(|reply| Command::Reject { reply }).await
    }

    pub async fn hang_up(&self) -> Result<(), CallError> {
        self.request(|reply| Command::HangUp { reply }).await
    }

    pub async fn set_audio_enabled(&self, enabled: bool) -> Result<(), CallError> {
        self.request(|reply| Command::SetAudioEnabled { enabled, reply })
            .await
    }

    pub async fn set_video_enabled(&self, enabled: bool) -> Result<(), CallError> {
        self.request(|reply| Command::SetVideoEnabled { enabled, reply })
            .await
    }

    pub async fn switch_camera(&self) -> Result<(), CallError> {
        self.request(|reply| Command::SwitchCamera { reply }).await
    }

    pub async fn snapshot(&self) -> Result<CallSnapshot, CallError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Snapshot { reply })
            .await
            .map_err(|_| CallError::NotRunning)?;
        rx.await.map_err(|_| CallError::NotRunning)
    }

    /// Stop the call manager, closing any active call and the relay connection.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, CallError>>) -> Command,
    ) -> Result<T, CallError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| CallError::NotRunning)?;
        rx.await.map_err(|_| CallError::NotRunning)?
    }
}
