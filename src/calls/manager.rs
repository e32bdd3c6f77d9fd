//! Call manager: the single actor that owns the call session.
//!
//! The manager serializes user commands, relay deliveries, media operation
//! results, media events and the call-response deadline through one
//! `select!` loop, so no two signaling operations ever touch the session at
//! the same time. Inbound envelope routing lives in `handler.rs`.

use std::sync::Arc;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};

use super::envelope::{Envelope, IceCandidate, SessionDescription};
use super::error::CallError;
use super::media::{MediaEngine, MediaEvent};
use super::session::{Completion, OperationOutcome, SessionEngine};
use super::state::{CallRole, Session, SessionState};
use crate::config::ClientConfig;
use crate::relay::{RelayChannel, RelayEvent};
use crate::types::events::{Event, EventBus};

pub(crate) type Reply<T> = oneshot::Sender<Result<T, CallError>>;

/// Requests from the client handle to the manager.
#[derive(Debug)]
pub(crate) enum Command {
    StartCall { target: String, reply: Reply<()> },
    Accept { reply: Reply<()> },
    Reject { reply: Reply<()> },
    HangUp { reply: Reply<()> },
    SetAudioEnabled { enabled: bool, reply: Reply<()> },
    SetVideoEnabled { enabled: bool, reply: Reply<()> },
    SwitchCamera { reply: Reply<()> },
    Snapshot { reply: oneshot::Sender<CallSnapshot> },
    Shutdown,
}

/// Point-in-time view of the call state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallSnapshot {
    pub state: SessionState,
    pub role: CallRole,
    pub remote_identity: Option<String>,
    pub awaiting_response_from: Option<String>,
    pub incoming_from: Option<String>,
    pub pending_remote_candidates: usize,
    pub relay_open: bool,
}

/// A `start_call` waiting for the relay's `call_response`.
pub(super) struct PendingStart {
    pub(super) target: String,
    pub(super) deadline: Instant,
}

/// An offer that is ringing, waiting for the user to accept or reject it.
pub(super) struct IncomingCall {
    pub(super) from: String,
    pub(super) offer: SessionDescription,
    /// Candidates the caller sent before the offer was accepted.
    pub(super) early_candidates: Vec<IceCandidate>,
}

pub(crate) struct CallManager {
    pub(super) config: ClientConfig,
    pub(super) session: Session,
    pub(super) engine: SessionEngine,
    pub(super) media: Arc<dyn MediaEngine>,
    pub(super) relay: RelayChannel,
    pub(super) events: EventBus,
    pub(super) pending_start: Option<PendingStart>,
    pub(super) incoming: Option<IncomingCall>,
    /// Set when the media session was closed. Media events already queued
    /// belong to the closed call and are dropped before the next select.
    media_closed: bool,
}

impl CallManager {
    pub(crate) fn new(
        config: ClientConfig,
        media: Arc<dyn MediaEngine>,
        relay: RelayChannel,
        events: EventBus,
    ) -> (Self, mpsc::UnboundedReceiver<OperationOutcome>) {
        let (engine, outcomes) =
            SessionEngine::new(&config.identity, media.clone(), config.candidate_policy);
        let manager = Self {
            session: Session::default(),
            config,
            engine,
            media,
            relay,
            events,
            pending_start: None,
            incoming: None,
            media_closed: false,
        };
        (manager, outcomes)
    }

    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut relay_events: mpsc::Receiver<RelayEvent>,
        mut outcomes: mpsc::UnboundedReceiver<OperationOutcome>,
        mut media_events: mpsc::Receiver<MediaEvent>,
    ) {
        let mut relay_live = true;
        let mut media_live = true;

        loop {
            let deadline = self.pending_start.as_ref().map(|p| p.deadline);

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                event = relay_events.recv(), if relay_live => match event {
                    Some(event) => self.handle_relay_event(event).await,
                    None => relay_live = false,
                },
                Some(outcome) = outcomes.recv() => self.handle_outcome(outcome).await,
                event = media_events.recv(), if media_live => match event {
                    Some(event) => self.handle_media_event(event).await,
                    None => {
                        debug!(target: "Calls", "Media event stream ended");
                        media_live = false;
                    }
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_call_response_timeout();
                }
            }

            self.drop_stale_media_events(&mut media_events);
        }

        info!(target: "Calls", "Call manager shutting down");
        if self.session.is_active()
            && let Err(e) = self.hang_up().await
        {
            warn!(target: "Calls", "Failed to close call on shutdown: {e}");
        }
        self.relay.close().await;
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartCall { target, reply } => {
                let _ = reply.send(self.start_call(target).await);
            }
            Command::Accept { reply } => {
                let _ = reply.send(self.accept().await);
            }
            Command::Reject { reply } => {
                let _ = reply.send(self.reject());
            }
            Command::HangUp { reply } => {
                let _ = reply.send(self.hang_up().await);
            }
            Command::SetAudioEnabled { enabled, reply } => {
                let result = self.media.set_audio_enabled(enabled).await;
                let _ = reply.send(result.map_err(CallError::from));
            }
            Command::SetVideoEnabled { enabled, reply } => {
                let result = self.media.set_video_enabled(enabled).await;
                let _ = reply.send(result.map_err(CallError::from));
            }
            Command::SwitchCamera { reply } => {
                let result = self.media.switch_camera().await;
                let _ = reply.send(result.map_err(CallError::from));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown => {}
        }
    }

    /// Whether anything occupies the single call slot.
    pub(super) fn is_occupied(&self) -> bool {
        self.session.is_active()
            || self.pending_start.is_some()
            || self.incoming.is_some()
            || !self.engine.state().is_idle()
            || self.engine.is_busy()
    }

    async fn start_call(&mut self, target: String) -> Result<(), CallError> {
        if self.is_occupied() {
            return Err(CallError::CallInProgress);
        }

        info!(target: "Calls", "Requesting call to {target}");
        self.relay
            .send(Envelope::start_call(&self.config.identity, &target))
            .await?;
        self.pending_start = Some(PendingStart {
            target,
            deadline: Instant::now() + self.config.call_response_timeout,
        });
        Ok(())
    }

    async fn accept(&mut self) -> Result<(), CallError> {
        let IncomingCall {
            from,
            offer,
            early_candidates,
        } = self.incoming.take().ok_or(CallError::NoIncomingCall)?;

        info!(target: "Calls", "Accepting call from {from}");
        self.session.begin(CallRole::Callee, &from);

        if let Err(e) = self.media.start_local_media().await {
            self.abort_call(CallError::Media(e.clone())).await;
            return Err(e.into());
        }
        if let Err(e) = self.engine.apply_remote_offer(&from, offer) {
            self.teardown().await;
            return Err(e.into());
        }

        for candidate in early_candidates {
            if let Err(e) = self.engine.add_remote_candidate(candidate).await {
                warn!(target: "Calls", "Failed to apply early candidate from {from}: {e}");
            }
        }
        Ok(())
    }

    fn reject(&mut self) -> Result<(), CallError> {
        let incoming = self.incoming.take().ok_or(CallError::NoIncomingCall)?;
        info!(
            target: "Calls",
            "Rejected call from {} ({} early candidates discarded)",
            incoming.from,
            incoming.early_candidates.len()
        );
        Ok(())
    }

    /// End whatever occupies the call slot. Always leaves the manager idle.
    pub(super) async fn hang_up(&mut self) -> Result<(), CallError> {
        if let Some(pending) = self.pending_start.take() {
            debug!(target: "Calls", "Abandoning call request to {}", pending.target);
        }
        if let Some(incoming) = self.incoming.take() {
            debug!(target: "Calls", "Discarding incoming offer from {}", incoming.from);
        }

        let result = self.engine.close().await;
        self.media_closed = true;
        if let Some((peer, duration_secs)) = self.session.end() {
            info!(target: "Calls", "Call with {peer} ended after {duration_secs}s");
            self.events.dispatch(Event::CallEnded {
                peer,
                duration_secs,
            });
        }
        result
    }

    /// Tear the call down after a failure and report it.
    pub(super) async fn abort_call(&mut self, error: CallError) {
        warn!(target: "Calls", "Aborting call: {error}");
        let peer = self.teardown().await;
        self.events.dispatch(Event::CallFailed {
            peer,
            error: Arc::new(error),
        });
    }

    /// Close the media session and clear the call, returning the former peer.
    async fn teardown(&mut self) -> Option<String> {
        self.pending_start = None;
        if let Err(e) = self.engine.close().await {
            warn!(target: "Calls", "Failed to close media session: {e}");
        }
        self.media_closed = true;
        self.session.end().map(|(peer, _)| peer)
    }

    /// Discard media events queued before the media session was closed, so a
    /// candidate gathered for one call never reaches the next peer.
    fn drop_stale_media_events(&mut self, media_events: &mut mpsc::Receiver<MediaEvent>) {
        if !std::mem::take(&mut self.media_closed) {
            return;
        }
        let mut dropped = 0;
        while media_events.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(target: "Calls", "Dropped {dropped} media events from the closed session");
        }
    }

    async fn handle_relay_event(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Opened => {
                info!(target: "Calls", "Relay open as {}", self.config.identity);
                self.events.dispatch(Event::Connected);
            }
            RelayEvent::Envelope(envelope) => self.handle_envelope(envelope).await,
            RelayEvent::Closed => {
                warn!(target: "Calls", "Relay connection closed");
                self.events.dispatch(Event::Disconnected);
            }
        }
    }

    async fn handle_outcome(&mut self, outcome: OperationOutcome) {
        match self.engine.complete(outcome).await {
            Ok(Completion::Stale) => {}
            Ok(Completion::OfferReady(outbound)) => {
                self.send_outbound(outbound).await;
            }
            Ok(Completion::RemoteOfferApplied) => {
                if let Err(e) = self.engine.create_answer() {
                    self.abort_call(e.into()).await;
                }
            }
            Ok(Completion::AnswerReady(outbound)) => {
                if self.send_outbound(outbound).await {
                    self.report_connected();
                }
            }
            Ok(Completion::RemoteAnswerApplied) => self.report_connected(),
            Err(e) => self.abort_call(e).await,
        }
    }

    /// Send a description followed by its held-back candidates. The call is
    /// aborted if the description itself cannot be sent.
    async fn send_outbound(&mut self, outbound: Vec<Envelope>) -> bool {
        for (index, envelope) in outbound.into_iter().enumerate() {
            let kind = envelope.kind();
            match self.relay.send(envelope).await {
                Ok(()) => {}
                Err(e) if index == 0 => {
                    self.abort_call(e).await;
                    return false;
                }
                Err(e) => warn!(target: "Calls", "Failed to send {kind}: {e}"),
            }
        }
        true
    }

    fn report_connected(&self) {
        if let Some(peer) = self.session.remote_identity.clone() {
            info!(target: "Calls", "Signaling with {peer} complete");
            self.events.dispatch(Event::CallConnected { peer });
        }
    }

    async fn handle_media_event(&mut self, event: MediaEvent) {
        match event {
            MediaEvent::LocalCandidate(candidate) => match self.engine.on_local_candidate(candidate) {
                Ok(Some(envelope)) => {
                    if let Err(e) = self.relay.send(envelope).await {
                        warn!(target: "Calls", "Failed to send local candidate: {e}");
                    }
                }
                Ok(None) => {}
                Err(e) => debug!(target: "Calls", "Dropping local candidate: {e}"),
            },
            MediaEvent::RemoteTrack { track_id } => {
                debug!(target: "Calls", "Remote track {track_id} attached");
                self.events.dispatch(Event::RemoteMedia {
                    peer: self.session.remote_identity.clone(),
                    track_id,
                });
            }
        }
    }

    fn on_call_response_timeout(&mut self) {
        if let Some(pending) = self.pending_start.take() {
            warn!(target: "Calls", "No call response for {} in time", pending.target);
            self.events.dispatch(Event::CallFailed {
                peer: Some(pending.target.clone()),
                error: Arc::new(CallError::Timeout {
                    target: pending.target,
                }),
            });
        }
    }

    fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            state: self.engine.state(),
            role: self.session.role,
            remote_identity: self.session.remote_identity.clone(),
            awaiting_response_from: self.pending_start.as_ref().map(|p| p.target.clone()),
            incoming_from: self.incoming.as_ref().map(|i| i.from.clone()),
            pending_remote_candidates: self.engine.pending_remote_candidates().len(),
            relay_open: self.relay.is_open(),
        }
    }
}
