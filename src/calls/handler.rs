//! Routing of inbound relay envelopes into the call manager.

use log::{debug, info, warn};

use super::envelope::{Envelope, IceCandidate, Message, SessionDescription};
use super::error::SignalingError;
use super::manager::{CallManager, IncomingCall};
use super::signaling::SignalingKind;
use super::state::CallRole;
use crate::types::events::Event;

/// Status the relay puts in `call_response` when the target has no presence.
pub const PEER_OFFLINE_STATUS: &str = "user is not online";

impl CallManager {
    pub(super) async fn handle_envelope(&mut self, envelope: Envelope) {
        if let Some(target) = envelope.target.as_deref()
            && target != self.config.identity
        {
            debug!(target: "Calls", "Ignoring {} addressed to {target}", envelope.kind());
            return;
        }

        let kind = envelope.kind();
        let Envelope {
            sender, message, ..
        } = envelope;

        match message {
            Message::CallResponse { status } => self.on_call_response(status).await,
            Message::IceCandidate(candidate) => {
                self.on_remote_candidate(sender.as_deref(), candidate).await;
            }
            Message::RegisterPresence | Message::StartCall => {
                debug!(target: "Calls", "Ignoring relay-bound {kind} from {sender:?}");
            }
            message => {
                let Some(desc) = message.session_description() else {
                    return;
                };
                if kind.is_offer() {
                    self.on_remote_offer(sender, desc);
                } else if kind.is_answer() {
                    self.on_remote_answer(sender.as_deref(), desc);
                }
            }
        }
    }

    async fn on_call_response(&mut self, status: Option<String>) {
        let Some(pending) = self.pending_start.take() else {
            let err = SignalingError::UnexpectedMessageInState {
                kind: SignalingKind::CallResponse,
                state: self.engine.state(),
            };
            warn!(target: "Calls", "Dropping call response: {err}");
            return;
        };

        if status.as_deref() == Some(PEER_OFFLINE_STATUS) {
            info!(target: "Calls", "{} is not online", pending.target);
            self.events.dispatch(Event::PeerUnreachable {
                target: pending.target,
            });
            return;
        }

        debug!(target: "Calls", "Call response for {}: {status:?}", pending.target);
        self.session.begin(CallRole::Caller, &pending.target);
        self.events.dispatch(Event::CallProceeding {
            target: pending.target.clone(),
        });

        if let Err(e) = self.media.start_local_media().await {
            self.abort_call(e.into()).await;
            return;
        }
        if let Err(e) = self.engine.create_offer(&pending.target) {
            self.abort_call(e.into()).await;
        }
    }

    fn on_remote_offer(&mut self, sender: Option<String>, offer: SessionDescription) {
        let Some(from) = sender else {
            warn!(target: "Calls", "Dropping offer without a sender");
            return;
        };
        if self.is_occupied() {
            warn!(target: "Calls", "Rejecting offer from {from}: a call is already in progress");
            return;
        }

        info!(target: "Calls", "Incoming call from {from}");
        self.incoming = Some(IncomingCall {
            from: from.clone(),
            offer,
            early_candidates: Vec::new(),
        });
        self.events.dispatch(Event::IncomingCall { from });
    }

    fn on_remote_answer(&mut self, sender: Option<&str>, answer: SessionDescription) {
        if self.session.role != CallRole::Caller || !self.session.is_remote(sender) {
            let err = SignalingError::UnexpectedMessageInState {
                kind: SignalingKind::CreateAnswer,
                state: self.engine.state(),
            };
            warn!(target: "Calls", "Dropping answer from {sender:?}: {err}");
            return;
        }
        if let Err(e) = self.engine.apply_remote_answer(answer) {
            warn!(target: "Calls", "Dropping answer from {sender:?}: {e}");
        }
    }

    async fn on_remote_candidate(&mut self, sender: Option<&str>, candidate: IceCandidate) {
        if let Some(incoming) = self.incoming.as_mut()
            && sender == Some(incoming.from.as_str())
        {
            incoming.early_candidates.push(candidate);
            return;
        }
        if !self.session.is_remote(sender) {
            debug!(target: "Calls", "Ignoring candidate from {sender:?}: not the current peer");
            return;
        }
        if let Err(e) = self.engine.add_remote_candidate(candidate).await {
            warn!(target: "Calls", "Failed to add remote candidate: {e}");
        }
    }
}
