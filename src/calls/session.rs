//! Session engine: drives the media engine through offer/answer negotiation.
//!
//! Description operations (create offer, apply remote offer, create answer,
//! apply remote answer) run as spawned tasks because the media engine
//! completes them asynchronously. Each finished operation comes back as an
//! [`OperationOutcome`] on the channel returned by [`SessionEngine::new`];
//! the owner feeds it to [`SessionEngine::complete`].
//!
//! Every outcome is stamped with the generation it was started in. `close`
//! bumps the generation, so results of operations started before a hang-up
//! are discarded when they arrive.

use std::future::Future;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::mpsc;

use super::envelope::{Envelope, IceCandidate, SessionDescription};
use super::error::{CallError, MediaEngineError, SignalingError};
use super::media::MediaEngine;
use super::signaling::SignalingKind;
use super::state::{SessionState, SessionTransition, apply_transition};
use crate::config::CandidatePolicy;

/// Result of a completed media operation.
#[derive(Debug)]
pub enum Step {
    OfferCreated(SessionDescription),
    RemoteOfferApplied,
    AnswerCreated(SessionDescription),
    RemoteAnswerApplied,
}

#[derive(Debug)]
pub struct OperationOutcome {
    generation: u64,
    result: Result<Step, MediaEngineError>,
}

/// What the owner has to do after an outcome was applied.
#[derive(Debug, PartialEq, Eq)]
pub enum Completion {
    /// Send these in order: the offer, then candidates gathered while it was produced.
    OfferReady(Vec<Envelope>),
    /// The remote offer is in place; the answer can be created now.
    RemoteOfferApplied,
    /// Send these in order: the answer, then candidates gathered while it was produced.
    AnswerReady(Vec<Envelope>),
    RemoteAnswerApplied,
    /// The outcome belonged to a call that has since been closed.
    Stale,
}

pub struct SessionEngine {
    local_identity: String,
    media: Arc<dyn MediaEngine>,
    policy: CandidatePolicy,
    state: SessionState,
    target: Option<String>,
    generation: u64,
    in_flight: bool,
    local_description_sent: bool,
    remote_description_applied: bool,
    pending_local_candidates: Vec<IceCandidate>,
    pending_remote_candidates: Vec<IceCandidate>,
    outcome_tx: mpsc::UnboundedSender<OperationOutcome>,
}

impl SessionEngine {
    pub fn new(
        local_identity: impl Into<String>,
        media: Arc<dyn MediaEngine>,
        policy: CandidatePolicy,
    ) -> (Self, mpsc::UnboundedReceiver<OperationOutcome>) {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let engine = Self {
            local_identity: local_identity.into(),
            media,
            policy,
            state: SessionState::Idle,
            target: None,
            generation: 0,
            in_flight: false,
            local_description_sent: false,
            remote_description_applied: false,
            pending_local_candidates: Vec::new(),
            pending_remote_candidates: Vec::new(),
            outcome_tx,
        };
        (engine, outcome_rx)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Whether a description operation is outstanding.
    pub fn is_busy(&self) -> bool {
        self.in_flight
    }

    pub fn pending_remote_candidates(&self) -> &[IceCandidate] {
        &self.pending_remote_candidates
    }

    /// Caller side: create and set the local offer for `target`.
    pub fn create_offer(&mut self, target: &str) -> Result<(), SignalingError> {
        self.ensure_ready(SessionState::Idle, SignalingKind::CreateOffer)?;
        // Latched before the engine can gather a single candidate.
        self.target = Some(target.to_string());

        info!(target: "Session", "Creating offer for {target}");
        let media = self.media.clone();
        self.spawn(async move {
            let desc = media.create_offer().await?;
            media.set_local_description(desc.clone()).await?;
            Ok(Step::OfferCreated(desc))
        });
        Ok(())
    }

    /// Callee side: apply the caller's offer as the remote description.
    pub fn apply_remote_offer(
        &mut self,
        from: &str,
        offer: SessionDescription,
    ) -> Result<(), SignalingError> {
        self.ensure_ready(SessionState::Idle, SignalingKind::CreateOffer)?;
        self.target = Some(from.to_string());

        info!(target: "Session", "Applying remote offer from {from}");
        let media = self.media.clone();
        self.spawn(async move {
            media.set_remote_description(offer).await?;
            Ok(Step::RemoteOfferApplied)
        });
        Ok(())
    }

    /// Callee side: create and set the local answer once the offer is applied.
    pub fn create_answer(&mut self) -> Result<(), SignalingError> {
        self.ensure_ready(SessionState::AnswerPending, SignalingKind::CreateAnswer)?;

        debug!(target: "Session", "Creating answer for {:?}", self.target);
        let media = self.media.clone();
        self.spawn(async move {
            let desc = media.create_answer().await?;
            media.set_local_description(desc.clone()).await?;
            Ok(Step::AnswerCreated(desc))
        });
        Ok(())
    }

    /// Caller side: apply the callee's answer as the remote description.
    pub fn apply_remote_answer(&mut self, answer: SessionDescription) -> Result<(), SignalingError> {
        self.ensure_ready(SessionState::OfferPending, SignalingKind::CreateAnswer)?;

        debug!(target: "Session", "Applying remote answer from {:?}", self.target);
        let media = self.media.clone();
        self.spawn(async move {
            media.set_remote_description(answer).await?;
            Ok(Step::RemoteAnswerApplied)
        });
        Ok(())
    }

    /// Apply a finished operation to the state machine.
    pub async fn complete(&mut self, outcome: OperationOutcome) -> Result<Completion, CallError> {
        if outcome.generation != self.generation {
            debug!(
                target: "Session",
                "Discarding result from closed session (generation {} != {})",
                outcome.generation, self.generation
            );
            return Ok(Completion::Stale);
        }
        self.in_flight = false;

        match outcome.result? {
            Step::OfferCreated(desc) => {
                let target = self.target.clone().ok_or(SignalingError::NoTarget)?;
                self.transition(SessionTransition::LocalOfferSent)?;
                let mut outbound = vec![Envelope::offer(&self.local_identity, &target, desc)];
                outbound.extend(self.release_local_candidates(&target));
                Ok(Completion::OfferReady(outbound))
            }
            Step::RemoteOfferApplied => {
                self.transition(SessionTransition::RemoteOfferApplied)?;
                self.remote_description_applied = true;
                self.flush_remote_candidates().await;
                Ok(Completion::RemoteOfferApplied)
            }
            Step::AnswerCreated(desc) => {
                let target = self.target.clone().ok_or(SignalingError::NoTarget)?;
                self.transition(SessionTransition::LocalAnswerSent)?;
                let mut outbound = vec![Envelope::answer(&self.local_identity, &target, desc)];
                outbound.extend(self.release_local_candidates(&target));
                Ok(Completion::AnswerReady(outbound))
            }
            Step::RemoteAnswerApplied => {
                self.transition(SessionTransition::RemoteAnswerApplied)?;
                self.remote_description_applied = true;
                self.flush_remote_candidates().await;
                Ok(Completion::RemoteAnswerApplied)
            }
        }
    }

    /// Wrap a freshly gathered local candidate for the latched target.
    ///
    /// Candidates gathered before the local description went out are held
    /// back and released right after it, so the peer never sees a candidate
    /// for a session it has not been offered yet.
    pub fn on_local_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<Option<Envelope>, SignalingError> {
        let Some(target) = self.target.as_deref() else {
            return Err(SignalingError::NoTarget);
        };
        if !self.local_description_sent {
            self.pending_local_candidates.push(candidate);
            return Ok(None);
        }
        Ok(Some(Envelope::ice_candidate(
            &self.local_identity,
            target,
            candidate,
        )))
    }

    /// Hand a remote candidate to the media engine according to the policy.
    pub async fn add_remote_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<(), MediaEngineError> {
        if self.policy == CandidatePolicy::BufferUntilRemoteDescription
            && !self.remote_description_applied
        {
            debug!(
                target: "Session",
                "Buffering remote candidate until remote description is set ({} pending)",
                self.pending_remote_candidates.len() + 1
            );
            self.pending_remote_candidates.push(candidate);
            return Ok(());
        }
        self.media.add_ice_candidate(candidate).await
    }

    /// Close the media connection and return to Idle, keeping the engine.
    pub async fn close(&mut self) -> Result<(), CallError> {
        self.generation += 1;
        self.in_flight = false;
        self.transition(SessionTransition::Closed)?;

        info!(target: "Session", "Closing media session (peer: {:?})", self.target);
        let result = self.media.close().await;

        self.target = None;
        self.local_description_sent = false;
        self.remote_description_applied = false;
        self.pending_local_candidates.clear();
        self.pending_remote_candidates.clear();
        self.transition(SessionTransition::Reset)?;

        result.map_err(CallError::from)
    }

    fn ensure_ready(
        &self,
        expected: SessionState,
        kind: SignalingKind,
    ) -> Result<(), SignalingError> {
        if self.in_flight {
            return Err(SignalingError::OperationInFlight);
        }
        if self.state != expected {
            return Err(SignalingError::UnexpectedMessageInState {
                kind,
                state: self.state,
            });
        }
        Ok(())
    }

    fn transition(&mut self, transition: SessionTransition) -> Result<(), SignalingError> {
        let next = apply_transition(self.state, transition)?;
        debug!(target: "Session", "{:?} --{:?}--> {:?}", self.state, transition, next);
        self.state = next;
        Ok(())
    }

    fn spawn<F>(&mut self, operation: F)
    where
        F: Future<Output = Result<Step, MediaEngineError>> + Send + 'static,
    {
        self.in_flight = true;
        let generation = self.generation;
        let outcome_tx = self.outcome_tx.clone();
        tokio::spawn(async move {
            let result = operation.await;
            if outcome_tx.send(OperationOutcome { generation, result }).is_err() {
                debug!(target: "Session", "Session engine dropped before operation finished");
            }
        });
    }

    fn release_local_candidates(&mut self, target: &str) -> Vec<Envelope> {
        self.local_description_sent = true;
        self.pending_local_candidates
            .drain(..)
            .map(|candidate| Envelope::ice_candidate(&self.local_identity, target, candidate))
            .collect()
    }

    async fn flush_remote_candidates(&mut self) {
        if self.pending_remote_candidates.is_empty() {
            return;
        }
        debug!(
            target: "Session",
            "Flushing {} buffered remote candidates",
            self.pending_remote_candidates.len()
        );
        for candidate in std::mem::take(&mut self.pending_remote_candidates) {
            if let Err(e) = self.media.add_ice_candidate(candidate).await {
                warn!(target: "Session", "Failed to apply buffered candidate: {e}");
            }
        }
    }
}
