//! Call state machine implementation.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Signaling state of the local media session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum SessionState {
    /// No negotiation in progress.
    #[default]
    Idle,
    /// Caller: local offer set and sent, waiting for the answer.
    OfferPending,
    /// Callee: remote offer applied, producing the answer.
    AnswerPending,
    /// Both descriptions applied. Media connectivity proceeds in the engine.
    Connected,
    /// Media connection closed by a local hang-up.
    Closed,
}

impl SessionState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

/// State transitions for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTransition {
    LocalOfferSent,
    RemoteOfferApplied,
    LocalAnswerSent,
    RemoteAnswerApplied,
    Closed,
    Reset,
}

/// Apply a state transition. Returns error if transition is invalid.
pub fn apply_transition(
    state: SessionState,
    transition: SessionTransition,
) -> Result<SessionState, InvalidTransition> {
    let next = match (state, transition) {
        (SessionState::Idle, SessionTransition::LocalOfferSent) => SessionState::OfferPending,
        (SessionState::Idle, SessionTransition::RemoteOfferApplied) => SessionState::AnswerPending,
        (SessionState::AnswerPending, SessionTransition::LocalAnswerSent) => SessionState::Connected,
        (SessionState::OfferPending, SessionTransition::RemoteAnswerApplied) => {
            SessionState::Connected
        }
        (_, SessionTransition::Closed) => SessionState::Closed,
        (SessionState::Closed, SessionTransition::Reset) => SessionState::Idle,
        (current, transition) => {
            return Err(InvalidTransition {
                current_state: format!("{:?}", current),
                attempted: format!("{:?}", transition),
            });
        }
    };
    Ok(next)
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}

/// Which side of the call this client plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum CallRole {
    #[default]
    None,
    Caller,
    Callee,
}

/// Per-client call bookkeeping. One call at a time.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Session {
    pub remote_identity: Option<String>,
    pub role: CallRole,
    pub started_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.role != CallRole::None
    }

    pub fn begin(&mut self, role: CallRole, remote: &str) {
        self.role = role;
        self.remote_identity = Some(remote.to_string());
        self.started_at = Some(Utc::now());
    }

    /// Clear the call, returning the peer and how long the call lasted.
    pub fn end(&mut self) -> Option<(String, i64)> {
        let remote = self.remote_identity.take();
        let started_at = self.started_at.take();
        self.role = CallRole::None;
        let duration = started_at
            .map(|t| Utc::now().signed_duration_since(t).num_seconds())
            .unwrap_or(0);
        remote.map(|peer| (peer, duration))
    }

    pub fn is_remote(&self, identity: Option<&str>) -> bool {
        identity.is_some() && self.remote_identity.as_deref() == identity
    }
}
