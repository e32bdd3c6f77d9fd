//! Call-related error types.

use thiserror::Error;

use super::signaling::SignalingKind;
use super::state::{InvalidTransition, SessionState};

/// Failure to turn a wire message into an [`Envelope`](super::Envelope).
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid envelope json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown envelope kind: {0}")]
    UnknownKind(String),

    #[error("malformed {kind} payload: {reason}")]
    MalformedPayload {
        kind: &'static str,
        reason: String,
    },
}

impl DecodeError {
    pub(crate) fn malformed(kind: SignalingKind, reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            kind: kind.as_str(),
            reason: reason.into(),
        }
    }
}

/// Signaling protocol violations detected by the session engine or orchestrator.
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("unexpected {kind} in state {state:?}")]
    UnexpectedMessageInState {
        kind: SignalingKind,
        state: SessionState,
    },

    #[error("a description operation is already in flight")]
    OperationInFlight,

    #[error("no call target latched")]
    NoTarget,

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
}

/// Failures reported by the media engine collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaEngineError {
    #[error("failed to create session description: {0}")]
    CreateDescription(String),

    #[error("failed to set local description: {0}")]
    SetLocalDescription(String),

    #[error("failed to set remote description: {0}")]
    SetRemoteDescription(String),

    #[error("failed to add ice candidate: {0}")]
    AddCandidate(String),

    #[error("capture device unavailable: {0}")]
    CaptureUnavailable(String),

    #[error("media session closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error("relay connection failed: {0}")]
    Connection(String),

    #[error("relay channel is not open")]
    Send,

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Media(#[from] MediaEngineError),

    #[error("no call response from relay for {target}")]
    Timeout { target: String },

    #[error("a call is already in progress")]
    CallInProgress,

    #[error("no incoming call to answer")]
    NoIncomingCall,

    #[error("call client is not running")]
    NotRunning,
}
