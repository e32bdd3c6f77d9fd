//! Peer-to-peer call signaling.
//!
//! # Architecture
//!
//! - [`SignalingKind`]: the envelope kinds spoken with the relay
//! - [`Envelope`], [`encode`], [`decode`]: the JSON wire codec
//! - [`SessionState`] & [`Session`]: negotiation state machine and call bookkeeping
//! - [`SessionEngine`]: drives the [`MediaEngine`] through offer/answer
//! - `CallManager`: the actor that owns the session and routes everything
//!   into it, driven through [`CallClient`](crate::client::CallClient)
//!
//! # Protocol Overview
//!
//! The caller asks the relay whether the target is online (`start_call`). On
//! a positive `call_response` it produces an offer; the callee applies it,
//! answers, and both sides trade connectivity candidates through the relay
//! until the media engine connects them directly.

pub mod envelope;
pub mod error;
mod handler;
pub(crate) mod manager;
pub mod media;
pub mod session;
pub mod signaling;
pub mod state;

pub use envelope::{
    Envelope, IceCandidate, Message, SdpType, SessionDescription, decode, encode,
};
pub use error::{CallError, DecodeError, MediaEngineError, SignalingError};
pub use handler::PEER_OFFLINE_STATUS;
pub use manager::CallSnapshot;
pub use media::{MediaEngine, MediaEvent};
pub use session::{Completion, OperationOutcome, SessionEngine, Step};
pub use signaling::SignalingKind;
pub use state::{
    CallRole, InvalidTransition, Session, SessionState, SessionTransition, apply_transition,
};
