//! Signaling kind definitions.
//!
//! Every envelope exchanged with the relay carries one of these kinds in its
//! `type` field. The relay only understands registration and call routing;
//! everything else is forwarded opaquely between peers.

use std::fmt;

/// Signaling message kinds for call control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalingKind {
    /// Announce the local identity to the relay (`store_user`).
    RegisterPresence,

    /// Ask the relay whether the target is reachable (`start_call`).
    StartCall,

    /// Relay verdict on a `start_call`.
    /// Carries an optional free-text status.
    CallResponse,

    /// Caller's session description, sent to the callee.
    CreateOffer,

    /// Callee's session description, sent back to the caller.
    CreateAnswer,

    /// One trickled connectivity candidate.
    IceCandidate,

    /// Offer as delivered by the relay, reduced to the bare SDP.
    OfferReceived,

    /// Answer as delivered by the relay, reduced to the bare SDP.
    AnswerReceived,
}

impl SignalingKind {
    /// All signaling kinds in wire order.
    pub const ALL: [SignalingKind; 8] = [
        Self::RegisterPresence,
        Self::StartCall,
        Self::CallResponse,
        Self::CreateOffer,
        Self::CreateAnswer,
        Self::IceCandidate,
        Self::OfferReceived,
        Self::AnswerReceived,
    ];

    /// Get the `type` value used on the wire.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RegisterPresence => "store_user",
            Self::StartCall => "start_call",
            Self::CallResponse => "call_response",
            Self::CreateOffer => "create_offer",
            Self::CreateAnswer => "create_answer",
            Self::IceCandidate => "ice_candidate",
            Self::OfferReceived => "offer_received",
            Self::AnswerReceived => "answer_received",
        }
    }

    /// Parse from the wire `type` value. Matching is exact.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }

    /// Whether the envelope carries a remote offer, in either delivery form.
    pub const fn is_offer(&self) -> bool {
        matches!(self, Self::CreateOffer | Self::OfferReceived)
    }

    /// Whether the envelope carries a remote answer, in either delivery form.
    pub const fn is_answer(&self) -> bool {
        matches!(self, Self::CreateAnswer | Self::AnswerReceived)
    }
}

impl fmt::Display for SignalingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}
