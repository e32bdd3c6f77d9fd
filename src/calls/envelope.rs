//! Envelope codec for relay signaling messages.
//!
//! # Wire format
//!
//! Every message is a JSON object carried in one text frame:
//!
//! ```json
//! { "type": "create_offer", "name": "alice", "target": "bob",
//!   "data": { "sdp": "v=0...", "type": "OFFER" } }
//! ```
//!
//! The shape of `data` is fully determined by `type`. Decoding dispatches on
//! the kind and rejects anything that does not fit instead of coercing it.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::error::DecodeError;
use super::signaling::SignalingKind;

/// Which side of the negotiation a session description belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SdpType {
    Offer,
    Answer,
}

impl SdpType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "OFFER",
            Self::Answer => "ANSWER",
        }
    }
}

/// A session description as produced by the media engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// An ICE candidate received from or to be sent to a peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IceCandidate {
    /// SDP media stream identification (e.g., "0" for audio)
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    /// SDP media line index
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_m_line_index: u32,
    /// The candidate string (e.g., "candidate:1 1 UDP 2130706431 192.168.1.1 8888 typ host")
    #[serde(rename = "sdpCandidate", default)]
    pub candidate: Option<String>,
}

impl IceCandidate {
    pub fn new(sdp_mid: impl Into<String>, sdp_m_line_index: u32, candidate: impl Into<String>) -> Self {
        Self {
            sdp_mid: Some(sdp_mid.into()),
            sdp_m_line_index,
            candidate: Some(candidate.into()),
        }
    }
}

/// Kind-specific content of an envelope. One variant per [`SignalingKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    RegisterPresence,
    StartCall,
    CallResponse { status: Option<String> },
    CreateOffer(SessionDescription),
    CreateAnswer(SessionDescription),
    IceCandidate(IceCandidate),
    OfferReceived { sdp: String },
    AnswerReceived { sdp: String },
}

impl Message {
    pub const fn kind(&self) -> SignalingKind {
        match self {
            Self::RegisterPresence => SignalingKind::RegisterPresence,
            Self::StartCall => SignalingKind::StartCall,
            Self::CallResponse { .. } => SignalingKind::CallResponse,
            Self::CreateOffer(_) => SignalingKind::CreateOffer,
            Self::CreateAnswer(_) => SignalingKind::CreateAnswer,
            Self::IceCandidate(_) => SignalingKind::IceCandidate,
            Self::OfferReceived { .. } => SignalingKind::OfferReceived,
            Self::AnswerReceived { .. } => SignalingKind::AnswerReceived,
        }
    }

    /// Remote session description carried by an offer or answer, in either
    /// delivery form.
    pub fn session_description(&self) -> Option<SessionDescription> {
        match self {
            Self::CreateOffer(desc) | Self::CreateAnswer(desc) => Some(desc.clone()),
            Self::OfferReceived { sdp } => Some(SessionDescription::offer(sdp.clone())),
            Self::AnswerReceived { sdp } => Some(SessionDescription::answer(sdp.clone())),
            _ => None,
        }
    }
}

/// The wire unit of signaling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub sender: Option<String>,
    pub target: Option<String>,
    pub message: Message,
}

impl Envelope {
    pub fn new(sender: Option<String>, target: Option<String>, message: Message) -> Self {
        Self {
            sender,
            target,
            message,
        }
    }

    pub fn register_presence(identity: &str) -> Self {
        Self::new(Some(identity.to_string()), None, Message::RegisterPresence)
    }

    pub fn start_call(sender: &str, target: &str) -> Self {
        Self::new(
            Some(sender.to_string()),
            Some(target.to_string()),
            Message::StartCall,
        )
    }

    pub fn offer(sender: &str, target: &str, desc: SessionDescription) -> Self {
        Self::new(
            Some(sender.to_string()),
            Some(target.to_string()),
            Message::CreateOffer(desc),
        )
    }

    pub fn answer(sender: &str, target: &str, desc: SessionDescription) -> Self {
        Self::new(
            Some(sender.to_string()),
            Some(target.to_string()),
            Message::CreateAnswer(desc),
        )
    }

    pub fn ice_candidate(sender: &str, target: &str, candidate: IceCandidate) -> Self {
        Self::new(
            Some(sender.to_string()),
            Some(target.to_string()),
            Message::IceCandidate(candidate),
        )
    }

    pub const fn kind(&self) -> SignalingKind {
        self.message.kind()
    }
}

#[derive(Deserialize)]
struct WireEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    data: Value,
}

/// Serialize an envelope to its JSON text representation.
pub fn encode(envelope: &Envelope) -> String {
    let data = match &envelope.message {
        Message::RegisterPresence | Message::StartCall => Value::Null,
        Message::CallResponse { status } => status.clone().map_or(Value::Null, Value::String),
        Message::CreateOffer(desc) | Message::CreateAnswer(desc) => json!({
            "sdp": desc.sdp,
            "type": desc.sdp_type.as_str(),
        }),
        Message::IceCandidate(candidate) => json!({
            "sdpMid": candidate.sdp_mid,
            "sdpMLineIndex": candidate.sdp_m_line_index,
            "sdpCandidate": candidate.candidate,
        }),
        Message::OfferReceived { sdp } | Message::AnswerReceived { sdp } => {
            Value::String(sdp.clone())
        }
    };

    json!({
        "type": envelope.kind().as_str(),
        "name": envelope.sender,
        "target": envelope.target,
        "data": data,
    })
    .to_string()
}

/// Parse an envelope from its JSON text representation.
pub fn decode(text: &str) -> Result<Envelope, DecodeError> {
    let wire: WireEnvelope = serde_json::from_str(text)?;
    let kind =
        SignalingKind::from_tag(&wire.kind).ok_or(DecodeError::UnknownKind(wire.kind))?;

    let message = match kind {
        SignalingKind::RegisterPresence => {
            expect_null(kind, &wire.data)?;
            Message::RegisterPresence
        }
        SignalingKind::StartCall => {
            expect_null(kind, &wire.data)?;
            Message::StartCall
        }
        SignalingKind::CallResponse => match wire.data {
            Value::Null => Message::CallResponse { status: None },
            Value::String(status) => Message::CallResponse {
                status: Some(status),
            },
            other => {
                return Err(DecodeError::malformed(
                    kind,
                    format!("expected string or null status, got {other}"),
                ));
            }
        },
        SignalingKind::CreateOffer => {
            Message::CreateOffer(description(kind, wire.data, SdpType::Offer)?)
        }
        SignalingKind::CreateAnswer => {
            Message::CreateAnswer(description(kind, wire.data, SdpType::Answer)?)
        }
        SignalingKind::IceCandidate => Message::IceCandidate(
            serde_json::from_value(wire.data)
                .map_err(|e| DecodeError::malformed(kind, e.to_string()))?,
        ),
        SignalingKind::OfferReceived => Message::OfferReceived {
            sdp: bare_sdp(kind, wire.data)?,
        },
        SignalingKind::AnswerReceived => Message::AnswerReceived {
            sdp: bare_sdp(kind, wire.data)?,
        },
    };

    Ok(Envelope {
        sender: wire.name,
        target: wire.target,
        message,
    })
}

fn expect_null(kind: SignalingKind, data: &Value) -> Result<(), DecodeError> {
    if data.is_null() {
        Ok(())
    } else {
        Err(DecodeError::malformed(kind, "expected null data"))
    }
}

fn description(
    kind: SignalingKind,
    data: Value,
    expected: SdpType,
) -> Result<SessionDescription, DecodeError> {
    let desc: SessionDescription =
        serde_json::from_value(data).map_err(|e| DecodeError::malformed(kind, e.to_string()))?;
    if desc.sdp_type != expected {
        return Err(DecodeError::malformed(
            kind,
            format!("expected {} description, got {}", expected.as_str(), desc.sdp_type.as_str()),
        ));
    }
    Ok(desc)
}

fn bare_sdp(kind: SignalingKind, data: Value) -> Result<String, DecodeError> {
    match data {
        Value::String(sdp) => Ok(sdp),
        other => Err(DecodeError::malformed(
            kind,
            format!("expected sdp string, got {other}"),
        )),
    }
}
