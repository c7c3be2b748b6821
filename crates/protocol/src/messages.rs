use serde::{Deserialize, Serialize};

use crate::ProtocolError;
use crate::code::SessionCode;
use crate::constants::RelayEvent;
use crate::envelope::Message;

// ---------------------------------------------------------------------------
// Negotiation payloads
// ---------------------------------------------------------------------------

/// Whether a session description is an offer or an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// An opaque SDP blob, shaped like the browser's `RTCSessionDescriptionInit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

/// One proposed network route, shaped like `RTCIceCandidateInit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
}

// ---------------------------------------------------------------------------
// Server payloads
// ---------------------------------------------------------------------------

/// Machine-readable cause of a `session-error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionErrorKind {
    CodeAlreadyExists,
    SessionNotFound,
    SessionFull,
    AlreadyInSession,
    NotInSession,
    NoPeer,
    MalformedMessage,
    #[serde(other)]
    Unknown,
}

/// Payload of a `session-error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionErrorPayload {
    pub kind: SessionErrorKind,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Typed view of inbound relay traffic
// ---------------------------------------------------------------------------

/// A relay message as seen by an endpoint, decoded into a closed set of variants.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    SessionCreated(SessionCode),
    SessionJoined(SessionCode),
    PeerJoined,
    PeerLeft,
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
    SessionError(SessionErrorPayload),
}

impl Signal {
    /// Decodes a relay envelope addressed to an endpoint.
    ///
    /// Client-to-server events (`create`, `join`, `leave`) and unknown
    /// events are rejected with [`ProtocolError::UnexpectedEvent`].
    pub fn from_message(msg: &Message) -> Result<Self, ProtocolError> {
        match msg.event {
            RelayEvent::SessionCreated => Ok(Self::SessionCreated(require_code(msg)?)),
            RelayEvent::SessionJoined => Ok(Self::SessionJoined(require_code(msg)?)),
            RelayEvent::PeerJoined => Ok(Self::PeerJoined),
            RelayEvent::PeerLeft => Ok(Self::PeerLeft),
            RelayEvent::Offer => Ok(Self::Offer(require_payload(msg)?)),
            RelayEvent::Answer => Ok(Self::Answer(require_payload(msg)?)),
            RelayEvent::IceCandidate => Ok(Self::IceCandidate(require_payload(msg)?)),
            RelayEvent::SessionError => Ok(Self::SessionError(require_payload(msg)?)),
            other => Err(ProtocolError::UnexpectedEvent(other)),
        }
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionCreated(_) => "session-created",
            Self::SessionJoined(_) => "session-joined",
            Self::PeerJoined => "peer-joined",
            Self::PeerLeft => "peer-left",
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::IceCandidate(_) => "ice-candidate",
            Self::SessionError(_) => "session-error",
        }
    }
}

fn require_code(msg: &Message) -> Result<SessionCode, ProtocolError> {
    msg.code.clone().ok_or(ProtocolError::MissingCode(msg.event))
}

fn require_payload<T: for<'de> Deserialize<'de>>(msg: &Message) -> Result<T, ProtocolError> {
    msg.parse_payload()?
        .ok_or(ProtocolError::MissingPayload(msg.event))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code() -> SessionCode {
        SessionCode::new("BLUE-FOX-42").unwrap()
    }

    #[test]
    fn session_description_uses_browser_field_names() {
        let sdp = SessionDescription {
            kind: SdpKind::Answer,
            sdp: "v=0\r\n".into(),
        };
        let json = serde_json::to_value(&sdp).unwrap();
        assert_eq!(json["type"], "answer");
        assert_eq!(json["sdp"], "v=0\r\n");
    }

    #[test]
    fn ice_candidate_uses_browser_field_names() {
        let cand = IceCandidate {
            candidate: "candidate:0".into(),
            sdp_mid: Some("0".into()),
            sdp_m_line_index: Some(0),
        };
        let json = serde_json::to_value(&cand).unwrap();
        assert_eq!(json["sdpMid"], "0");
        assert_eq!(json["sdpMLineIndex"], 0);
    }

    #[test]
    fn decodes_offer() {
        let sdp = SessionDescription {
            kind: SdpKind::Offer,
            sdp: "v=0".into(),
        };
        let msg = Message::new(RelayEvent::Offer, Some(code()), Some(&sdp)).unwrap();
        assert_eq!(Signal::from_message(&msg).unwrap(), Signal::Offer(sdp));
    }

    #[test]
    fn decodes_bare_notifications() {
        let msg = Message::bare(RelayEvent::PeerJoined, Some(code()));
        assert_eq!(Signal::from_message(&msg).unwrap(), Signal::PeerJoined);
        let msg = Message::bare(RelayEvent::PeerLeft, None);
        assert_eq!(Signal::from_message(&msg).unwrap(), Signal::PeerLeft);
    }

    #[test]
    fn offer_without_payload_is_rejected() {
        let msg = Message::bare(RelayEvent::Offer, Some(code()));
        assert!(matches!(
            Signal::from_message(&msg),
            Err(ProtocolError::MissingPayload(RelayEvent::Offer))
        ));
    }

    #[test]
    fn session_created_requires_code() {
        let msg = Message::bare(RelayEvent::SessionCreated, None);
        assert!(matches!(
            Signal::from_message(&msg),
            Err(ProtocolError::MissingCode(_))
        ));
    }

    #[test]
    fn client_events_are_not_signals() {
        let msg = Message::bare(RelayEvent::Create, Some(code()));
        assert!(matches!(
            Signal::from_message(&msg),
            Err(ProtocolError::UnexpectedEvent(RelayEvent::Create))
        ));
    }

    #[test]
    fn decodes_session_error() {
        let msg = Message::session_error(None, SessionErrorKind::SessionNotFound, "no such session");
        match Signal::from_message(&msg).unwrap() {
            Signal::SessionError(p) => {
                assert_eq!(p.kind, SessionErrorKind::SessionNotFound);
                assert_eq!(p.reason, "no such session");
            }
            other => panic!("expected session error, got {other:?}"),
        }
    }
}
