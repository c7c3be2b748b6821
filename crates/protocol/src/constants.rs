use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Upper bound for one binary chunk frame on the data channel (64 KiB).
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Default relay port.
pub const DEFAULT_RELAY_PORT: u16 = 3001;

/// Maximum relay message size in bytes (1 MB).
///
/// Relay traffic is SDP blobs and ICE candidates only; file bytes never
/// cross the relay.
pub const WS_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// How often the relay pings idle sockets.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(20);

/// Read deadline: a socket silent for this long is considered dead.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// Delay between marking a transfer complete and dropping its progress bar.
pub const UI_SETTLE_DELAY: Duration = Duration::from_millis(1000);

/// Longest accepted session code, after trimming.
pub const MAX_CODE_LEN: usize = 64;

/// Relay event identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelayEvent {
    // Client to server
    Create,
    Join,
    Leave,

    // Server to client
    SessionCreated,
    SessionJoined,
    PeerJoined,
    PeerLeft,
    SessionError,

    // Relayed between the two members of a room
    Offer,
    Answer,
    IceCandidate,

    /// Forward compatibility: unknown events deserialize here.
    #[serde(other)]
    Unknown,
}

impl RelayEvent {
    /// Returns `true` for events the relay forwards verbatim to the other member.
    pub fn is_relayed(self) -> bool {
        matches!(self, Self::Offer | Self::Answer | Self::IceCandidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_event_serialization() {
        assert_eq!(
            serde_json::to_string(&RelayEvent::IceCandidate).unwrap(),
            "\"ice-candidate\""
        );
        assert_eq!(
            serde_json::to_string(&RelayEvent::SessionError).unwrap(),
            "\"session-error\""
        );
        assert_eq!(
            serde_json::to_string(&RelayEvent::PeerJoined).unwrap(),
            "\"peer-joined\""
        );
    }

    #[test]
    fn relay_event_deserialization() {
        let ev: RelayEvent = serde_json::from_str("\"peer-left\"").unwrap();
        assert_eq!(ev, RelayEvent::PeerLeft);
    }

    #[test]
    fn unknown_relay_event() {
        let ev: RelayEvent = serde_json::from_str("\"webrtc-renegotiate\"").unwrap();
        assert_eq!(ev, RelayEvent::Unknown);
    }

    #[test]
    fn only_negotiation_events_are_relayed() {
        assert!(RelayEvent::Offer.is_relayed());
        assert!(RelayEvent::Answer.is_relayed());
        assert!(RelayEvent::IceCandidate.is_relayed());
        assert!(!RelayEvent::Create.is_relayed());
        assert!(!RelayEvent::PeerJoined.is_relayed());
    }

    #[test]
    fn chunk_size_is_64k() {
        assert_eq!(CHUNK_SIZE, 65536);
    }
}
