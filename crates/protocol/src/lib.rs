//! Wire protocol shared by the handoff relay and its endpoints.
//!
//! Two independent wires are described here:
//! - the relay wire: JSON [`Message`] envelopes exchanged with the
//!   rendezvous server, addressed by [`SessionCode`];
//! - the data-channel wire: [`ControlFrame`] text frames plus raw binary
//!   chunk frames exchanged directly between the two peers.

pub mod code;
pub mod constants;
pub mod envelope;
pub mod frames;
pub mod messages;

// Re-export primary types for convenience.
pub use code::SessionCode;
pub use constants::RelayEvent;
pub use envelope::Message;
pub use frames::{AbortSide, ControlFrame, DataFrame, FileMetadata};
pub use messages::{
    IceCandidate, SdpKind, SessionDescription, SessionErrorKind, SessionErrorPayload, Signal,
};

/// Errors produced while encoding or decoding protocol types.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid session code: {0}")]
    InvalidCode(String),

    #[error("missing payload for {0:?}")]
    MissingPayload(RelayEvent),

    #[error("missing session code for {0:?}")]
    MissingCode(RelayEvent),

    #[error("unexpected event {0:?}")]
    UnexpectedEvent(RelayEvent),

    #[error("malformed control frame: {0}")]
    MalformedFrame(String),
}
