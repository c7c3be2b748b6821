//! Endpoint orchestration for handoff.
//!
//! A [`Session`] claims a room on the rendezvous relay, negotiates a peer
//! connection through it and then moves text and files over the negotiated
//! data channel. The peer connection itself is pluggable through
//! [`TransportFactory`].

pub mod bridge;
pub mod codegen;
pub mod config;
pub mod negotiation;
mod session;
pub mod transport;

pub use bridge::{ChannelEventBridge, ConnectionStatus};
pub use codegen::generate_code;
pub use config::{IceServer, SessionConfig};
pub use negotiation::{Negotiation, NegotiationOutcome, NegotiationState, Role, Signaler};
pub use session::{EndReason, Session, SessionEvent, SessionHandle};
pub use transport::{
    ChannelEvent, PeerConnectionState, PeerTransport, TransportEvent, TransportFactory,
    TransportFuture,
};

use handoff_protocol::{ProtocolError, SessionErrorKind};
use handoff_signaling::ClientError;
use handoff_transfer::{TransferError, TransportError};

/// Errors produced while starting or driving a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("relay error: {0}")]
    Signaling(#[from] ClientError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The relay refused `create` or `join`.
    #[error("{reason}")]
    Rejected {
        kind: SessionErrorKind,
        reason: String,
    },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("relay closed the connection")]
    RelayClosed,

    #[error("relay did not answer in time")]
    Timeout,

    #[error("session has ended")]
    Ended,
}
