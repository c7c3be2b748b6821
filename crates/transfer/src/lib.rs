//! Chunked text and file transfer over a negotiated data channel.
//!
//! The engine keeps the per-connection history, pushes one outbound file
//! at a time with stop-and-wait pacing (one chunk per `file-ack`), and
//! reassembles inbound files from binary frames.

mod channel;
mod chunked;
mod engine;
mod progress;
mod reassembly;
mod types;
mod upload;

pub use channel::{ChannelFuture, DataChannel};
pub use chunked::{ChunkReader, OutboundFile, chunk_count, guess_mime_type};
pub use engine::{
    BUSY_REASON, EngineConfig, MAX_INBOUND_SIZE, TOO_LARGE_REASON, TransferEngine,
};
pub use progress::percent;
pub use reassembly::{Reassembly, ReassemblyStep};
pub use types::{Direction, ItemKind, ItemPayload, ItemStatus, TransferEvent, TransferItem};
pub use upload::UploadUpdate;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("file read failed: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("data channel is not open")]
    NotConnected,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] handoff_protocol::ProtocolError),
}

/// Failures reported by the peer transport or its data channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("channel closed")]
    ChannelClosed,

    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),
}
