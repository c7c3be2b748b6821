//! Data-channel frames exchanged directly between the two peers.
//!
//! Text frames carry JSON [`ControlFrame`]s; binary frames carry raw chunk
//! bytes (at most [`CHUNK_SIZE`](crate::constants::CHUNK_SIZE)) and belong
//! to whichever file transfer is currently active on the channel. Because
//! the two kinds are distinguishable on the wire, text messages may be
//! interleaved with an in-flight file.

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Name, MIME type and size of a file offered to the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    #[serde(rename = "type", default)]
    pub mime_type: String,
    pub size: u64,
}

/// Which end of a transfer sent a `file-abort`.
///
/// Each peer numbers its own transfers, so an id alone is ambiguous when
/// both sides are sending at once. A sender's abort names its own upload;
/// a receiver's abort names the upload it was receiving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbortSide {
    Sender,
    Receiver,
}

/// Structured message carried in a text frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlFrame {
    /// A chat message; never chunked, never acknowledged.
    Text { id: u64, payload: String },
    /// Announces a file. No bytes follow until the receiver acks.
    FileMeta { id: u64, metadata: FileMetadata },
    /// Receiver is ready for the next chunk of transfer `id`.
    FileAck { id: u64 },
    /// Either side gives up on transfer `id`, numbered by the sender.
    FileAbort {
        id: u64,
        side: AbortSide,
        #[serde(default)]
        reason: String,
    },
}

impl ControlFrame {
    /// Parses a text frame. Anything that is not a known frame is malformed.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))
    }

    /// Serializes the frame for a text send.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// The transfer or message id this frame refers to.
    pub fn id(&self) -> u64 {
        match self {
            Self::Text { id, .. }
            | Self::FileMeta { id, .. }
            | Self::FileAck { id }
            | Self::FileAbort { id, .. } => *id,
        }
    }
}

/// One message on the negotiated data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataFrame {
    Text(String),
    Binary(Vec<u8>),
}
