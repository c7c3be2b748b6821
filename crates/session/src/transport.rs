//! Seam between the session and a concrete peer-to-peer transport.
//!
//! A WebRTC stack, or an in-memory pair in tests, plugs in here. The
//! session drives the transport through [`PeerTransport`] and consumes
//! everything the transport reports asynchronously as [`TransportEvent`]s.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use handoff_protocol::{DataFrame, IceCandidate, SessionDescription};
use handoff_transfer::{DataChannel, TransportError};
use tokio::sync::mpsc;

use crate::config::IceServer;

/// Label of the single negotiated channel.
pub const DATA_CHANNEL_LABEL: &str = "handoff";

/// A boxed future returned by transport calls.
pub type TransportFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Connectivity of the underlying peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerConnectionState {
    /// States that end the session.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Closed)
    }
}

/// Lifecycle of the negotiated data channel.
pub enum ChannelEvent {
    /// The channel is ready; frames may be sent through the handle.
    Open(Arc<dyn DataChannel>),
    Close,
    Message(DataFrame),
}

impl std::fmt::Debug for ChannelEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open(_) => f.write_str("Open"),
            Self::Close => f.write_str("Close"),
            Self::Message(DataFrame::Text(text)) => write!(f, "Message(text, {} bytes)", text.len()),
            Self::Message(DataFrame::Binary(data)) => {
                write!(f, "Message(binary, {} bytes)", data.len())
            }
        }
    }
}

/// Everything a transport reports on its own schedule.
#[derive(Debug)]
pub enum TransportEvent {
    /// A local route was discovered and should be relayed to the peer.
    LocalCandidate(IceCandidate),
    StateChanged(PeerConnectionState),
    Channel(ChannelEvent),
}

/// One peer connection.
pub trait PeerTransport: Send + Sync + 'static {
    /// Opens the data channel on the offering side. The joiner learns about
    /// the channel through [`ChannelEvent::Open`] instead.
    fn create_data_channel(&self, label: &str) -> TransportFuture<'_, ()>;

    fn create_offer(&self) -> TransportFuture<'_, SessionDescription>;

    fn create_answer(&self) -> TransportFuture<'_, SessionDescription>;

    fn set_local_description(&self, desc: SessionDescription) -> TransportFuture<'_, ()>;

    fn set_remote_description(&self, desc: SessionDescription) -> TransportFuture<'_, ()>;

    fn add_ice_candidate(&self, candidate: IceCandidate) -> TransportFuture<'_, ()>;

    fn close(&self) -> TransportFuture<'_, ()>;
}

/// Builds a peer connection for one session.
pub trait TransportFactory: Send + Sync + 'static {
    fn create(
        &self,
        ice_servers: &[IceServer],
    ) -> Result<(Arc<dyn PeerTransport>, mpsc::UnboundedReceiver<TransportEvent>), TransportError>;
}
