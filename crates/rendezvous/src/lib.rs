//! Rendezvous relay for handoff sessions.
//!
//! Binds short session codes to rooms of at most two members and blindly
//! forwards negotiation messages between them. File bytes never pass
//! through here; once two peers have exchanged offer/answer and ICE
//! candidates they talk directly.

mod connection;
mod handler;
mod registry;
mod relay;
mod server;

pub use connection::{ClientConnection, SendError, Sender};
pub use handler::{Handler, HandlerFuture};
pub use registry::{
    Departure, MemberId, ROOM_CAPACITY, RegistryError, RendezvousRegistry, Room, RoomState,
};
pub use relay::SignalingRelay;
pub use server::{RelayServer, ServerConfig};

/// Per-connection send buffer capacity.
pub const SEND_BUFFER_SIZE: usize = 256;

/// Errors produced by the relay server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
