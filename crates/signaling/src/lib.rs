//! Endpoint side of the rendezvous relay.
//!
//! [`SignalingClient`] keeps one WebSocket open to the relay, sends
//! `create`/`join`/`leave` and negotiation messages, and delivers inbound
//! relay traffic as typed [`Signal`](handoff_protocol::Signal)s.

mod client;
mod pumps;

pub use client::SignalingClient;

/// Errors produced by the signaling client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("relay connection closed")]
    Closed,
}
