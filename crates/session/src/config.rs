use std::time::Duration;

use handoff_protocol::constants::{CHUNK_SIZE, DEFAULT_RELAY_PORT, UI_SETTLE_DELAY};
use handoff_transfer::{EngineConfig, MAX_INBOUND_SIZE};
use serde::{Deserialize, Serialize};

/// One STUN or TURN server handed to the transport at negotiation start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub credential: String,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: String::new(),
            credential: String::new(),
        }
    }
}

/// Endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// WebSocket URL of the rendezvous relay.
    pub relay_url: String,
    pub ice_servers: Vec<IceServer>,
    /// Upper bound for one binary chunk. Values above 65536 are capped.
    pub chunk_size: usize,
    /// Largest file accepted from the peer, in bytes.
    pub max_inbound_size: u64,
    /// How long a finished send keeps showing its progress.
    pub settle_delay_ms: u64,
    /// Codes tried when a generated code is already taken.
    pub create_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            relay_url: format!("ws://127.0.0.1:{DEFAULT_RELAY_PORT}"),
            ice_servers: vec![
                IceServer::stun("stun:stun.l.google.com:19302"),
                IceServer::stun("stun:stun1.l.google.com:19302"),
            ],
            chunk_size: CHUNK_SIZE,
            max_inbound_size: MAX_INBOUND_SIZE,
            settle_delay_ms: UI_SETTLE_DELAY.as_millis() as u64,
            create_attempts: 5,
        }
    }
}

impl SessionConfig {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            chunk_size: self.chunk_size.clamp(1, CHUNK_SIZE),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            max_inbound_size: self.max_inbound_size,
        }
    }
}
