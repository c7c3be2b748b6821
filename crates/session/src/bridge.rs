//! Feeds data-channel lifecycle into the transfer engine.

use handoff_transfer::TransferEngine;
use tracing::debug;

use crate::transport::ChannelEvent;

/// Link status shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Room is open, no peer yet.
    WaitingForPeer,
    /// Both peers are in the room and exchanging descriptions.
    Negotiating,
    Connected,
    Disconnected,
}

pub struct ChannelEventBridge {
    status: ConnectionStatus,
}

impl ChannelEventBridge {
    pub fn new(status: ConnectionStatus) -> Self {
        Self { status }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Moves to `status`. Returns it if it differs from the current one.
    pub fn set_status(&mut self, status: ConnectionStatus) -> Option<ConnectionStatus> {
        if self.status == status {
            return None;
        }
        debug!(from = ?self.status, to = ?status, "connection status");
        self.status = status;
        Some(status)
    }

    /// Applies one channel event. Returns the new status if it changed.
    pub async fn handle(
        &mut self,
        engine: &mut TransferEngine,
        event: ChannelEvent,
    ) -> Option<ConnectionStatus> {
        match event {
            ChannelEvent::Open(channel) => {
                engine.on_channel_open(channel).await;
                self.set_status(ConnectionStatus::Connected)
            }
            ChannelEvent::Close => {
                engine.on_channel_closed();
                self.set_status(ConnectionStatus::Disconnected)
            }
            ChannelEvent::Message(frame) => {
                engine.handle_frame(frame).await;
                None
            }
        }
    }
}
