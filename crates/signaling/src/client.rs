//! Signaling client: one WebSocket to the relay per session.

use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;

use handoff_protocol::constants::{WS_MAX_MESSAGE_SIZE, WS_PING_PERIOD};
use handoff_protocol::{
    IceCandidate, Message, RelayEvent, SdpKind, SessionCode, SessionDescription, Signal,
};

use crate::ClientError;

/// Outbound buffer between callers and the write pump.
const WRITE_BUFFER_SIZE: usize = 256;

/// Inbound buffer of decoded signals.
const SIGNAL_BUFFER_SIZE: usize = 64;

/// Connected relay client.
///
/// Inbound traffic arrives on the [`Signal`] receiver returned by
/// [`connect`](Self::connect); that receiver yields `None` once the relay
/// connection is gone.
pub struct SignalingClient {
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
    _read_handle: tokio::task::JoinHandle<()>,
    _write_handle: tokio::task::JoinHandle<()>,
}

impl SignalingClient {
    /// Opens a WebSocket to the relay at `url` and starts the pumps.
    pub async fn connect(url: &str) -> Result<(Self, mpsc::Receiver<Signal>), ClientError> {
        let mut ws_config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let (ws_stream, _) =
            tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false).await?;
        let (write, read) = ws_stream.split();
        tracing::info!(%url, "connected to relay");

        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(WRITE_BUFFER_SIZE);
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_BUFFER_SIZE);
        let cancel = CancellationToken::new();

        let write_handle = {
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::write::write_pump(
                write,
                write_rx,
                WS_PING_PERIOD,
                cancel,
            ))
        };

        let read_handle = {
            let cancel = cancel.clone();
            let write_tx = write_tx.clone();
            tokio::spawn(crate::pumps::read::read_pump(
                read, signal_tx, write_tx, cancel,
            ))
        };

        let client = Self {
            write_tx,
            cancel,
            _read_handle: read_handle,
            _write_handle: write_handle,
        };
        Ok((client, signal_rx))
    }

    /// Asks the relay to open a room for `code`.
    pub async fn create(&self, code: &SessionCode) -> Result<(), ClientError> {
        self.send(Message::bare(RelayEvent::Create, Some(code.clone())))
            .await
    }

    /// Asks the relay to add this socket to the room for `code`.
    pub async fn join(&self, code: &SessionCode) -> Result<(), ClientError> {
        self.send(Message::bare(RelayEvent::Join, Some(code.clone())))
            .await
    }

    /// Leaves the room for `code`.
    pub async fn leave(&self, code: &SessionCode) -> Result<(), ClientError> {
        self.send(Message::bare(RelayEvent::Leave, Some(code.clone())))
            .await
    }

    /// Relays a local offer or answer to the peer.
    pub async fn send_description(
        &self,
        code: &SessionCode,
        desc: &SessionDescription,
    ) -> Result<(), ClientError> {
        let event = match desc.kind {
            SdpKind::Offer => RelayEvent::Offer,
            SdpKind::Answer => RelayEvent::Answer,
        };
        self.send_payload(event, code, desc).await
    }

    /// Relays one local ICE candidate to the peer.
    pub async fn send_ice_candidate(
        &self,
        code: &SessionCode,
        candidate: &IceCandidate,
    ) -> Result<(), ClientError> {
        self.send_payload(RelayEvent::IceCandidate, code, candidate)
            .await
    }

    async fn send_payload<T: Serialize>(
        &self,
        event: RelayEvent,
        code: &SessionCode,
        payload: &T,
    ) -> Result<(), ClientError> {
        let msg = Message::new(event, Some(code.clone()), Some(payload))?;
        self.send(msg).await
    }

    /// Queues a raw envelope for the write pump.
    pub async fn send(&self, msg: Message) -> Result<(), ClientError> {
        let json = msg.to_json()?;
        tracing::trace!(event = ?msg.event, "sending to relay");
        self.write_tx
            .send(tungstenite::Message::Text(json.into()))
            .await
            .map_err(|_| ClientError::Closed)
    }

    /// Returns `true` while the relay socket is up.
    pub fn is_connected(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Stops the pumps. Messages already queued are still flushed.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
