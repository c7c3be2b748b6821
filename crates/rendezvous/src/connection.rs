//! Relay client connection: read/write pumps, ping/pong, send buffering.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use handoff_protocol::constants::{WS_MAX_MESSAGE_SIZE, WS_PING_PERIOD, WS_PONG_WAIT};
use handoff_protocol::{Message, RelayEvent};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::SEND_BUFFER_SIZE;
use crate::handler::Handler;
use crate::registry::MemberId;

/// Handle for sending messages to one connected client.
///
/// Cloneable and cheap; wraps an `mpsc::Sender`.
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::Sender<WsMessage>,
}

impl Sender {
    /// Creates a sender and the receiving half its write pump drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<WsMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Sends a relay [`Message`] as JSON text.
    ///
    /// Never blocks. Returns `Err` if the buffer is full or the client is gone.
    pub fn send_msg(&self, msg: Message) -> Result<(), SendError> {
        let json = msg.to_json().map_err(|_| SendError)?;
        self.tx.try_send(WsMessage::Text(json.into())).map_err(|_| {
            tracing::warn!(event = ?msg.event, "send buffer full or closed, dropping message");
            SendError
        })
    }

    /// Returns `true` if the send channel is still open.
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Error returned when the send channel is full or closed.
#[derive(Debug, thiserror::Error)]
#[error("send failed: buffer full or connection closed")]
pub struct SendError;

/// Active connection to one relay client.
pub struct ClientConnection {
    pub member: MemberId,
    pub remote_addr: String,
    sender: Sender,
    cancel: CancellationToken,
    done: tokio::sync::watch::Receiver<bool>,
}

impl ClientConnection {
    /// Returns a cloneable [`Sender`] for this connection.
    pub fn sender(&self) -> Sender {
        self.sender.clone()
    }

    /// Watch that flips to `true` once the disconnect hook has run.
    pub fn done(&self) -> tokio::sync::watch::Receiver<bool> {
        self.done.clone()
    }

    /// Signals the pumps to stop.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Signals the pumps to stop and waits until the disconnect hook has run.
    pub async fn close_and_wait(&self) {
        self.cancel.cancel();
        let mut done = self.done.clone();
        let _ = done.wait_for(|finished| *finished).await;
    }
}

/// Runs the read and write pumps for a WebSocket connection.
///
/// The pumps run as background tokio tasks and stop when the socket
/// closes, goes silent past [`WS_PONG_WAIT`], or the cancel token fires.
/// The handler's `on_disconnected` hook runs exactly once afterwards.
pub fn spawn_connection<S, H>(
    ws_stream: S,
    member: MemberId,
    remote_addr: String,
    handler: Arc<H>,
    server_cancel: CancellationToken,
) -> ClientConnection
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Send
        + 'static,
    H: Handler,
{
    let (sender, rx) = Sender::channel(SEND_BUFFER_SIZE);
    let cancel = server_cancel.child_token();
    let (done_tx, done_rx) = tokio::sync::watch::channel(false);

    let conn = ClientConnection {
        member,
        remote_addr: remote_addr.clone(),
        sender: sender.clone(),
        cancel: cancel.clone(),
        done: done_rx,
    };

    let (ws_sink, ws_stream) = ws_stream.split();

    // Write pump.
    tokio::spawn(write_pump(ws_sink, rx, cancel.clone()));

    // Read pump.
    tokio::spawn(async move {
        read_pump(ws_stream, member, sender, handler.clone(), cancel.clone()).await;
        // When the read pump exits, stop the write pump too.
        cancel.cancel();
        handler.on_disconnected(member).await;
        tracing::info!(%member, %remote_addr, "client disconnected");
        let _ = done_tx.send(true);
    });

    conn
}

/// Write pump: drains the send channel and sends WS pings.
async fn write_pump<S>(mut sink: S, mut rx: mpsc::Receiver<WsMessage>, cancel: CancellationToken)
where
    S: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Send + Unpin,
{
    let mut ping_interval = tokio::time::interval(WS_PING_PERIOD);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; skip it.
    ping_interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = rx.recv() => {
                match msg {
                    Some(ws_msg) => {
                        if let Err(e) = sink.send(ws_msg).await {
                            tracing::error!("write pump send error: {e}");
                            break;
                        }
                    }
                    None => break, // Channel closed.
                }
            }

            _ = ping_interval.tick() => {
                if let Err(e) = sink.send(WsMessage::Ping(Vec::new().into())).await {
                    tracing::error!("write pump ping error: {e}");
                    break;
                }
            }
        }
    }

    // Best-effort close frame.
    let _ = sink.close().await;
}

/// Read pump: reads WS frames and dispatches to the handler.
///
/// Any incoming frame resets the read deadline.
async fn read_pump<S, H>(
    mut stream: S,
    member: MemberId,
    sender: Sender,
    handler: Arc<H>,
    cancel: CancellationToken,
) where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Send
        + Unpin,
    H: Handler,
{
    let deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut deadline => {
                tracing::warn!(%member, "read deadline passed, closing connection");
                break;
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(ws_msg)) => {
                        deadline.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);
                        match ws_msg {
                            WsMessage::Text(text) => {
                                if text.len() > WS_MAX_MESSAGE_SIZE {
                                    tracing::error!("message exceeds max size ({} > {})", text.len(), WS_MAX_MESSAGE_SIZE);
                                    continue;
                                }
                                dispatch_text(&handler, member, &sender, &text).await;
                            }
                            WsMessage::Binary(_) => {
                                // File bytes never travel through the relay.
                                tracing::warn!(%member, "binary frame on relay socket, ignoring");
                            }
                            WsMessage::Pong(_) => {}
                            WsMessage::Ping(data) => {
                                let _ = sender.tx.try_send(WsMessage::Pong(data));
                            }
                            WsMessage::Close(_) => {
                                tracing::debug!(%member, "received close frame");
                                break;
                            }
                            WsMessage::Frame(_) => {} // Raw frames ignored.
                        }
                    }
                    Some(Err(e)) => {
                        tracing::error!(%member, "read pump error: {e}");
                        break;
                    }
                    None => break, // Stream ended.
                }
            }
        }
    }
}

/// Dispatches a text (JSON) message to the appropriate handler method.
async fn dispatch_text<H: Handler>(handler: &Arc<H>, member: MemberId, sender: &Sender, text: &str) {
    let msg: Message = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            handler
                .on_malformed(member, sender.clone(), format!("invalid message JSON: {e}"))
                .await;
            return;
        }
    };

    tracing::trace!(%member, event = ?msg.event, "received message");

    let s = sender.clone();
    match msg.event {
        RelayEvent::Create => handler.on_create(member, s, msg).await,
        RelayEvent::Join => handler.on_join(member, s, msg).await,
        RelayEvent::Leave => handler.on_leave(member, s, msg).await,
        RelayEvent::Offer | RelayEvent::Answer | RelayEvent::IceCandidate => {
            handler.on_relay(member, s, msg).await
        }
        other => {
            handler
                .on_malformed(member, s, format!("unexpected event {other:?}"))
                .await
        }
    }
}
