//! WebSocket read pump: turns relay frames into [`Signal`]s.

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use handoff_protocol::constants::{WS_MAX_MESSAGE_SIZE, WS_PONG_WAIT};
use handoff_protocol::{Message, Signal};

/// Reads relay messages and forwards them as typed signals.
///
/// Any incoming frame resets the liveness deadline. The loop ends when the
/// socket closes, goes silent past [`WS_PONG_WAIT`], or `cancel` fires;
/// dropping `signal_tx` on exit is what tells the owner the relay is gone.
pub(crate) async fn read_pump<S>(
    mut read: S,
    signal_tx: mpsc::Sender<Signal>,
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut deadline => {
                warn!("relay silent past deadline, closing");
                break;
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        deadline.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);

                        match msg {
                            tungstenite::Message::Text(text) => {
                                if let Some(signal) = parse_signal(&text)
                                    && signal_tx.send(signal).await.is_err()
                                {
                                    debug!("signal receiver dropped");
                                    break;
                                }
                            }
                            tungstenite::Message::Ping(data) => {
                                trace!("received ping, sending pong");
                                let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                            }
                            tungstenite::Message::Pong(_) => {
                                trace!("received pong");
                            }
                            tungstenite::Message::Close(_) => {
                                debug!("relay sent close frame");
                                break;
                            }
                            _ => {} // Binary: the relay never sends any.
                        }
                    }
                    Some(Err(e)) => {
                        warn!("relay read error: {e}");
                        break;
                    }
                    None => {
                        debug!("relay stream ended");
                        break;
                    }
                }
            }
        }
    }

    cancel.cancel();
}

/// Parses one relay text frame. Bad frames are logged and dropped.
fn parse_signal(text: &str) -> Option<Signal> {
    if text.len() > WS_MAX_MESSAGE_SIZE {
        warn!("relay message too large ({} bytes), dropping", text.len());
        return None;
    }

    let msg: Message = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("failed to parse relay message: {e}");
            return None;
        }
    };

    match Signal::from_message(&msg) {
        Ok(signal) => {
            trace!(signal = signal.name(), "received signal");
            Some(signal)
        }
        Err(e) => {
            warn!(event = ?msg.event, "dropping relay message: {e}");
            None
        }
    }
}
