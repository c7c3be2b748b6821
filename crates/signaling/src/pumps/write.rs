//! Outbound side of the relay socket: queued envelopes plus keepalive pings.

use std::time::Duration;

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

/// Owns the socket sink. Pings every `keepalive` so the relay's read
/// deadline never fires on an idle session, and sends a close frame on exit.
pub(crate) async fn write_pump<S>(
    mut sink: S,
    mut queue: mpsc::Receiver<tungstenite::Message>,
    keepalive: Duration,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    let mut keepalive = tokio::time::interval_at(Instant::now() + keepalive, keepalive);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            // A final `leave` queued before cancel still goes out.
            biased;

            msg = queue.recv() => {
                let Some(msg) = msg else { break };
                if let Err(e) = sink.send(msg).await {
                    error!("relay write error: {e}");
                    break;
                }
            }
            _ = cancel.cancelled() => break,
            _ = keepalive.tick() => {
                trace!("keepalive ping");
                if let Err(e) = sink.send(tungstenite::Message::Ping(Vec::new().into())).await {
                    error!("relay keepalive error: {e}");
                    break;
                }
            }
        }
    }

    let _ = sink.send(tungstenite::Message::Close(None)).await;
}
