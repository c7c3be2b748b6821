//! The pull loop for one outbound file.
//!
//! One task per in-flight file. It blocks on "ack received", then on "bytes
//! read", sends exactly one chunk, and goes back to waiting. Results flow
//! back to the engine as [`UploadUpdate`]s so all history mutation stays on
//! the engine's side.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::DataChannel;
use crate::chunked::ChunkReader;

/// Progress reports from upload tasks and settle timers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadUpdate {
    /// A chunk went out; `offset` bytes have been sent in total.
    Progress { id: u64, offset: u64 },
    /// The final chunk was acknowledged.
    Completed { id: u64 },
    /// Reading or sending failed; the transfer is abandoned.
    Failed { id: u64, reason: String },
    /// The settle delay after completion has elapsed.
    Settled { id: u64 },
}

impl UploadUpdate {
    pub fn id(&self) -> u64 {
        match self {
            Self::Progress { id, .. }
            | Self::Completed { id }
            | Self::Failed { id, .. }
            | Self::Settled { id } => *id,
        }
    }
}

pub(crate) struct UploadTask {
    pub id: u64,
    pub reader: ChunkReader,
    pub channel: Arc<dyn DataChannel>,
    pub acks: mpsc::Receiver<()>,
    pub updates: mpsc::UnboundedSender<UploadUpdate>,
    pub cancel: CancellationToken,
}

impl UploadTask {
    pub(crate) async fn run(mut self) {
        let id = self.id;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(id, "upload cancelled");
                    return;
                }
                ack = self.acks.recv() => {
                    if ack.is_none() {
                        return;
                    }
                }
            }

            if self.reader.remaining() == 0 {
                debug!(id, size = self.reader.size(), "upload complete");
                let _ = self.updates.send(UploadUpdate::Completed { id });
                return;
            }

            let chunk = match self.reader.next_chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => continue,
                Err(e) => {
                    warn!(id, "reading chunk failed: {e}");
                    let _ = self.updates.send(UploadUpdate::Failed {
                        id,
                        reason: e.to_string(),
                    });
                    return;
                }
            };

            trace!(id, len = chunk.len(), offset = self.reader.offset(), "sending chunk");
            if let Err(e) = self.channel.send_binary(chunk).await {
                warn!(id, "sending chunk failed: {e}");
                let _ = self.updates.send(UploadUpdate::Failed {
                    id,
                    reason: e.to_string(),
                });
                return;
            }

            let _ = self.updates.send(UploadUpdate::Progress {
                id,
                offset: self.reader.offset(),
            });
        }
    }
}
