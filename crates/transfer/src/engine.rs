//! Per-connection transfer state: history, outbound queue, inbound buffer.
//!
//! The engine is owned by a single event loop and mutated only through
//! `&mut self`. Outbound bytes are pushed by one [`UploadTask`] at a time;
//! the task reports back through [`UploadUpdate`]s which the owner feeds to
//! [`TransferEngine::apply_update`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use handoff_protocol::constants::{CHUNK_SIZE, UI_SETTLE_DELAY};
use handoff_protocol::{AbortSide, ControlFrame, DataFrame, FileMetadata, ProtocolError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chunked::OutboundFile;
use crate::progress::percent;
use crate::reassembly::{Reassembly, ReassemblyStep};
use crate::types::{Direction, ItemPayload, ItemStatus, TransferEvent, TransferItem};
use crate::upload::{UploadTask, UploadUpdate};
use crate::{DataChannel, TransferError};

/// Reason sent with `file-abort` when a second file is offered mid-transfer.
pub const BUSY_REASON: &str = "busy";

/// Reason sent with `file-abort` when an offered file exceeds
/// [`EngineConfig::max_inbound_size`].
pub const TOO_LARGE_REASON: &str = "too large";

/// Default cap on a single inbound file, which is buffered in memory.
pub const MAX_INBOUND_SIZE: u64 = 1 << 30;

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Outbound chunk size, clamped to `1..=CHUNK_SIZE`.
    pub chunk_size: usize,
    /// How long a completed send keeps showing its progress.
    pub settle_delay: Duration,
    /// Largest file accepted from the peer.
    pub max_inbound_size: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            settle_delay: UI_SETTLE_DELAY,
            max_inbound_size: MAX_INBOUND_SIZE,
        }
    }
}

struct QueuedFile {
    item_id: u64,
    file: OutboundFile,
}

struct ActiveUpload {
    id: u64,
    size: u64,
    acks: mpsc::Sender<()>,
    cancel: CancellationToken,
}

pub struct TransferEngine {
    config: EngineConfig,
    channel: Option<Arc<dyn DataChannel>>,
    history: Vec<TransferItem>,
    next_id: u64,
    queue: VecDeque<QueuedFile>,
    active: Option<ActiveUpload>,
    inbound: Option<Reassembly>,
    updates_tx: mpsc::UnboundedSender<UploadUpdate>,
    updates_rx: mpsc::UnboundedReceiver<UploadUpdate>,
    events: mpsc::UnboundedSender<TransferEvent>,
}

impl TransferEngine {
    /// Creates an engine and the stream of history changes it produces.
    pub fn new(config: EngineConfig) -> (Self, mpsc::UnboundedReceiver<TransferEvent>) {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let engine = Self {
            config,
            channel: None,
            history: Vec::new(),
            next_id: 1,
            queue: VecDeque::new(),
            active: None,
            inbound: None,
            updates_tx,
            updates_rx,
            events,
        };
        (engine, events_rx)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn history(&self) -> &[TransferItem] {
        &self.history
    }

    pub fn item(&self, id: u64) -> Option<&TransferItem> {
        self.history.iter().find(|i| i.id == id)
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_some()
    }

    /// Id of the outbound file currently on the wire.
    pub fn active_upload(&self) -> Option<u64> {
        self.active.as_ref().map(|a| a.id)
    }

    /// Sender-side id of the inbound file being reassembled.
    pub fn open_reassembly(&self) -> Option<u64> {
        self.inbound.as_ref().map(|r| r.remote_id)
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    // -----------------------------------------------------------------------
    // Channel lifecycle
    // -----------------------------------------------------------------------

    /// The channel is open: enable sends and start any queued file.
    pub async fn on_channel_open(&mut self, channel: Arc<dyn DataChannel>) {
        info!("data channel open");
        self.channel = Some(channel);
        self.start_next().await;
    }

    /// The channel is gone: fail the in-flight and queued sends and drop the
    /// inbound buffer.
    pub fn on_channel_closed(&mut self) {
        if self.channel.take().is_some() {
            info!("data channel closed");
        }
        self.fail_all("channel closed");
    }

    /// Tells the peer every open transfer is abandoned, then fails them
    /// locally. Used when the session is ended on purpose.
    pub async fn abort_all(&mut self, reason: &str) {
        if let Some(channel) = self.channel.clone() {
            let mut open = Vec::new();
            if let Some(active) = &self.active {
                open.push((active.id, AbortSide::Sender));
            }
            if let Some(inbound) = &self.inbound {
                open.push((inbound.remote_id, AbortSide::Receiver));
            }
            for (id, side) in open {
                let frame = ControlFrame::FileAbort {
                    id,
                    side,
                    reason: reason.to_string(),
                };
                if let Err(e) = send_control(channel.as_ref(), &frame).await {
                    debug!(id, "could not send abort: {e}");
                }
            }
        }
        self.channel = None;
        self.fail_all(reason);
    }

    fn fail_all(&mut self, reason: &str) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
            self.fail_item(active.id, reason);
        }
        while let Some(queued) = self.queue.pop_front() {
            self.fail_item(queued.item_id, reason);
        }
        if let Some(inbound) = self.inbound.take() {
            debug!(id = inbound.remote_id, "dropping reassembly buffer");
            self.fail_item(inbound.item_id, reason);
        }
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Sends a text message. Requires an open channel.
    pub async fn send_text(&mut self, text: String) -> Result<u64, TransferError> {
        let channel = self.channel.clone().ok_or(TransferError::NotConnected)?;
        let id = self.allocate_id();
        let frame = ControlFrame::Text {
            id,
            payload: text.clone(),
        };
        let sent = send_control(channel.as_ref(), &frame).await;
        let mut item = TransferItem::text(id, Direction::Sent, text);
        if let Err(e) = &sent {
            warn!(id, "text send failed: {e}");
            item.status = ItemStatus::Failed;
            item.error = Some(e.to_string());
        }
        self.push_item(item);
        sent.map(|()| id)
    }

    /// Queues a file. It starts immediately if the channel is open and idle.
    pub async fn send_file(&mut self, file: OutboundFile) -> u64 {
        let id = self.allocate_id();
        self.push_item(TransferItem::file(
            id,
            Direction::Sent,
            file.metadata.clone(),
            ItemStatus::Queued,
        ));
        self.queue.push_back(QueuedFile { item_id: id, file });
        self.start_next().await;
        id
    }

    /// Starts the next queued file if the channel is open and idle.
    async fn start_next(&mut self) {
        if self.active.is_some() {
            return;
        }
        let Some(channel) = self.channel.clone() else {
            return;
        };

        while let Some(QueuedFile { item_id, file }) = self.queue.pop_front() {
            let metadata: FileMetadata = file.metadata.clone();
            let frame = ControlFrame::FileMeta {
                id: item_id,
                metadata: metadata.clone(),
            };
            if let Err(e) = send_control(channel.as_ref(), &frame).await {
                warn!(id = item_id, "could not announce file: {e}");
                self.fail_item(item_id, e.to_string());
                continue;
            }

            info!(id = item_id, name = %metadata.name, size = metadata.size, "file offered");
            let (acks, acks_rx) = mpsc::channel(1);
            let cancel = CancellationToken::new();
            let task = UploadTask {
                id: item_id,
                reader: file.into_reader(self.config.chunk_size),
                channel: Arc::clone(&channel),
                acks: acks_rx,
                updates: self.updates_tx.clone(),
                cancel: cancel.clone(),
            };
            tokio::spawn(task.run());

            self.active = Some(ActiveUpload {
                id: item_id,
                size: metadata.size,
                acks,
                cancel,
            });
            self.update_item(item_id, |item| {
                item.status = ItemStatus::InProgress;
            });
            return;
        }
    }

    /// Waits for the next report from the upload task or a settle timer.
    pub async fn next_update(&mut self) -> Option<UploadUpdate> {
        self.updates_rx.recv().await
    }

    /// Applies a report produced by [`next_update`](Self::next_update).
    ///
    /// Reports about transfers that already ended are ignored.
    pub async fn apply_update(&mut self, update: UploadUpdate) {
        let is_active = self.active.as_ref().is_some_and(|a| a.id == update.id());
        match update {
            UploadUpdate::Progress { id, offset } if is_active => {
                let size = self.active.as_ref().map_or(0, |a| a.size);
                let progress = percent(offset, size);
                self.update_item(id, |item| {
                    item.progress = item.progress.max(progress);
                });
            }
            UploadUpdate::Completed { id } if is_active => {
                info!(id, "file sent");
                self.active = None;
                self.update_item(id, |item| {
                    item.progress = 100;
                    item.status = ItemStatus::Complete;
                });
                self.schedule_settle(id);
                self.start_next().await;
            }
            UploadUpdate::Failed { id, reason } if is_active => {
                if let Some(channel) = self.channel.clone() {
                    let frame = ControlFrame::FileAbort {
                        id,
                        side: AbortSide::Sender,
                        reason: reason.clone(),
                    };
                    if let Err(e) = send_control(channel.as_ref(), &frame).await {
                        debug!(id, "could not send abort: {e}");
                    }
                }
                self.active = None;
                self.fail_item(id, reason);
                self.start_next().await;
            }
            UploadUpdate::Settled { id } => {
                self.update_item(id, |item| item.settled = true);
            }
            other => debug!(id = other.id(), "ignoring update for finished transfer"),
        }
    }

    fn schedule_settle(&self, id: u64) {
        let tx = self.updates_tx.clone();
        let delay = self.config.settle_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(UploadUpdate::Settled { id });
        });
    }

    // -----------------------------------------------------------------------
    // Receiving
    // -----------------------------------------------------------------------

    /// Demultiplexes one frame from the channel.
    ///
    /// Unparseable control frames are logged and dropped.
    pub async fn handle_frame(&mut self, frame: DataFrame) {
        match frame {
            DataFrame::Text(text) => match ControlFrame::parse(&text) {
                Ok(control) => self.handle_control(control).await,
                Err(e) => warn!("dropping control frame: {e}"),
            },
            DataFrame::Binary(bytes) => self.handle_chunk(&bytes).await,
        }
    }

    pub async fn handle_control(&mut self, frame: ControlFrame) {
        match frame {
            ControlFrame::Text { id, payload } => {
                debug!(remote_id = id, "text received");
                let local = self.allocate_id();
                self.push_item(TransferItem::text(local, Direction::Received, payload));
            }
            ControlFrame::FileMeta { id, metadata } => self.on_file_meta(id, metadata).await,
            ControlFrame::FileAck { id } => self.on_file_ack(id),
            ControlFrame::FileAbort { id, side, reason } => {
                self.on_file_abort(id, side, reason).await
            }
        }
    }

    async fn on_file_meta(&mut self, id: u64, metadata: FileMetadata) {
        if let Some(open) = &self.inbound {
            if open.remote_id == id {
                debug!(id, "duplicate file-meta ignored");
                return;
            }
            warn!(id, open = open.remote_id, "file offered while another is open, rejecting");
            self.send_to_peer(ControlFrame::FileAbort {
                id,
                side: AbortSide::Receiver,
                reason: BUSY_REASON.to_string(),
            })
            .await;
            return;
        }
        if metadata.size > self.config.max_inbound_size {
            warn!(
                id,
                size = metadata.size,
                limit = self.config.max_inbound_size,
                "file too large, rejecting"
            );
            self.send_to_peer(ControlFrame::FileAbort {
                id,
                side: AbortSide::Receiver,
                reason: TOO_LARGE_REASON.to_string(),
            })
            .await;
            return;
        }

        info!(id, name = %metadata.name, size = metadata.size, "file incoming");
        let item_id = self.allocate_id();
        self.push_item(TransferItem::file(
            item_id,
            Direction::Received,
            metadata.clone(),
            ItemStatus::InProgress,
        ));
        let reassembly = Reassembly::new(id, item_id, metadata);
        let empty = reassembly.is_complete();
        self.inbound = Some(reassembly);

        self.send_to_peer(ControlFrame::FileAck { id }).await;
        if empty {
            self.finish_inbound(Vec::new());
        }
    }

    fn on_file_ack(&mut self, id: u64) {
        match &self.active {
            Some(active) if active.id == id => {
                // Capacity 1: a duplicate ack while one is pending is dropped.
                if active.acks.try_send(()).is_err() {
                    debug!(id, "ack already pending");
                }
            }
            _ => debug!(id, "stale ack ignored"),
        }
    }

    /// A receiver's abort names our upload, a sender's abort names the file
    /// we are receiving.
    async fn on_file_abort(&mut self, id: u64, side: AbortSide, reason: String) {
        let ours =
            side == AbortSide::Receiver && self.active.as_ref().is_some_and(|a| a.id == id);
        let theirs =
            side == AbortSide::Sender && self.inbound.as_ref().is_some_and(|r| r.remote_id == id);
        if ours {
            warn!(id, %reason, "peer aborted our upload");
            if let Some(active) = self.active.take() {
                active.cancel.cancel();
            }
            self.fail_item(id, format!("aborted by peer: {reason}"));
            self.start_next().await;
        } else if theirs {
            warn!(id, %reason, "peer aborted incoming file");
            if let Some(inbound) = self.inbound.take() {
                self.fail_item(inbound.item_id, format!("aborted by peer: {reason}"));
            }
        } else {
            debug!(id, ?side, "abort for unknown transfer ignored");
        }
    }

    async fn handle_chunk(&mut self, bytes: &[u8]) {
        if bytes.len() > CHUNK_SIZE {
            let err = ProtocolError::MalformedFrame(format!(
                "binary frame of {} bytes exceeds {CHUNK_SIZE}",
                bytes.len()
            ));
            warn!("dropping chunk: {err}");
            return;
        }
        let Some(inbound) = self.inbound.as_mut() else {
            warn!(len = bytes.len(), "chunk with no open transfer, dropping");
            return;
        };
        let remote_id = inbound.remote_id;
        let item_id = inbound.item_id;

        match inbound.push(bytes) {
            ReassemblyStep::Partial(progress) => {
                self.update_item(item_id, |item| {
                    item.progress = item.progress.max(progress);
                });
                self.send_to_peer(ControlFrame::FileAck { id: remote_id }).await;
            }
            ReassemblyStep::Complete(blob) => {
                // The sender completes on the ack for its final chunk.
                self.send_to_peer(ControlFrame::FileAck { id: remote_id }).await;
                self.finish_inbound(blob);
            }
        }
    }

    fn finish_inbound(&mut self, blob: Vec<u8>) {
        let Some(inbound) = self.inbound.take() else {
            return;
        };
        info!(id = inbound.remote_id, size = blob.len(), "file received");
        let blob: Arc<[u8]> = blob.into();
        self.update_item(inbound.item_id, move |item| {
            item.progress = 100;
            item.status = ItemStatus::Complete;
            item.settled = true;
            if let ItemPayload::File { blob: slot, .. } = &mut item.payload {
                *slot = Some(blob);
            }
        });
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn push_item(&mut self, item: TransferItem) {
        let _ = self.events.send(TransferEvent::Added(item.clone()));
        self.history.push(item);
    }

    fn update_item(&mut self, id: u64, f: impl FnOnce(&mut TransferItem)) {
        if let Some(item) = self.history.iter_mut().find(|i| i.id == id) {
            f(item);
            let _ = self.events.send(TransferEvent::Updated(item.clone()));
        }
    }

    fn fail_item(&mut self, id: u64, reason: impl Into<String>) {
        if let Some(item) = self.history.iter_mut().find(|i| i.id == id)
            && item.fail(reason)
        {
            let _ = self.events.send(TransferEvent::Updated(item.clone()));
        }
    }

    /// Best-effort control frame to the peer.
    async fn send_to_peer(&self, frame: ControlFrame) {
        let Some(channel) = self.channel.as_ref() else {
            debug!(id = frame.id(), "channel not open, dropping control frame");
            return;
        };
        if let Err(e) = send_control(channel.as_ref(), &frame).await {
            warn!(id = frame.id(), "control frame send failed: {e}");
        }
    }
}

async fn send_control(channel: &dyn DataChannel, frame: &ControlFrame) -> Result<(), TransferError> {
    let text = frame.encode()?;
    channel.send_text(text).await?;
    Ok(())
}
