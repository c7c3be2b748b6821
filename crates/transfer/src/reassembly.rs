//! Inbound file buffer.

use handoff_protocol::FileMetadata;

use crate::progress::percent;

/// Bytes collected so far for the single open inbound transfer.
#[derive(Debug)]
pub struct Reassembly {
    /// Transfer id chosen by the sender.
    pub remote_id: u64,
    /// Local history item this buffer feeds.
    pub item_id: u64,
    pub metadata: FileMetadata,
    buf: Vec<u8>,
}

/// Outcome of appending one chunk.
#[derive(Debug, PartialEq, Eq)]
pub enum ReassemblyStep {
    /// More bytes are expected; carries the new progress.
    Partial(u8),
    /// All declared bytes have arrived.
    Complete(Vec<u8>),
}

impl Reassembly {
    pub fn new(remote_id: u64, item_id: u64, metadata: FileMetadata) -> Self {
        // Trust the declared size only up to one chunk for the initial
        // allocation; the buffer grows as bytes arrive.
        let hint = metadata
            .size
            .min(handoff_protocol::constants::CHUNK_SIZE as u64) as usize;
        Self {
            remote_id,
            item_id,
            metadata,
            buf: Vec::with_capacity(hint),
        }
    }

    pub fn received(&self) -> u64 {
        self.buf.len() as u64
    }

    /// `true` for a zero-byte file, which is complete as soon as it opens.
    pub fn is_complete(&self) -> bool {
        self.received() >= self.metadata.size
    }

    /// Appends a chunk.
    ///
    /// Bytes beyond the declared size are discarded.
    pub fn push(&mut self, chunk: &[u8]) -> ReassemblyStep {
        let room = self.metadata.size.saturating_sub(self.received()) as usize;
        let take = chunk.len().min(room);
        if take < chunk.len() {
            tracing::warn!(
                id = self.remote_id,
                extra = chunk.len() - take,
                "chunk overruns declared size, truncating"
            );
        }
        self.buf.extend_from_slice(&chunk[..take]);

        if self.is_complete() {
            ReassemblyStep::Complete(std::mem::take(&mut self.buf))
        } else {
            ReassemblyStep::Partial(percent(self.received(), self.metadata.size))
        }
    }
}
