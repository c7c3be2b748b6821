use std::sync::Arc;

use chrono::{DateTime, Utc};
use handoff_protocol::FileMetadata;
use serde::Serialize;

/// Which side produced an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Text,
    File,
}

/// Lifecycle of a history item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemStatus {
    Queued,
    InProgress,
    Complete,
    Failed,
}

impl ItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ItemPayload {
    Text {
        text: String,
    },
    File {
        metadata: FileMetadata,
        /// Reassembled bytes, present on received files once complete.
        #[serde(skip)]
        blob: Option<Arc<[u8]>>,
    },
}

/// One entry in a connection's history.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferItem {
    /// Local id, unique and increasing within one engine.
    pub id: u64,
    pub direction: Direction,
    pub payload: ItemPayload,
    /// 0..=100.
    pub progress: u8,
    pub status: ItemStatus,
    /// Set once a completed send has been shown long enough; the progress
    /// indicator should give way to a steady "sent" state.
    pub settled: bool,
    /// Failure reason, if any.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TransferItem {
    pub(crate) fn text(id: u64, direction: Direction, text: String) -> Self {
        Self {
            id,
            direction,
            payload: ItemPayload::Text { text },
            progress: 100,
            status: ItemStatus::Complete,
            settled: true,
            error: None,
            created_at: Utc::now(),
        }
    }

    pub(crate) fn file(id: u64, direction: Direction, metadata: FileMetadata, status: ItemStatus) -> Self {
        Self {
            id,
            direction,
            payload: ItemPayload::File {
                metadata,
                blob: None,
            },
            progress: 0,
            status,
            settled: false,
            error: None,
            created_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> ItemKind {
        match self.payload {
            ItemPayload::Text { .. } => ItemKind::Text,
            ItemPayload::File { .. } => ItemKind::File,
        }
    }

    /// Text body, for text items.
    pub fn text_body(&self) -> Option<&str> {
        match &self.payload {
            ItemPayload::Text { text } => Some(text),
            ItemPayload::File { .. } => None,
        }
    }

    pub fn metadata(&self) -> Option<&FileMetadata> {
        match &self.payload {
            ItemPayload::File { metadata, .. } => Some(metadata),
            ItemPayload::Text { .. } => None,
        }
    }

    /// Received bytes, for completed inbound files.
    pub fn blob(&self) -> Option<&Arc<[u8]>> {
        match &self.payload {
            ItemPayload::File { blob, .. } => blob.as_ref(),
            ItemPayload::Text { .. } => None,
        }
    }

    /// Progress to render, or `None` when no indicator should be shown.
    pub fn display_progress(&self) -> Option<u8> {
        if self.kind() == ItemKind::Text || self.settled || self.status == ItemStatus::Failed {
            None
        } else {
            Some(self.progress)
        }
    }

    pub(crate) fn fail(&mut self, reason: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = ItemStatus::Failed;
        self.error = Some(reason.into());
        true
    }
}

/// History changes reported by the engine, in the order they happen.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Added(TransferItem),
    Updated(TransferItem),
}

impl TransferEvent {
    pub fn item(&self) -> &TransferItem {
        match self {
            Self::Added(item) | Self::Updated(item) => item,
        }
    }
}
