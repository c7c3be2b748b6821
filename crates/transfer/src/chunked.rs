use std::path::Path;

use handoff_protocol::FileMetadata;
use handoff_protocol::constants::CHUNK_SIZE;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::TransferError;

/// Number of chunks needed to move `size` bytes with the given chunk bound.
pub fn chunk_count(size: u64, chunk_size: usize) -> u64 {
    size.div_ceil(chunk_size.max(1) as u64)
}

// ---------------------------------------------------------------------------
// OutboundFile
// ---------------------------------------------------------------------------

/// A file queued for sending: its metadata plus the byte source.
pub struct OutboundFile {
    pub metadata: FileMetadata,
    reader: Box<dyn AsyncRead + Send + Sync + Unpin>,
}

impl OutboundFile {
    /// Wraps any async byte source of exactly `metadata.size` bytes.
    pub fn new(metadata: FileMetadata, reader: Box<dyn AsyncRead + Send + Sync + Unpin>) -> Self {
        Self { metadata, reader }
    }

    /// Opens a file on disk, taking name, size and MIME type from it.
    pub async fn open(path: &Path) -> Result<Self, TransferError> {
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mime_type = guess_mime_type(&name).to_string();
        Ok(Self::new(
            FileMetadata {
                name,
                mime_type,
                size,
            },
            Box::new(file),
        ))
    }

    /// In-memory file.
    pub fn from_bytes(name: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        let metadata = FileMetadata {
            name: name.into(),
            mime_type: mime_type.into(),
            size: data.len() as u64,
        };
        Self::new(metadata, Box::new(std::io::Cursor::new(data)))
    }

    /// Turns this file into a chunk reader.
    pub fn into_reader(self, chunk_size: usize) -> ChunkReader {
        ChunkReader::new(self.reader, self.metadata.size, chunk_size)
    }
}

impl std::fmt::Debug for OutboundFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundFile")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// MIME type from a file extension, `application/octet-stream` if unknown.
pub fn guess_mime_type(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "log" | "md" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads a byte source in fixed-size chunks.
///
/// Every chunk is exactly `chunk_size` bytes except the last, which carries
/// the remainder. A source that ends before its declared size is an error.
pub struct ChunkReader {
    reader: Box<dyn AsyncRead + Send + Sync + Unpin>,
    chunk_size: usize,
    offset: u64,
    size: u64,
}

impl ChunkReader {
    /// Creates a reader over `size` bytes of `reader`.
    ///
    /// A `chunk_size` of 0 means [`CHUNK_SIZE`]; larger values are capped at it.
    pub fn new(reader: Box<dyn AsyncRead + Send + Sync + Unpin>, size: u64, chunk_size: usize) -> Self {
        let chunk_size = match chunk_size {
            0 => CHUNK_SIZE,
            n => n.min(CHUNK_SIZE),
        };
        Self {
            reader,
            chunk_size,
            offset: 0,
            size,
        }
    }

    /// Reads the next chunk. Returns `None` once `size` bytes have been read.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransferError> {
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(None);
        }

        let read_size = remaining.min(self.chunk_size as u64) as usize;
        let mut buf = vec![0u8; read_size];
        self.reader.read_exact(&mut buf).await?;
        self.offset += read_size as u64;
        Ok(Some(buf))
    }

    /// Bytes read so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Total size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes remaining to read.
    pub fn remaining(&self) -> u64 {
        self.size - self.offset
    }
}
