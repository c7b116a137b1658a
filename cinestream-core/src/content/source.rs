//! Interface to the swarm client that fills content pieces.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncSeek};

use super::{ContentError, ContentId, ContentInfo, PiecePriority};

/// Readable and seekable view over one decoded file.
pub trait ContentReader: AsyncRead + AsyncSeek + Send {}

impl<T: AsyncRead + AsyncSeek + Send> ContentReader for T {}

pub type FileReader = Pin<Box<dyn ContentReader>>;

/// Handle to one content item held by the swarm client.
///
/// Implementations must tolerate concurrent calls from the scheduler, the
/// request handlers and the transcoder feed tasks.
#[async_trait]
pub trait ContentSource: Send + Sync {
    fn id(&self) -> &ContentId;

    /// Metadata, or `None` until the swarm has delivered it.
    fn info(&self) -> Option<ContentInfo>;

    /// Resolves once metadata is available. Callers bound the wait.
    async fn metadata_ready(&self);

    fn piece_complete(&self, index: u32) -> bool;

    /// Sets the download priority hint of one piece.
    ///
    /// # Errors
    ///
    /// - `ContentError::Closed` - The item was closed
    /// - `ContentError::InvalidParameter` - Index outside the piece space
    fn set_piece_priority(&self, index: u32, priority: PiecePriority) -> Result<(), ContentError>;

    /// Bytes verified so far across all files.
    fn bytes_completed(&self) -> u64;

    /// Opens a reader over file `file_index`. Reads of missing pieces wait
    /// for the piece to arrive.
    ///
    /// # Errors
    ///
    /// - `ContentError::MetadataNotReady` - Metadata is not available yet
    /// - `ContentError::FileIndexOutOfRange` - No such file
    /// - `ContentError::Io` - The backing store could not be opened
    async fn file_reader(&self, file_index: usize) -> Result<FileReader, ContentError>;

    fn is_closed(&self) -> bool;

    /// Resolves once the item is closed.
    async fn closed(&self);

    /// Releases the item. Idempotent.
    fn close(&self);
}

/// Swarm client able to open content items by id.
#[async_trait]
pub trait ContentClient: Send + Sync {
    /// Opens `id`. `magnet` carries the optional original link.
    ///
    /// # Errors
    ///
    /// - `ContentError::NotFound` - The client cannot locate the item
    async fn open(
        &self,
        id: &ContentId,
        magnet: &str,
    ) -> Result<Arc<dyn ContentSource>, ContentError>;
}
