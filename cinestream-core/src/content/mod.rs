//! Content model shared by the scheduler, job manager and streamer.
//!
//! A content item is a set of files laid end to end in one byte space that
//! is divided into fixed-size pieces. The swarm client that fills those pieces
//! sits behind the [`ContentSource`] trait.

pub mod local;
pub mod registry;
pub mod source;

use std::fmt;
use std::time::Duration;

pub use local::LocalContentClient;
pub use registry::{ContentEntry, ContentRegistry};
pub use source::{ContentClient, ContentReader, ContentSource, FileReader};

const MAX_ID_LEN: usize = 128;

/// Stable identifier of a content item.
///
/// Case is preserved. Only ASCII alphanumerics are accepted so the id can be
/// embedded in paths, URLs and scratch directory names unescaped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId(String);

impl ContentId {
    /// Validates a raw identifier.
    ///
    /// # Errors
    ///
    /// - `ContentError::InvalidId` - Empty, too long, or containing other characters
    pub fn parse(raw: &str) -> Result<Self, ContentError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ContentError::InvalidId {
                reason: "identifier is empty".to_string(),
            });
        }
        if trimmed.len() > MAX_ID_LEN {
            return Err(ContentError::InvalidId {
                reason: format!("identifier longer than {MAX_ID_LEN} characters"),
            });
        }
        if let Some(bad) = trimmed.chars().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(ContentError::InvalidId {
                reason: format!("unexpected character {bad:?}"),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Extracts the identifier from a `magnet:?xt=urn:btih:<id>` link.
    ///
    /// # Errors
    ///
    /// - `ContentError::InvalidId` - Not a magnet link or no `btih` topic
    pub fn from_magnet(uri: &str) -> Result<Self, ContentError> {
        let parsed = url::Url::parse(uri).map_err(|e| ContentError::InvalidId {
            reason: format!("malformed magnet link: {e}"),
        })?;
        if parsed.scheme() != "magnet" {
            return Err(ContentError::InvalidId {
                reason: format!("unsupported scheme {}", parsed.scheme()),
            });
        }

        let topic = parsed
            .query_pairs()
            .filter(|(key, _)| key == "xt")
            .find_map(|(_, value)| value.strip_prefix("urn:btih:").map(str::to_string))
            .ok_or_else(|| ContentError::InvalidId {
                reason: "magnet link has no btih topic".to_string(),
            })?;

        Self::parse(&topic)
    }

    /// Minimal magnet link addressing this id.
    pub fn to_magnet(&self) -> String {
        format!("magnet:?xt=urn:btih:{}", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Download priority hint for one piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PiecePriority {
    #[default]
    Normal,
    /// Needed for playback immediately
    Now,
}

/// One file within a content item.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ContentFile {
    pub path: String,
    pub offset: u64,
    pub length: u64,
}

/// Metadata of a content item, available once the swarm has delivered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentInfo {
    pub name: String,
    pub piece_length: u64,
    pub num_pieces: u32,
    pub files: Vec<ContentFile>,
}

impl ContentInfo {
    /// Lays `files` out back to back and derives the piece count.
    pub fn from_files(name: impl Into<String>, piece_length: u64, files: &[(String, u64)]) -> Self {
        let mut offset = 0;
        let files: Vec<ContentFile> = files
            .iter()
            .map(|(path, length)| {
                let file = ContentFile {
                    path: path.clone(),
                    offset,
                    length: *length,
                };
                offset += length;
                file
            })
            .collect();

        let num_pieces = if piece_length == 0 {
            0
        } else {
            offset.div_ceil(piece_length) as u32
        };

        Self {
            name: name.into(),
            piece_length,
            num_pieces,
            files,
        }
    }

    pub fn total_length(&self) -> u64 {
        self.files.iter().map(|file| file.length).sum()
    }

    /// # Errors
    ///
    /// - `ContentError::FileIndexOutOfRange` - No file at `index`
    pub fn file(&self, index: usize) -> Result<&ContentFile, ContentError> {
        self.files
            .get(index)
            .ok_or(ContentError::FileIndexOutOfRange {
                index,
                file_count: self.files.len(),
            })
    }

    /// Index of the largest file, the one playback is assumed to target.
    pub fn largest_file(&self) -> Option<usize> {
        self.files
            .iter()
            .enumerate()
            .max_by_key(|(index, file)| (file.length, std::cmp::Reverse(*index)))
            .map(|(index, _)| index)
    }

    /// Piece range covering `file`, clamped to the content's piece count.
    pub fn piece_range(&self, file: &ContentFile) -> Option<FilePieceRange> {
        FilePieceRange::for_file(file.offset, file.length, self.piece_length, self.num_pieces)
    }

    /// Piece containing absolute byte `offset`, clamped to the last piece.
    pub fn piece_at(&self, offset: u64) -> u32 {
        if self.piece_length == 0 || self.num_pieces == 0 {
            return 0;
        }
        let index = offset / self.piece_length;
        index.min(u64::from(self.num_pieces - 1)) as u32
    }
}

/// Inclusive piece interval spanned by one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilePieceRange {
    pub first: u32,
    pub last: u32,
}

impl FilePieceRange {
    /// `None` for a zero-length file, a zero piece length or empty content.
    pub fn for_file(offset: u64, length: u64, piece_length: u64, num_pieces: u32) -> Option<Self> {
        if length == 0 || piece_length == 0 || num_pieces == 0 {
            return None;
        }
        let max_index = u64::from(num_pieces - 1);
        let first = (offset / piece_length).min(max_index) as u32;
        let last = ((offset + length - 1) / piece_length).min(max_index) as u32;
        Some(Self { first, last })
    }

    pub fn piece_count(&self) -> u32 {
        self.last - self.first + 1
    }

    pub fn contains(&self, index: u32) -> bool {
        (self.first..=self.last).contains(&index)
    }

    pub fn iter(&self) -> std::ops::RangeInclusive<u32> {
        self.first..=self.last
    }
}

/// Errors raised while resolving or reading content.
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("Content {id} not found")]
    NotFound { id: String },

    #[error("File index {index} out of range, content has {file_count} files")]
    FileIndexOutOfRange { index: usize, file_count: usize },

    #[error("Metadata for {id} not available after {waited:?}")]
    MetadataNotReady { id: String, waited: Duration },

    #[error("Invalid content identifier: {reason}")]
    InvalidId { reason: String },

    #[error("Invalid parameter: {reason}")]
    InvalidParameter { reason: String },

    #[error("Content {id} is closed")]
    Closed { id: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Waits at most `timeout` for the source's metadata.
///
/// # Errors
///
/// - `ContentError::MetadataNotReady` - Metadata did not arrive in time
pub async fn await_info(
    source: &dyn ContentSource,
    timeout: Duration,
) -> Result<ContentInfo, ContentError> {
    if let Some(info) = source.info() {
        return Ok(info);
    }

    let _ = tokio::time::timeout(timeout, source.metadata_ready()).await;

    source.info().ok_or_else(|| ContentError::MetadataNotReady {
        id: source.id().to_string(),
        waited: timeout,
    })
}
