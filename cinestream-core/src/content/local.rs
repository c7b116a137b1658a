//! Content served from a directory of media already on disk.
//!
//! Every top-level entry of the library root is one content item, addressed
//! by its file stem (`Sintel.mkv` is `Sintel`). A directory becomes a
//! multi-file item. All pieces are complete from the start, so priority
//! hints are recorded but have no effect.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{
    ContentClient, ContentError, ContentId, ContentInfo, ContentSource, FileReader, PiecePriority,
};

const DEFAULT_PIECE_LENGTH: u64 = 256 * 1024;

/// Opens content items from a local media library.
pub struct LocalContentClient {
    root: PathBuf,
    piece_length: u64,
}

impl LocalContentClient {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            piece_length: DEFAULT_PIECE_LENGTH,
        }
    }

    pub fn with_piece_length(mut self, piece_length: u64) -> Self {
        self.piece_length = piece_length.max(1);
        self
    }

    async fn locate(&self, id: &ContentId) -> Result<PathBuf, ContentError> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let matches = path.file_name().and_then(|n| n.to_str()) == Some(id.as_str())
                || path.file_stem().and_then(|n| n.to_str()) == Some(id.as_str());
            if matches {
                return Ok(path);
            }
        }
        Err(ContentError::NotFound { id: id.to_string() })
    }
}

/// Regular files below `dir`, sorted by path.
async fn collect_files(dir: &Path) -> Result<Vec<PathBuf>, ContentError> {
    let mut pending = vec![dir.to_path_buf()];
    let mut files = Vec::new();

    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }

    files.sort();
    Ok(files)
}

#[async_trait]
impl ContentClient for LocalContentClient {
    async fn open(
        &self,
        id: &ContentId,
        _magnet: &str,
    ) -> Result<Arc<dyn ContentSource>, ContentError> {
        let path = self.locate(id).await?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(id.as_str())
            .to_string();

        let (base, paths) = if tokio::fs::metadata(&path).await?.is_dir() {
            let parent = path.parent().unwrap_or(&self.root).to_path_buf();
            (parent, collect_files(&path).await?)
        } else {
            (self.root.clone(), vec![path])
        };

        let mut layout = Vec::with_capacity(paths.len());
        for file in &paths {
            let length = tokio::fs::metadata(file).await?.len();
            let relative = file.strip_prefix(&base).unwrap_or(file);
            layout.push((relative.to_string_lossy().replace('\\', "/"), length));
        }

        let info = ContentInfo::from_files(name, self.piece_length, &layout);
        info!(
            content = %id,
            files = info.files.len(),
            bytes = info.total_length(),
            "Opened local content"
        );

        Ok(Arc::new(LocalContentSource {
            id: id.clone(),
            priorities: parking_lot::Mutex::new(vec![
                PiecePriority::Normal;
                info.num_pieces as usize
            ]),
            info,
            paths,
            closed: CancellationToken::new(),
        }))
    }
}

/// A fully downloaded content item on disk.
pub struct LocalContentSource {
    id: ContentId,
    info: ContentInfo,
    paths: Vec<PathBuf>,
    priorities: parking_lot::Mutex<Vec<PiecePriority>>,
    closed: CancellationToken,
}

impl LocalContentSource {
    pub fn priority(&self, index: u32) -> Option<PiecePriority> {
        self.priorities.lock().get(index as usize).copied()
    }
}

#[async_trait]
impl ContentSource for LocalContentSource {
    fn id(&self) -> &ContentId {
        &self.id
    }

    fn info(&self) -> Option<ContentInfo> {
        Some(self.info.clone())
    }

    async fn metadata_ready(&self) {}

    fn piece_complete(&self, index: u32) -> bool {
        index < self.info.num_pieces
    }

    fn set_piece_priority(&self, index: u32, priority: PiecePriority) -> Result<(), ContentError> {
        match self.priorities.lock().get_mut(index as usize) {
            Some(slot) => {
                *slot = priority;
                Ok(())
            }
            None => Err(ContentError::InvalidParameter {
                reason: format!("piece {index} out of range"),
            }),
        }
    }

    fn bytes_completed(&self) -> u64 {
        self.info.total_length()
    }

    async fn file_reader(&self, file_index: usize) -> Result<FileReader, ContentError> {
        self.info.file(file_index)?;
        let path = &self.paths[file_index];
        debug!(content = %self.id, path = %path.display(), "Opening local file reader");
        let file = tokio::fs::File::open(path).await?;
        Ok(Box::pin(file))
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    async fn closed(&self) {
        self.closed.cancelled().await;
    }

    fn close(&self) {
        self.closed.cancel();
    }
}
