//! In-memory content source and transcoder doubles for unit and
//! integration tests.

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;

use crate::content::{
    ContentClient, ContentError, ContentId, ContentInfo, ContentSource, FileReader, PiecePriority,
};
use crate::transcode::{SimulatedTranscoder, TranscodeError, TranscodePlan, TranscodeProcess, Transcoder};

/// Content source whose metadata, piece state and bytes are driven by the test.
pub struct MockContentSource {
    id: ContentId,
    info: parking_lot::RwLock<Option<ContentInfo>>,
    metadata: watch::Sender<bool>,
    complete: parking_lot::Mutex<Vec<bool>>,
    priorities: parking_lot::Mutex<Vec<PiecePriority>>,
    priority_calls: parking_lot::Mutex<Vec<(u32, PiecePriority)>>,
    failing: parking_lot::Mutex<HashSet<u32>>,
    data: parking_lot::RwLock<Vec<u8>>,
    closed: CancellationToken,
}

impl MockContentSource {
    /// Source whose metadata has not arrived yet.
    pub fn new(id: ContentId) -> Self {
        let (metadata, _) = watch::channel(false);
        Self {
            id,
            info: parking_lot::RwLock::new(None),
            metadata,
            complete: parking_lot::Mutex::new(Vec::new()),
            priorities: parking_lot::Mutex::new(Vec::new()),
            priority_calls: parking_lot::Mutex::new(Vec::new()),
            failing: parking_lot::Mutex::new(HashSet::new()),
            data: parking_lot::RwLock::new(Vec::new()),
            closed: CancellationToken::new(),
        }
    }

    pub fn with_info(id: ContentId, info: ContentInfo) -> Self {
        let source = Self::new(id);
        source.publish_info(info);
        source
    }

    /// Source backed by real bytes, one entry per file.
    pub fn with_data(id: ContentId, piece_length: u64, files: &[(&str, Vec<u8>)]) -> Self {
        let layout: Vec<(String, u64)> = files
            .iter()
            .map(|(path, bytes)| (path.to_string(), bytes.len() as u64))
            .collect();
        let info = ContentInfo::from_files(id.as_str(), piece_length, &layout);
        let source = Self::with_info(id, info);
        *source.data.write() = files.iter().flat_map(|(_, bytes)| bytes.clone()).collect();
        source
    }

    /// Delivers metadata, waking `metadata_ready` waiters.
    pub fn publish_info(&self, info: ContentInfo) {
        let pieces = info.num_pieces as usize;
        *self.complete.lock() = vec![false; pieces];
        *self.priorities.lock() = vec![PiecePriority::Normal; pieces];
        *self.info.write() = Some(info);
        self.metadata.send_replace(true);
    }

    pub fn complete_piece(&self, index: u32) {
        if let Some(slot) = self.complete.lock().get_mut(index as usize) {
            *slot = true;
        }
    }

    pub fn complete_pieces(&self, range: std::ops::Range<u32>) {
        for index in range {
            self.complete_piece(index);
        }
    }

    pub fn complete_all(&self) {
        self.complete.lock().iter_mut().for_each(|slot| *slot = true);
    }

    pub fn priority(&self, index: u32) -> Option<PiecePriority> {
        self.priorities.lock().get(index as usize).copied()
    }

    /// Every `set_piece_priority` call in order, failed ones included.
    pub fn priority_calls(&self) -> Vec<(u32, PiecePriority)> {
        self.priority_calls.lock().clone()
    }

    pub fn clear_priority_calls(&self) {
        self.priority_calls.lock().clear();
    }

    /// Makes `set_piece_priority` fail for `index`.
    pub fn fail_priority_on(&self, index: u32) {
        self.failing.lock().insert(index);
    }

    pub fn pieces_with_priority(&self, priority: PiecePriority) -> Vec<u32> {
        self.priorities
            .lock()
            .iter()
            .enumerate()
            .filter(|(_, p)| **p == priority)
            .map(|(index, _)| index as u32)
            .collect()
    }
}

#[async_trait]
impl ContentSource for MockContentSource {
    fn id(&self) -> &ContentId {
        &self.id
    }

    fn info(&self) -> Option<ContentInfo> {
        self.info.read().clone()
    }

    async fn metadata_ready(&self) {
        let mut ready = self.metadata.subscribe();
        let _ = ready.wait_for(|ready| *ready).await;
    }

    fn piece_complete(&self, index: u32) -> bool {
        self.complete
            .lock()
            .get(index as usize)
            .copied()
            .unwrap_or(false)
    }

    fn set_piece_priority(&self, index: u32, priority: PiecePriority) -> Result<(), ContentError> {
        self.priority_calls.lock().push((index, priority));
        if self.closed.is_cancelled() {
            return Err(ContentError::Closed {
                id: self.id.to_string(),
            });
        }
        if self.failing.lock().contains(&index) {
            return Err(ContentError::InvalidParameter {
                reason: format!("injected failure for piece {index}"),
            });
        }
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
        let Some(info) = self.info() else {
            return 0;
        };
        let total = info.total_length();
        let complete = self.complete.lock();
        let mut bytes = 0;
        for (index, done) in complete.iter().enumerate() {
            if *done {
                let start = index as u64 * info.piece_length;
                let end = (start + info.piece_length).min(total);
                bytes += end.saturating_sub(start);
            }
        }
        bytes
    }

    async fn file_reader(&self, file_index: usize) -> Result<FileReader, ContentError> {
        let info = self.info().ok_or_else(|| ContentError::MetadataNotReady {
            id: self.id.to_string(),
            waited: std::time::Duration::ZERO,
        })?;
        let file = info.file(file_index)?;
        let data = self.data.read();
        let start = (file.offset as usize).min(data.len());
        let end = ((file.offset + file.length) as usize).min(data.len());
        Ok(Box::pin(Cursor::new(data[start..end].to_vec())))
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

/// Client handing out [`MockContentSource`]s. Ids not staged with
/// [`MockContentClient::stage`] open without metadata.
#[derive(Default)]
pub struct MockContentClient {
    sources: parking_lot::Mutex<HashMap<ContentId, Arc<MockContentSource>>>,
    opens: parking_lot::Mutex<Vec<(ContentId, String)>>,
}

impl MockContentClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the source returned when `source.id()` is opened.
    pub fn stage(&self, source: MockContentSource) -> Arc<MockContentSource> {
        let source = Arc::new(source);
        self.sources
            .lock()
            .insert(source.id().clone(), Arc::clone(&source));
        source
    }

    /// Source handed out for `id`, if it was opened or staged.
    pub fn source(&self, id: &ContentId) -> Option<Arc<MockContentSource>> {
        self.sources.lock().get(id).cloned()
    }

    /// `(id, magnet)` of every open call.
    pub fn opens(&self) -> Vec<(ContentId, String)> {
        self.opens.lock().clone()
    }
}

#[async_trait]
impl ContentClient for MockContentClient {
    async fn open(&self, id: &ContentId, magnet: &str) -> Result<Arc<dyn ContentSource>, ContentError> {
        self.opens.lock().push((id.clone(), magnet.to_string()));
        let source = Arc::clone(
            self.sources
                .lock()
                .entry(id.clone())
                .or_insert_with(|| Arc::new(MockContentSource::new(id.clone()))),
        );
        Ok(source)
    }
}

/// Simulated transcoder whose first launch waits until [`GatedTranscoder::release`].
pub struct GatedTranscoder {
    inner: SimulatedTranscoder,
    armed: AtomicBool,
    entered: Notify,
    released: Notify,
}

impl GatedTranscoder {
    pub fn new(inner: SimulatedTranscoder) -> Self {
        Self {
            inner,
            armed: AtomicBool::new(true),
            entered: Notify::new(),
            released: Notify::new(),
        }
    }

    /// Resolves once the first launch is held at the gate.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.released.notify_one();
    }
}

#[async_trait]
impl Transcoder for GatedTranscoder {
    async fn launch(&self, input: FileReader, plan: &TranscodePlan) -> Result<TranscodeProcess, TranscodeError> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.released.notified().await;
        }
        self.inner.launch(input, plan).await
    }

    fn name(&self) -> &'static str {
        "gated"
    }
}
