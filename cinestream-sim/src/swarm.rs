//! Simulated swarm client.
//!
//! Each opened item gets a download task. The task waits until the item is
//! published, delivers metadata after `metadata_delay`, then completes
//! `pieces_per_tick` pieces every `tick` until the item is whole or closed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use cinestream_core::content::{
    ContentClient, ContentError, ContentId, ContentInfo, ContentSource, FileReader, PiecePriority,
};
use parking_lot::{Mutex, RwLock};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::{Notify, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::catalog::{SimContent, demo_catalog};
use crate::reader::PieceAwareReader;

/// Pacing of the simulated swarm.
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Piece size of every published item
    pub piece_length: u64,
    /// Interval between download rounds
    pub tick: Duration,
    /// Pieces completed per round
    pub pieces_per_tick: usize,
    /// Delay between publication and metadata delivery
    pub metadata_delay: Duration,
    /// Seed for the order in which normal-priority pieces arrive
    pub seed: u64,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            piece_length: 64 * 1024,
            tick: Duration::from_millis(50),
            pieces_per_tick: 4,
            metadata_delay: Duration::from_millis(500),
            seed: 42,
        }
    }
}

impl SwarmConfig {
    /// Small pieces and fast rounds.
    pub fn for_testing() -> Self {
        Self {
            piece_length: 16,
            tick: Duration::from_millis(5),
            pieces_per_tick: 1,
            metadata_delay: Duration::from_millis(10),
            seed: 7,
        }
    }

    pub fn with_piece_length(mut self, piece_length: u64) -> Self {
        self.piece_length = piece_length;
        self
    }

    pub fn with_tick(mut self, tick: Duration, pieces_per_tick: usize) -> Self {
        self.tick = tick;
        self.pieces_per_tick = pieces_per_tick;
        self
    }

    pub fn with_metadata_delay(mut self, delay: Duration) -> Self {
        self.metadata_delay = delay;
        self
    }
}

/// Completion and priority of every piece of one item.
#[derive(Debug, Default)]
pub(crate) struct PieceBook {
    complete: Vec<bool>,
    priority: Vec<PiecePriority>,
}

impl PieceBook {
    fn new(pieces: usize) -> Self {
        Self {
            complete: vec![false; pieces],
            priority: vec![PiecePriority::Normal; pieces],
        }
    }

    /// Completes up to `budget` pieces, `Now` pieces in index order first and
    /// then random ones. Returns how many pieces are still missing.
    fn advance(&mut self, rng: &mut impl Rng, budget: usize) -> usize {
        let mut remaining = budget;

        for index in 0..self.complete.len() {
            if remaining == 0 {
                break;
            }
            if !self.complete[index] && self.priority[index] == PiecePriority::Now {
                self.complete[index] = true;
                remaining -= 1;
            }
        }

        let mut missing: Vec<usize> = (0..self.complete.len())
            .filter(|index| !self.complete[*index])
            .collect();
        while remaining > 0 && !missing.is_empty() {
            let pick = rng.random_range(0..missing.len());
            let index = missing.swap_remove(pick);
            self.complete[index] = true;
            remaining -= 1;
        }

        missing.len()
    }

    fn missing(&self) -> usize {
        self.complete.iter().filter(|done| !**done).count()
    }
}

/// State shared by a source, its download task and its readers.
pub(crate) struct SwarmState {
    pub(crate) id: ContentId,
    info: RwLock<Option<ContentInfo>>,
    data: RwLock<Bytes>,
    metadata: watch::Sender<bool>,
    book: Mutex<PieceBook>,
    staged: Mutex<Option<SimContent>>,
    staged_notify: Notify,
    pub(crate) closed: CancellationToken,
}

impl SwarmState {
    pub(crate) fn new(id: ContentId) -> Self {
        let (metadata, _) = watch::channel(false);
        Self {
            id,
            info: RwLock::new(None),
            data: RwLock::new(Bytes::new()),
            metadata,
            book: Mutex::new(PieceBook::default()),
            staged: Mutex::new(None),
            staged_notify: Notify::new(),
            closed: CancellationToken::new(),
        }
    }

    fn stage(&self, content: SimContent) {
        *self.staged.lock() = Some(content);
        self.staged_notify.notify_one();
    }

    /// Publishes metadata for `content`. No piece is complete yet.
    pub(crate) fn deliver(&self, content: &SimContent, piece_length: u64) {
        let info = ContentInfo::from_files(content.name.clone(), piece_length, &content.layout());
        *self.book.lock() = PieceBook::new(info.num_pieces as usize);
        *self.data.write() = content.concatenated();
        *self.info.write() = Some(info);
        self.metadata.send_replace(true);
    }

    pub(crate) fn info(&self) -> Option<ContentInfo> {
        self.info.read().clone()
    }

    pub(crate) fn data(&self) -> Bytes {
        self.data.read().clone()
    }

    pub(crate) fn piece_complete(&self, index: u32) -> bool {
        self.book
            .lock()
            .complete
            .get(index as usize)
            .copied()
            .unwrap_or(false)
    }

    #[cfg(test)]
    pub(crate) fn complete_piece(&self, index: u32) {
        if let Some(slot) = self.book.lock().complete.get_mut(index as usize) {
            *slot = true;
        }
    }

    fn advance(&self, rng: &mut impl Rng, budget: usize) -> usize {
        self.book.lock().advance(rng, budget)
    }

    /// Waits for publication, delivers metadata and downloads until whole.
    async fn download(self: Arc<Self>, config: SwarmConfig) {
        let content = loop {
            let staged = self.staged.lock().clone();
            if let Some(content) = staged {
                break content;
            }
            tokio::select! {
                () = self.closed.cancelled() => return,
                () = self.staged_notify.notified() => {}
            }
        };

        tokio::select! {
            () = self.closed.cancelled() => return,
            () = tokio::time::sleep(config.metadata_delay) => {}
        }
        self.deliver(&content, config.piece_length);
        info!(content = %self.id, name = %content.name, "Simulated metadata delivered");

        let seed = self
            .id
            .as_str()
            .bytes()
            .fold(config.seed, |acc, byte| acc.wrapping_mul(31).wrapping_add(u64::from(byte)));
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut interval = tokio::time::interval(config.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.closed.cancelled() => {
                    debug!(content = %self.id, "Simulated download stopped");
                    return;
                }
                _ = interval.tick() => {}
            }
            if self.advance(&mut rng, config.pieces_per_tick) == 0 {
                info!(content = %self.id, "Simulated download complete");
                return;
            }
        }
    }
}

/// Content source backed by the simulated swarm.
pub struct SimulatedSource {
    state: Arc<SwarmState>,
}

impl SimulatedSource {
    /// Pieces not downloaded yet, zero before metadata.
    pub fn missing_pieces(&self) -> usize {
        self.state.book.lock().missing()
    }
}

#[async_trait]
impl ContentSource for SimulatedSource {
    fn id(&self) -> &ContentId {
        &self.state.id
    }

    fn info(&self) -> Option<ContentInfo> {
        self.state.info()
    }

    async fn metadata_ready(&self) {
        let mut ready = self.state.metadata.subscribe();
        let _ = ready.wait_for(|ready| *ready).await;
    }

    fn piece_complete(&self, index: u32) -> bool {
        self.state.piece_complete(index)
    }

    fn set_piece_priority(&self, index: u32, priority: PiecePriority) -> Result<(), ContentError> {
        if self.state.closed.is_cancelled() {
            return Err(ContentError::Closed {
                id: self.state.id.to_string(),
            });
        }
        match self.state.book.lock().priority.get_mut(index as usize) {
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
        let Some(info) = self.state.info() else {
            return 0;
        };
        let total = info.total_length();
        self.state
            .book
            .lock()
            .complete
            .iter()
            .enumerate()
            .filter(|(_, done)| **done)
            .map(|(index, _)| {
                let start = index as u64 * info.piece_length;
                (start + info.piece_length).min(total).saturating_sub(start)
            })
            .sum()
    }

    async fn file_reader(&self, file_index: usize) -> Result<FileReader, ContentError> {
        let info = self.state.info().ok_or_else(|| ContentError::MetadataNotReady {
            id: self.state.id.to_string(),
            waited: Duration::ZERO,
        })?;
        let file = info.file(file_index)?;
        Ok(Box::pin(PieceAwareReader::new(
            Arc::clone(&self.state),
            info.piece_length,
            file.offset,
            file.length,
        )))
    }

    fn is_closed(&self) -> bool {
        self.state.closed.is_cancelled()
    }

    async fn closed(&self) {
        self.state.closed.cancelled().await;
    }

    fn close(&self) {
        self.state.closed.cancel();
    }
}

/// Swarm client over a catalog of published items.
///
/// Opening an id that is not published yet succeeds; its metadata arrives
/// once [`SimulatedContentClient::publish`] is called for it.
pub struct SimulatedContentClient {
    config: SwarmConfig,
    catalog: Mutex<HashMap<ContentId, SimContent>>,
    opened: Mutex<HashMap<ContentId, Arc<SwarmState>>>,
}

impl SimulatedContentClient {
    pub fn new(config: SwarmConfig) -> Self {
        Self {
            config,
            catalog: Mutex::new(HashMap::new()),
            opened: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    /// Adds `content` under `id`, feeding any source already opened for it.
    pub fn publish(&self, id: ContentId, content: SimContent) {
        debug!(content = %id, name = %content.name, bytes = content.total_length(), "Publishing simulated content");
        // Catalog first: `open` reads it while holding the opened map.
        self.catalog.lock().insert(id.clone(), content.clone());
        if let Some(state) = self.opened.lock().get(&id) {
            state.stage(content);
        }
    }

    /// Publishes the built-in demo items and returns their ids.
    pub fn publish_demo_catalog(&self) -> Vec<ContentId> {
        demo_catalog()
            .into_iter()
            .map(|(id, content)| {
                self.publish(id.clone(), content);
                id
            })
            .collect()
    }

    pub fn is_published(&self, id: &ContentId) -> bool {
        self.catalog.lock().contains_key(id)
    }
}

#[async_trait]
impl ContentClient for SimulatedContentClient {
    async fn open(&self, id: &ContentId, _magnet: &str) -> Result<Arc<dyn ContentSource>, ContentError> {
        let mut opened = self.opened.lock();
        if let Some(state) = opened.get(id)
            && !state.closed.is_cancelled()
        {
            return Ok(Arc::new(SimulatedSource {
                state: Arc::clone(state),
            }));
        }

        let state = Arc::new(SwarmState::new(id.clone()));
        if let Some(content) = self.catalog.lock().get(id) {
            state.stage(content.clone());
        }
        tokio::spawn(Arc::clone(&state).download(self.config.clone()));
        opened.insert(id.clone(), Arc::clone(&state));
        debug!(content = %id, "Opened simulated content");

        Ok(Arc::new(SimulatedSource { state }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinestream_core::content::await_info;
    use tokio::io::AsyncReadExt;

    fn id(raw: &str) -> ContentId {
        ContentId::parse(raw).unwrap()
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[test]
    fn test_now_pieces_complete_first() {
        let mut book = PieceBook::new(40);
        for index in 30..35 {
            book.priority[index] = PiecePriority::Now;
        }
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        let missing = book.advance(&mut rng, 5);

        assert_eq!(missing, 35);
        assert!((30..35).all(|index| book.complete[index]));
    }

    #[test]
    fn test_advance_finishes_everything() {
        let mut book = PieceBook::new(10);
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        assert_eq!(book.advance(&mut rng, 4), 6);
        assert_eq!(book.advance(&mut rng, 4), 2);
        assert_eq!(book.advance(&mut rng, 4), 0);
        assert_eq!(book.missing(), 0);
    }

    #[tokio::test]
    async fn test_metadata_only_after_publish() {
        let client = SimulatedContentClient::new(SwarmConfig::for_testing());
        let source = client.open(&id("ABCD"), "").await.unwrap();

        assert!(await_info(source.as_ref(), Duration::from_millis(50)).await.is_err());

        client.publish(id("ABCD"), SimContent::synthetic("clip", "clip.mkv", 160, 3));
        let info = await_info(source.as_ref(), Duration::from_secs(2)).await.unwrap();

        assert_eq!(info.name, "clip");
        assert_eq!(info.num_pieces, 10);
        assert_eq!(info.files[0].path, "clip.mkv");
    }

    #[tokio::test]
    async fn test_published_item_downloads_completely() {
        let client = SimulatedContentClient::new(SwarmConfig::for_testing());
        let content = SimContent::synthetic("clip", "clip.mkv", 100, 5);
        client.publish(id("DONE"), content.clone());

        let source = client.open(&id("DONE"), "").await.unwrap();
        await_info(source.as_ref(), Duration::from_secs(2)).await.unwrap();
        wait_until(|| source.bytes_completed() == 100).await;

        let mut reader = source.file_reader(0).await.unwrap();
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).await.unwrap();
        assert_eq!(Bytes::from(bytes), content.concatenated());
    }

    #[tokio::test]
    async fn test_priority_rejected_after_close() {
        let client = SimulatedContentClient::new(SwarmConfig::for_testing());
        client.publish(id("GONE"), SimContent::synthetic("clip", "clip.mkv", 64, 5));
        let source = client.open(&id("GONE"), "").await.unwrap();
        await_info(source.as_ref(), Duration::from_secs(2)).await.unwrap();

        assert!(matches!(
            source.set_piece_priority(99, PiecePriority::Now),
            Err(ContentError::InvalidParameter { .. })
        ));

        source.close();
        assert!(source.is_closed());
        assert!(matches!(
            source.set_piece_priority(0, PiecePriority::Now),
            Err(ContentError::Closed { .. })
        ));
    }

    #[tokio::test]
    async fn test_reopen_after_close_starts_fresh() {
        let client = SimulatedContentClient::new(SwarmConfig::for_testing());
        let first = client.open(&id("AGAIN"), "").await.unwrap();
        first.close();

        let second = client.open(&id("AGAIN"), "").await.unwrap();
        assert!(!second.is_closed());
    }
}
