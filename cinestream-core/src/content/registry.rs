//! Registry of content items known to the service.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{ContentClient, ContentError, ContentId, ContentSource};

/// One registered content item and the state attached to it.
pub struct ContentEntry {
    source: Arc<dyn ContentSource>,
    shutdown: CancellationToken,
    durations: parking_lot::RwLock<HashMap<usize, f64>>,
    requested_pieces: parking_lot::Mutex<BTreeSet<u32>>,
    added_at: Instant,
}

impl ContentEntry {
    fn new(source: Arc<dyn ContentSource>) -> Self {
        Self {
            source,
            shutdown: CancellationToken::new(),
            durations: parking_lot::RwLock::new(HashMap::new()),
            requested_pieces: parking_lot::Mutex::new(BTreeSet::new()),
            added_at: Instant::now(),
        }
    }

    pub fn source(&self) -> &Arc<dyn ContentSource> {
        &self.source
    }

    /// Cancelled when the item is removed. Background passes observe it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Authoritative total duration of a file in seconds, if supplied.
    pub fn duration(&self, file_index: usize) -> Option<f64> {
        self.durations.read().get(&file_index).copied()
    }

    pub fn set_duration(&self, file_index: usize, seconds: f64) {
        self.durations.write().insert(file_index, seconds);
    }

    pub fn record_requested(&self, pieces: impl IntoIterator<Item = u32>) {
        self.requested_pieces.lock().extend(pieces);
    }

    pub fn requested_count(&self) -> usize {
        self.requested_pieces.lock().len()
    }

    pub fn age(&self) -> std::time::Duration {
        self.added_at.elapsed()
    }
}

/// Lock-mediated map from content id to entry.
#[derive(Default)]
pub struct ContentRegistry {
    entries: RwLock<HashMap<ContentId, Arc<ContentEntry>>>,
}

impl ContentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for `id`, opening it through `client` when absent.
    ///
    /// The boolean is `true` when this call created the entry. Concurrent
    /// callers for the same id observe a single open.
    ///
    /// # Errors
    ///
    /// - `ContentError` - Propagated from `client.open`
    pub async fn get_or_open(
        &self,
        id: &ContentId,
        magnet: &str,
        client: &dyn ContentClient,
    ) -> Result<(Arc<ContentEntry>, bool), ContentError> {
        if let Some(entry) = self.entries.read().await.get(id) {
            return Ok((Arc::clone(entry), false));
        }

        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(id) {
            return Ok((Arc::clone(entry), false));
        }

        let source = client.open(id, magnet).await?;
        let entry = Arc::new(ContentEntry::new(source));
        entries.insert(id.clone(), Arc::clone(&entry));
        info!(content = %id, "Content registered");
        Ok((entry, true))
    }

    /// # Errors
    ///
    /// - `ContentError::NotFound` - `id` is not registered
    pub async fn get(&self, id: &ContentId) -> Result<Arc<ContentEntry>, ContentError> {
        self.entries
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ContentError::NotFound { id: id.to_string() })
    }

    /// Unregisters `id`, cancels its background passes and closes the source.
    ///
    /// # Errors
    ///
    /// - `ContentError::NotFound` - `id` is not registered
    pub async fn remove(&self, id: &ContentId) -> Result<Arc<ContentEntry>, ContentError> {
        let entry = self
            .entries
            .write()
            .await
            .remove(id)
            .ok_or_else(|| ContentError::NotFound { id: id.to_string() })?;

        entry.shutdown.cancel();
        entry.source.close();
        debug!(content = %id, age = ?entry.age(), "Content unregistered");
        Ok(entry)
    }

    pub async fn ids(&self) -> Vec<ContentId> {
        let mut ids: Vec<ContentId> = self.entries.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Removes every entry. Used on service shutdown.
    pub async fn clear(&self) {
        let drained: Vec<Arc<ContentEntry>> =
            self.entries.write().await.drain().map(|(_, entry)| entry).collect();
        for entry in drained {
            entry.shutdown.cancel();
            entry.source.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::content::ContentInfo;
    use crate::testing::MockContentSource;

    struct CountingClient {
        opens: AtomicUsize,
    }

    #[async_trait]
    impl ContentClient for CountingClient {
        async fn open(
            &self,
            id: &ContentId,
            _magnet: &str,
        ) -> Result<Arc<dyn ContentSource>, ContentError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            let info = ContentInfo::from_files("movie", 10, &[("movie.mkv".to_string(), 100)]);
            Ok(Arc::new(MockContentSource::with_info(id.clone(), info)))
        }
    }

    #[tokio::test]
    async fn test_concurrent_adds_open_once() {
        let registry = Arc::new(ContentRegistry::new());
        let client = Arc::new(CountingClient {
            opens: AtomicUsize::new(0),
        });
        let id = ContentId::parse("ABCD").unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let client = Arc::clone(&client);
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .get_or_open(&id, &id.to_magnet(), client.as_ref())
                    .await
                    .map(|(_, created)| created)
            }));
        }

        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        assert_eq!(client.opens.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove_cancels_and_closes() {
        let registry = ContentRegistry::new();
        let client = CountingClient {
            opens: AtomicUsize::new(0),
        };
        let id = ContentId::parse("ABCD").unwrap();

        let (entry, _) = registry.get_or_open(&id, "", &client).await.unwrap();
        let token = entry.shutdown_token();
        entry.set_duration(0, 42.0);
        assert_eq!(entry.duration(0), Some(42.0));

        registry.remove(&id).await.unwrap();
        assert!(token.is_cancelled());
        assert!(entry.source().is_closed());
        assert!(matches!(
            registry.get(&id).await,
            Err(ContentError::NotFound { .. })
        ));
        assert!(registry.remove(&id).await.is_err());
    }
}
