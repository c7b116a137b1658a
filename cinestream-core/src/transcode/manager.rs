//! Registry and supervisor of transcode jobs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::playlist::{MediaPlaylist, wait_for_segments, write_atomic};
use super::{
    ArtifactKind, ArtifactName, JobKey, JobVariant, SERVED_PLAYLIST_NAME, TranscodeError,
    TranscodeJob, TranscodePlan, Transcoder,
};
use crate::config::TranscodeConfig;
use crate::content::{ContentId, ContentSource};

/// Owns every shared playlist job and reaps the ones nobody uses anymore.
///
/// At most one playlist job exists per [`JobKey`]. Seek jobs are handed to
/// the caller and never registered.
pub struct TranscodeJobManager {
    config: TranscodeConfig,
    transcoder: Arc<dyn Transcoder>,
    jobs: RwLock<HashMap<JobKey, Arc<TranscodeJob>>>,
    launching: parking_lot::Mutex<HashMap<JobKey, Arc<Mutex<()>>>>,
    wake: Notify,
    launches: AtomicU64,
}

impl TranscodeJobManager {
    pub fn new(config: TranscodeConfig, transcoder: Arc<dyn Transcoder>) -> Arc<Self> {
        Arc::new(Self {
            config,
            transcoder,
            jobs: RwLock::new(HashMap::new()),
            launching: parking_lot::Mutex::new(HashMap::new()),
            wake: Notify::new(),
            launches: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &TranscodeConfig {
        &self.config
    }

    /// Returns the playlist job for `key`, launching it when absent.
    ///
    /// Launches of one key are serialized by a per-key gate. The registry
    /// lock is never held while a transcoder starts.
    ///
    /// # Errors
    ///
    /// - `TranscodeError::SpawnFailed` - The transcoder could not be started
    /// - `CinestreamError::Content` - The source file could not be opened
    pub async fn ensure_job(
        &self,
        key: &JobKey,
        source: &dyn ContentSource,
    ) -> crate::Result<Arc<TranscodeJob>> {
        if let Some(job) = self.live_job(key).await {
            return Ok(job);
        }

        let gate = Arc::clone(self.launching.lock().entry(key.clone()).or_default());
        let _launch = gate.lock().await;
        if let Some(job) = self.live_job(key).await {
            return Ok(job);
        }

        // Marked for stop but not yet reaped; replace it
        let stale = {
            let mut jobs = self.jobs.write().await;
            let stopped = jobs.get(key).is_some_and(|job| job.is_stopped());
            if stopped { jobs.remove(key) } else { None }
        };
        if let Some(stale) = stale {
            tokio::spawn(async move {
                stale.teardown().await;
            });
        }

        let job = Arc::new(self.launch(key, JobVariant::Playlist, source).await?);
        self.jobs.write().await.insert(key.clone(), Arc::clone(&job));
        Ok(job)
    }

    async fn live_job(&self, key: &JobKey) -> Option<Arc<TranscodeJob>> {
        let jobs = self.jobs.read().await;
        let job = jobs.get(key).filter(|job| !job.is_stopped())?;
        job.touch();
        Some(Arc::clone(job))
    }

    /// Launches an ephemeral job starting `seconds` into the file.
    ///
    /// The caller owns the returned job and must tear it down.
    ///
    /// # Errors
    ///
    /// Same as [`TranscodeJobManager::ensure_job`].
    pub async fn start_seek_job(
        &self,
        key: &JobKey,
        seconds: f64,
        source: &dyn ContentSource,
    ) -> crate::Result<Arc<TranscodeJob>> {
        let variant = JobVariant::Seek {
            offset_seconds: seconds,
        };
        Ok(Arc::new(self.launch(key, variant, source).await?))
    }

    async fn launch(
        &self,
        key: &JobKey,
        variant: JobVariant,
        source: &dyn ContentSource,
    ) -> crate::Result<TranscodeJob> {
        tokio::fs::create_dir_all(&self.config.scratch_root).await?;
        let prefix = match variant {
            JobVariant::Playlist => format!("hls-{}-{}-", key.content_id, key.file_index),
            JobVariant::Seek { .. } => {
                format!("hls-seek-{}-{}-", key.content_id, key.file_index)
            }
        };
        let scratch = tempfile::Builder::new()
            .prefix(&prefix)
            .tempdir_in(&self.config.scratch_root)?;

        let input = source.file_reader(key.file_index).await?;
        let plan = TranscodePlan::new(scratch.path(), variant.seek_seconds(), &self.config);

        // On failure the scratch directory is dropped, which deletes it
        let process = self.transcoder.launch(input, &plan).await?;
        self.launches.fetch_add(1, Ordering::Relaxed);

        info!(
            job = %key,
            transcoder = self.transcoder.name(),
            seek = ?variant.seek_seconds(),
            dir = %scratch.path().display(),
            "Started transcode job"
        );
        Ok(TranscodeJob::new(key.clone(), variant, scratch, process))
    }

    /// Waits for `name` to appear in the job directory.
    ///
    /// # Errors
    ///
    /// - `TranscodeError::JobStopped` - The job was stopped while waiting
    /// - `TranscodeError::ProcessExited` - The transcoder died before producing it
    /// - `TranscodeError::ArtifactNotReady` - Polling budget exhausted
    pub async fn await_artifact(
        &self,
        job: &TranscodeJob,
        name: &ArtifactName,
    ) -> Result<PathBuf, TranscodeError> {
        let path = job.dir().join(name.as_str());
        let attempts = self.config.artifact_poll_attempts.max(1);

        for attempt in 0..attempts {
            job.touch();
            if job.is_stopped() {
                return Err(TranscodeError::JobStopped {
                    key: job.key().to_string(),
                });
            }

            if let Ok(metadata) = tokio::fs::metadata(&path).await
                && metadata.len() > 0
            {
                if name.kind() == ArtifactKind::Playlist {
                    job.mark_produced();
                }
                return Ok(path);
            }

            if let Some(status) = job.exit_failure().await {
                return Err(TranscodeError::ProcessExited { status });
            }

            if attempt + 1 < attempts {
                tokio::time::sleep(self.config.artifact_poll_interval).await;
            }
        }

        debug!(job = %job.key(), artifact = name.as_str(), attempts, "Artifact still missing");
        Err(TranscodeError::ArtifactNotReady {
            name: name.as_str().to_string(),
        })
    }

    /// Reads the playlist at `path`, corrects it when `duration` disagrees
    /// with the declared segment lengths, and waits for the segments it lists.
    ///
    /// The transcoder keeps replacing `path` while it runs, so a corrected
    /// playlist is written to [`SERVED_PLAYLIST_NAME`] next to it instead.
    ///
    /// # Errors
    ///
    /// - `TranscodeError::Io` - The playlist could not be read or written
    pub async fn servable_playlist(
        &self,
        job: &TranscodeJob,
        path: &Path,
        duration: Option<f64>,
    ) -> Result<Bytes, TranscodeError> {
        let text = tokio::fs::read_to_string(path).await?;
        let mut playlist = match MediaPlaylist::parse(&text) {
            Ok(playlist) => playlist,
            Err(e) => {
                warn!(job = %job.key(), error = %e, "Serving playlist without inspection");
                return Ok(Bytes::from(text));
            }
        };

        if let Some(total) = duration
            && playlist.correct_total_duration(total)
        {
            debug!(job = %job.key(), total, "Corrected playlist duration");
            write_atomic(&job.dir().join(SERVED_PLAYLIST_NAME), playlist.render()).await?;
        }

        let missing = wait_for_segments(
            job.dir(),
            &playlist.segment_uris(),
            self.config.segment_poll_attempts,
            self.config.segment_poll_interval,
        )
        .await;
        if !missing.is_empty() {
            warn!(job = %job.key(), missing = missing.len(), "Serving playlist with segments not yet written");
        }

        Ok(Bytes::from(playlist.render()))
    }

    pub async fn get(&self, key: &JobKey) -> Option<Arc<TranscodeJob>> {
        self.jobs.read().await.get(key).cloned()
    }

    /// Marks the job for teardown and wakes the supervisor.
    pub async fn request_stop(&self, key: &JobKey) -> bool {
        match self.jobs.read().await.get(key) {
            Some(job) => {
                job.request_stop();
                self.wake.notify_one();
                true
            }
            None => false,
        }
    }

    /// Removes and tears down the job for `key` right away.
    pub async fn stop(&self, key: &JobKey) -> bool {
        let job = self.jobs.write().await.remove(key);
        match job {
            Some(job) => job.teardown().await,
            None => false,
        }
    }

    /// Tears down every job of one content item.
    pub async fn stop_content(&self, content_id: &ContentId) -> usize {
        let removed: Vec<Arc<TranscodeJob>> = {
            let mut jobs = self.jobs.write().await;
            let keys: Vec<JobKey> = jobs
                .keys()
                .filter(|key| &key.content_id == content_id)
                .cloned()
                .collect();
            keys.iter().filter_map(|key| jobs.remove(key)).collect()
        };
        self.launching
            .lock()
            .retain(|key, _| &key.content_id != content_id);
        let count = removed.len();
        for job in removed {
            job.teardown().await;
        }
        count
    }

    /// Tears down stopped jobs and jobs idle past the timeout.
    pub async fn reap(&self) -> usize {
        let expired: Vec<Arc<TranscodeJob>> = {
            let mut jobs = self.jobs.write().await;
            let keys: Vec<JobKey> = jobs
                .iter()
                .filter(|(_, job)| job.is_stopped() || job.idle_for() >= self.config.idle_timeout)
                .map(|(key, _)| key.clone())
                .collect();
            keys.iter().filter_map(|key| jobs.remove(key)).collect()
        };

        let count = expired.len();
        for job in expired {
            info!(job = %job.key(), idle = ?job.idle_for(), "Tearing down transcode job");
            job.teardown().await;
        }
        count
    }

    /// Periodically reaps jobs until `shutdown` is cancelled.
    pub fn spawn_supervisor(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(manager.config.supervisor_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                    _ = manager.wake.notified() => {}
                }

                let reaped = manager.reap().await;
                if reaped > 0 {
                    let remaining = manager.job_count().await;
                    debug!(reaped, remaining, "Supervisor pass");
                }
            }
            debug!("Transcode supervisor stopped");
        })
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Transcoder launches since startup, seek jobs included.
    pub fn launch_count(&self) -> u64 {
        self.launches.load(Ordering::Relaxed)
    }

    /// Tears down every registered job.
    pub async fn shutdown(&self) {
        let jobs: Vec<Arc<TranscodeJob>> = self.jobs.write().await.drain().map(|(_, job)| job).collect();
        for job in jobs {
            job.teardown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::config::CinestreamConfig;
    use crate::content::FileReader;
    use crate::testing::{GatedTranscoder, MockContentSource};
    use crate::transcode::{PLAYLIST_NAME, SimulatedTranscoder, TranscodeProcess};

    fn source(bytes: usize) -> MockContentSource {
        MockContentSource::with_data(
            ContentId::parse("ABCD").unwrap(),
            256,
            &[("movie.mkv", vec![9u8; bytes])],
        )
    }

    fn manager_in(scratch: &Path, transcoder: Arc<dyn Transcoder>) -> Arc<TranscodeJobManager> {
        let mut config = CinestreamConfig::for_testing().transcode;
        config.scratch_root = scratch.to_path_buf();
        TranscodeJobManager::new(config, transcoder)
    }

    fn key() -> JobKey {
        JobKey::new(ContentId::parse("ABCD").unwrap(), 0)
    }

    fn scratch_entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
    }

    struct RefusingTranscoder;

    #[async_trait]
    impl Transcoder for RefusingTranscoder {
        async fn launch(&self, _input: FileReader, _plan: &TranscodePlan) -> Result<TranscodeProcess, TranscodeError> {
            Err(TranscodeError::SpawnFailed {
                reason: "no transcoder".to_string(),
            })
        }

        fn name(&self) -> &'static str {
            "refusing"
        }
    }

    struct CrashingTranscoder;

    #[async_trait]
    impl Transcoder for CrashingTranscoder {
        async fn launch(&self, _input: FileReader, _plan: &TranscodePlan) -> Result<TranscodeProcess, TranscodeError> {
            let failure = Arc::new(parking_lot::Mutex::new(Some("exit status: 1".to_string())));
            Ok(TranscodeProcess::in_process(tokio::spawn(async {}), failure))
        }

        fn name(&self) -> &'static str {
            "crashing"
        }
    }

    fn idle_process() -> TranscodeProcess {
        TranscodeProcess::in_process(
            tokio::spawn(std::future::pending()),
            Arc::new(parking_lot::Mutex::new(None)),
        )
    }

    /// Leaves the job directory to the test.
    struct IdleTranscoder;

    #[async_trait]
    impl Transcoder for IdleTranscoder {
        async fn launch(&self, _input: FileReader, _plan: &TranscodePlan) -> Result<TranscodeProcess, TranscodeError> {
            Ok(idle_process())
        }

        fn name(&self) -> &'static str {
            "idle"
        }
    }

    struct EmptyPlaylistTranscoder;

    #[async_trait]
    impl Transcoder for EmptyPlaylistTranscoder {
        async fn launch(&self, _input: FileReader, plan: &TranscodePlan) -> Result<TranscodeProcess, TranscodeError> {
            std::fs::write(plan.playlist_path(), b"")?;
            Ok(idle_process())
        }

        fn name(&self) -> &'static str {
            "empty-playlist"
        }
    }

    fn live_playlist(segments: usize, ended: bool) -> String {
        let mut text =
            String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n#EXT-X-MEDIA-SEQUENCE:0\n");
        for index in 0..segments {
            text.push_str(&format!("#EXTINF:4.000000,\nsegment{index:03}.ts\n"));
        }
        if ended {
            text.push_str("#EXT-X-ENDLIST\n");
        }
        text
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_job() {
        let scratch = tempfile::tempdir().unwrap();
        let manager = manager_in(scratch.path(), Arc::new(SimulatedTranscoder::new(256, 4.0)));
        let source = Arc::new(source(2048));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            let source = source.clone();
            handles.push(tokio::spawn(async move {
                manager.ensure_job(&key(), source.as_ref()).await.unwrap().id()
            }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }

        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(manager.launch_count(), 1);
        assert_eq!(manager.job_count().await, 1);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_idle_job_is_reaped_with_directory() {
        let scratch = tempfile::tempdir().unwrap();
        let manager = manager_in(scratch.path(), Arc::new(SimulatedTranscoder::new(256, 4.0)));
        let shutdown = CancellationToken::new();
        let supervisor = manager.spawn_supervisor(shutdown.clone());

        let job = manager.ensure_job(&key(), &source(1024)).await.unwrap();
        let dir = job.dir().to_path_buf();
        assert!(dir.exists());

        let mut reaped = false;
        for _ in 0..100 {
            if manager.job_count().await == 0 && !dir.exists() {
                reaped = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(reaped, "idle job should be torn down");

        shutdown.cancel();
        supervisor.await.unwrap();
    }

    #[tokio::test]
    async fn test_request_stop_wakes_supervisor() {
        let scratch = tempfile::tempdir().unwrap();
        let mut config = CinestreamConfig::for_testing().transcode;
        config.scratch_root = scratch.path().to_path_buf();
        config.supervisor_interval = Duration::from_secs(3600);
        config.idle_timeout = Duration::from_secs(3600);
        let manager = TranscodeJobManager::new(config, Arc::new(SimulatedTranscoder::default()));
        let shutdown = CancellationToken::new();
        let supervisor = manager.spawn_supervisor(shutdown.clone());

        manager.ensure_job(&key(), &source(512)).await.unwrap();
        // Let the supervisor consume its immediate first tick
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(manager.request_stop(&key()).await);

        let mut stopped = false;
        for _ in 0..50 {
            if manager.job_count().await == 0 {
                stopped = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(stopped);
        assert_eq!(scratch_entries(scratch.path()), 0);

        shutdown.cancel();
        supervisor.await.unwrap();
    }

    #[tokio::test]
    async fn test_seek_jobs_are_independent() {
        let scratch = tempfile::tempdir().unwrap();
        let manager = manager_in(scratch.path(), Arc::new(SimulatedTranscoder::new(256, 4.0)));
        let source = source(2048);

        let first = manager.start_seek_job(&key(), 4.0, &source).await.unwrap();
        let second = manager.start_seek_job(&key(), 4.0, &source).await.unwrap();

        assert_ne!(first.id(), second.id());
        assert_ne!(first.dir(), second.dir());
        assert_eq!(manager.job_count().await, 0);

        assert!(first.teardown().await);
        assert!(!first.dir().exists());
        assert!(second.dir().exists());
        assert!(second.teardown().await);
    }

    #[tokio::test]
    async fn test_playlist_duration_corrected() {
        let scratch = tempfile::tempdir().unwrap();
        let manager = manager_in(scratch.path(), Arc::new(SimulatedTranscoder::new(300, 4.0)));
        let source = source(1000);

        let job = manager.ensure_job(&key(), &source).await.unwrap();
        let path = manager
            .await_artifact(&job, &ArtifactName::playlist())
            .await
            .unwrap();
        for _ in 0..100 {
            let text = tokio::fs::read_to_string(&path).await.unwrap_or_default();
            if text.contains("#EXT-X-ENDLIST") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let body = manager.servable_playlist(&job, &path, Some(20.0)).await.unwrap();
        let playlist = MediaPlaylist::parse(std::str::from_utf8(&body).unwrap()).unwrap();

        assert!((playlist.declared_duration() - 20.0).abs() < 0.01);
        let served = std::fs::read_to_string(job.dir().join(SERVED_PLAYLIST_NAME)).unwrap();
        assert!(served.contains("#EXTINF:8.000,"));
        assert!(served.contains("#EXT-X-ABSOLUTE-DURATION:20.000"));
        let produced = std::fs::read_to_string(&path).unwrap();
        assert!(!produced.contains("#EXT-X-ABSOLUTE-DURATION"));
        manager.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_correction_while_transcoder_writes_keeps_final_playlist() {
        let scratch = tempfile::tempdir().unwrap();
        let manager = manager_in(scratch.path(), Arc::new(IdleTranscoder));
        let job = manager.ensure_job(&key(), &source(512)).await.unwrap();
        let path = job.dir().join(PLAYLIST_NAME);
        for index in 0..8 {
            std::fs::write(job.dir().join(format!("segment{index:03}.ts")), [7u8; 16]).unwrap();
        }

        for _ in 0..25 {
            write_atomic(&path, live_playlist(1, false)).await.unwrap();
            let done = CancellationToken::new();
            let mut readers = Vec::new();
            for _ in 0..4 {
                let manager = manager.clone();
                let job = job.clone();
                let path = path.clone();
                let done = done.clone();
                readers.push(tokio::spawn(async move {
                    while !done.is_cancelled() {
                        manager.servable_playlist(&job, &path, Some(40.0)).await.unwrap();
                    }
                }));
            }

            for segments in 2..=8 {
                write_atomic(&path, live_playlist(segments, segments == 8)).await.unwrap();
                tokio::task::yield_now().await;
            }
            done.cancel();
            for reader in readers {
                reader.await.unwrap();
            }

            assert_eq!(std::fs::read_to_string(&path).unwrap(), live_playlist(8, true));
        }

        let body = manager.servable_playlist(&job, &path, Some(40.0)).await.unwrap();
        let served = MediaPlaylist::parse(std::str::from_utf8(&body).unwrap()).unwrap();
        assert!(served.is_ended());
        assert_eq!(served.segment_uris().len(), 8);
        assert!((served.declared_duration() - 40.0).abs() < 0.01);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_slow_launch_does_not_block_registry() {
        let scratch = tempfile::tempdir().unwrap();
        let transcoder = Arc::new(GatedTranscoder::new(SimulatedTranscoder::new(256, 4.0)));
        let manager = manager_in(scratch.path(), transcoder.clone());
        let source = Arc::new(source(1024));

        let pending = {
            let manager = manager.clone();
            let source = source.clone();
            tokio::spawn(async move { manager.ensure_job(&key(), source.as_ref()).await.map(|job| job.id()) })
        };
        transcoder.wait_entered().await;

        let quick = Duration::from_secs(1);
        assert_eq!(tokio::time::timeout(quick, manager.job_count()).await.unwrap(), 0);
        let other_key = JobKey::new(ContentId::parse("EFGH").unwrap(), 0);
        let other = tokio::time::timeout(quick, manager.ensure_job(&other_key, source.as_ref()))
            .await
            .expect("other keys launch while one is held")
            .unwrap();
        assert_eq!(manager.job_count().await, 1);

        transcoder.release();
        let first = pending.await.unwrap().unwrap();
        assert_ne!(first, other.id());
        assert_eq!(manager.job_count().await, 2);
        assert_eq!(manager.launch_count(), 2);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_empty_playlist_is_not_ready() {
        let scratch = tempfile::tempdir().unwrap();
        let mut config = CinestreamConfig::for_testing().transcode;
        config.scratch_root = scratch.path().to_path_buf();
        config.artifact_poll_attempts = 3;
        let manager = TranscodeJobManager::new(config, Arc::new(EmptyPlaylistTranscoder));

        let job = manager.ensure_job(&key(), &source(512)).await.unwrap();
        let result = manager.await_artifact(&job, &ArtifactName::playlist()).await;

        assert!(matches!(result, Err(TranscodeError::ArtifactNotReady { .. })));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_launch_leaves_no_directory() {
        let scratch = tempfile::tempdir().unwrap();
        let manager = manager_in(scratch.path(), Arc::new(RefusingTranscoder));

        let result = manager.ensure_job(&key(), &source(512)).await;

        assert!(matches!(
            result,
            Err(crate::CinestreamError::Transcode(TranscodeError::SpawnFailed { .. }))
        ));
        assert_eq!(manager.job_count().await, 0);
        assert_eq!(scratch_entries(scratch.path()), 0);
    }

    #[tokio::test]
    async fn test_crashed_transcoder_surfaces_exit() {
        let scratch = tempfile::tempdir().unwrap();
        let manager = manager_in(scratch.path(), Arc::new(CrashingTranscoder));

        let job = manager.ensure_job(&key(), &source(512)).await.unwrap();
        let result = manager.await_artifact(&job, &ArtifactName::playlist()).await;

        assert!(matches!(result, Err(TranscodeError::ProcessExited { .. })));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_stopped_job_is_replaced() {
        let scratch = tempfile::tempdir().unwrap();
        let manager = manager_in(scratch.path(), Arc::new(SimulatedTranscoder::default()));
        let source = source(512);

        let first = manager.ensure_job(&key(), &source).await.unwrap();
        first.request_stop();
        let second = manager.ensure_job(&key(), &source).await.unwrap();

        assert_ne!(first.id(), second.id());
        assert_eq!(manager.launch_count(), 2);
        manager.shutdown().await;
    }
}
