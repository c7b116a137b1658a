//! A single transcode job and its scratch directory.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{JobId, JobKey, JobVariant, TranscodeProcess};

/// Observable lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Transcoder running, playlist not yet produced
    Starting,
    Running,
    /// No request touched the job within the idle timeout
    Idle,
    Stopped,
}

/// A running transcoder together with the directory it writes into.
///
/// The scratch directory is removed exactly once, by whichever of the
/// supervisor, an explicit stop or a finished seek request gets to
/// [`TranscodeJob::teardown`] first.
pub struct TranscodeJob {
    id: JobId,
    key: JobKey,
    variant: JobVariant,
    dir: PathBuf,
    scratch: parking_lot::Mutex<Option<TempDir>>,
    process: tokio::sync::Mutex<Option<TranscodeProcess>>,
    last_access: parking_lot::Mutex<Instant>,
    produced: AtomicBool,
    stop: CancellationToken,
    started_at: Instant,
}

impl TranscodeJob {
    pub fn new(key: JobKey, variant: JobVariant, scratch: TempDir, process: TranscodeProcess) -> Self {
        let now = Instant::now();
        Self {
            id: JobId::new(),
            key,
            variant,
            dir: scratch.path().to_path_buf(),
            scratch: parking_lot::Mutex::new(Some(scratch)),
            process: tokio::sync::Mutex::new(Some(process)),
            last_access: parking_lot::Mutex::new(now),
            produced: AtomicBool::new(false),
            stop: CancellationToken::new(),
            started_at: now,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn key(&self) -> &JobKey {
        &self.key
    }

    pub fn variant(&self) -> JobVariant {
        self.variant
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn age(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Records a request for this job.
    pub fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_access.lock().elapsed()
    }

    pub(crate) fn mark_produced(&self) {
        self.produced.store(true, Ordering::Release);
    }

    pub fn state(&self, idle_after: Duration) -> JobState {
        if self.stop.is_cancelled() {
            JobState::Stopped
        } else if self.idle_for() >= idle_after {
            JobState::Idle
        } else if self.produced.load(Ordering::Acquire) {
            JobState::Running
        } else {
            JobState::Starting
        }
    }

    /// Marks the job for teardown. Waiters on its artifacts give up.
    pub fn request_stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Reason the transcoder ended abnormally, if it did.
    pub async fn exit_failure(&self) -> Option<String> {
        self.process.lock().await.as_mut().and_then(TranscodeProcess::exit_failure)
    }

    /// Kills the transcoder and deletes the scratch directory.
    ///
    /// Returns `false` when another caller already tore the job down.
    pub async fn teardown(&self) -> bool {
        self.stop.cancel();

        if let Some(mut process) = self.process.lock().await.take() {
            process.kill().await;
        }

        let Some(scratch) = self.scratch.lock().take() else {
            return false;
        };

        let key = self.key.to_string();
        let dir = self.dir.clone();
        let retry_dir = dir.clone();
        let removed = tokio::task::spawn_blocking(move || {
            // A write racing the first removal can leave a file behind
            scratch
                .close()
                .or_else(|_| std::fs::remove_dir_all(&retry_dir))
        })
        .await;
        match removed {
            Ok(Ok(())) => debug!(job = %key, dir = %dir.display(), "Removed job directory"),
            Ok(Err(e)) => warn!(job = %key, dir = %dir.display(), error = %e, "Failed to remove job directory"),
            Err(e) => warn!(job = %key, error = %e, "Job directory cleanup task failed"),
        }
        true
    }
}

impl std::fmt::Debug for TranscodeJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscodeJob")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("variant", &self.variant)
            .field("dir", &self.dir)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ContentId;

    fn idle_process() -> TranscodeProcess {
        let failure = std::sync::Arc::new(parking_lot::Mutex::new(None));
        let task = tokio::spawn(std::future::pending::<()>());
        TranscodeProcess::in_process(task, failure)
    }

    fn job() -> TranscodeJob {
        let scratch = tempfile::Builder::new().prefix("hls-test-").tempdir().unwrap();
        TranscodeJob::new(
            JobKey::new(ContentId::parse("ABCD").unwrap(), 0),
            JobVariant::Playlist,
            scratch,
            idle_process(),
        )
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let job = job();
        let idle_after = Duration::from_millis(40);

        assert_eq!(job.state(idle_after), JobState::Starting);
        job.mark_produced();
        assert_eq!(job.state(idle_after), JobState::Running);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(job.state(idle_after), JobState::Idle);
        job.touch();
        assert_eq!(job.state(idle_after), JobState::Running);

        job.request_stop();
        assert_eq!(job.state(idle_after), JobState::Stopped);
        job.teardown().await;
    }

    #[tokio::test]
    async fn test_teardown_removes_directory_once() {
        let job = job();
        let dir = job.dir().to_path_buf();
        std::fs::write(dir.join("segment000.ts"), b"data").unwrap();

        assert!(job.teardown().await);
        assert!(!dir.exists());
        assert!(job.is_stopped());
        assert!(!job.teardown().await);
    }

    #[tokio::test]
    async fn test_exit_failure_reported_from_task() {
        let failure = std::sync::Arc::new(parking_lot::Mutex::new(None));
        let process = TranscodeProcess::in_process(tokio::spawn(async {}), failure.clone());
        let job = TranscodeJob::new(
            JobKey::new(ContentId::parse("ABCD").unwrap(), 1),
            JobVariant::Seek { offset_seconds: 30.0 },
            tempfile::tempdir().unwrap(),
            process,
        );

        assert_eq!(job.exit_failure().await, None);
        *failure.lock() = Some("input ended early".to_string());
        assert_eq!(job.exit_failure().await.as_deref(), Some("input ended early"));
        job.teardown().await;
    }
}
