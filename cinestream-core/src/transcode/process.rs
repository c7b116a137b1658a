//! Launching transcoders and controlling the running process.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::pipe::PipeTasks;
use super::{TranscodeError, TranscodePlan};
use crate::content::FileReader;

/// Starts a transcoder that reads `input` and writes into `plan.output_dir`.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// # Errors
    ///
    /// - `TranscodeError::SpawnFailed` - The transcoder could not be started
    async fn launch(
        &self,
        input: FileReader,
        plan: &TranscodePlan,
    ) -> Result<TranscodeProcess, TranscodeError>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// A running transcoder: an external child process or an in-process task.
pub struct TranscodeProcess {
    child: Option<Child>,
    pipes: Option<PipeTasks>,
    task: Option<JoinHandle<()>>,
    failure: Arc<parking_lot::Mutex<Option<String>>>,
}

impl TranscodeProcess {
    pub fn external(child: Child, pipes: PipeTasks) -> Self {
        Self {
            child: Some(child),
            pipes: Some(pipes),
            task: None,
            failure: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    /// In-process transcoder. The task stores a reason in `failure` when it
    /// gives up.
    pub fn in_process(task: JoinHandle<()>, failure: Arc<parking_lot::Mutex<Option<String>>>) -> Self {
        Self {
            child: None,
            pipes: None,
            task: Some(task),
            failure,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Reason the process ended abnormally, if it did.
    pub fn exit_failure(&mut self) -> Option<String> {
        if let Some(reason) = self.failure.lock().clone() {
            return Some(reason);
        }
        if let Some(child) = self.child.as_mut()
            && let Ok(Some(status)) = child.try_wait()
            && !status.success()
        {
            return Some(status.to_string());
        }
        None
    }

    /// Kills the process and stops its I/O tasks. Already-exited processes
    /// are not an error.
    pub async fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            match child.try_wait() {
                Ok(Some(status)) => debug!(%status, "Transcoder already exited"),
                _ => {
                    if let Err(e) = child.kill().await {
                        warn!(error = %e, "Failed to kill transcoder process");
                    }
                }
            }
        }
        if let Some(pipes) = self.pipes.take() {
            pipes.abort();
        }
        if let Some(task) = self.task.take() {
            task.abort();
            // Cancelled at its next await point
            let _ = task.await;
        }
    }
}

impl Drop for TranscodeProcess {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            // Best effort cleanup
            let _ = child.start_kill();
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Runs the external ffmpeg binary.
pub struct FfmpegTranscoder {
    program: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn launch(
        &self,
        input: FileReader,
        plan: &TranscodePlan,
    ) -> Result<TranscodeProcess, TranscodeError> {
        let mut command = Command::new(&self.program);
        command
            .args(plan.arguments())
            .current_dir(&plan.output_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| TranscodeError::SpawnFailed {
            reason: format!("{}: {e}", self.program.display()),
        })?;

        let label = plan.output_dir.display().to_string();
        info!(
            pid = ?child.id(),
            output = %label,
            seek = ?plan.seek_seconds,
            "Started ffmpeg"
        );

        let pipes = PipeTasks::spawn(
            label,
            input,
            child.stdin.take(),
            child.stdout.take(),
            child.stderr.take(),
        );

        Ok(TranscodeProcess::external(child, pipes))
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::config::TranscodeConfig;

    #[tokio::test]
    async fn test_missing_binary_fails_to_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = FfmpegTranscoder::new(dir.path().join("ffmpeg_bin").join("ffmpeg"));
        let plan = TranscodePlan::new(dir.path(), None, &TranscodeConfig::default());

        let result = transcoder
            .launch(Box::pin(Cursor::new(Vec::new())), &plan)
            .await;

        assert!(matches!(result, Err(TranscodeError::SpawnFailed { .. })));
    }

    #[tokio::test]
    async fn test_abnormal_exit_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        // `false` ignores its arguments and exits with status 1
        let transcoder = FfmpegTranscoder::new("false");
        let plan = TranscodePlan::new(dir.path(), None, &TranscodeConfig::default());

        let mut process = transcoder
            .launch(Box::pin(Cursor::new(vec![0u8; 16])), &plan)
            .await
            .unwrap();

        let mut failure = None;
        for _ in 0..50 {
            failure = process.exit_failure();
            if failure.is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(failure.is_some());
        process.kill().await;
    }
}
