//! Transcoder stdio plumbing.
//!
//! Feeding stdin and draining stdout and stderr run as three separate tasks.
//! They must run concurrently: a transcoder blocked on a full output pipe
//! stops reading its input.

use std::collections::VecDeque;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, warn};

use crate::content::FileReader;

const STDERR_TAIL: usize = 20;

/// Totals observed once all three pipe tasks finished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipeReport {
    pub fed: u64,
    pub drained: u64,
    /// Last lines the transcoder wrote to stderr
    pub stderr_tail: Vec<String>,
}

/// Handles of the feed and drain tasks of one process.
pub struct PipeTasks {
    aborts: [AbortHandle; 3],
    joined: Option<JoinHandle<PipeReport>>,
}

impl PipeTasks {
    /// Starts the three tasks. Any of the pipes may be absent.
    pub fn spawn<W, O, E>(
        label: String,
        mut input: FileReader,
        stdin: Option<W>,
        stdout: Option<O>,
        stderr: Option<E>,
    ) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let feed_label = label.clone();
        let feed = tokio::spawn(async move {
            let Some(mut stdin) = stdin else {
                return 0;
            };
            let fed = match tokio::io::copy(&mut input, &mut stdin).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    // Broken pipe once the transcoder exits or is killed
                    debug!(job = %feed_label, error = %e, "Transcoder input feed stopped");
                    return 0;
                }
            };
            if let Err(e) = stdin.shutdown().await {
                debug!(job = %feed_label, error = %e, "Failed to close transcoder stdin");
            }
            fed
        });

        let drain_out = tokio::spawn(async move {
            let Some(mut stdout) = stdout else {
                return 0;
            };
            tokio::io::copy(&mut stdout, &mut tokio::io::sink())
                .await
                .unwrap_or(0)
        });

        let err_label = label.clone();
        let drain_err = tokio::spawn(async move {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL);
            let Some(stderr) = stderr else {
                return tail;
            };
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(job = %err_label, "transcoder: {line}");
                if tail.len() == STDERR_TAIL {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail
        });

        let aborts = [
            feed.abort_handle(),
            drain_out.abort_handle(),
            drain_err.abort_handle(),
        ];

        let joined = tokio::spawn(async move {
            let (fed, drained, tail) = tokio::join!(feed, drain_out, drain_err);
            let report = PipeReport {
                fed: fed.unwrap_or(0),
                drained: drained.unwrap_or(0),
                stderr_tail: tail.map(Vec::from).unwrap_or_default(),
            };
            debug!(job = %label, fed = report.fed, drained = report.drained, "Transcoder pipes closed");
            report
        });

        Self {
            aborts,
            joined: Some(joined),
        }
    }

    pub fn abort(&self) {
        for handle in &self.aborts {
            handle.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.joined.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Waits for all three tasks.
    pub async fn join(mut self) -> PipeReport {
        match self.joined.take() {
            Some(joined) => joined.await.unwrap_or_default(),
            None => PipeReport::default(),
        }
    }
}

impl Drop for PipeTasks {
    fn drop(&mut self) {
        if !self.is_finished() {
            self.abort();
        }
    }
}
