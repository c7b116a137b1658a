//! Process-scoped service tying the registries, the scheduler and the
//! transcode jobs together.
//!
//! Every request operation lives here so that transports stay thin: they
//! decode arguments, call one method and encode the result.

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CinestreamConfig;
use crate::content::registry::ContentEntry;
use crate::content::{
    ContentClient, ContentError, ContentFile, ContentId, ContentRegistry, ContentSource, await_info,
};
use crate::progress::{ProgressTracker, estimate_file_progress};
use crate::scheduler::{PieceScheduler, SeekOutcome};
use crate::streaming::{DirectStream, RangePlan, content_type_for, range_stream};
use crate::transcode::playlist::ended_playlist;
use crate::transcode::{ArtifactKind, ArtifactName, JobKey, TranscodeJobManager, Transcoder};

/// Arguments of an add request. At least one field must be present.
#[derive(Debug, Clone, Default)]
pub struct AddRequest {
    pub info_hash: Option<String>,
    pub magnet: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddResponse {
    pub message: String,
    pub info_hash: String,
    pub already_present: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentStatus {
    pub info_hash: String,
    pub state: &'static str,
    pub metadata_completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<ContentFile>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_completed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent_completed: Option<f64>,
    pub requested_pieces: usize,
}

/// Per-file progress answer. Without metadata only `ready` and `status`
/// are present.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressReport {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(flatten)]
    pub detail: Option<ProgressDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressDetail {
    pub file_path: String,
    pub completed_bytes_estimated: u64,
    pub length_bytes: u64,
    pub percent_by_bytes_estimated: f64,
    pub completed_pieces_in_file_range: u32,
    pub total_pieces_in_file_range: u32,
    pub percent_by_pieces: f64,
    pub download_speed_bytes_per_sec: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrioritizeResponse {
    pub message: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub ignored: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seek_position_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seek_position_piece: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_priority: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_priority: Option<u32>,
}

impl From<SeekOutcome> for PrioritizeResponse {
    fn from(outcome: SeekOutcome) -> Self {
        let empty = Self {
            message: String::new(),
            ignored: false,
            seek_position_bytes: None,
            seek_position_piece: None,
            start_priority: None,
            end_priority: None,
        };
        match outcome {
            SeekOutcome::NothingToPrioritize => Self {
                message: "nothing to prioritize".to_string(),
                ..empty
            },
            SeekOutcome::Ignored {
                seek_piece,
                percentage,
            } => Self {
                message: format!("seek to {percentage:.1}% ignored near end of file"),
                ignored: true,
                seek_position_piece: Some(seek_piece),
                ..empty
            },
            SeekOutcome::Prioritized {
                seek_byte,
                seek_piece,
                start,
                end,
            } => Self {
                message: format!("prioritized pieces {start}-{end}"),
                seek_position_bytes: Some(seek_byte),
                seek_position_piece: Some(seek_piece),
                start_priority: Some(start),
                end_priority: Some(end),
                ..empty
            },
        }
    }
}

/// Where the bytes of a served artifact come from.
#[derive(Debug)]
pub enum ArtifactBody {
    Memory(Bytes),
    File { file: tokio::fs::File, length: u64 },
}

/// A manifest or segment ready to be written to the client.
#[derive(Debug)]
pub struct Artifact {
    pub name: ArtifactName,
    pub body: ArtifactBody,
}

impl Artifact {
    pub fn content_type(&self) -> &'static str {
        self.name.content_type()
    }
}

/// Owns all runtime state. One instance per process.
pub struct StreamService {
    config: CinestreamConfig,
    client: Arc<dyn ContentClient>,
    registry: ContentRegistry,
    scheduler: PieceScheduler,
    jobs: Arc<TranscodeJobManager>,
    progress: ProgressTracker,
    shutdown: CancellationToken,
    supervisor: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl StreamService {
    /// Builds the service and starts the transcode supervisor.
    pub fn start(
        config: CinestreamConfig,
        client: Arc<dyn ContentClient>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Arc<Self> {
        let shutdown = CancellationToken::new();
        let jobs = TranscodeJobManager::new(config.transcode.clone(), transcoder);
        let supervisor = jobs.spawn_supervisor(shutdown.child_token());

        Arc::new(Self {
            scheduler: PieceScheduler::new(config.scheduler.clone()),
            config,
            client,
            registry: ContentRegistry::new(),
            jobs,
            progress: ProgressTracker::new(),
            shutdown,
            supervisor: parking_lot::Mutex::new(Some(supervisor)),
        })
    }

    pub fn config(&self) -> &CinestreamConfig {
        &self.config
    }

    pub fn jobs(&self) -> &Arc<TranscodeJobManager> {
        &self.jobs
    }

    pub fn registry(&self) -> &ContentRegistry {
        &self.registry
    }

    /// Registers a content item. Re-adding a known id is a successful no-op.
    ///
    /// A newly added item gets a background task that waits for metadata,
    /// primes the largest file for playback and runs its sliding window.
    ///
    /// # Errors
    ///
    /// - `ContentError::InvalidId` - Neither a valid id nor a valid magnet link
    /// - `ContentError::InvalidParameter` - Both fields missing
    pub async fn add_content(&self, request: AddRequest) -> crate::Result<AddResponse> {
        let id = match (&request.info_hash, &request.magnet) {
            (Some(hash), _) if !hash.trim().is_empty() => ContentId::parse(hash)?,
            (_, Some(magnet)) if !magnet.trim().is_empty() => ContentId::from_magnet(magnet)?,
            _ => {
                return Err(ContentError::InvalidParameter {
                    reason: "infoHash or magnetURI required".to_string(),
                }
                .into());
            }
        };
        let magnet = request
            .magnet
            .filter(|magnet| !magnet.trim().is_empty())
            .unwrap_or_else(|| id.to_magnet());

        let (entry, created) = self
            .registry
            .get_or_open(&id, &magnet, self.client.as_ref())
            .await?;

        if created {
            self.spawn_playback_pass(&entry);
        } else {
            debug!(content = %id, "Content already registered");
        }

        Ok(AddResponse {
            message: if created { "added" } else { "already added" }.to_string(),
            info_hash: id.to_string(),
            already_present: !created,
        })
    }

    fn spawn_playback_pass(&self, entry: &Arc<ContentEntry>) {
        let source = Arc::clone(entry.source());
        let cancel = entry.shutdown_token();
        let scheduler = self.scheduler.clone();
        let wait = self.config.server.background_metadata_timeout;

        tokio::spawn(async move {
            let id = source.id().clone();
            let info = tokio::select! {
                _ = cancel.cancelled() => return,
                info = await_info(source.as_ref(), wait) => info,
            };
            let info = match info {
                Ok(info) => info,
                Err(e) => {
                    warn!(content = %id, error = %e, "No metadata, playback pass not started");
                    return;
                }
            };
            let Some(file_index) = info.largest_file() else {
                debug!(content = %id, "Content has no files");
                return;
            };

            scheduler.prime_playback(source.as_ref(), &info, file_index);
            let exit = scheduler
                .spawn_sliding_window(source, file_index, cancel)
                .await;
            if let Err(e) = exit {
                warn!(content = %id, error = %e, "Sliding window task failed");
            }
        });
    }

    async fn entry(&self, id: &str) -> crate::Result<(ContentId, Arc<ContentEntry>)> {
        let id = ContentId::parse(id)?;
        let entry = self.registry.get(&id).await?;
        Ok((id, entry))
    }

    /// # Errors
    ///
    /// - `ContentError::NotFound` - Unknown id
    pub async fn status(&self, id: &str) -> crate::Result<ContentStatus> {
        let (id, entry) = self.entry(id).await?;
        let source = entry.source();
        let requested_pieces = entry.requested_count();

        let Some(info) = source.info() else {
            return Ok(ContentStatus {
                info_hash: id.to_string(),
                state: "getting metadata",
                metadata_completed: false,
                name: None,
                length: None,
                files: None,
                bytes_completed: None,
                percent_completed: None,
                requested_pieces,
            });
        };

        let length = info.total_length();
        let bytes_completed = source.bytes_completed().min(length);
        let percent_completed = if length == 0 {
            100.0
        } else {
            bytes_completed as f64 / length as f64 * 100.0
        };
        let state = if bytes_completed >= length {
            "completed"
        } else {
            "downloading"
        };

        Ok(ContentStatus {
            info_hash: id.to_string(),
            state,
            metadata_completed: true,
            name: Some(info.name),
            length: Some(length),
            files: Some(info.files),
            bytes_completed: Some(bytes_completed),
            percent_completed: Some(percent_completed),
            requested_pieces,
        })
    }

    /// Estimated completion and throughput of one file.
    ///
    /// Missing metadata is answered with `ready: false`, not an error.
    ///
    /// # Errors
    ///
    /// - `ContentError::NotFound` - Unknown id
    /// - `ContentError::FileIndexOutOfRange` - No such file
    pub async fn file_progress(&self, id: &str, file_index: usize) -> crate::Result<ProgressReport> {
        let (id, entry) = self.entry(id).await?;
        let source = entry.source();
        let duration = entry.duration(file_index);

        let info = match await_info(source.as_ref(), self.config.server.metadata_timeout).await {
            Ok(info) => info,
            Err(ContentError::MetadataNotReady { .. }) => {
                return Ok(ProgressReport {
                    ready: false,
                    status: Some("metadata not yet available".to_string()),
                    detail: None,
                    duration,
                });
            }
            Err(e) => return Err(e.into()),
        };
        info.file(file_index)?;

        let Some(progress) = estimate_file_progress(source.as_ref(), &info, file_index) else {
            return Err(ContentError::FileIndexOutOfRange {
                index: file_index,
                file_count: info.files.len(),
            }
            .into());
        };
        let speed = self
            .progress
            .update(&id, file_index, progress.completed_bytes_estimated);

        Ok(ProgressReport {
            ready: progress.ready(),
            status: None,
            detail: Some(ProgressDetail {
                file_path: progress.path.clone(),
                completed_bytes_estimated: progress.completed_bytes_estimated,
                length_bytes: progress.length,
                percent_by_bytes_estimated: progress.percent_by_bytes,
                completed_pieces_in_file_range: progress.completed_pieces,
                total_pieces_in_file_range: progress.total_pieces,
                percent_by_pieces: progress.percent_by_pieces,
                download_speed_bytes_per_sec: speed,
            }),
            duration,
        })
    }

    /// Records the authoritative duration of a file in seconds.
    ///
    /// # Errors
    ///
    /// - `ContentError::NotFound` - Unknown id
    /// - `ContentError::InvalidParameter` - Non-positive or non-finite duration
    /// - `ContentError::FileIndexOutOfRange` - Metadata known and no such file
    pub async fn set_duration(&self, id: &str, file_index: usize, seconds: f64) -> crate::Result<()> {
        if !seconds.is_finite() || seconds <= 0.0 {
            return Err(ContentError::InvalidParameter {
                reason: format!("duration {seconds} must be positive"),
            }
            .into());
        }
        let (id, entry) = self.entry(id).await?;
        if let Some(info) = entry.source().info() {
            info.file(file_index)?;
        }
        entry.set_duration(file_index, seconds);
        info!(content = %id, file = file_index, seconds, "Duration recorded");
        Ok(())
    }

    /// Prioritizes a window at `percentage` of a file.
    ///
    /// # Errors
    ///
    /// - `ContentError::NotFound` - Unknown id
    /// - `ContentError::MetadataNotReady` - Metadata did not arrive in time
    /// - `ContentError::FileIndexOutOfRange` - No such file
    /// - `ContentError::InvalidParameter` - Percentage outside `[0, 100]`
    pub async fn prioritize(
        &self,
        id: &str,
        file_index: usize,
        percentage: f64,
    ) -> crate::Result<PrioritizeResponse> {
        let (_, entry) = self.entry(id).await?;
        let source = entry.source();
        let info = await_info(
            source.as_ref(),
            self.config.server.prioritize_metadata_timeout,
        )
        .await?;

        let outcome = self
            .scheduler
            .reprioritize(source.as_ref(), &info, file_index, percentage)?;
        if let SeekOutcome::Prioritized { start, end, .. } = outcome {
            entry.record_requested(start..=end);
        }
        Ok(outcome.into())
    }

    /// Serves `filename` from the shared playlist job of a file.
    ///
    /// # Errors
    ///
    /// - `ContentError::NotFound` / `FileIndexOutOfRange` - Unknown item or file
    /// - `ContentError::MetadataNotReady` - Metadata did not arrive in time
    /// - `TranscodeError::InvalidArtifactName` - Not a playlist or segment name
    /// - `TranscodeError::ArtifactNotReady` - Not produced within the wait budget
    /// - `TranscodeError::SpawnFailed` / `ProcessExited` - Transcoder failure
    pub async fn playlist_artifact(
        &self,
        id: &str,
        file_index: usize,
        filename: &str,
    ) -> crate::Result<Artifact> {
        let name = ArtifactName::parse(filename)?;
        let (id, entry) = self.entry(id).await?;
        let source = entry.source();
        let info = await_info(source.as_ref(), self.config.server.metadata_timeout).await?;
        info.file(file_index)?;

        let key = JobKey::new(id, file_index);
        let job = self.jobs.ensure_job(&key, source.as_ref()).await?;
        // Removed while the job was starting
        if entry.shutdown_token().is_cancelled() {
            self.jobs.stop(&key).await;
            return Err(ContentError::NotFound {
                id: key.content_id.to_string(),
            }
            .into());
        }
        let path = self.jobs.await_artifact(&job, &name).await?;

        let body = match name.kind() {
            ArtifactKind::Playlist => {
                let bytes = self
                    .jobs
                    .servable_playlist(&job, &path, entry.duration(file_index))
                    .await?;
                ArtifactBody::Memory(bytes)
            }
            ArtifactKind::Segment => {
                let file = tokio::fs::File::open(&path).await?;
                let length = file.metadata().await?.len();
                ArtifactBody::File { file, length }
            }
        };
        Ok(Artifact { name, body })
    }

    /// Serves `filename` from a transcode started `seconds` into the file.
    ///
    /// The offset maps to a byte position as `seconds / duration * length`,
    /// which is only an approximation for variable bitrate media. The job
    /// lives for this call only.
    ///
    /// # Errors
    ///
    /// Same as [`StreamService::playlist_artifact`], plus
    /// `ContentError::InvalidParameter` for a negative or non-finite offset.
    pub async fn seek_artifact(
        &self,
        id: &str,
        file_index: usize,
        seconds: f64,
        filename: &str,
    ) -> crate::Result<Artifact> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(ContentError::InvalidParameter {
                reason: format!("seek offset {seconds} must be a non-negative number"),
            }
            .into());
        }
        let name = ArtifactName::parse(filename)?;
        let (id, entry) = self.entry(id).await?;
        let source = entry.source();
        let info = await_info(source.as_ref(), self.config.server.metadata_timeout).await?;
        let file = info.file(file_index)?;
        let duration = entry.duration(file_index);

        if let Some(total) = duration {
            if seconds > total * self.config.transcode.seek_end_fraction {
                debug!(content = %id, seconds, total, "Seek past end, answering ended playlist");
                return Ok(Artifact {
                    name: ArtifactName::playlist(),
                    body: ArtifactBody::Memory(Bytes::from(ended_playlist(
                        self.config.transcode.segment_seconds,
                    ))),
                });
            }
            let seek_byte = (seconds / total * file.length as f64) as u64;
            self.scheduler
                .prioritize_from_byte(source.as_ref(), &info, file_index, seek_byte);
        }

        let key = JobKey::new(id, file_index);
        let job = self
            .jobs
            .start_seek_job(&key, seconds, source.as_ref())
            .await?;

        let served = self
            .read_seek_artifact(&job, &name, duration.map(|total| total - seconds))
            .await;
        job.teardown().await;
        served.map(|bytes| Artifact {
            name,
            body: ArtifactBody::Memory(bytes),
        })
    }

    async fn read_seek_artifact(
        &self,
        job: &crate::transcode::TranscodeJob,
        name: &ArtifactName,
        remaining: Option<f64>,
    ) -> crate::Result<Bytes> {
        let path = self.jobs.await_artifact(job, name).await?;
        match name.kind() {
            ArtifactKind::Playlist => Ok(self.jobs.servable_playlist(job, &path, remaining).await?),
            ArtifactKind::Segment => Ok(Bytes::from(tokio::fs::read(&path).await?)),
        }
    }

    /// Streams a byte range of a file without transcoding.
    ///
    /// # Errors
    ///
    /// - `ContentError::NotFound` / `FileIndexOutOfRange` - Unknown item or file
    /// - `ContentError::MetadataNotReady` - Metadata did not arrive in time
    /// - `StreamingError::MalformedRange` / `RangeNotSatisfiable` - Bad `Range`
    pub async fn direct_stream(
        &self,
        id: &str,
        file_index: usize,
        range: Option<&str>,
    ) -> crate::Result<DirectStream> {
        let (_, entry) = self.entry(id).await?;
        let source = entry.source();
        let info = await_info(source.as_ref(), self.config.server.metadata_timeout).await?;
        let file = info.file(file_index)?;
        let plan = RangePlan::resolve(range, file.length)?;

        if plan.start > 0 {
            self.scheduler
                .prioritize_from_byte(source.as_ref(), &info, file_index, plan.start);
        }

        let reader = source.file_reader(file_index).await?;
        Ok(DirectStream {
            plan,
            content_type: content_type_for(&file.path),
            body: range_stream(reader, plan),
        })
    }

    /// Unregisters a content item and releases everything attached to it.
    ///
    /// # Errors
    ///
    /// - `ContentError::NotFound` - Unknown id
    pub async fn remove(&self, id: &str) -> crate::Result<()> {
        let id = ContentId::parse(id)?;
        self.registry.remove(&id).await?;
        let stopped = self.jobs.stop_content(&id).await;
        self.progress.forget(&id);
        info!(content = %id, stopped_jobs = stopped, "Content removed");
        Ok(())
    }

    pub async fn content_ids(&self) -> Vec<ContentId> {
        self.registry.ids().await
    }

    /// Stops background work and tears down every job.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let supervisor = self.supervisor.lock().take();
        if let Some(supervisor) = supervisor
            && let Err(e) = supervisor.await
        {
            warn!(error = %e, "Transcode supervisor ended abnormally");
        }
        self.jobs.shutdown().await;
        self.registry.clear().await;
        info!("Stream service stopped");
    }
}
