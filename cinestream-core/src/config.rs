//! Centralized configuration for Cinestream.
//!
//! Every interval, window and timeout used by the scheduler, the transcode
//! job manager and the request surface lives here.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Central configuration for all Cinestream components.
#[derive(Debug, Clone, Default)]
pub struct CinestreamConfig {
    pub scheduler: SchedulerConfig,
    pub transcode: TranscodeConfig,
    pub server: ServerConfig,
}

/// Piece prioritization policy.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Pieces past the cursor marked `now` on every sliding-window tick
    pub window_size: u32,
    /// Pieces marked `now` after an explicit seek
    pub seek_window_size: u32,
    /// Pieces marked `now` ahead of an ephemeral seek transcode
    pub seek_job_window_size: u32,
    /// Sliding-window polling interval
    pub poll_interval: Duration,
    /// Wall-clock cap on one sliding-window pass
    pub max_runtime: Duration,
    /// Seek percentages above this are ignored
    pub seek_ignore_percent: f64,
    /// Bytes at the head and tail of a file primed at playback start
    pub head_tail_bytes: u64,
    /// Sliding-window ticks between progress log lines
    pub progress_log_every: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            window_size: 50,
            seek_window_size: 20,
            seek_job_window_size: 10,
            poll_interval: Duration::from_secs(1),
            max_runtime: Duration::from_secs(3 * 60 * 60),
            seek_ignore_percent: 99.5,
            head_tail_bytes: 1024 * 1024, // 1 MiB
            progress_log_every: 12,
        }
    }
}

impl SchedulerConfig {
    /// Iteration cap derived from the runtime budget and the tick interval.
    pub fn max_iterations(&self) -> u64 {
        let interval = self.poll_interval.as_millis().max(1);
        (self.max_runtime.as_millis() / interval) as u64
    }
}

/// External transcoder and job lifecycle configuration.
#[derive(Debug, Clone)]
pub struct TranscodeConfig {
    /// Transcoder executable
    pub ffmpeg_path: PathBuf,
    /// Parent directory for per-job scratch directories
    pub scratch_root: PathBuf,
    /// Jobs without access for this long are torn down
    pub idle_timeout: Duration,
    /// Supervisor polling interval
    pub supervisor_interval: Duration,
    /// Sleep between artifact existence checks
    pub artifact_poll_interval: Duration,
    /// Artifact existence checks before reporting not-ready
    pub artifact_poll_attempts: u32,
    /// Sleep between segment readiness checks
    pub segment_poll_interval: Duration,
    /// Readiness checks per referenced segment
    pub segment_poll_attempts: u32,
    /// Target segment length in seconds
    pub segment_seconds: u32,
    /// Audio bitrate passed to the transcoder
    pub audio_bitrate: &'static str,
    /// Seek offsets beyond this fraction of the duration answer an ended playlist
    pub seek_end_fraction: f64,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            scratch_root: std::env::temp_dir(),
            idle_timeout: Duration::from_secs(120),
            supervisor_interval: Duration::from_secs(30),
            artifact_poll_interval: Duration::from_millis(100),
            artifact_poll_attempts: 60,
            segment_poll_interval: Duration::from_millis(100),
            segment_poll_attempts: 20,
            segment_seconds: 4,
            audio_bitrate: "192k",
            seek_end_fraction: 0.995,
        }
    }
}

/// Request surface configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address
    pub bind_address: SocketAddr,
    /// Metadata wait for status, progress and artifact requests
    pub metadata_timeout: Duration,
    /// Metadata wait for prioritize requests
    pub prioritize_metadata_timeout: Duration,
    /// Metadata wait of the background task started by an add
    pub background_metadata_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 5050)),
            metadata_timeout: Duration::from_secs(5),
            prioritize_metadata_timeout: Duration::from_secs(3),
            background_metadata_timeout: Duration::from_secs(60),
        }
    }
}

/// `ffmpeg_bin/ffmpeg` next to the running executable.
///
/// Falls back to a bare `ffmpeg` resolved through `PATH` when the executable
/// location cannot be determined.
pub fn default_ffmpeg_path() -> PathBuf {
    let binary = if cfg!(windows) { "ffmpeg.exe" } else { "ffmpeg" };
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("ffmpeg_bin").join(binary)))
        .unwrap_or_else(|| PathBuf::from(binary))
}

impl CinestreamConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Supported variables: `CINESTREAM_BIND`, `CINESTREAM_FFMPEG`,
    /// `CINESTREAM_SCRATCH_DIR`, `CINESTREAM_WINDOW_SIZE`,
    /// `CINESTREAM_IDLE_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(bind) = std::env::var("CINESTREAM_BIND")
            && let Ok(address) = bind.parse::<SocketAddr>()
        {
            config.server.bind_address = address;
        }

        if let Ok(path) = std::env::var("CINESTREAM_FFMPEG") {
            config.transcode.ffmpeg_path = PathBuf::from(path);
        }

        if let Ok(dir) = std::env::var("CINESTREAM_SCRATCH_DIR") {
            config.transcode.scratch_root = PathBuf::from(dir);
        }

        if let Ok(size) = std::env::var("CINESTREAM_WINDOW_SIZE")
            && let Ok(pieces) = size.parse::<u32>()
        {
            config.scheduler.window_size = pieces;
        }

        if let Ok(timeout) = std::env::var("CINESTREAM_IDLE_TIMEOUT_SECS")
            && let Ok(seconds) = timeout.parse::<u64>()
        {
            config.transcode.idle_timeout = Duration::from_secs(seconds);
        }

        config
    }

    /// Creates a configuration with short intervals for tests.
    pub fn for_testing() -> Self {
        Self {
            scheduler: SchedulerConfig {
                poll_interval: Duration::from_millis(20),
                max_runtime: Duration::from_secs(30),
                ..Default::default()
            },
            transcode: TranscodeConfig {
                idle_timeout: Duration::from_millis(300),
                supervisor_interval: Duration::from_millis(50),
                artifact_poll_interval: Duration::from_millis(20),
                artifact_poll_attempts: 100,
                segment_poll_interval: Duration::from_millis(20),
                ..Default::default()
            },
            server: ServerConfig {
                bind_address: SocketAddr::from(([127, 0, 0, 1], 0)),
                metadata_timeout: Duration::from_millis(200),
                prioritize_metadata_timeout: Duration::from_millis(200),
                background_metadata_timeout: Duration::from_secs(5),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = CinestreamConfig::default();

        assert_eq!(config.scheduler.window_size, 50);
        assert_eq!(config.scheduler.seek_window_size, 20);
        assert_eq!(config.scheduler.poll_interval, Duration::from_secs(1));
        assert_eq!(config.scheduler.head_tail_bytes, 1_048_576);
        assert_eq!(config.transcode.idle_timeout, Duration::from_secs(120));
        assert_eq!(config.transcode.supervisor_interval, Duration::from_secs(30));
        assert_eq!(config.transcode.artifact_poll_attempts, 60);
        assert_eq!(config.server.bind_address.port(), 5050);
    }

    #[test]
    fn test_iteration_cap_covers_three_hours() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_iterations(), 3 * 60 * 60);
    }

    #[test]
    fn test_ffmpeg_path_is_beside_executable() {
        let path = default_ffmpeg_path();
        let parent = path.parent().and_then(|dir| dir.file_name());
        assert_eq!(parent.and_then(|name| name.to_str()), Some("ffmpeg_bin"));
    }

    #[test]
    fn test_testing_preset_is_fast() {
        let config = CinestreamConfig::for_testing();
        assert!(config.scheduler.poll_interval < Duration::from_secs(1));
        assert!(config.transcode.idle_timeout < config.transcode.supervisor_interval * 10);
        assert_eq!(config.server.bind_address.port(), 0);
    }
}
