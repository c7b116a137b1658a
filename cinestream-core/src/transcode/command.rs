//! Transcoder argument template.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use super::PLAYLIST_NAME;
use crate::config::TranscodeConfig;

/// Where a job writes and from which offset it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodePlan {
    pub output_dir: PathBuf,
    pub seek_seconds: Option<f64>,
    pub segment_seconds: u32,
    pub audio_bitrate: String,
}

impl TranscodePlan {
    pub fn new(output_dir: &Path, seek_seconds: Option<f64>, config: &TranscodeConfig) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            seek_seconds,
            segment_seconds: config.segment_seconds,
            audio_bitrate: config.audio_bitrate.to_string(),
        }
    }

    pub fn playlist_path(&self) -> PathBuf {
        self.output_dir.join(PLAYLIST_NAME)
    }

    /// `segment%03d.ts` pattern handed to the transcoder.
    pub fn segment_pattern(&self) -> PathBuf {
        self.output_dir.join("segment%03d.ts")
    }

    /// Arguments for an HLS run reading the source file from stdin.
    ///
    /// Video is copied, audio re-encoded to stereo AAC. The playlist keeps
    /// every segment so players can seek backwards.
    pub fn arguments(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-hide_banner", "-loglevel", "error"]
            .into_iter()
            .map(OsString::from)
            .collect();

        if let Some(seconds) = self.seek_seconds {
            args.push("-ss".into());
            args.push(format!("{seconds:.3}").into());
        }

        for arg in ["-i", "pipe:0", "-c:v", "copy", "-c:a", "aac", "-b:a"] {
            args.push(arg.into());
        }
        args.push(self.audio_bitrate.clone().into());
        for arg in ["-ac", "2", "-f", "hls", "-hls_time"] {
            args.push(arg.into());
        }
        args.push(self.segment_seconds.to_string().into());
        for arg in [
            "-hls_list_size",
            "0",
            "-hls_flags",
            "independent_segments",
            "-hls_segment_filename",
        ] {
            args.push(arg.into());
        }
        args.push(self.segment_pattern().into_os_string());
        args.push(self.playlist_path().into_os_string());
        args
    }
}
