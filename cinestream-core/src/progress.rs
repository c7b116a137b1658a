//! Per-file completion estimates and throughput.

use std::collections::HashMap;
use std::time::Instant;

use crate::content::{ContentId, ContentInfo, ContentSource};

/// Completion of one file estimated from its piece range.
#[derive(Debug, Clone, PartialEq)]
pub struct FileProgress {
    pub path: String,
    pub length: u64,
    pub completed_pieces: u32,
    pub total_pieces: u32,
    pub completed_bytes_estimated: u64,
    pub percent_by_bytes: f64,
    pub percent_by_pieces: f64,
}

impl FileProgress {
    /// Playback can start once any byte of the file is believed present.
    pub fn ready(&self) -> bool {
        self.completed_bytes_estimated > 0 || self.length == 0
    }
}

/// Counts complete pieces in the file's range and scales them to bytes.
///
/// Pieces shared with neighbouring files count in full, so the byte figure is
/// an estimate. It never exceeds the file length.
pub fn estimate_file_progress(
    source: &dyn ContentSource,
    info: &ContentInfo,
    file_index: usize,
) -> Option<FileProgress> {
    let file = info.files.get(file_index)?;

    let (completed_pieces, total_pieces) = match info.piece_range(file) {
        Some(range) => {
            let completed = range
                .iter()
                .filter(|index| source.piece_complete(*index))
                .count() as u32;
            (completed, range.piece_count())
        }
        None => (0, 0),
    };

    let completed_bytes_estimated = if total_pieces == 0 {
        0
    } else {
        (u64::from(completed_pieces) * file.length / u64::from(total_pieces)).min(file.length)
    };

    let percent_by_bytes = if file.length == 0 {
        100.0
    } else {
        completed_bytes_estimated as f64 / file.length as f64 * 100.0
    };
    let percent_by_pieces = if total_pieces == 0 {
        100.0
    } else {
        f64::from(completed_pieces) / f64::from(total_pieces) * 100.0
    };

    Some(FileProgress {
        path: file.path.clone(),
        length: file.length,
        completed_pieces,
        total_pieces,
        completed_bytes_estimated,
        percent_by_bytes,
        percent_by_pieces,
    })
}

#[derive(Debug, Clone, Copy)]
struct ProgressSample {
    bytes: u64,
    at: Instant,
}

/// Last observation per `(content, file)`, kept to derive a speed delta.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    samples: parking_lot::Mutex<HashMap<(ContentId, usize), ProgressSample>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an observation and returns bytes per second since the last one.
    pub fn update(&self, id: &ContentId, file_index: usize, bytes: u64) -> f64 {
        self.update_at(id, file_index, bytes, Instant::now())
    }

    /// As [`update`](Self::update) with an explicit timestamp.
    ///
    /// The first observation of a key, a non-positive byte delta and a
    /// non-positive time delta all report zero.
    pub fn update_at(&self, id: &ContentId, file_index: usize, bytes: u64, at: Instant) -> f64 {
        let sample = ProgressSample { bytes, at };
        let previous = self
            .samples
            .lock()
            .insert((id.clone(), file_index), sample);

        let Some(previous) = previous else {
            return 0.0;
        };

        let elapsed = at.saturating_duration_since(previous.at).as_secs_f64();
        if elapsed <= 0.0 || bytes <= previous.bytes {
            return 0.0;
        }
        (bytes - previous.bytes) as f64 / elapsed
    }

    /// Drops every sample of a removed content item.
    pub fn forget(&self, id: &ContentId) {
        self.samples.lock().retain(|(content, _), _| content != id);
    }

    pub fn tracked(&self) -> usize {
        self.samples.lock().len()
    }
}
