//! Piece prioritization policy.
//!
//! The scheduler never downloads anything. It decides which piece indices
//! should be fetched first and passes that decision to the content source as
//! priority hints:
//! - a sliding window from the first incomplete piece of the playing file,
//! - a fixed window at a seek target,
//! - the head and tail of a file when playback starts.

mod sliding;
pub mod window;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use sliding::WindowExit;
pub use window::{SeekTarget, WindowDecision, advance_window, head_and_tail, seek_window};

use crate::config::SchedulerConfig;
use crate::content::{ContentError, ContentInfo, ContentSource, PiecePriority};

/// Counts of priority hints that were accepted and rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: usize,
    pub failed: usize,
}

/// Result of a seek prioritization request.
#[derive(Debug, Clone, PartialEq)]
pub enum SeekOutcome {
    /// The file is empty
    NothingToPrioritize,
    /// The seek lands in the trailing fraction of the file
    Ignored {
        seek_piece: u32,
        percentage: f64,
    },
    Prioritized {
        seek_byte: u64,
        seek_piece: u32,
        start: u32,
        end: u32,
    },
}

/// Pieces primed when playback of a file starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimeReport {
    pub head: std::ops::RangeInclusive<u32>,
    pub tail: std::ops::RangeInclusive<u32>,
}

#[derive(Debug, Clone)]
pub struct PieceScheduler {
    config: SchedulerConfig,
}

impl PieceScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Sets `priority` on every piece, continuing past failures.
    pub fn apply(
        &self,
        source: &dyn ContentSource,
        pieces: impl IntoIterator<Item = u32>,
        priority: PiecePriority,
    ) -> ApplyReport {
        let mut report = ApplyReport::default();
        for index in pieces {
            match source.set_piece_priority(index, priority) {
                Ok(()) => report.applied += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(content = %source.id(), piece = index, error = %e, "Failed to set piece priority");
                }
            }
        }
        report
    }

    /// Marks a window at `percentage` (0 to 100) of a file as `now`.
    ///
    /// # Errors
    ///
    /// - `ContentError::FileIndexOutOfRange` - No such file
    /// - `ContentError::InvalidParameter` - Percentage outside `[0, 100]`
    pub fn reprioritize(
        &self,
        source: &dyn ContentSource,
        info: &ContentInfo,
        file_index: usize,
        percentage: f64,
    ) -> Result<SeekOutcome, ContentError> {
        if !percentage.is_finite() || !(0.0..=100.0).contains(&percentage) {
            return Err(ContentError::InvalidParameter {
                reason: format!("percentage {percentage} outside 0..=100"),
            });
        }

        let file = info.file(file_index)?;
        let Some(range) = info.piece_range(file) else {
            return Ok(SeekOutcome::NothingToPrioritize);
        };

        let target = SeekTarget::at_fraction(info, file, percentage / 100.0);
        if percentage > self.config.seek_ignore_percent {
            debug!(content = %source.id(), percentage, "Ignoring seek near end of file");
            return Ok(SeekOutcome::Ignored {
                seek_piece: target.piece,
                percentage,
            });
        }

        let window = seek_window(range, target.piece, self.config.seek_window_size);
        let (start, end) = (*window.start(), *window.end());
        let report = self.apply(source, window, PiecePriority::Now);
        info!(
            content = %source.id(),
            file = file_index,
            percentage,
            start,
            end,
            failed = report.failed,
            "Prioritized seek window"
        );

        Ok(SeekOutcome::Prioritized {
            seek_byte: target.file_byte,
            seek_piece: target.piece,
            start,
            end,
        })
    }

    /// Marks `seek_job_window_size` pieces from `file_byte` as `now`.
    ///
    /// Returns the window, or `None` for an empty file or unknown index.
    pub fn prioritize_from_byte(
        &self,
        source: &dyn ContentSource,
        info: &ContentInfo,
        file_index: usize,
        file_byte: u64,
    ) -> Option<(u32, u32)> {
        let file = info.file(file_index).ok()?;
        let range = info.piece_range(file)?;
        let target = SeekTarget::at_byte(info, file, file_byte);
        let span = self.config.seek_job_window_size.max(1) - 1;
        let window = seek_window(range, target.piece, span);
        let bounds = (*window.start(), *window.end());
        self.apply(source, window, PiecePriority::Now);
        Some(bounds)
    }

    /// Primes the head and tail of a file and resets the pieces between them.
    pub fn prime_playback(
        &self,
        source: &dyn ContentSource,
        info: &ContentInfo,
        file_index: usize,
    ) -> Option<PrimeReport> {
        let file = info.file(file_index).ok()?;
        let (head, tail) = head_and_tail(info, file, self.config.head_tail_bytes)?;

        self.apply(source, head.clone(), PiecePriority::Now);
        let middle = head.end().saturating_add(1)..*tail.start();
        self.apply(source, middle, PiecePriority::Normal);
        self.apply(source, tail.clone(), PiecePriority::Now);

        info!(
            content = %source.id(),
            file = %file.path,
            head = ?head,
            tail = ?tail,
            "Primed playback pieces"
        );
        Some(PrimeReport { head, tail })
    }

    /// Starts the background sliding-window pass for one file.
    ///
    /// The pass ends when `cancel` fires, the source closes, the file or the
    /// content completes, or the iteration cap is reached.
    pub fn spawn_sliding_window(
        &self,
        source: Arc<dyn ContentSource>,
        file_index: usize,
        cancel: CancellationToken,
    ) -> JoinHandle<WindowExit> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let id = source.id().clone();
            let exit = sliding::run(scheduler, source, file_index, cancel).await;
            info!(content = %id, file = file_index, exit = ?exit, "Sliding window pass finished");
            exit
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ContentId;
    use crate::testing::MockContentSource;

    fn ten_pieces() -> (MockContentSource, ContentInfo) {
        let info = ContentInfo::from_files("movie", 10, &[("movie.mkv".to_string(), 100)]);
        let source = MockContentSource::with_info(ContentId::parse("ABCD").unwrap(), info.clone());
        (source, info)
    }

    #[test]
    fn test_reprioritize_midpoint() {
        let (source, info) = ten_pieces();
        let scheduler = PieceScheduler::new(SchedulerConfig::default());

        let outcome = scheduler.reprioritize(&source, &info, 0, 50.0).unwrap();

        assert_eq!(
            outcome,
            SeekOutcome::Prioritized {
                seek_byte: 50,
                seek_piece: 5,
                start: 5,
                end: 9,
            }
        );
        assert_eq!(source.pieces_with_priority(PiecePriority::Now), vec![5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_reprioritize_ignores_trailing_seek() {
        let (source, info) = ten_pieces();
        let scheduler = PieceScheduler::new(SchedulerConfig::default());

        let outcome = scheduler.reprioritize(&source, &info, 0, 99.7).unwrap();

        assert!(matches!(outcome, SeekOutcome::Ignored { seek_piece: 9, .. }));
        assert!(source.priority_calls().is_empty());
    }

    #[test]
    fn test_reprioritize_validation() {
        let (source, info) = ten_pieces();
        let scheduler = PieceScheduler::new(SchedulerConfig::default());

        assert!(matches!(
            scheduler.reprioritize(&source, &info, 3, 10.0),
            Err(ContentError::FileIndexOutOfRange { .. })
        ));
        assert!(matches!(
            scheduler.reprioritize(&source, &info, 0, 140.0),
            Err(ContentError::InvalidParameter { .. })
        ));
        assert!(matches!(
            scheduler.reprioritize(&source, &info, 0, f64::NAN),
            Err(ContentError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_reprioritize_empty_file() {
        let info = ContentInfo::from_files(
            "pack",
            10,
            &[("empty.nfo".to_string(), 0), ("movie.mkv".to_string(), 100)],
        );
        let source = MockContentSource::with_info(ContentId::parse("ABCD").unwrap(), info.clone());
        let scheduler = PieceScheduler::new(SchedulerConfig::default());

        assert_eq!(
            scheduler.reprioritize(&source, &info, 0, 50.0).unwrap(),
            SeekOutcome::NothingToPrioritize
        );
    }

    #[test]
    fn test_prime_playback_sets_head_tail_and_middle() {
        let (source, info) = ten_pieces();
        let scheduler = PieceScheduler::new(SchedulerConfig {
            head_tail_bytes: 20,
            ..Default::default()
        });

        let report = scheduler.prime_playback(&source, &info, 0).unwrap();

        assert_eq!(report.head, 0..=1);
        assert_eq!(report.tail, 8..=9);
        assert_eq!(source.pieces_with_priority(PiecePriority::Now), vec![0, 1, 8, 9]);
        let middle_resets = source
            .priority_calls()
            .into_iter()
            .filter(|(_, p)| *p == PiecePriority::Normal)
            .count();
        assert_eq!(middle_resets, 6);
    }

    #[test]
    fn test_apply_reports_failures_and_continues() {
        let (source, _) = ten_pieces();
        source.fail_priority_on(2);
        let scheduler = PieceScheduler::new(SchedulerConfig::default());

        let report = scheduler.apply(&source, 0..5, PiecePriority::Now);

        assert_eq!(report, ApplyReport { applied: 4, failed: 1 });
        assert_eq!(source.priority(3), Some(PiecePriority::Now));
    }

    #[test]
    fn test_prioritize_from_byte_uses_job_window() {
        let (source, info) = ten_pieces();
        let scheduler = PieceScheduler::new(SchedulerConfig {
            seek_job_window_size: 2,
            ..Default::default()
        });

        assert_eq!(scheduler.prioritize_from_byte(&source, &info, 0, 31), Some((3, 4)));
        assert_eq!(source.pieces_with_priority(PiecePriority::Now), vec![3, 4]);
        assert_eq!(scheduler.prioritize_from_byte(&source, &info, 4, 31), None);
    }
}
