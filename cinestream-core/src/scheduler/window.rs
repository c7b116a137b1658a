//! Pure window computations over piece indices.
//!
//! Nothing here touches a content source; completion state is passed in as a
//! predicate so the same rules drive the background pass, on-demand seeks and
//! the tests.

use std::ops::RangeInclusive;

use crate::content::{ContentFile, ContentInfo, FilePieceRange};

/// Outcome of one sliding-window step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowDecision {
    /// Every piece of the file is complete
    Complete,
    /// `cursor` is the lowest incomplete piece; `now` lists the incomplete
    /// pieces in `[cursor, window_end]`
    Advance {
        cursor: u32,
        window_end: u32,
        now: Vec<u32>,
    },
}

/// Computes the pieces to request immediately for a file.
///
/// Indices outside `[0, total_pieces)` are skipped.
pub fn advance_window(
    range: FilePieceRange,
    total_pieces: u32,
    is_complete: impl Fn(u32) -> bool,
    window_size: u32,
) -> WindowDecision {
    let in_bounds = |index: &u32| *index < total_pieces;

    let Some(cursor) = range
        .iter()
        .filter(in_bounds)
        .find(|index| !is_complete(*index))
    else {
        return WindowDecision::Complete;
    };

    let window_end = cursor.saturating_add(window_size).min(range.last);
    let now = (cursor..=window_end)
        .filter(in_bounds)
        .filter(|index| !is_complete(*index))
        .collect();

    WindowDecision::Advance {
        cursor,
        window_end,
        now,
    }
}

/// Where a seek lands inside a file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekTarget {
    /// Byte offset relative to the start of the file
    pub file_byte: u64,
    /// Absolute piece index holding that byte
    pub piece: u32,
}

impl SeekTarget {
    pub fn at_fraction(info: &ContentInfo, file: &ContentFile, fraction: f64) -> Self {
        let fraction = fraction.clamp(0.0, 1.0);
        let file_byte = ((file.length as f64) * fraction) as u64;
        Self::at_byte(info, file, file_byte)
    }

    pub fn at_byte(info: &ContentInfo, file: &ContentFile, file_byte: u64) -> Self {
        let file_byte = file_byte.min(file.length.saturating_sub(1));
        Self {
            file_byte,
            piece: info.piece_at(file.offset + file_byte),
        }
    }
}

/// Pieces `[target, target + window_size]` clipped to the file's last piece.
pub fn seek_window(range: FilePieceRange, target: u32, window_size: u32) -> RangeInclusive<u32> {
    let start = target.clamp(range.first, range.last);
    let end = start.saturating_add(window_size).min(range.last);
    start..=end
}

/// Pieces covering the first and the last `bytes` of a file.
///
/// Container indexes sit at either end of media files, so both are fetched
/// before sequential playback starts. The tail never starts before the head.
pub fn head_and_tail(
    info: &ContentInfo,
    file: &ContentFile,
    bytes: u64,
) -> Option<(RangeInclusive<u32>, RangeInclusive<u32>)> {
    let range = info.piece_range(file)?;
    let span = bytes.clamp(1, file.length);

    let head_end = info.piece_at(file.offset + span - 1).min(range.last);
    let tail_start = info
        .piece_at(file.offset + file.length - span)
        .max(range.first);

    Some((range.first..=head_end, tail_start..=range.last))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn single_file(length: u64, piece_length: u64) -> ContentInfo {
        ContentInfo::from_files("movie", piece_length, &[("movie.mkv".to_string(), length)])
    }

    #[test]
    fn test_cursor_is_first_incomplete_piece() {
        let range = FilePieceRange { first: 0, last: 9 };
        let complete = [0, 1, 2, 4];

        let decision = advance_window(range, 10, |i| complete.contains(&i), 3);

        assert_eq!(
            decision,
            WindowDecision::Advance {
                cursor: 3,
                window_end: 6,
                now: vec![3, 5, 6],
            }
        );
    }

    #[test]
    fn test_window_clipped_to_file_end() {
        let range = FilePieceRange { first: 2, last: 5 };
        let decision = advance_window(range, 10, |_| false, 50);

        assert_eq!(
            decision,
            WindowDecision::Advance {
                cursor: 2,
                window_end: 5,
                now: vec![2, 3, 4, 5],
            }
        );
    }

    #[test]
    fn test_complete_file_signals_completion() {
        let range = FilePieceRange { first: 0, last: 4 };
        assert_eq!(
            advance_window(range, 5, |_| true, 50),
            WindowDecision::Complete
        );
    }

    #[test]
    fn test_out_of_bounds_indices_skipped() {
        // Range claims more pieces than the content has
        let range = FilePieceRange { first: 0, last: 20 };
        let WindowDecision::Advance { now, .. } = advance_window(range, 4, |i| i == 0, 50) else {
            panic!("expected an advancing window");
        };
        assert_eq!(now, vec![1, 2, 3]);
    }

    #[test]
    fn test_seek_target_maps_fraction_to_piece() {
        let info = single_file(100, 10);
        let target = SeekTarget::at_fraction(&info, &info.files[0], 0.5);
        assert_eq!(target.file_byte, 50);
        assert_eq!(target.piece, 5);

        let end = SeekTarget::at_fraction(&info, &info.files[0], 1.0);
        assert_eq!(end.file_byte, 99);
        assert_eq!(end.piece, 9);
    }

    #[test]
    fn test_seek_window_bounds() {
        let range = FilePieceRange { first: 0, last: 9 };
        assert_eq!(seek_window(range, 5, 20), 5..=9);
        assert_eq!(seek_window(range, 0, 3), 0..=3);

        let offset_range = FilePieceRange { first: 4, last: 30 };
        assert_eq!(seek_window(offset_range, 1, 5), 4..=9);
    }

    #[test]
    fn test_head_and_tail_ranges() {
        let info = single_file(100, 10);
        let (head, tail) = head_and_tail(&info, &info.files[0], 15).unwrap();
        assert_eq!(head, 0..=1);
        assert_eq!(tail, 8..=9);
    }

    #[test]
    fn test_tail_never_precedes_head_for_small_files() {
        let info = single_file(30, 10);
        let (head, tail) = head_and_tail(&info, &info.files[0], 1024 * 1024).unwrap();
        assert_eq!(head, 0..=2);
        assert_eq!(tail, 0..=2);
    }

    #[test]
    fn test_head_and_tail_skip_empty_file() {
        let info = ContentInfo::from_files(
            "pack",
            10,
            &[("empty.nfo".to_string(), 0), ("movie.mkv".to_string(), 50)],
        );
        assert!(head_and_tail(&info, &info.files[0], 10).is_none());
    }

    proptest! {
        #[test]
        fn prop_window_is_subset_of_range_and_incomplete(
            first in 0u32..50,
            span in 0u32..200,
            total in 1u32..300,
            window in 0u32..80,
            complete in proptest::collection::vec(any::<bool>(), 300),
        ) {
            let range = FilePieceRange { first, last: first + span };
            let is_complete = |i: u32| complete[i as usize % complete.len()];

            if let WindowDecision::Advance { cursor, window_end, now } =
                advance_window(range, total, is_complete, window)
            {
                prop_assert!(range.contains(cursor));
                prop_assert!(window_end <= range.last);
                for index in now {
                    prop_assert!(range.contains(index));
                    prop_assert!(index < total);
                    prop_assert!(!is_complete(index));
                }
            }
        }

        #[test]
        fn prop_cursor_never_moves_backwards(
            span in 1u32..120,
            order in proptest::collection::vec(0u32..120, 0..240),
        ) {
            let range = FilePieceRange { first: 0, last: span - 1 };
            let mut complete = vec![false; span as usize];
            let mut last_cursor = 0;

            for index in order {
                if index < span {
                    complete[index as usize] = true;
                }
                match advance_window(range, span, |i| complete[i as usize], 50) {
                    WindowDecision::Advance { cursor, .. } => {
                        prop_assert!(cursor >= last_cursor);
                        last_cursor = cursor;
                    }
                    WindowDecision::Complete => break,
                }
            }
        }
    }
}
