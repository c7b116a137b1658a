//! Background sliding-window pass for one file.

use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::PieceScheduler;
use super::window::{WindowDecision, advance_window};
use crate::content::{ContentSource, PiecePriority};

/// Why a sliding-window pass stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowExit {
    /// The content item was removed from the service
    Cancelled,
    /// The content source was closed
    Closed,
    /// Every piece of the file is complete
    FileComplete,
    /// The whole content item is downloaded
    ContentComplete,
    /// The pass hit its iteration cap
    RuntimeExceeded,
    /// No metadata, unknown file, or nothing to schedule
    Inapplicable,
}

pub(super) async fn run(
    scheduler: PieceScheduler,
    source: Arc<dyn ContentSource>,
    file_index: usize,
    cancel: CancellationToken,
) -> WindowExit {
    let config = scheduler.config().clone();
    let Some(info) = source.info() else {
        return WindowExit::Inapplicable;
    };
    let Ok(file) = info.file(file_index) else {
        return WindowExit::Inapplicable;
    };
    let Some(range) = info.piece_range(file) else {
        return WindowExit::Inapplicable;
    };
    let total_length = info.total_length();

    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut previous: Option<(u32, u32)> = None;
    let max_iterations = config.max_iterations();

    for iteration in 0..max_iterations {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return WindowExit::Cancelled,
            _ = source.closed() => return WindowExit::Closed,
            _ = ticker.tick() => {}
        }

        if total_length > 0 && source.bytes_completed() >= total_length {
            return WindowExit::ContentComplete;
        }

        let decision = advance_window(
            range,
            info.num_pieces,
            |index| source.piece_complete(index),
            config.window_size,
        );

        let WindowDecision::Advance {
            cursor,
            window_end,
            now,
        } = decision
        else {
            return WindowExit::FileComplete;
        };

        if let Some((previous_start, previous_end)) = previous
            && previous_start < cursor
        {
            let behind = previous_start..cursor.min(previous_end.saturating_add(1));
            scheduler.apply(source.as_ref(), behind, PiecePriority::Normal);
        }

        let requested = now.len();
        scheduler.apply(source.as_ref(), now, PiecePriority::Now);
        previous = Some((cursor, window_end));

        if config.progress_log_every > 0 && iteration % config.progress_log_every == 0 {
            let completed = range
                .iter()
                .filter(|index| source.piece_complete(*index))
                .count();
            info!(
                content = %source.id(),
                file = file_index,
                cursor,
                window_end,
                requested,
                completed,
                total = range.piece_count(),
                "Sliding window progress"
            );
        } else {
            debug!(content = %source.id(), cursor, window_end, requested, "Sliding window tick");
        }
    }

    WindowExit::RuntimeExceeded
}
