// Follows the statistics of a run and logs its totals once it is over.

use async_channel::Receiver;
use s3mpu_rs::PipelineStats;
use s3mpu_rs::types::MultipartStatistics;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Spawn a task reading statistics events until the channel is closed.
///
/// The channel drops events while it is full, so events only feed the
/// debug log; totals come from [`PipelineStats`]. Returns the number of
/// events read.
pub fn spawn_stats_reader(stats_receiver: Receiver<MultipartStatistics>) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut events = 0;

        while let Ok(stats) = stats_receiver.recv().await {
            match stats {
                MultipartStatistics::AbortComplete { key, upload_id } => {
                    debug!(key = %key, upload_id = %upload_id, "abort completed.");
                }
                MultipartStatistics::AbortError { key, upload_id } => {
                    warn!(key = %key, upload_id = %upload_id, "abort failed.");
                }
                _ => {}
            }
            events += 1;
        }

        events
    })
}

/// Log the totals of a finished run.
pub fn log_summary(stats: &PipelineStats, dry_run: bool, duration_sec: &str) {
    info!(
        pages = stats.pages_fetched,
        items = stats.items_listed,
        aborted = stats.uploads_aborted,
        abort_errors = stats.aborts_failed,
        dry_run,
        duration_sec = duration_sec,
        "{}",
        summary_message(dry_run)
    );
}

fn summary_message(dry_run: bool) -> &'static str {
    if dry_run {
        "[dry-run] run summary."
    } else {
        "run summary."
    }
}
