use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::db::PostStore;
use crate::queue::PostgresJobQueue;

const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Terminal queue jobs are deleted after this many days.
const JOB_ARCHIVE_DAYS: i64 = 7;

/// Terminal posts (with their events and delivery logs) are pruned after
/// this many days.
const POST_RETENTION_DAYS: i64 = 30;

/// Hourly housekeeping: archive finished jobs and prune settled posts.
pub async fn run_sweeper(
    queue: Arc<PostgresJobQueue>,
    posts: Arc<dyn PostStore>,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match queue.archive_finished(JOB_ARCHIVE_DAYS).await {
            Ok(0) => {}
            Ok(removed) => info!(removed, "archived finished queue jobs"),
            Err(err) => error!("job archive sweep failed: {err}"),
        }

        match posts.prune_terminal(POST_RETENTION_DAYS).await {
            Ok(0) => {}
            Ok(removed) => info!(removed, "pruned settled posts"),
            Err(err) => error!("post pruning sweep failed: {err}"),
        }
    }

    info!("maintenance sweeper stopped");
}
