use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{JobDisposition, JobHandler, PostgresJobQueue};

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub queue: String,
    pub batch_size: i64,
    pub poll_interval: Duration,
}

impl ConsumerConfig {
    pub fn for_queue(queue: impl Into<String>, batch_size: i64) -> Self {
        Self {
            queue: queue.into(),
            batch_size,
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Long-running queue consumer.
///
/// Claims a batch, processes it sequentially, and maps each handler result
/// onto the queue: `Completed` finishes the job, `Retry` (or an unexpected
/// handler error) reschedules it with backoff until retries are exhausted.
/// On shutdown it finishes the current batch and claims no more.
pub struct QueueConsumer {
    store: Arc<PostgresJobQueue>,
    handler: Arc<dyn JobHandler>,
    config: ConsumerConfig,
}

impl QueueConsumer {
    pub fn new(
        store: Arc<PostgresJobQueue>,
        handler: Arc<dyn JobHandler>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            store,
            handler,
            config,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        info!(queue = %self.config.queue, "queue consumer started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let jobs = match self
                .store
                .claim(&self.config.queue, self.config.batch_size)
                .await
            {
                Ok(jobs) => jobs,
                Err(err) => {
                    error!(queue = %self.config.queue, "failed to claim jobs: {err}");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                    continue;
                }
            };

            if jobs.is_empty() {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
                continue;
            }

            debug!(queue = %self.config.queue, count = jobs.len(), "claimed job batch");

            // Finish every job already claimed even if shutdown fires
            // mid-batch; new claims stop at the top of the loop.
            for job in jobs {
                let disposition = match self.handler.handle(&job).await {
                    Ok(disposition) => disposition,
                    Err(err) => JobDisposition::Retry {
                        error: format!("handler error: {err:#}"),
                    },
                };

                let result = match disposition {
                    JobDisposition::Completed => self.store.complete(job.id).await,
                    JobDisposition::Retry { error } => {
                        debug!(job_id = job.id, %error, "job requested retry");
                        self.store.fail(job.id, &error).await
                    }
                };

                if let Err(err) = result {
                    error!(job_id = job.id, "failed to record job outcome: {err}");
                }
            }
        }

        info!(queue = %self.config.queue, "queue consumer stopped");
    }
}
