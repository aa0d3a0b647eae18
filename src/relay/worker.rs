use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::ingest::ProcessPostJob;
use crate::config::Config;
use crate::db::{
    DeliveryLogStore, NewDeliveryLog, PostStatus, PostStore, TransitionFields, TransitionOutcome,
};
use crate::discord::{DiscordClient, DispatchOutcome};
use crate::facebook::GraphClient;
use crate::queue::{JobDisposition, JobHandler, QueuedJob};

/// Drives each claimed post through fetch, filter, dispatch, and the
/// status transitions of the post state machine.
pub struct RelayWorker {
    posts: Arc<dyn PostStore>,
    delivery_logs: Arc<dyn DeliveryLogStore>,
    graph: Arc<GraphClient>,
    discord: Arc<DiscordClient>,
    config: Arc<Config>,
}

impl RelayWorker {
    pub fn new(
        posts: Arc<dyn PostStore>,
        delivery_logs: Arc<dyn DeliveryLogStore>,
        graph: Arc<GraphClient>,
        discord: Arc<DiscordClient>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            posts,
            delivery_logs,
            graph,
            discord,
            config,
        }
    }

    /// Refuse to consume jobs until both external credentials have been
    /// proven usable; an expired token should fail the deploy, not spin the
    /// retry loop.
    pub async fn preflight(&self) -> Result<()> {
        self.graph
            .verify_page_access()
            .await
            .context("Facebook page access check failed")?;
        self.discord
            .verify_webhook()
            .await
            .context("Discord webhook check failed")?;
        Ok(())
    }

    async fn process(&self, job: ProcessPostJob) -> Result<JobDisposition> {
        let correlation_id = job.correlation_id;
        let fb_post_id = job.fb_post_id.as_str();

        // Re-deliveries of already-settled posts complete without work.
        let Some(post) = self.posts.get_by_fb_id(fb_post_id).await? else {
            warn!(%correlation_id, fb_post_id, "job references a post row that does not exist");
            return Ok(JobDisposition::Completed);
        };
        if post.status.is_terminal() {
            info!(
                %correlation_id,
                fb_post_id,
                status = post.status.as_str(),
                "post already settled, nothing to do"
            );
            return Ok(JobDisposition::Completed);
        }

        // Kill switch: suppression, not deferral. The job completes and the
        // post stays in `received` for an operator to re-queue if wanted.
        if !self.config.relay.alerts_enabled {
            info!(%correlation_id, fb_post_id, "alerts disabled, suppressing post");
            return Ok(JobDisposition::Completed);
        }

        if let Some(retry) = self
            .advance(fb_post_id, PostStatus::Fetching, correlation_id)
            .await?
        {
            return Ok(retry);
        }

        let fetched = match self.graph.fetch_post(fb_post_id).await {
            Ok(fetched) => fetched,
            Err(err) => {
                let inline = job
                    .webhook_data
                    .clone()
                    .filter(|data| data.message.is_some());
                match inline {
                    Some(data) => {
                        warn!(
                            %correlation_id,
                            fb_post_id,
                            "graph fetch failed ({err}); using inline webhook payload"
                        );
                        data.into_fetched(fb_post_id)
                    }
                    None if err.retryable => {
                        self.posts.mark_for_retry(fb_post_id, &err.message).await?;
                        return Ok(JobDisposition::Retry { error: err.message });
                    }
                    None => {
                        self.settle(
                            fb_post_id,
                            PostStatus::Failed,
                            TransitionFields::with_error(&err.message),
                            json!({ "correlation_id": correlation_id, "error": err.message }),
                        )
                        .await?;
                        return Ok(JobDisposition::Completed);
                    }
                }
            }
        };

        // Data-only write; status is untouched and no event is recorded.
        self.posts
            .update_fetched_fields(fb_post_id, &fetched)
            .await?;

        if is_too_old(
            fetched.created_time,
            self.config.relay.max_post_age_minutes,
            Utc::now(),
        ) {
            self.settle(
                fb_post_id,
                PostStatus::Ignored,
                TransitionFields::none(),
                json!({ "correlation_id": correlation_id, "reason": "Post too old" }),
            )
            .await?;
            return Ok(JobDisposition::Completed);
        }

        let message = fetched.message.as_deref().unwrap_or("");
        if !self.discord.matcher().matches(message) {
            self.settle(
                fb_post_id,
                PostStatus::Ignored,
                TransitionFields::none(),
                json!({ "correlation_id": correlation_id, "reason": "No trigger tag" }),
            )
            .await?;
            return Ok(JobDisposition::Completed);
        }

        if let Some(retry) = self
            .advance(fb_post_id, PostStatus::Eligible, correlation_id)
            .await?
        {
            return Ok(retry);
        }
        if let Some(retry) = self
            .advance(fb_post_id, PostStatus::Sending, correlation_id)
            .await?
        {
            return Ok(retry);
        }

        let started = Instant::now();
        let outcome = self.discord.send(&fetched).await;
        let latency_ms = started.elapsed().as_millis() as i32;

        self.record_delivery(fb_post_id, &outcome, latency_ms).await;

        match outcome {
            DispatchOutcome::Success { message_id } => {
                let message_id = message_id.unwrap_or_else(|| "unknown".to_string());
                self.settle(
                    fb_post_id,
                    PostStatus::Delivered,
                    TransitionFields {
                        discord_msg_id: Some(message_id.clone()),
                        delivered_at: Some(Utc::now()),
                        last_error: None,
                    },
                    json!({
                        "correlation_id": correlation_id,
                        "discord_msg_id": message_id,
                        "latency_ms": latency_ms,
                    }),
                )
                .await?;
                info!(%correlation_id, fb_post_id, latency_ms, "post delivered");
                Ok(JobDisposition::Completed)
            }
            DispatchOutcome::Ambiguous { error } => {
                // Never retried: the message may already be out, and a
                // second send would duplicate it. An operator resolves it.
                warn!(%correlation_id, fb_post_id, "ambiguous dispatch: {error}");
                self.settle(
                    fb_post_id,
                    PostStatus::NeedsReview,
                    TransitionFields::with_error(&error),
                    json!({ "correlation_id": correlation_id, "error": error }),
                )
                .await?;
                Ok(JobDisposition::Completed)
            }
            DispatchOutcome::Retryable {
                error,
                retry_after_ms,
            } => {
                if let Some(ms) = retry_after_ms {
                    // The queue's own backoff is authoritative.
                    info!(%correlation_id, fb_post_id, retry_after_ms = ms, "sink asked to retry later");
                }
                self.posts.mark_for_retry(fb_post_id, &error).await?;
                Ok(JobDisposition::Retry { error })
            }
            DispatchOutcome::NonRetryable { error } => {
                self.settle(
                    fb_post_id,
                    PostStatus::Failed,
                    TransitionFields::with_error(&error),
                    json!({ "correlation_id": correlation_id, "error": error }),
                )
                .await?;
                Ok(JobDisposition::Completed)
            }
        }
    }

    /// Pre-dispatch transition. A rejection here is safe to retry: nothing
    /// has been sent yet, so the job is handed back to the queue.
    async fn advance(
        &self,
        fb_post_id: &str,
        target: PostStatus,
        correlation_id: Uuid,
    ) -> Result<Option<JobDisposition>> {
        let outcome = self
            .posts
            .transition(
                fb_post_id,
                target,
                TransitionFields::none(),
                json!({ "correlation_id": correlation_id }),
            )
            .await?;

        match outcome {
            TransitionOutcome::Applied(_) => Ok(None),
            TransitionOutcome::Rejected { current } => Ok(Some(JobDisposition::Retry {
                error: format!(
                    "post {fb_post_id} in state {} refused transition to {}",
                    current.as_str(),
                    target.as_str()
                ),
            })),
        }
    }

    /// Post-dispatch (or terminal) transition. A rejection means the row
    /// diverged underneath us; retrying could duplicate a delivery, so the
    /// job completes and the divergence is logged for the operator.
    async fn settle(
        &self,
        fb_post_id: &str,
        target: PostStatus,
        fields: TransitionFields,
        details: serde_json::Value,
    ) -> Result<()> {
        let outcome = self
            .posts
            .transition(fb_post_id, target, fields, details)
            .await?;
        if let TransitionOutcome::Rejected { current } = outcome {
            error!(
                fb_post_id,
                current = current.as_str(),
                target = target.as_str(),
                "post row diverged; transition dropped"
            );
        }
        Ok(())
    }

    async fn record_delivery(
        &self,
        fb_post_id: &str,
        outcome: &DispatchOutcome,
        latency_ms: i32,
    ) {
        let (success, discord_msg_id, error_message) = match outcome {
            DispatchOutcome::Success { message_id } => (true, message_id.clone(), None),
            DispatchOutcome::Retryable { error, .. }
            | DispatchOutcome::NonRetryable { error }
            | DispatchOutcome::Ambiguous { error } => (false, None, Some(error.clone())),
        };

        let log = NewDeliveryLog {
            fb_post_id: fb_post_id.to_string(),
            success,
            discord_msg_id,
            error_message,
            latency_ms,
        };

        // Best effort: a lost log line must not block (or worse, repeat)
        // the delivery itself.
        if let Err(err) = self.delivery_logs.record(log).await {
            error!(fb_post_id, "failed to record delivery log: {err}");
        }
    }
}

#[async_trait]
impl JobHandler for RelayWorker {
    async fn handle(&self, job: &QueuedJob) -> Result<JobDisposition> {
        let payload: ProcessPostJob = serde_json::from_value(job.payload.clone())
            .context("malformed process-post payload")?;
        self.process(payload).await
    }
}

/// Post-fetch age gate. Zero disables the gate entirely; with a horizon
/// set, a post with no creation time cannot prove freshness and is too old.
fn is_too_old(created_time: Option<DateTime<Utc>>, max_age_minutes: i64, now: DateTime<Utc>) -> bool {
    if max_age_minutes <= 0 {
        return false;
    }
    match created_time {
        None => true,
        Some(created) => (now - created).num_minutes() > max_age_minutes,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;

    #[test]
    fn zero_horizon_disables_the_age_gate() {
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap();
        assert!(!is_too_old(None, 0, now));
        assert!(!is_too_old(Some(now - Duration::days(365)), 0, now));
    }

    #[test]
    fn stale_posts_are_too_old() {
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap();
        assert!(is_too_old(Some(now - Duration::minutes(61)), 60, now));
        assert!(!is_too_old(Some(now - Duration::minutes(59)), 60, now));
    }

    #[test]
    fn unknown_age_counts_as_too_old_when_gating() {
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap();
        assert!(is_too_old(None, 60, now));
    }
}
