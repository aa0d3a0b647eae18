use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::db::DatabaseManager;
use crate::facebook::{FetchedPost, PostAuthor};
use crate::queue::DEFAULT_MAX_RETRIES;

pub const PROCESS_POST_QUEUE: &str = "process-post";

/// Payload of a `process-post` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessPostJob {
    pub fb_post_id: String,
    pub correlation_id: Uuid,
    #[serde(default)]
    pub webhook_data: Option<WebhookPostData>,
}

/// Inline post content carried by the webhook change. Reduced fidelity
/// compared to a Graph fetch (no permalink, no attachments); used only as a
/// fallback when the fetch fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPostData {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub from: Option<WebhookAuthor>,
    #[serde(default)]
    pub created_time: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookAuthor {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl WebhookPostData {
    /// Synthesize the shape the pipeline expects from the inline payload.
    pub fn into_fetched(self, fb_post_id: &str) -> FetchedPost {
        FetchedPost {
            id: fb_post_id.to_string(),
            message: self.message,
            permalink: None,
            created_time: self.created_time.and_then(epoch_to_datetime),
            author: self.from.map(|author| PostAuthor {
                id: author.id,
                name: author.name,
            }),
            image_url: None,
        }
    }
}

fn epoch_to_datetime(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

/// Turns verified webhook deliveries into post rows and queue jobs.
pub struct RelayIngest {
    db: Arc<DatabaseManager>,
    config: Arc<Config>,
}

impl RelayIngest {
    pub fn new(db: Arc<DatabaseManager>, config: Arc<Config>) -> Self {
        Self { db, config }
    }

    /// Walk every `entry[].changes[]` of a verified event. Per-change
    /// failures are logged and absorbed so one bad entry never poisons the
    /// rest of the delivery (the response is 200 either way).
    pub async fn process_event(&self, payload: &Value, correlation_id: Uuid) -> usize {
        let Some(entries) = payload.get("entry").and_then(Value::as_array) else {
            debug!(%correlation_id, "webhook event carried no entries");
            return 0;
        };

        let mut enqueued = 0;
        for entry in entries {
            let Some(changes) = entry.get("changes").and_then(Value::as_array) else {
                continue;
            };
            for change in changes {
                if change.get("field").and_then(Value::as_str) != Some("feed") {
                    continue;
                }
                let Some(value) = change.get("value") else {
                    continue;
                };
                match self.process_change(value, correlation_id).await {
                    Ok(true) => enqueued += 1,
                    Ok(false) => {}
                    Err(err) => {
                        error!(%correlation_id, "failed to process webhook change: {err:#}");
                    }
                }
            }
        }
        enqueued
    }

    async fn process_change(&self, value: &Value, correlation_id: Uuid) -> Result<bool> {
        if value.get("verb").and_then(Value::as_str) != Some("add") {
            return Ok(false);
        }
        let Some(fb_post_id) = value.get("post_id").and_then(Value::as_str) else {
            return Ok(false);
        };

        // Ingress age gate: an optimization only. A missing created_time
        // never skips here; the post-fetch gate is authoritative.
        let max_age = self.config.relay.max_post_age_minutes;
        if max_age > 0
            && let Some(created) = value.get("created_time").and_then(Value::as_i64)
            && Utc::now().timestamp() - created > max_age * 60
        {
            info!(%correlation_id, fb_post_id, "skipping stale post at ingress");
            return Ok(false);
        }

        let job = ProcessPostJob {
            fb_post_id: fb_post_id.to_string(),
            correlation_id,
            webhook_data: Some(WebhookPostData {
                message: value
                    .get("message")
                    .and_then(Value::as_str)
                    .map(ToOwned::to_owned),
                from: value.get("from").and_then(|from| {
                    Some(WebhookAuthor {
                        id: from.get("id").and_then(Value::as_str)?.to_string(),
                        name: from
                            .get("name")
                            .and_then(Value::as_str)
                            .map(ToOwned::to_owned),
                    })
                }),
                created_time: value.get("created_time").and_then(Value::as_i64),
            }),
        };

        // The upsert, the audit event, and the conditional enqueue commit
        // together; a crash mid-admission leaves nothing behind and the
        // upstream retry starts over.
        let outcome = self
            .db
            .ingest_post(
                fb_post_id,
                json!({
                    "correlation_id": correlation_id,
                    "item": value.get("item"),
                }),
                PROCESS_POST_QUEUE,
                serde_json::to_value(&job).context("failed to serialize job payload")?,
                DEFAULT_MAX_RETRIES,
            )
            .await
            .context("post admission failed")?;

        if outcome.job_enqueued {
            info!(%correlation_id, fb_post_id, "enqueued new post for processing");
        } else if !outcome.post_created {
            debug!(%correlation_id, fb_post_id, "duplicate webhook for known post");
        }

        Ok(outcome.job_enqueued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_payload_round_trips() {
        let job = ProcessPostJob {
            fb_post_id: "123_456".to_string(),
            correlation_id: Uuid::new_v4(),
            webhook_data: Some(WebhookPostData {
                message: Some("Buy AAPL #discord".to_string()),
                from: Some(WebhookAuthor {
                    id: "123".to_string(),
                    name: Some("The Page".to_string()),
                }),
                created_time: Some(1_790_000_000),
            }),
        };

        let value = serde_json::to_value(&job).unwrap();
        let parsed: ProcessPostJob = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.fb_post_id, job.fb_post_id);
        assert_eq!(parsed.correlation_id, job.correlation_id);
        assert_eq!(
            parsed.webhook_data.unwrap().message.as_deref(),
            Some("Buy AAPL #discord")
        );
    }

    #[test]
    fn job_payload_tolerates_missing_webhook_data() {
        let parsed: ProcessPostJob = serde_json::from_value(json!({
            "fb_post_id": "123_456",
            "correlation_id": Uuid::new_v4(),
        }))
        .unwrap();
        assert!(parsed.webhook_data.is_none());
    }

    #[test]
    fn inline_payload_synthesizes_a_reduced_post() {
        let data = WebhookPostData {
            message: Some("hello #discord".to_string()),
            from: Some(WebhookAuthor {
                id: "123".to_string(),
                name: None,
            }),
            created_time: Some(1_790_000_000),
        };

        let fetched = data.into_fetched("123_456");
        assert_eq!(fetched.id, "123_456");
        assert_eq!(fetched.message.as_deref(), Some("hello #discord"));
        assert!(fetched.permalink.is_none());
        assert!(fetched.image_url.is_none());
        assert_eq!(fetched.author.as_ref().map(|a| a.id.as_str()), Some("123"));
        assert!(fetched.created_time.is_some());
    }
}
