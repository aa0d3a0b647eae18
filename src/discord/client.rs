use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};
use tracing::{debug, info};

use super::embed::DiscordEmbed;
use super::router::ChannelRouter;
use super::sanitize::{TagMatcher, sanitize_message};
use crate::config::Config;
use crate::facebook::FetchedPost;

/// Hard deadline on a dispatch; expiry means the bytes may or may not have
/// arrived, so the result is ambiguous rather than retryable.
pub const SINK_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_RETRY_AFTER_MS: u64 = 5000;

const EMBED_COLOR: u32 = 0x1877F2;

const EMBED_FOOTER: &str = "Relayed from Facebook";

/// Outcome of one webhook dispatch.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    Success {
        message_id: Option<String>,
    },
    Retryable {
        error: String,
        retry_after_ms: Option<u64>,
    },
    NonRetryable {
        error: String,
    },
    /// Our deadline fired after the request left; delivery state unknown.
    Ambiguous {
        error: String,
    },
}

pub struct DiscordClient {
    config: Arc<Config>,
    http: reqwest::Client,
    router: ChannelRouter,
    matcher: TagMatcher,
}

impl DiscordClient {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        // The dispatch deadline is driven explicitly below so expiry can be
        // told apart from other transport failures.
        let http = reqwest::Client::builder()
            .user_agent("facebook-discord-relay")
            .build()
            .context("failed to construct Discord HTTP client")?;

        let router = ChannelRouter::new(
            &config.discord.channel_routes,
            &config.discord.channel_priority,
        );
        let matcher = TagMatcher::new(&config.relay.trigger_tag);

        Ok(Self {
            config,
            http,
            router,
            matcher,
        })
    }

    pub fn matcher(&self) -> &TagMatcher {
        &self.matcher
    }

    /// Send a post to its routed webhook and classify the result.
    pub async fn send(&self, post: &FetchedPost) -> DispatchOutcome {
        let message = post.message.as_deref().unwrap_or("");
        let url = self.target_url(message);
        let payload = self.build_payload(post);

        debug!(fb_post_id = %post.id, "dispatching post to Discord webhook");

        let request = self.http.post(&url).json(&payload).send();
        let response = match tokio::time::timeout(SINK_TIMEOUT, request).await {
            Err(_) => {
                return DispatchOutcome::Ambiguous {
                    error: format!(
                        "no response within {}s; delivery state unknown",
                        SINK_TIMEOUT.as_secs()
                    ),
                };
            }
            Ok(Err(err)) => {
                return DispatchOutcome::Retryable {
                    error: format!("discord transport error: {err}"),
                    retry_after_ms: None,
                };
            }
            Ok(Ok(response)) => response,
        };

        let status = response.status();

        if status.is_success() {
            let message_id = if self.config.discord.wait {
                response
                    .json::<Value>()
                    .await
                    .ok()
                    .and_then(|body| body.get("id").and_then(Value::as_str).map(ToOwned::to_owned))
            } else {
                None
            };
            return DispatchOutcome::Success { message_id };
        }

        if status.as_u16() == 429 {
            let retry_after_ms = retry_after_ms(
                response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok()),
            );
            return DispatchOutcome::Retryable {
                error: format!("discord rate limited (429), retry after {retry_after_ms}ms"),
                retry_after_ms: Some(retry_after_ms),
            };
        }

        let body = response.text().await.unwrap_or_default();
        let error = format!("discord returned {status}: {}", snippet(&body));

        if status.is_server_error() {
            DispatchOutcome::Retryable {
                error,
                retry_after_ms: None,
            }
        } else {
            DispatchOutcome::NonRetryable { error }
        }
    }

    /// Startup probe: Discord answers GET on a webhook URL with the webhook
    /// object, which proves the URL is live without posting anything.
    pub async fn verify_webhook(&self) -> Result<()> {
        let response = self
            .http
            .get(&self.config.discord.webhook_url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .context("webhook probe failed to reach Discord")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("webhook probe rejected with {status}"));
        }

        info!("verified Discord webhook");
        Ok(())
    }

    fn target_url(&self, message: &str) -> String {
        let base = self
            .router
            .route(message)
            .unwrap_or(&self.config.discord.webhook_url);
        if self.config.discord.wait {
            append_wait(base)
        } else {
            base.to_string()
        }
    }

    fn build_payload(&self, post: &FetchedPost) -> Value {
        let body = sanitize_message(post.message.as_deref().unwrap_or(""), &self.matcher);

        let mut lines = Vec::new();
        if !body.is_empty() {
            lines.push(body);
        }
        if !self.config.discord.disclaimer.is_empty() {
            lines.push(String::new());
            lines.push(self.config.discord.disclaimer.clone());
        }
        if let Some(role_id) = &self.config.discord.mention_role_id {
            lines.push(format!("<@&{role_id}>"));
        }
        let content = lines.join("\n");

        let mut embed = DiscordEmbed::new()
            .title(
                post.author
                    .as_ref()
                    .and_then(|a| a.name.clone())
                    .unwrap_or_else(|| "Facebook post".to_string()),
            )
            .color(EMBED_COLOR)
            .footer_text(EMBED_FOOTER);
        if let Some(permalink) = &post.permalink {
            embed = embed.url(permalink.clone());
        }
        if let Some(created) = &post.created_time {
            embed = embed.timestamp(created.to_rfc3339());
        }
        if let Some(image) = &post.image_url {
            embed = embed.image(image.clone());
        }

        // parse stays empty so @everyone/@here in post text never expands;
        // only the configured role may ping.
        let roles: Vec<String> = self
            .config
            .discord
            .mention_role_id
            .iter()
            .cloned()
            .collect();

        json!({
            "content": content,
            "embeds": [embed.to_json()],
            "allowed_mentions": { "parse": [], "roles": roles },
        })
    }
}

fn append_wait(url: &str) -> String {
    if url.contains('?') {
        format!("{url}&wait=true")
    } else {
        format!("{url}?wait=true")
    }
}

/// `Retry-After` arrives in seconds; convert to milliseconds with a 5 s
/// default when the header is absent or unreadable.
fn retry_after_ms(header: Option<&str>) -> u64 {
    header
        .and_then(|value| value.trim().parse::<f64>().ok())
        .map(|secs| (secs * 1000.0) as u64)
        .unwrap_or(DEFAULT_RETRY_AFTER_MS)
}

fn snippet(body: &str) -> &str {
    let end = body
        .char_indices()
        .nth(200)
        .map(|(idx, _)| idx)
        .unwrap_or(body.len());
    &body[..end]
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::config::{
        Config, DatabaseConfig, DiscordConfig, LoggingConfig, MetaConfig, RelayConfig, ServerConfig,
    };
    use crate::facebook::PostAuthor;

    fn test_config(mention_role_id: Option<&str>, disclaimer: &str) -> Arc<Config> {
        Arc::new(Config {
            server: ServerConfig {
                port: 3000,
                bind_address: "0.0.0.0".to_string(),
                webhook_path_prefix: "meta".to_string(),
            },
            meta: MetaConfig {
                verify_token: "verify".to_string(),
                app_secret: "secret".to_string(),
                graph_version: "v19.0".to_string(),
                page_id: "123".to_string(),
                page_access_token: "token".to_string(),
            },
            discord: DiscordConfig {
                webhook_url: "https://discord.com/api/webhooks/1/abc".to_string(),
                wait: true,
                disclaimer: disclaimer.to_string(),
                mention_role_id: mention_role_id.map(ToOwned::to_owned),
                channel_routes: HashMap::from([(
                    "#stocks".to_string(),
                    "https://discord.com/api/webhooks/2/stocks".to_string(),
                )]),
                channel_priority: vec!["#stocks".to_string()],
            },
            relay: RelayConfig {
                alerts_enabled: true,
                trigger_tag: "#discord".to_string(),
                max_post_age_minutes: 0,
                worker_batch_size: 5,
            },
            database: DatabaseConfig {
                url: "postgres://localhost/relay".to_string(),
                max_connections: None,
                min_connections: None,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        })
    }

    fn sample_post() -> FetchedPost {
        FetchedPost {
            id: "123_456".to_string(),
            message: Some("Buy AAPL #discord".to_string()),
            permalink: Some("https://www.facebook.com/123/posts/456".to_string()),
            created_time: Some(Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap()),
            author: Some(PostAuthor {
                id: "123".to_string(),
                name: Some("The Page".to_string()),
            }),
            image_url: Some("https://scontent.example/p.jpg".to_string()),
        }
    }

    #[test]
    fn payload_orders_body_disclaimer_and_mention() {
        let client = DiscordClient::new(test_config(Some("42"), "Not financial advice")).unwrap();
        let payload = client.build_payload(&sample_post());

        assert_eq!(
            payload["content"],
            "Buy AAPL\n\nNot financial advice\n<@&42>"
        );
    }

    #[test]
    fn payload_pins_mentions_to_the_configured_role() {
        let client = DiscordClient::new(test_config(Some("42"), "")).unwrap();
        let payload = client.build_payload(&sample_post());

        assert_eq!(payload["allowed_mentions"]["parse"], json!([]));
        assert_eq!(payload["allowed_mentions"]["roles"], json!(["42"]));
    }

    #[test]
    fn payload_without_role_allows_no_mentions() {
        let client = DiscordClient::new(test_config(None, "")).unwrap();
        let payload = client.build_payload(&sample_post());

        assert_eq!(payload["content"], "Buy AAPL");
        assert_eq!(payload["allowed_mentions"]["parse"], json!([]));
        assert_eq!(payload["allowed_mentions"]["roles"], json!([]));
    }

    #[test]
    fn payload_embed_carries_permalink_timestamp_and_image() {
        let client = DiscordClient::new(test_config(None, "")).unwrap();
        let payload = client.build_payload(&sample_post());

        let embed = &payload["embeds"][0];
        assert_eq!(embed["title"], "The Page");
        assert_eq!(embed["url"], "https://www.facebook.com/123/posts/456");
        assert_eq!(embed["image"]["url"], "https://scontent.example/p.jpg");
        assert!(
            embed["timestamp"]
                .as_str()
                .unwrap()
                .starts_with("2026-07-01T12:00:00")
        );
    }

    #[test]
    fn routed_messages_go_to_the_matching_webhook() {
        let client = DiscordClient::new(test_config(None, "")).unwrap();
        assert_eq!(
            client.target_url("big #stocks move #discord"),
            "https://discord.com/api/webhooks/2/stocks?wait=true"
        );
        assert_eq!(
            client.target_url("just #discord"),
            "https://discord.com/api/webhooks/1/abc?wait=true"
        );
    }

    #[test]
    fn append_wait_respects_existing_query_strings() {
        assert_eq!(
            append_wait("https://hook.example/a"),
            "https://hook.example/a?wait=true"
        );
        assert_eq!(
            append_wait("https://hook.example/a?thread_id=9"),
            "https://hook.example/a?thread_id=9&wait=true"
        );
    }

    #[test]
    fn retry_after_parses_seconds_to_milliseconds() {
        assert_eq!(retry_after_ms(Some("5")), 5000);
        assert_eq!(retry_after_ms(Some("0.5")), 500);
        assert_eq!(retry_after_ms(Some("garbage")), DEFAULT_RETRY_AFTER_MS);
        assert_eq!(retry_after_ms(None), DEFAULT_RETRY_AFTER_MS);
    }
}
