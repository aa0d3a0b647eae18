use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use super::signature::app_secret_proof;
use crate::config::Config;

/// Field projection requested for every post fetch.
const POST_FIELDS: &str =
    "id,message,permalink_url,created_time,from{id,name},attachments{media_type,media,subattachments}";

/// Graph error codes that indicate a transient condition (unknown error,
/// service unavailable, application throttled, user throttled).
const TRANSIENT_GRAPH_CODES: [i64; 4] = [1, 2, 4, 17];

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostAuthor {
    pub id: String,
    pub name: Option<String>,
}

/// A post as read back from the Graph API (or synthesized from the inline
/// webhook payload when the fetch fails).
#[derive(Debug, Clone)]
pub struct FetchedPost {
    pub id: String,
    pub message: Option<String>,
    pub permalink: Option<String>,
    pub created_time: Option<DateTime<Utc>>,
    pub author: Option<PostAuthor>,
    pub image_url: Option<String>,
}

/// A failed fetch, tagged with whether another attempt could succeed.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct FetchError {
    pub message: String,
    pub retryable: bool,
}

impl FetchError {
    fn transport(err: &reqwest::Error) -> Self {
        Self {
            message: format!("graph transport error: {err}"),
            retryable: true,
        }
    }
}

pub struct GraphClient {
    config: Arc<Config>,
    http: reqwest::Client,
    base_url: String,
}

impl GraphClient {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("facebook-discord-relay")
            .timeout(FETCH_TIMEOUT)
            .build()
            .context("failed to construct Graph HTTP client")?;

        let base_url = format!("https://graph.facebook.com/{}", config.meta.graph_version);

        Ok(Self {
            config,
            http,
            base_url,
        })
    }

    /// Fetch a post and require it to belong to the configured page.
    pub async fn fetch_post(&self, post_id: &str) -> Result<FetchedPost, FetchError> {
        let proof = self.proof();
        let url = format!("{}/{}", self.base_url, post_id);

        let response = self
            .http
            .get(&url)
            .query(&[
                ("fields", POST_FIELDS),
                ("access_token", &self.config.meta.page_access_token),
                ("appsecret_proof", &proof),
            ])
            .send()
            .await
            .map_err(|e| FetchError::transport(&e))?;

        let status = response.status();
        let body: Value = response.json().await.map_err(|e| FetchError {
            message: format!("graph returned a non-JSON body: {e}"),
            retryable: true,
        })?;

        if !status.is_success() {
            return Err(classify_graph_error(status.as_u16(), &body));
        }

        let post = parse_post(&body);
        ensure_from_page(&post, &self.config.meta.page_id)?;
        Ok(post)
    }

    /// Startup probe: read the configured page back. The worker refuses to
    /// start when this fails so an expired token surfaces immediately.
    pub async fn verify_page_access(&self) -> Result<String> {
        let url = format!("{}/{}", self.base_url, self.config.meta.page_id);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("fields", "id,name"),
                ("access_token", &self.config.meta.page_access_token),
            ])
            .send()
            .await
            .context("page access probe failed to reach the Graph API")?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .context("page access probe returned a non-JSON body")?;

        if !status.is_success() {
            let message = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown Graph error");
            return Err(anyhow!("page access probe rejected ({status}): {message}"));
        }

        let id = body.get("id").and_then(Value::as_str).unwrap_or_default();
        if id != self.config.meta.page_id {
            return Err(anyhow!(
                "page access probe returned id {id}, expected {}",
                self.config.meta.page_id
            ));
        }

        let name = body
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("(unnamed page)")
            .to_string();
        info!(page_id = %id, page_name = %name, "verified page access");
        Ok(name)
    }

    /// Attach this app to the page's `feed` webhook field.
    pub async fn subscribe_app(&self) -> Result<()> {
        let url = format!(
            "{}/{}/subscribed_apps",
            self.base_url, self.config.meta.page_id
        );
        let response = self
            .http
            .post(&url)
            .query(&[
                ("subscribed_fields", "feed"),
                ("access_token", &self.config.meta.page_access_token),
                ("appsecret_proof", &self.proof()),
            ])
            .send()
            .await
            .context("subscribed_apps request failed to reach the Graph API")?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .context("subscribed_apps returned a non-JSON body")?;

        if !status.is_success() {
            let message = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown Graph error");
            return Err(anyhow!("subscribed_apps rejected ({status}): {message}"));
        }
        if !body.get("success").and_then(Value::as_bool).unwrap_or(false) {
            return Err(anyhow!("subscribed_apps did not report success: {body}"));
        }

        Ok(())
    }

    /// Read back the page's current app subscriptions.
    pub async fn list_subscriptions(&self) -> Result<Value> {
        let url = format!(
            "{}/{}/subscribed_apps",
            self.base_url, self.config.meta.page_id
        );
        let response = self
            .http
            .get(&url)
            .query(&[
                ("access_token", &self.config.meta.page_access_token),
                ("appsecret_proof", &self.proof()),
            ])
            .send()
            .await
            .context("subscribed_apps readback failed to reach the Graph API")?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .context("subscribed_apps readback returned a non-JSON body")?;

        if !status.is_success() {
            return Err(anyhow!("subscribed_apps readback rejected ({status}): {body}"));
        }

        Ok(body)
    }

    fn proof(&self) -> String {
        app_secret_proof(
            &self.config.meta.app_secret,
            &self.config.meta.page_access_token,
        )
    }
}

fn ensure_from_page(post: &FetchedPost, page_id: &str) -> Result<(), FetchError> {
    match post.author.as_ref() {
        Some(author) if author.id == page_id => Ok(()),
        _ => Err(FetchError {
            message: "post not from configured page".to_string(),
            retryable: false,
        }),
    }
}

fn classify_graph_error(status: u16, body: &Value) -> FetchError {
    let code = body.pointer("/error/code").and_then(Value::as_i64);
    let message = body
        .pointer("/error/message")
        .and_then(Value::as_str)
        .unwrap_or("unknown Graph error");

    let retryable = code.is_some_and(|c| TRANSIENT_GRAPH_CODES.contains(&c)) || status >= 500;

    FetchError {
        message: format!("graph error {status}: {message}"),
        retryable,
    }
}

fn parse_post(body: &Value) -> FetchedPost {
    let author = body.pointer("/from/id").and_then(Value::as_str).map(|id| {
        PostAuthor {
            id: id.to_string(),
            name: body
                .pointer("/from/name")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned),
        }
    });

    FetchedPost {
        id: body
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        message: body
            .get("message")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
        permalink: body
            .get("permalink_url")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
        created_time: body
            .get("created_time")
            .and_then(Value::as_str)
            .and_then(parse_created_time),
        author,
        image_url: first_image_url(body),
    }
}

/// Graph emits `2026-07-01T12:34:56+0000`; accept RFC 3339 too.
fn parse_created_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn first_image_url(body: &Value) -> Option<String> {
    let direct = body
        .pointer("/attachments/data/0/media/image/src")
        .and_then(Value::as_str);
    let nested = body
        .pointer("/attachments/data/0/subattachments/data/0/media/image/src")
        .and_then(Value::as_str);
    direct.or(nested).map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn transient_graph_codes_are_retryable() {
        for code in TRANSIENT_GRAPH_CODES {
            let body = json!({ "error": { "code": code, "message": "try later" } });
            assert!(classify_graph_error(400, &body).retryable, "code {code}");
        }
    }

    #[test]
    fn server_errors_are_retryable() {
        let body = json!({ "error": { "code": 100, "message": "boom" } });
        assert!(classify_graph_error(500, &body).retryable);
        assert!(classify_graph_error(503, &body).retryable);
    }

    #[test]
    fn other_client_errors_are_not_retryable() {
        let body = json!({ "error": { "code": 100, "message": "Unsupported get request" } });
        let err = classify_graph_error(400, &body);
        assert!(!err.retryable);
        assert!(err.message.contains("Unsupported get request"));
    }

    #[test]
    fn author_mismatch_is_a_terminal_failure() {
        let post = parse_post(&json!({
            "id": "123_456",
            "from": { "id": "999", "name": "Imposter" },
        }));
        let err = ensure_from_page(&post, "123").unwrap_err();
        assert!(!err.retryable);
        assert!(err.message.contains("not from configured page"));
    }

    #[test]
    fn missing_author_is_a_terminal_failure() {
        let post = parse_post(&json!({ "id": "123_456" }));
        assert!(ensure_from_page(&post, "123").is_err());
    }

    #[test]
    fn matching_author_passes() {
        let post = parse_post(&json!({
            "id": "123_456",
            "from": { "id": "123", "name": "The Page" },
        }));
        assert!(ensure_from_page(&post, "123").is_ok());
    }

    #[test]
    fn parses_a_full_post() {
        let post = parse_post(&json!({
            "id": "123_456",
            "message": "Buy AAPL #discord",
            "permalink_url": "https://www.facebook.com/123/posts/456",
            "created_time": "2026-07-01T12:34:56+0000",
            "from": { "id": "123", "name": "The Page" },
            "attachments": {
                "data": [{
                    "media_type": "photo",
                    "media": { "image": { "src": "https://scontent.example/p.jpg" } }
                }]
            }
        }));

        assert_eq!(post.id, "123_456");
        assert_eq!(post.message.as_deref(), Some("Buy AAPL #discord"));
        assert_eq!(
            post.permalink.as_deref(),
            Some("https://www.facebook.com/123/posts/456")
        );
        assert!(post.created_time.is_some());
        assert_eq!(post.author.as_ref().map(|a| a.id.as_str()), Some("123"));
        assert_eq!(
            post.image_url.as_deref(),
            Some("https://scontent.example/p.jpg")
        );
    }

    #[test]
    fn falls_back_to_subattachment_images() {
        let post = parse_post(&json!({
            "id": "1_2",
            "attachments": {
                "data": [{
                    "subattachments": {
                        "data": [{ "media": { "image": { "src": "https://img.example/a.jpg" } } }]
                    }
                }]
            }
        }));
        assert_eq!(post.image_url.as_deref(), Some("https://img.example/a.jpg"));
    }

    #[test]
    fn created_time_accepts_graph_and_rfc3339_formats() {
        assert!(parse_created_time("2026-07-01T12:34:56+0000").is_some());
        assert!(parse_created_time("2026-07-01T12:34:56+00:00").is_some());
        assert!(parse_created_time("yesterday").is_none());
    }
}
