use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle of an observed Facebook post.
///
/// The variants form a closed set; every status change goes through
/// [`PostStatus::can_transition_to`], so the set of executed transitions is
/// exactly the table below.
///
/// | From          | Allowed targets                          |
/// |---------------|------------------------------------------|
/// | `received`    | `fetching`                               |
/// | `fetching`    | `eligible`, `ignored`, `failed`, `received` |
/// | `eligible`    | `sending`                                |
/// | `sending`     | `delivered`, `failed`, `needs_review`    |
/// | `delivered`   | terminal                                 |
/// | `ignored`     | terminal                                 |
/// | `failed`      | `received` (operator retry)              |
/// | `needs_review`| `received` (operator retry)              |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Received,
    Fetching,
    Eligible,
    Sending,
    Delivered,
    Ignored,
    Failed,
    NeedsReview,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Received => "received",
            PostStatus::Fetching => "fetching",
            PostStatus::Eligible => "eligible",
            PostStatus::Sending => "sending",
            PostStatus::Delivered => "delivered",
            PostStatus::Ignored => "ignored",
            PostStatus::Failed => "failed",
            PostStatus::NeedsReview => "needs_review",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "received" => Some(PostStatus::Received),
            "fetching" => Some(PostStatus::Fetching),
            "eligible" => Some(PostStatus::Eligible),
            "sending" => Some(PostStatus::Sending),
            "delivered" => Some(PostStatus::Delivered),
            "ignored" => Some(PostStatus::Ignored),
            "failed" => Some(PostStatus::Failed),
            "needs_review" => Some(PostStatus::NeedsReview),
            _ => None,
        }
    }

    pub fn allowed_targets(&self) -> &'static [PostStatus] {
        match self {
            PostStatus::Received => &[PostStatus::Fetching],
            PostStatus::Fetching => &[
                PostStatus::Eligible,
                PostStatus::Ignored,
                PostStatus::Failed,
                PostStatus::Received,
            ],
            PostStatus::Eligible => &[PostStatus::Sending],
            PostStatus::Sending => &[
                PostStatus::Delivered,
                PostStatus::Failed,
                PostStatus::NeedsReview,
            ],
            PostStatus::Delivered | PostStatus::Ignored => &[],
            PostStatus::Failed | PostStatus::NeedsReview => &[PostStatus::Received],
        }
    }

    pub fn can_transition_to(&self, target: PostStatus) -> bool {
        self.allowed_targets().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PostStatus::Delivered | PostStatus::Ignored)
    }

    /// Audit event name recorded alongside a transition into this status.
    pub fn event_name(&self) -> String {
        format!("status_{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub fb_post_id: String,
    pub status: PostStatus,
    pub author_id: Option<String>,
    pub author_name: Option<String>,
    pub message: Option<String>,
    pub permalink: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
    pub discord_msg_id: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostEvent {
    pub id: i64,
    pub fb_post_id: String,
    pub event: String,
    pub details: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryLog {
    pub id: i64,
    pub fb_post_id: String,
    pub success: bool,
    pub discord_msg_id: Option<String>,
    pub error_message: Option<String>,
    pub latency_ms: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDeliveryLog {
    pub fb_post_id: String,
    pub success: bool,
    pub discord_msg_id: Option<String>,
    pub error_message: Option<String>,
    pub latency_ms: i32,
}

/// Result of the atomic ingress admission: post upsert, audit event, and
/// conditional job enqueue committed together.
#[derive(Debug, Clone, Copy)]
pub struct IngestOutcome {
    pub post_created: bool,
    pub job_enqueued: bool,
}

/// Row fields a caller may set together with a status change.
#[derive(Debug, Clone, Default)]
pub struct TransitionFields {
    pub discord_msg_id: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl TransitionFields {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_error(error: impl Into<String>) -> Self {
        Self {
            last_error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Result of a requested status change.
///
/// `Rejected` is the sentinel for a transition outside the table (or lost to
/// a concurrent writer); the row is untouched and the caller must treat the
/// attempt as failed.
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    Applied(Post),
    Rejected { current: PostStatus },
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [PostStatus; 8] = [
        PostStatus::Received,
        PostStatus::Fetching,
        PostStatus::Eligible,
        PostStatus::Sending,
        PostStatus::Delivered,
        PostStatus::Ignored,
        PostStatus::Failed,
        PostStatus::NeedsReview,
    ];

    #[test]
    fn happy_path_edges_are_allowed() {
        assert!(PostStatus::Received.can_transition_to(PostStatus::Fetching));
        assert!(PostStatus::Fetching.can_transition_to(PostStatus::Eligible));
        assert!(PostStatus::Eligible.can_transition_to(PostStatus::Sending));
        assert!(PostStatus::Sending.can_transition_to(PostStatus::Delivered));
    }

    #[test]
    fn retry_and_review_edges_are_allowed() {
        assert!(PostStatus::Fetching.can_transition_to(PostStatus::Received));
        assert!(PostStatus::Sending.can_transition_to(PostStatus::NeedsReview));
        assert!(PostStatus::Failed.can_transition_to(PostStatus::Received));
        assert!(PostStatus::NeedsReview.can_transition_to(PostStatus::Received));
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for target in ALL {
            assert!(!PostStatus::Delivered.can_transition_to(target));
            assert!(!PostStatus::Ignored.can_transition_to(target));
        }
    }

    #[test]
    fn skipping_stages_is_rejected() {
        assert!(!PostStatus::Received.can_transition_to(PostStatus::Delivered));
        assert!(!PostStatus::Received.can_transition_to(PostStatus::Sending));
        assert!(!PostStatus::Fetching.can_transition_to(PostStatus::Sending));
        assert!(!PostStatus::Eligible.can_transition_to(PostStatus::Delivered));
        assert!(!PostStatus::Sending.can_transition_to(PostStatus::Ignored));
    }

    #[test]
    fn status_names_round_trip() {
        for status in ALL {
            assert_eq!(PostStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(PostStatus::parse("bogus"), None);
    }

    #[test]
    fn event_names_carry_the_target_status() {
        assert_eq!(PostStatus::Delivered.event_name(), "status_delivered");
        assert_eq!(PostStatus::NeedsReview.event_name(), "status_needs_review");
    }
}
