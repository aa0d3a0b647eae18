use async_trait::async_trait;
use serde_json::Value;

use super::DatabaseError;
use super::models::{
    NewDeliveryLog, Post, PostStatus, TransitionFields, TransitionOutcome,
};
use crate::facebook::FetchedPost;

#[async_trait]
pub trait PostStore: Send + Sync {
    async fn get_by_fb_id(&self, fb_post_id: &str) -> Result<Option<Post>, DatabaseError>;

    /// Apply a status change together with its audit event in one
    /// transaction. A target outside the transition table (or a row changed
    /// underneath us) yields `TransitionOutcome::Rejected` without touching
    /// the row.
    async fn transition(
        &self,
        fb_post_id: &str,
        target: PostStatus,
        fields: TransitionFields,
        details: Value,
    ) -> Result<TransitionOutcome, DatabaseError>;

    /// Data-only update of the fields learned from the Graph fetch; does not
    /// change `status` and records no event.
    async fn update_fetched_fields(
        &self,
        fb_post_id: &str,
        fetched: &FetchedPost,
    ) -> Result<(), DatabaseError>;

    /// Reset a post to `received` for another delivery attempt, bumping
    /// `retry_count` and recording a `marked_for_retry` event. Refuses on
    /// `delivered` rows.
    async fn mark_for_retry(&self, fb_post_id: &str, error: &str) -> Result<bool, DatabaseError>;

    /// Delete terminal posts older than `days`, along with their events and
    /// delivery logs. Returns the number of posts removed.
    async fn prune_terminal(&self, days: i64) -> Result<usize, DatabaseError>;
}

#[async_trait]
pub trait DeliveryLogStore: Send + Sync {
    async fn record(&self, log: NewDeliveryLog) -> Result<(), DatabaseError>;
}
