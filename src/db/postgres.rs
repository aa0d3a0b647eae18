use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::{Value, json};
use tracing::warn;

use super::DatabaseError;
use super::models::{
    NewDeliveryLog, Post, PostStatus, TransitionFields, TransitionOutcome,
};
use crate::db::manager::Pool;
use crate::db::schema::{delivery_logs, post_events, posts};
use crate::facebook::FetchedPost;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = posts)]
struct DbPost {
    id: i64,
    fb_post_id: String,
    status: String,
    author_id: Option<String>,
    author_name: Option<String>,
    message: Option<String>,
    permalink: Option<String>,
    created_at: Option<DateTime<Utc>>,
    received_at: DateTime<Utc>,
    discord_msg_id: Option<String>,
    delivered_at: Option<DateTime<Utc>>,
    retry_count: i32,
    last_error: Option<String>,
}

impl DbPost {
    fn into_post(self) -> Result<Post, DatabaseError> {
        let status = PostStatus::parse(&self.status).ok_or_else(|| {
            DatabaseError::Query(format!(
                "post {} has unrecognized status {:?}",
                self.fb_post_id, self.status
            ))
        })?;

        Ok(Post {
            id: self.id,
            fb_post_id: self.fb_post_id,
            status,
            author_id: self.author_id,
            author_name: self.author_name,
            message: self.message,
            permalink: self.permalink,
            created_at: self.created_at,
            received_at: self.received_at,
            discord_msg_id: self.discord_msg_id,
            delivered_at: self.delivered_at,
            retry_count: self.retry_count,
            last_error: self.last_error,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = posts)]
struct NewPost<'a> {
    fb_post_id: &'a str,
    status: &'a str,
}

#[derive(Insertable)]
#[diesel(table_name = post_events)]
struct NewPostEvent<'a> {
    fb_post_id: &'a str,
    event: &'a str,
    details: &'a Value,
}

#[derive(AsChangeset)]
#[diesel(table_name = posts)]
struct TransitionChangeset<'a> {
    status: &'a str,
    discord_msg_id: Option<&'a str>,
    delivered_at: Option<&'a DateTime<Utc>>,
    last_error: Option<&'a str>,
}

#[derive(Insertable)]
#[diesel(table_name = delivery_logs)]
struct NewDeliveryLogRow<'a> {
    fb_post_id: &'a str,
    success: bool,
    discord_msg_id: Option<&'a str>,
    error_message: Option<&'a str>,
    latency_ms: i32,
}

async fn with_connection<T, F>(pool: Pool, operation: F) -> Result<T, DatabaseError>
where
    T: Send + 'static,
    F: FnOnce(&mut PgConnection) -> Result<T, DatabaseError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;
        operation(&mut conn)
    })
    .await
    .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
}

fn load_post(conn: &mut PgConnection, post_id: &str) -> Result<Option<DbPost>, DatabaseError> {
    use crate::db::schema::posts::dsl::*;
    posts
        .filter(fb_post_id.eq(post_id))
        .select(DbPost::as_select())
        .first::<DbPost>(conn)
        .optional()
        .map_err(DatabaseError::from)
}

pub(crate) fn insert_event(
    conn: &mut PgConnection,
    id: &str,
    event_name: &str,
    event_details: &Value,
) -> Result<(), DatabaseError> {
    diesel::insert_into(post_events::table)
        .values(NewPostEvent {
            fb_post_id: id,
            event: event_name,
            details: event_details,
        })
        .execute(conn)
        .map(|_| ())
        .map_err(DatabaseError::from)
}

/// Insert a post row for `fb_post_id` if none exists, returning the row and
/// whether it was newly created. The unique constraint on `fb_post_id`
/// makes concurrent calls collapse: the loser's insert is a no-op and both
/// re-read the winner's row.
pub(crate) fn get_or_create_on(
    conn: &mut PgConnection,
    fb_post_id: &str,
) -> Result<(Post, bool), DatabaseError> {
    let inserted = diesel::insert_into(posts::table)
        .values(NewPost {
            fb_post_id,
            status: PostStatus::Received.as_str(),
        })
        .on_conflict(posts::fb_post_id)
        .do_nothing()
        .execute(conn)
        .map_err(DatabaseError::from)?;

    let row = load_post(conn, fb_post_id)?
        .ok_or_else(|| DatabaseError::Query(format!("post {fb_post_id} vanished after upsert")))?;

    Ok((row.into_post()?, inserted > 0))
}

pub struct PostgresPostStore {
    pool: Pool,
}

impl PostgresPostStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::PostStore for PostgresPostStore {
    async fn get_by_fb_id(&self, fb_post_id: &str) -> Result<Option<Post>, DatabaseError> {
        let pool = self.pool.clone();
        let fb_post_id = fb_post_id.to_string();
        with_connection(pool, move |conn| {
            load_post(conn, &fb_post_id)?
                .map(DbPost::into_post)
                .transpose()
        })
        .await
    }

    async fn transition(
        &self,
        fb_post_id: &str,
        target: PostStatus,
        fields: TransitionFields,
        details: Value,
    ) -> Result<TransitionOutcome, DatabaseError> {
        let pool = self.pool.clone();
        let fb_post_id = fb_post_id.to_string();
        with_connection(pool, move |conn| {
            conn.transaction::<TransitionOutcome, DatabaseError, _>(|conn| {
                let row = load_post(conn, &fb_post_id)?
                    .ok_or_else(|| DatabaseError::NotFound(fb_post_id.clone()))?;
                let current = row.clone().into_post()?.status;

                if !current.can_transition_to(target) {
                    warn!(
                        fb_post_id = %fb_post_id,
                        from = current.as_str(),
                        to = target.as_str(),
                        "rejected invalid status transition"
                    );
                    return Ok(TransitionOutcome::Rejected { current });
                }

                // Compare-and-set on the status column: a concurrent worker
                // that moved the row first wins, and this attempt is rejected.
                let changes = TransitionChangeset {
                    status: target.as_str(),
                    discord_msg_id: fields.discord_msg_id.as_deref(),
                    delivered_at: fields.delivered_at.as_ref(),
                    last_error: fields.last_error.as_deref(),
                };
                let updated = diesel::update(
                    posts::table.filter(
                        posts::fb_post_id
                            .eq(&fb_post_id)
                            .and(posts::status.eq(current.as_str())),
                    ),
                )
                .set(changes)
                .execute(conn)?;

                if updated == 0 {
                    warn!(
                        fb_post_id = %fb_post_id,
                        to = target.as_str(),
                        "lost status transition race to a concurrent worker"
                    );
                    return Ok(TransitionOutcome::Rejected { current });
                }

                insert_event(conn, &fb_post_id, &target.event_name(), &details)?;

                let updated_row = load_post(conn, &fb_post_id)?
                    .ok_or_else(|| DatabaseError::NotFound(fb_post_id.clone()))?;
                Ok(TransitionOutcome::Applied(updated_row.into_post()?))
            })
        })
        .await
    }

    async fn update_fetched_fields(
        &self,
        fb_post_id: &str,
        fetched: &FetchedPost,
    ) -> Result<(), DatabaseError> {
        let pool = self.pool.clone();
        let fb_post_id = fb_post_id.to_string();
        let author_id = fetched.author.as_ref().map(|a| a.id.clone());
        let author_name = fetched.author.as_ref().and_then(|a| a.name.clone());
        let message = fetched.message.clone();
        let permalink = fetched.permalink.clone();
        let created_at = fetched.created_time;
        with_connection(pool, move |conn| {
            diesel::update(posts::table.filter(posts::fb_post_id.eq(&fb_post_id)))
                .set((
                    posts::author_id.eq(author_id),
                    posts::author_name.eq(author_name),
                    posts::message.eq(message),
                    posts::permalink.eq(permalink),
                    posts::created_at.eq(created_at),
                ))
                .execute(conn)
                .map(|_| ())
                .map_err(DatabaseError::from)
        })
        .await
    }

    async fn mark_for_retry(&self, fb_post_id: &str, error: &str) -> Result<bool, DatabaseError> {
        let pool = self.pool.clone();
        let fb_post_id = fb_post_id.to_string();
        let error = error.to_string();
        with_connection(pool, move |conn| {
            conn.transaction::<bool, DatabaseError, _>(|conn| {
                let Some(row) = load_post(conn, &fb_post_id)? else {
                    warn!(fb_post_id = %fb_post_id, "mark_for_retry on unknown post");
                    return Ok(false);
                };
                let current = row.into_post()?.status;

                if current == PostStatus::Delivered {
                    warn!(
                        fb_post_id = %fb_post_id,
                        "refusing to mark a delivered post for retry"
                    );
                    return Ok(false);
                }

                diesel::update(posts::table.filter(posts::fb_post_id.eq(&fb_post_id)))
                    .set((
                        posts::status.eq(PostStatus::Received.as_str()),
                        posts::retry_count.eq(posts::retry_count + 1),
                        posts::last_error.eq(&error),
                    ))
                    .execute(conn)?;

                let details = json!({ "error": error, "previous_status": current.as_str() });
                insert_event(conn, &fb_post_id, "marked_for_retry", &details)?;

                Ok(true)
            })
        })
        .await
    }

    async fn prune_terminal(&self, days: i64) -> Result<usize, DatabaseError> {
        let pool = self.pool.clone();
        with_connection(pool, move |conn| {
            conn.transaction::<usize, DatabaseError, _>(|conn| {
                let horizon = format!("{days} days");
                let selector = "SELECT fb_post_id FROM posts \
                     WHERE status IN ('delivered', 'ignored') \
                       AND COALESCE(delivered_at, received_at) < NOW() - ($1)::INTERVAL";

                diesel::sql_query(format!(
                    "DELETE FROM post_events WHERE fb_post_id IN ({selector})"
                ))
                .bind::<diesel::sql_types::Text, _>(&horizon)
                .execute(conn)?;

                diesel::sql_query(format!(
                    "DELETE FROM delivery_logs WHERE fb_post_id IN ({selector})"
                ))
                .bind::<diesel::sql_types::Text, _>(&horizon)
                .execute(conn)?;

                let removed = diesel::sql_query(
                    "DELETE FROM posts \
                     WHERE status IN ('delivered', 'ignored') \
                       AND COALESCE(delivered_at, received_at) < NOW() - ($1)::INTERVAL",
                )
                .bind::<diesel::sql_types::Text, _>(&horizon)
                .execute(conn)?;

                Ok(removed)
            })
        })
        .await
    }
}

pub struct PostgresDeliveryLogStore {
    pool: Pool,
}

impl PostgresDeliveryLogStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::DeliveryLogStore for PostgresDeliveryLogStore {
    async fn record(&self, log: NewDeliveryLog) -> Result<(), DatabaseError> {
        let pool = self.pool.clone();
        with_connection(pool, move |conn| {
            diesel::insert_into(delivery_logs::table)
                .values(NewDeliveryLogRow {
                    fb_post_id: &log.fb_post_id,
                    success: log.success,
                    discord_msg_id: log.discord_msg_id.as_deref(),
                    error_message: log.error_message.as_deref(),
                    latency_ms: log.latency_ms,
                })
                .execute(conn)
                .map(|_| ())
                .map_err(DatabaseError::from)
        })
        .await
    }
}
