use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Integer, Jsonb, Nullable, Text, Timestamptz};
use serde_json::Value;
use tracing::info;

use super::{EnqueueOutcome, JobStatus, QueuedJob};
use crate::db::DatabaseError;
use crate::db::manager::Pool;

/// Default retry limit for newly enqueued jobs.
pub const DEFAULT_MAX_RETRIES: i32 = 5;

/// Base of the exponential retry backoff, in seconds.
const RETRY_BACKOFF_BASE_SECS: i64 = 5;

/// Longest delay the backoff may reach.
const RETRY_BACKOFF_CAP_SECS: i64 = 3600;

/// Delay before the `attempt`-th retry (0-based).
fn retry_backoff_secs(attempt: i32) -> i64 {
    let exponent = attempt.clamp(0, 30) as u32;
    (RETRY_BACKOFF_BASE_SECS * 2i64.pow(exponent)).min(RETRY_BACKOFF_CAP_SECS)
}

#[derive(QueryableByName)]
struct IdRow {
    #[diesel(sql_type = BigInt)]
    id: i64,
}

#[derive(QueryableByName)]
struct CountersRow {
    #[diesel(sql_type = Integer)]
    retry_count: i32,
    #[diesel(sql_type = Integer)]
    max_retries: i32,
}

#[derive(QueryableByName)]
struct DbJob {
    #[diesel(sql_type = BigInt)]
    id: i64,
    #[diesel(sql_type = Text)]
    queue: String,
    #[diesel(sql_type = Jsonb)]
    payload: Value,
    #[diesel(sql_type = Nullable<Text>)]
    singleton_key: Option<String>,
    #[diesel(sql_type = Text)]
    status: String,
    #[diesel(sql_type = Integer)]
    retry_count: i32,
    #[diesel(sql_type = Integer)]
    max_retries: i32,
    #[diesel(sql_type = Timestamptz)]
    scheduled_for: DateTime<Utc>,
}

impl DbJob {
    fn into_job(self) -> Result<QueuedJob, DatabaseError> {
        let status = JobStatus::parse(&self.status).ok_or_else(|| {
            DatabaseError::Query(format!(
                "job {} has unrecognized status {:?}",
                self.id, self.status
            ))
        })?;
        Ok(QueuedJob {
            id: self.id,
            queue: self.queue,
            payload: self.payload,
            singleton_key: self.singleton_key,
            status,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            scheduled_for: self.scheduled_for,
        })
    }
}

/// Enqueue a job on an existing connection.
///
/// Returns `AlreadyQueued` when a live job for the same
/// `(queue, singleton_key)` exists instead of creating a second one. Taking
/// the connection lets the ingress compose this insert with its post-row
/// writes in a single transaction.
pub(crate) fn enqueue_on(
    conn: &mut PgConnection,
    queue: &str,
    payload: &Value,
    singleton_key: Option<&str>,
    max_retries: i32,
) -> Result<EnqueueOutcome, DatabaseError> {
    diesel::sql_query(
        "INSERT INTO relay_jobs (queue, payload, singleton_key, max_retries) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (queue, singleton_key) \
         WHERE status IN ('created', 'active', 'retry') DO NOTHING \
         RETURNING id",
    )
    .bind::<Text, _>(queue)
    .bind::<Jsonb, _>(payload)
    .bind::<Nullable<Text>, _>(singleton_key)
    .bind::<Integer, _>(max_retries)
    .get_result::<IdRow>(conn)
    .optional()
    .map_err(DatabaseError::from)
    .map(|row| match row {
        Some(row) => EnqueueOutcome::Created(row.id),
        None => EnqueueOutcome::AlreadyQueued,
    })
}

/// Durable PostgreSQL-backed job queue.
///
/// Jobs live in the same database as the post store; the partial unique
/// index on `(queue, singleton_key)` makes at most one live job exist per
/// key.
#[derive(Clone)]
pub struct PostgresJobQueue {
    pool: Pool,
}

impl PostgresJobQueue {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn with_connection<T, F>(&self, operation: F) -> Result<T, DatabaseError>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> Result<T, DatabaseError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;
            operation(&mut conn)
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("queue task failed: {e}")))?
    }

    /// Claim up to `limit` due jobs, marking them active. `SKIP LOCKED`
    /// keeps concurrent workers from claiming the same rows.
    pub async fn claim(&self, queue: &str, limit: i64) -> Result<Vec<QueuedJob>, DatabaseError> {
        let queue = queue.to_string();
        self.with_connection(move |conn| {
            diesel::sql_query(
                "UPDATE relay_jobs \
                 SET status = 'active', started_at = NOW(), updated_at = NOW() \
                 WHERE id IN ( \
                     SELECT id FROM relay_jobs \
                     WHERE queue = $1 \
                       AND status IN ('created', 'retry') \
                       AND scheduled_for <= NOW() \
                     ORDER BY scheduled_for, id \
                     FOR UPDATE SKIP LOCKED \
                     LIMIT $2 \
                 ) \
                 RETURNING id, queue, payload, singleton_key, status, retry_count, \
                           max_retries, scheduled_for",
            )
            .bind::<Text, _>(&queue)
            .bind::<BigInt, _>(limit)
            .load::<DbJob>(conn)
            .map_err(DatabaseError::from)?
            .into_iter()
            .map(DbJob::into_job)
            .collect()
        })
        .await
    }

    pub async fn complete(&self, job_id: i64) -> Result<(), DatabaseError> {
        self.with_connection(move |conn| {
            diesel::sql_query(
                "UPDATE relay_jobs \
                 SET status = 'completed', finished_at = NOW(), updated_at = NOW() \
                 WHERE id = $1",
            )
            .bind::<BigInt, _>(job_id)
            .execute(conn)
            .map(|_| ())
            .map_err(DatabaseError::from)
        })
        .await
    }

    /// Record a failed attempt. While retries remain the job is rescheduled
    /// with exponential backoff; afterwards it moves to the terminal
    /// `failed` queue state.
    pub async fn fail(&self, job_id: i64, error: &str) -> Result<(), DatabaseError> {
        let error = error.to_string();
        self.with_connection(move |conn| {
            conn.transaction::<(), DatabaseError, _>(|conn| {
                let counters = diesel::sql_query(
                    "SELECT retry_count, max_retries FROM relay_jobs WHERE id = $1 FOR UPDATE",
                )
                .bind::<BigInt, _>(job_id)
                .get_result::<CountersRow>(conn)
                .optional()?;

                let Some(counters) = counters else {
                    return Ok(());
                };

                if counters.retry_count < counters.max_retries {
                    let delay = retry_backoff_secs(counters.retry_count);
                    diesel::sql_query(
                        "UPDATE relay_jobs \
                         SET status = 'retry', \
                             retry_count = retry_count + 1, \
                             scheduled_for = NOW() + ($2 || ' seconds')::INTERVAL, \
                             last_error = $3, \
                             updated_at = NOW() \
                         WHERE id = $1",
                    )
                    .bind::<BigInt, _>(job_id)
                    .bind::<Text, _>(delay.to_string())
                    .bind::<Text, _>(&error)
                    .execute(conn)?;

                    info!(
                        job_id,
                        attempt = counters.retry_count + 1,
                        delay_secs = delay,
                        "rescheduled job with backoff"
                    );
                } else {
                    diesel::sql_query(
                        "UPDATE relay_jobs \
                         SET status = 'failed', \
                             finished_at = NOW(), \
                             last_error = $2, \
                             updated_at = NOW() \
                         WHERE id = $1",
                    )
                    .bind::<BigInt, _>(job_id)
                    .bind::<Text, _>(&error)
                    .execute(conn)?;

                    info!(job_id, "job moved to terminal failed state, retries exhausted");
                }

                Ok(())
            })
        })
        .await
    }

    /// Delete terminal jobs older than `days`. Returns the number removed.
    pub async fn archive_finished(&self, days: i64) -> Result<usize, DatabaseError> {
        self.with_connection(move |conn| {
            diesel::sql_query(
                "DELETE FROM relay_jobs \
                 WHERE status IN ('completed', 'failed') \
                   AND finished_at < NOW() - ($1 || ' days')::INTERVAL",
            )
            .bind::<Text, _>(days.to_string())
            .execute(conn)
            .map_err(DatabaseError::from)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_the_base() {
        assert_eq!(retry_backoff_secs(0), 5);
        assert_eq!(retry_backoff_secs(1), 10);
        assert_eq!(retry_backoff_secs(2), 20);
        assert_eq!(retry_backoff_secs(3), 40);
        assert_eq!(retry_backoff_secs(4), 80);
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(retry_backoff_secs(20), RETRY_BACKOFF_CAP_SECS);
        assert_eq!(retry_backoff_secs(i32::MAX), RETRY_BACKOFF_CAP_SECS);
    }

    #[test]
    fn backoff_ignores_negative_attempts() {
        assert_eq!(retry_backoff_secs(-3), 5);
    }
}
