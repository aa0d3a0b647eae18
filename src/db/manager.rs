use std::sync::Arc;

use diesel::pg::PgConnection;
use diesel::r2d2::{self, ConnectionManager};
use diesel::{Connection, RunQueryDsl};
use serde_json::Value;

use crate::config::DatabaseConfig;
use crate::db::models::IngestOutcome;
use crate::db::postgres::{
    PostgresDeliveryLogStore, PostgresPostStore, get_or_create_on, insert_event,
};
use crate::db::{DatabaseError, DeliveryLogStore, PostStore};
use crate::queue::enqueue_on;

pub type Pool = r2d2::Pool<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct DatabaseManager {
    pool: Pool,
    post_store: Arc<dyn PostStore>,
    delivery_log_store: Arc<dyn DeliveryLogStore>,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let manager = ConnectionManager::<PgConnection>::new(&config.url);

        let builder = r2d2::Pool::builder()
            .max_size(config.max_connections.unwrap_or(10))
            .min_idle(Some(config.min_connections.unwrap_or(1)));

        let pool = builder
            .build(manager)
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        let post_store = Arc::new(PostgresPostStore::new(pool.clone()));
        let delivery_log_store = Arc::new(PostgresDeliveryLogStore::new(pool.clone()));

        Ok(Self {
            pool,
            post_store,
            delivery_log_store,
        })
    }

    /// Apply the declarative schema snapshot. Statements are idempotent and
    /// run at every startup.
    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;

            let statements = [
                r#"
                CREATE TABLE IF NOT EXISTS posts (
                    id BIGSERIAL PRIMARY KEY,
                    fb_post_id TEXT NOT NULL UNIQUE,
                    status TEXT NOT NULL DEFAULT 'received',
                    author_id TEXT,
                    author_name TEXT,
                    message TEXT,
                    permalink TEXT,
                    created_at TIMESTAMP WITH TIME ZONE,
                    received_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    discord_msg_id TEXT,
                    delivered_at TIMESTAMP WITH TIME ZONE,
                    retry_count INTEGER NOT NULL DEFAULT 0,
                    last_error TEXT
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS post_events (
                    id BIGSERIAL PRIMARY KEY,
                    fb_post_id TEXT NOT NULL,
                    event TEXT NOT NULL,
                    details JSONB NOT NULL DEFAULT '{}'::jsonb,
                    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS delivery_logs (
                    id BIGSERIAL PRIMARY KEY,
                    fb_post_id TEXT NOT NULL,
                    success BOOLEAN NOT NULL,
                    discord_msg_id TEXT,
                    error_message TEXT,
                    latency_ms INTEGER NOT NULL,
                    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS relay_jobs (
                    id BIGSERIAL PRIMARY KEY,
                    queue TEXT NOT NULL,
                    payload JSONB NOT NULL,
                    singleton_key TEXT,
                    status TEXT NOT NULL DEFAULT 'created',
                    retry_count INTEGER NOT NULL DEFAULT 0,
                    max_retries INTEGER NOT NULL DEFAULT 5,
                    scheduled_for TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    started_at TIMESTAMP WITH TIME ZONE,
                    finished_at TIMESTAMP WITH TIME ZONE,
                    last_error TEXT,
                    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
                )
                "#,
                "CREATE INDEX IF NOT EXISTS idx_posts_status ON posts(status)",
                "CREATE INDEX IF NOT EXISTS idx_post_events_fb_post_id ON post_events(fb_post_id)",
                "CREATE INDEX IF NOT EXISTS idx_delivery_logs_fb_post_id ON delivery_logs(fb_post_id)",
                "CREATE INDEX IF NOT EXISTS idx_relay_jobs_ready ON relay_jobs(queue, status, scheduled_for)",
                // One live job per (queue, singleton_key); terminal jobs fall
                // out of the index so the key can be reused.
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_relay_jobs_singleton \
                 ON relay_jobs(queue, singleton_key) \
                 WHERE status IN ('created', 'active', 'retry')",
            ];

            for statement in statements {
                diesel::sql_query(statement)
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Migration(e.to_string()))?;
            }

            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Migration(format!("migration task failed: {e}")))?
    }

    /// Atomic ingress admission: upsert the post row, record the
    /// `webhook_received` event, and (iff the row is new) enqueue the
    /// processing job with `fb_post_id` as singleton key. One transaction
    /// on one connection, so a crash or a retried webhook can never leave
    /// `posts` and `relay_jobs` diverged.
    pub async fn ingest_post(
        &self,
        fb_post_id: &str,
        event_details: Value,
        queue: &str,
        job_payload: Value,
        max_retries: i32,
    ) -> Result<IngestOutcome, DatabaseError> {
        let pool = self.pool.clone();
        let fb_post_id = fb_post_id.to_string();
        let queue = queue.to_string();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;
            conn.transaction::<IngestOutcome, DatabaseError, _>(|conn| {
                let (_, post_created) = get_or_create_on(conn, &fb_post_id)?;
                insert_event(conn, &fb_post_id, "webhook_received", &event_details)?;

                let job_enqueued = if post_created {
                    enqueue_on(conn, &queue, &job_payload, Some(&fb_post_id), max_retries)?
                        .is_created()
                } else {
                    false
                };

                Ok(IngestOutcome {
                    post_created,
                    job_enqueued,
                })
            })
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    /// Trivial round-trip used by the health endpoints.
    pub async fn ping(&self) -> Result<(), DatabaseError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;
            diesel::sql_query("SELECT 1")
                .execute(&mut conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    pub fn post_store(&self) -> Arc<dyn PostStore> {
        self.post_store.clone()
    }

    pub fn delivery_log_store(&self) -> Arc<dyn DeliveryLogStore> {
        self.delivery_log_store.clone()
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}
