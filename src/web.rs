use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use once_cell::sync::OnceCell;
use salvo::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::db::DatabaseManager;
use crate::relay::RelayIngest;

mod health;
mod webhook;

use health::{get_status, healthz, readyz};
use webhook::{receive_event, verify_subscription};

#[derive(Clone)]
pub struct WebState {
    pub db: Arc<DatabaseManager>,
    pub ingest: Arc<RelayIngest>,
    pub config: Arc<Config>,
    pub started_at: Instant,
}

static WEB_STATE: OnceCell<WebState> = OnceCell::new();

pub fn web_state() -> &'static WebState {
    WEB_STATE
        .get()
        .expect("web state is not initialized before handler execution")
}

pub struct WebServer {
    config: Arc<Config>,
}

impl WebServer {
    pub async fn new(
        config: Arc<Config>,
        db: Arc<DatabaseManager>,
        ingest: Arc<RelayIngest>,
    ) -> Result<Self> {
        let _ = WEB_STATE.set(WebState {
            db,
            ingest,
            config: config.clone(),
            started_at: Instant::now(),
        });

        Ok(Self { config })
    }

    pub async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        let bind_addr = format!(
            "{}:{}",
            self.config.server.bind_address, self.config.server.port
        );
        info!("starting ingress server on {}", bind_addr);

        let acceptor = TcpListener::new(bind_addr).bind().await;
        let server = Server::new(acceptor);

        let handle = server.handle();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            // In-flight requests get a grace period; new connections stop.
            handle.stop_graceful(Duration::from_secs(10));
        });

        server
            .serve(root_router(&self.config.server.webhook_path_prefix))
            .await;

        Ok(())
    }
}

pub fn root_router(webhook_prefix: &str) -> Router {
    Router::new()
        .push(Router::with_path("healthz").get(healthz))
        .push(Router::with_path("readyz").get(readyz))
        .push(Router::with_path("status").get(get_status))
        .push(
            Router::with_path(format!("{webhook_prefix}/webhook"))
                .get(verify_subscription)
                .post(receive_event),
        )
}
