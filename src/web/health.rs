use chrono::Utc;
use salvo::prelude::*;
use serde_json::json;

use crate::web::web_state;

/// Liveness: a trivial store round-trip.
#[handler]
pub async fn healthz(res: &mut Response) {
    let state = web_state();
    match state.db.ping().await {
        Ok(()) => {
            res.render(Json(json!({
                "status": "healthy",
                "timestamp": Utc::now().to_rfc3339(),
            })));
        }
        Err(err) => {
            res.status_code(StatusCode::SERVICE_UNAVAILABLE);
            res.render(Json(json!({
                "status": "unhealthy",
                "error": err.to_string(),
            })));
        }
    }
}

/// Readiness: the store check plus configuration predicates, reported as a
/// map of named checks.
#[handler]
pub async fn readyz(res: &mut Response) {
    let state = web_state();

    let database = state.db.ping().await.is_ok();
    let worker_configured = !state.config.meta.page_access_token.is_empty()
        && !state.config.discord.webhook_url.is_empty();

    let ready = database && worker_configured;
    let checks = json!({
        "database": database,
        "worker_configured": worker_configured,
    });

    if !ready {
        res.status_code(StatusCode::SERVICE_UNAVAILABLE);
    }
    res.render(Json(json!({
        "status": if ready { "ready" } else { "not_ready" },
        "checks": checks,
    })));
}

#[handler]
pub async fn get_status(res: &mut Response) {
    let state = web_state();
    let uptime_seconds = state.started_at.elapsed().as_secs();

    res.render(Json(json!({
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": uptime_seconds,
        "page_id": state.config.meta.page_id,
    })));
}
