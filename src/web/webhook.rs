use salvo::prelude::*;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::facebook::signature::SIGNATURE_HEADER;
use crate::facebook::{HandshakeOutcome, evaluate_handshake, verify_signature};
use crate::web::web_state;

/// Meta sends the handshake parameters `hub.`-prefixed; the bare names are
/// accepted as well.
fn hub_query(req: &Request, name: &str) -> Option<String> {
    req.query::<String>(&format!("hub.{name}"))
        .or_else(|| req.query::<String>(name))
}

/// Subscription verification handshake.
#[handler]
pub async fn verify_subscription(req: &mut Request, res: &mut Response) {
    let state = web_state();
    let mode = hub_query(req, "mode");
    let verify_token = hub_query(req, "verify_token");
    let challenge = hub_query(req, "challenge");

    match evaluate_handshake(
        &state.config.meta.verify_token,
        mode.as_deref(),
        verify_token.as_deref(),
        challenge.as_deref(),
    ) {
        HandshakeOutcome::Accepted(challenge) => {
            info!("webhook subscription verified");
            res.render(Text::Plain(challenge));
        }
        HandshakeOutcome::Forbidden => {
            warn!("webhook verification rejected: bad mode or verify token");
            res.status_code(StatusCode::FORBIDDEN);
            res.render(Text::Plain("Forbidden"));
        }
        HandshakeOutcome::MissingChallenge => {
            warn!("webhook verification rejected: missing challenge");
            res.status_code(StatusCode::BAD_REQUEST);
            res.render(Text::Plain("Missing challenge"));
        }
    }
}

/// Signed event delivery.
///
/// The signature is checked over the exact raw request bytes before any
/// JSON parsing. Once the signature is valid the answer is always 200:
/// the upstream retries aggressively on anything else, and per-entry
/// failures are absorbed by the ingest layer.
#[handler]
pub async fn receive_event(req: &mut Request, res: &mut Response) {
    let state = web_state();
    let correlation_id = Uuid::new_v4();

    let raw: Vec<u8> = match req.payload().await {
        Ok(bytes) => bytes.to_vec(),
        Err(err) => {
            warn!(%correlation_id, "failed to read webhook body: {err}");
            res.status_code(StatusCode::FORBIDDEN);
            res.render(Text::Plain("Forbidden"));
            return;
        }
    };

    let signature = req.header::<String>(SIGNATURE_HEADER);
    if !verify_signature(&state.config.meta.app_secret, &raw, signature.as_deref()) {
        warn!(%correlation_id, "rejected webhook delivery with bad signature");
        res.status_code(StatusCode::FORBIDDEN);
        res.render(Text::Plain("Forbidden"));
        return;
    }

    let payload: Value = match serde_json::from_slice(&raw) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(%correlation_id, "signed webhook body was not valid JSON: {err}");
            res.render(Text::Plain("OK"));
            return;
        }
    };

    if payload.get("object").and_then(Value::as_str) != Some("page") {
        info!(%correlation_id, "ignoring webhook for non-page object");
        res.render(Text::Plain("OK"));
        return;
    }

    let enqueued = state.ingest.process_event(&payload, correlation_id).await;
    debug!(%correlation_id, enqueued, "webhook delivery processed");

    res.render(Text::Plain("OK"));
}
