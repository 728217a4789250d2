//! # Webhook Handlers
//!
//! Instagram subscription handshake and event delivery. Signature checks run in
//! [`crate::webhook_verification::webhook_signature_middleware`] before the
//! delivery handler sees the body.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use crate::error::{ApiError, forbidden, service_unavailable};
use crate::ingest::IngestError;
use crate::server::AppState;

/// Query parameters of the subscription handshake
#[derive(Debug, Deserialize)]
pub struct SubscriptionQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// Webhook accept response
#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookAcceptResponse {
    /// Acceptance status
    pub status: String,
}

impl WebhookAcceptResponse {
    fn received() -> Self {
        Self {
            status: "received".to_string(),
        }
    }
}

/// Echoes `hub.challenge` when the subscription request carries our verify token.
pub async fn verify_subscription(
    State(state): State<AppState>,
    Query(query): Query<SubscriptionQuery>,
) -> Result<String, ApiError> {
    let Some(expected) = state
        .config
        .webhook_verify_token
        .as_deref()
        .filter(|t| !t.is_empty())
    else {
        warn!("Subscription handshake attempted without a configured verify token");
        return Err(forbidden(Some("Webhook verification is not configured")));
    };

    let token_matches = query
        .verify_token
        .as_deref()
        .is_some_and(|token| bool::from(token.as_bytes().ct_eq(expected.as_bytes())));

    match (query.mode.as_deref(), query.challenge) {
        (Some("subscribe"), Some(challenge)) if token_matches => {
            info!("Webhook subscription verified");
            Ok(challenge)
        }
        _ => {
            warn!(mode = ?query.mode, "Rejected webhook subscription handshake");
            Err(forbidden(Some("Webhook verification failed")))
        }
    }
}

/// Ingests a verified delivery.
///
/// Always `200` unless storage is down; per-event results stay in the logs.
pub async fn ingest_instagram_webhook(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookAcceptResponse>), ApiError> {
    match state.pipeline.ingest_bytes(&body).await {
        Ok(summary) => {
            debug!(
                events = summary.total_events(),
                failed = summary.failed,
                "Webhook delivery processed"
            );
        }
        Err(IngestError::StorageUnavailable(e)) => {
            tracing::error!(error = %e, "Storage unavailable during webhook ingestion");
            return Err(service_unavailable("Storage unavailable, retry later"));
        }
        Err(e) => {
            warn!(error = %e, body_size = body.len(), "Discarding unprocessable webhook delivery");
        }
    }

    Ok((StatusCode::OK, Json(WebhookAcceptResponse::received())))
}
