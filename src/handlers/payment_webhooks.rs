use crate::services::webhooks::SIGNATURE_HEADER;
use crate::{errors::ServiceError, AppState};
use axum::{
    extract::State,
    http::HeaderMap,
    response::Json,
    routing::get,
    Router,
};
use bytes::Bytes;
use serde_json::{json, Value};
use tracing::debug;

// POST /api/v1/payments/webhook
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Notification acknowledged"),
        (status = 400, description = "Body is not JSON", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ServiceError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let outcome = state.services.webhooks.handle(signature, &body).await?;
    debug!(?outcome, "payment webhook handled");

    Ok(Json(json!({ "success": true })))
}

// GET /api/v1/payments/webhook
#[utoipa::path(
    get,
    path = "/api/v1/payments/webhook",
    responses((status = 200, description = "Webhook endpoint is live")),
    tag = "Payments"
)]
pub async fn payment_webhook_liveness() -> Json<Value> {
    Json(json!({ "success": true, "message": "payment webhook endpoint is live" }))
}

/// Unauthenticated; notifications are checked by signature when a secret is set.
pub fn payment_webhook_routes() -> Router<AppState> {
    Router::new().route(
        "/webhook",
        get(payment_webhook_liveness).post(payment_webhook),
    )
}
