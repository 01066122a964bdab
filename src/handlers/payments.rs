use crate::auth::extract_bearer;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::payment_gateway::CreatePaymentSessionRequest;
use crate::services::payment_status::{PaymentStatusQuery, PaymentStatusResponse};
use axum::{
    extract::{Json, Query, State},
    http::HeaderMap,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
#[schema(example = json!({
    "success": true,
    "preference_id": "123456789-abcd",
    "init_point": "https://www.mercadopago.com/checkout/v1/redirect?pref_id=123456789-abcd",
    "sandbox_init_point": "https://sandbox.mercadopago.com/checkout/v1/redirect?pref_id=123456789-abcd"
}))]
pub struct PaymentSessionResponse {
    pub success: bool,
    pub preference_id: String,
    pub init_point: String,
    pub sandbox_init_point: Option<String>,
}

/// Create a hosted payment session
#[utoipa::path(
    post,
    path = "/api/v1/payments/session",
    request_body = CreatePaymentSessionRequest,
    responses(
        (status = 200, description = "Session created", body = PaymentSessionResponse),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = crate::errors::ErrorResponse),
        (status = 500, description = "Provider rejected the session", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn create_payment_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreatePaymentSessionRequest>,
) -> Result<Json<PaymentSessionResponse>, ServiceError> {
    let session = state
        .services
        .payment_sessions
        .create_payment_session(extract_bearer(&headers), request)
        .await?;

    Ok(Json(PaymentSessionResponse {
        success: true,
        preference_id: session.preference_id,
        init_point: session.init_point,
        sandbox_init_point: session.sandbox_init_point,
    }))
}

/// Look up the live status of a payment at the provider
#[utoipa::path(
    get,
    path = "/api/v1/payments/status",
    params(PaymentStatusQuery),
    responses(
        (status = 200, description = "Payment found", body = PaymentStatusResponse),
        (status = 400, description = "Neither payment_id nor collection_id given", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = crate::errors::ErrorResponse),
        (status = 500, description = "Provider lookup failed", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn get_payment_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PaymentStatusQuery>,
) -> Result<Json<PaymentStatusResponse>, ServiceError> {
    let response = state
        .services
        .payment_status
        .get_payment_status(extract_bearer(&headers), query)
        .await?;
    Ok(Json(response))
}

/// Session and status routes. Both services check the bearer token themselves.
pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/session", post(create_payment_session))
        .route("/status", get(get_payment_status))
}
