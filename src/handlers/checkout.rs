use crate::{
    auth::{AuthRouterExt, AuthUser},
    errors::ServiceError,
    handlers::AppState,
    services::checkout::{CheckoutRequest, CheckoutResponse, CheckoutReturn, RedirectParams},
    ApiResponse,
};
use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};

/// Turn the caller's cart into an order and a hosted payment session
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Order created; redirect the buyer to init_point", body = ApiResponse<CheckoutResponse>),
        (status = 400, description = "Empty cart or invalid request", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 500, description = "Payment provider rejected the session", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "Checkout"
)]
pub async fn begin_checkout(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CheckoutResponse>>), ServiceError> {
    let response = state
        .services
        .checkout
        .begin_checkout(&auth_user, request)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(response))))
}

/// Render the return leg of a hosted payment from the persisted order
#[utoipa::path(
    get,
    path = "/api/v1/checkout/return",
    params(RedirectParams),
    responses(
        (status = 200, description = "Page to show", body = ApiResponse<CheckoutReturn>),
        (status = 400, description = "external_reference missing", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "Checkout"
)]
pub async fn checkout_return(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(params): Query<RedirectParams>,
) -> Result<Json<ApiResponse<CheckoutReturn>>, ServiceError> {
    let page = state
        .services
        .checkout
        .resolve_return(&auth_user, params)
        .await?;
    Ok(Json(ApiResponse::success(page)))
}

pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(begin_checkout))
        .route("/return", get(checkout_return))
        .with_auth()
}
