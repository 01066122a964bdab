use crate::{
    auth::{AuthRouterExt, AuthUser},
    errors::ServiceError,
    handlers::AppState,
    models::order::Order,
    ApiResponse,
};
use axum::{
    extract::{Path, State},
    response::Json,
    routing::get,
    Router,
};
use uuid::Uuid;

fn not_found(what: impl std::fmt::Display) -> ServiceError {
    ServiceError::NotFound(format!("Order {} not found", what))
}

/// List the caller's orders
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List my orders",
    description = "Orders of the authenticated user, newest first, with their line items",
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<Vec<Order>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<Vec<Order>>>, ServiceError> {
    let orders = state
        .services
        .orders
        .get_orders_for_user(&auth_user.user_id)
        .await?;
    Ok(Json(ApiResponse::success(orders)))
}

/// Get order by ID
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order retrieved", body = ApiResponse<Order>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<Order>>, ServiceError> {
    // Someone else's order is reported as missing.
    match state.services.orders.get_order_by_id(id).await? {
        Some(order) if order.is_owned_by(&auth_user.user_id) => {
            Ok(Json(ApiResponse::success(order)))
        }
        _ => Err(not_found(id)),
    }
}

/// Get order by its human-facing number
#[utoipa::path(
    get,
    path = "/api/v1/orders/by-number/{order_number}",
    summary = "Get order by number",
    params(("order_number" = String, Path, description = "Order number, e.g. ORD-12345678")),
    responses(
        (status = 200, description = "Order retrieved", body = ApiResponse<Order>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn get_order_by_number(
    State(state): State<AppState>,
    Path(order_number): Path<String>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<Order>>, ServiceError> {
    match state
        .services
        .orders
        .get_order_by_number(&order_number)
        .await?
    {
        Some(order) if order.is_owned_by(&auth_user.user_id) => {
            Ok(Json(ApiResponse::success(order)))
        }
        _ => Err(not_found(order_number)),
    }
}

pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders))
        .route("/:id", get(get_order))
        .route("/by-number/:order_number", get(get_order_by_number))
        .with_auth()
}
