use crate::{
    auth::{AuthRouterExt, AuthUser},
    errors::ServiceError,
    handlers::AppState,
    services::cart::{AddCartItem, CartSnapshot},
    ApiResponse,
};
use axum::{
    extract::{Json, Path, Query, State},
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateCartItemRequest {
    pub quantity: i32,
    pub variant_id: Option<String>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct VariantQuery {
    pub variant_id: Option<String>,
}

/// Current cart
#[utoipa::path(
    get,
    path = "/api/v1/cart",
    responses(
        (status = 200, description = "Cart contents", body = ApiResponse<CartSnapshot>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Json<ApiResponse<CartSnapshot>> {
    Json(ApiResponse::success(
        state.services.carts.snapshot(&auth_user.user_id),
    ))
}

/// Add an item, merging with an existing line for the same product and variant
#[utoipa::path(
    post,
    path = "/api/v1/cart/items",
    request_body = AddCartItem,
    responses(
        (status = 200, description = "Item added", body = ApiResponse<CartSnapshot>),
        (status = 400, description = "Invalid item", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn add_item(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(item): Json<AddCartItem>,
) -> Result<Json<ApiResponse<CartSnapshot>>, ServiceError> {
    let cart = state.services.carts.add_item(&auth_user.user_id, item)?;
    Ok(Json(ApiResponse::success(cart)))
}

/// Set a line's quantity; zero removes the line
#[utoipa::path(
    put,
    path = "/api/v1/cart/items/{product_id}",
    params(("product_id" = String, Path, description = "Product ID")),
    request_body = UpdateCartItemRequest,
    responses(
        (status = 200, description = "Cart updated", body = ApiResponse<CartSnapshot>),
        (status = 404, description = "Line not in cart", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn update_item(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(product_id): Path<String>,
    Json(request): Json<UpdateCartItemRequest>,
) -> Result<Json<ApiResponse<CartSnapshot>>, ServiceError> {
    let cart = state.services.carts.update_quantity(
        &auth_user.user_id,
        &product_id,
        request.variant_id.as_deref(),
        request.quantity,
    )?;
    Ok(Json(ApiResponse::success(cart)))
}

/// Remove a line
#[utoipa::path(
    delete,
    path = "/api/v1/cart/items/{product_id}",
    params(("product_id" = String, Path, description = "Product ID"), VariantQuery),
    responses(
        (status = 200, description = "Line removed", body = ApiResponse<CartSnapshot>),
        (status = 404, description = "Line not in cart", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn remove_item(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(product_id): Path<String>,
    Query(query): Query<VariantQuery>,
) -> Result<Json<ApiResponse<CartSnapshot>>, ServiceError> {
    let cart = state.services.carts.remove_item(
        &auth_user.user_id,
        &product_id,
        query.variant_id.as_deref(),
    )?;
    Ok(Json(ApiResponse::success(cart)))
}

/// Empty the cart
#[utoipa::path(
    delete,
    path = "/api/v1/cart",
    responses((status = 200, description = "Cart cleared", body = ApiResponse<CartSnapshot>)),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn clear_cart(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Json<ApiResponse<CartSnapshot>> {
    state.services.carts.clear(&auth_user.user_id);
    Json(ApiResponse::success(
        state.services.carts.snapshot(&auth_user.user_id),
    ))
}

pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart).delete(clear_cart))
        .route("/items", post(add_item))
        .route("/items/:product_id", put(update_item).delete(remove_item))
        .with_auth()
}
