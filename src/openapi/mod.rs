use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::handlers;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "1.0.0",
        description = r#"
# Storefront checkout and payments API

Cart, checkout, order history and hosted-payment reconciliation.

## Flow

1. Fill the cart (`/api/v1/cart`).
2. `POST /api/v1/checkout` creates a `pending` order and a hosted payment
   session; redirect the buyer to `init_point`.
3. The provider notifies `POST /api/v1/payments/webhook`, which moves the
   order to `confirmed`, `pending_payment` or `cancelled`.
4. The buyer lands on `GET /api/v1/checkout/return`, which renders from the
   stored order status, never from the redirect itself.

## Authentication

Everything except the webhook and health endpoints needs a bearer token:

```
Authorization: Bearer <jwt>
```

## Errors

```json
{
  "error": "Bad Request",
  "message": "cart is empty",
  "request_id": "…",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Orders", description = "Order history of the authenticated user"),
        (name = "Cart", description = "Per-user cart"),
        (name = "Checkout", description = "Checkout and return pages"),
        (name = "Payments", description = "Hosted payment sessions, status lookups and provider webhooks")
    ),
    paths(
        // Orders
        handlers::orders::list_orders,
        handlers::orders::get_order,
        handlers::orders::get_order_by_number,
        // Cart
        handlers::cart::get_cart,
        handlers::cart::add_item,
        handlers::cart::update_item,
        handlers::cart::remove_item,
        handlers::cart::clear_cart,
        // Checkout
        handlers::checkout::begin_checkout,
        handlers::checkout::checkout_return,
        // Payments
        handlers::payments::create_payment_session,
        handlers::payments::get_payment_status,
        // Webhooks
        handlers::payment_webhooks::payment_webhook,
        handlers::payment_webhooks::payment_webhook_liveness,
    ),
    components(
        schemas(
            crate::errors::ErrorResponse,
            crate::models::order::Order,
            crate::models::order::OrderLine,
            crate::models::order_status::OrderStatus,
            crate::models::order_status::PaymentStatus,
            crate::services::cart::CartLine,
            crate::services::cart::CartSnapshot,
            crate::services::cart::AddCartItem,
            crate::services::checkout::CheckoutRequest,
            crate::services::checkout::CheckoutResponse,
            crate::services::checkout::CheckoutReturn,
            crate::services::checkout::ReturnPage,
            crate::cache::ReceiptSnapshot,
            crate::services::payment_gateway::CreatePaymentSessionRequest,
            crate::services::payment_gateway::PaymentItem,
            crate::services::payment_gateway::Payer,
            crate::services::payment_gateway::ProviderPayment,
            crate::services::payment_status::PaymentStatusResponse,
            handlers::payments::PaymentSessionResponse,
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
