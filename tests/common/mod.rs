#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use storefront_api::{
    auth::{AuthConfig, AuthService},
    config::AppConfig,
    db,
    events::{self, EventSender},
    handlers::AppServices,
    services::{
        cart::AddCartItem,
        payment_gateway::{HttpPaymentGateway, PaymentGateway},
        webhooks::WebhookSignatureVerifier,
    },
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use wiremock::MockServer;

pub const JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";
pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Application over an in-memory SQLite database, with the payment provider
/// replaced by a wiremock server.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub provider: MockServer,
    auth_service: Arc<AuthService>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::build(None).await
    }

    /// Same as `new`, but webhooks must carry a valid `x-signature`.
    pub async fn with_webhook_secret() -> Self {
        Self::build(Some(WEBHOOK_SECRET)).await
    }

    async fn build(webhook_secret: Option<&str>) -> Self {
        let provider = MockServer::start().await;

        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
            "https://shop.test".to_string(),
        );
        cfg.payment_provider_base_url = provider.uri();
        cfg.payment_provider_access_token = Some("TEST-access-token".to_string());
        cfg.payment_provider_timeout_secs = 2;
        cfg.webhook_secret = webhook_secret.map(str::to_string);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let auth_service = Arc::new(AuthService::new(AuthConfig::new(
            cfg.jwt_secret.clone(),
            cfg.auth_issuer.clone(),
            cfg.auth_audience.clone(),
        )));

        let gateway: Arc<dyn PaymentGateway> =
            Arc::new(HttpPaymentGateway::from_config(&cfg).expect("provider client"));

        let services = AppServices::new(
            db_arc.clone(),
            event_sender,
            auth_service.clone(),
            gateway,
            &cfg,
        );

        let state = AppState {
            db: db_arc,
            config: cfg,
            auth: auth_service.clone(),
            services,
        };

        Self {
            router: storefront_api::app_router(state.clone()),
            state,
            provider,
            auth_service,
            _event_task: event_task,
        }
    }

    /// Bearer token for `user_id`.
    pub fn token_for(&self, user_id: &str) -> String {
        self.auth_service
            .issue_token(user_id, Some(&format!("{}@example.com", user_id)))
            .expect("issue token")
    }

    pub fn sign_webhook(&self, body: &[u8]) -> String {
        WebhookSignatureVerifier::new(WEBHOOK_SECRET, 300)
            .sign(chrono::Utc::now().timestamp(), body)
    }

    pub fn seed_cart(&self, user_id: &str, product_id: &str, quantity: i32, price: Decimal) {
        self.state
            .services
            .carts
            .add_item(
                user_id,
                AddCartItem {
                    product_id: product_id.to_string(),
                    variant_id: None,
                    title: format!("Product {}", product_id),
                    quantity,
                    unit_price: price,
                },
            )
            .expect("seed cart");
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }
        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };
        self.send(builder.body(body).expect("request"))
            .await
    }

    /// POST a raw webhook body, optionally signed.
    pub async fn post_webhook(&self, raw: &[u8], signature: Option<&str>) -> Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payments/webhook")
            .header("content-type", "application/json");
        if let Some(sig) = signature {
            builder = builder.header("x-signature", sig);
        }
        self.send(builder.body(Body::from(raw.to_vec())).expect("request"))
            .await
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router response")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

pub fn payer() -> Value {
    json!({ "name": "Ana Buyer", "email": "ana@example.com" })
}

pub fn preference_body(id: &str) -> Value {
    json!({
        "id": id,
        "init_point": format!("https://provider.test/checkout?pref_id={}", id),
        "sandbox_init_point": format!("https://sandbox.provider.test/checkout?pref_id={}", id),
    })
}

pub fn payment_body(id: u64, status: &str, external_reference: &str) -> Value {
    json!({
        "id": id,
        "status": status,
        "status_detail": "accredited",
        "external_reference": external_reference,
        "transaction_amount": 250.0,
        "payment_method_id": "visa",
        "payment_type_id": "credit_card",
    })
}
