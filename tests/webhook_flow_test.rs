//! Provider notifications driving order status through the HTTP surface.

mod common;

use axum::http::{Method, StatusCode};
use common::{payer, payment_body, preference_body, response_json, TestApp};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use storefront_api::models::order_status::{OrderStatus, PaymentStatus};
use wiremock::{
    matchers::{method, path},
    Mock, ResponseTemplate,
};

/// Runs a checkout for `user_id` and returns `(order_number, external_reference)`.
async fn place_order(app: &TestApp, user_id: &str) -> (String, String) {
    Mock::given(method("POST"))
        .and(path("/checkout/preferences"))
        .respond_with(ResponseTemplate::new(201).set_body_json(preference_body("pref-wh")))
        .mount(&app.provider)
        .await;

    app.seed_cart(user_id, "tee-1", 2, dec!(100));
    let token = app.token_for(user_id);
    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({"payer": payer(), "shipping_cost": "50.00"})),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response_json(response).await;
    (
        body["data"]["order_number"].as_str().unwrap().to_string(),
        body["data"]["external_reference"].as_str().unwrap().to_string(),
    )
}

async fn stored_status(app: &TestApp, reference: &str) -> (OrderStatus, PaymentStatus, i32) {
    let order = app
        .state
        .services
        .orders
        .get_order_by_external_reference(reference)
        .await
        .unwrap()
        .unwrap();
    (order.status(), order.payment_status, order.version)
}

fn embedded(status: &str, reference: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "type": "payment",
        "data": {"id": "pay-1", "status": status, "external_reference": reference}
    }))
    .unwrap()
}

#[tokio::test]
async fn approved_webhook_confirms_and_replays_are_no_ops() {
    let app = TestApp::new().await;
    let (_, reference) = place_order(&app, "user-1").await;
    assert_eq!(
        stored_status(&app, &reference).await,
        (OrderStatus::Pending, PaymentStatus::Pending, 1)
    );

    let response = app.post_webhook(&embedded("approved", &reference), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await, json!({"success": true}));
    assert_eq!(
        stored_status(&app, &reference).await,
        (OrderStatus::Confirmed, PaymentStatus::Paid, 2)
    );

    let response = app.post_webhook(&embedded("approved", &reference), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(stored_status(&app, &reference).await.2, 2);
}

#[tokio::test]
async fn late_pending_and_rejections_never_reopen_a_confirmed_order() {
    let app = TestApp::new().await;
    let (_, reference) = place_order(&app, "user-1").await;

    app.post_webhook(&embedded("approved", &reference), None).await;
    app.post_webhook(&embedded("pending", &reference), None).await;
    app.post_webhook(&embedded("rejected", &reference), None).await;

    assert_eq!(
        stored_status(&app, &reference).await,
        (OrderStatus::Confirmed, PaymentStatus::Paid, 2)
    );
}

#[tokio::test]
async fn pending_then_rejected_cancels() {
    let app = TestApp::new().await;
    let (_, reference) = place_order(&app, "user-1").await;

    app.post_webhook(&embedded("in_process", &reference), None).await;
    assert_eq!(
        stored_status(&app, &reference).await.0,
        OrderStatus::PendingPayment
    );

    app.post_webhook(&embedded("rejected", &reference), None).await;
    app.post_webhook(&embedded("approved", &reference), None).await;
    assert_eq!(
        stored_status(&app, &reference).await,
        (OrderStatus::Cancelled, PaymentStatus::Failed, 3)
    );
}

#[tokio::test]
async fn minimal_notification_fetches_the_payment() {
    let app = TestApp::new().await;
    let (_, reference) = place_order(&app, "user-1").await;

    Mock::given(method("GET"))
        .and(path("/v1/payments/555"))
        .respond_with(ResponseTemplate::new(200).set_body_json(payment_body(
            555, "approved", &reference,
        )))
        .expect(1)
        .mount(&app.provider)
        .await;

    let raw = serde_json::to_vec(&json!({"type": "payment", "data": {"id": 555}})).unwrap();
    let response = app.post_webhook(&raw, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        stored_status(&app, &reference).await.0,
        OrderStatus::Confirmed
    );

    let order = app
        .state
        .services
        .orders
        .get_order_by_external_reference(&reference)
        .await
        .unwrap()
        .unwrap();
    let payment = order.lifecycle.payment().expect("payment recorded");
    assert_eq!(payment.payment_id, "555");
}

#[tokio::test]
async fn failures_downstream_are_still_acknowledged() {
    let app = TestApp::new().await;

    Mock::given(method("GET"))
        .and(path("/v1/payments/404"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "not found"})))
        .mount(&app.provider)
        .await;

    let raw = serde_json::to_vec(&json!({"type": "payment", "data": {"id": "404"}})).unwrap();
    let response = app.post_webhook(&raw, None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .post_webhook(&embedded("approved", "order_does_not_exist"), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let raw = serde_json::to_vec(&json!({"type": "plan", "data": {"id": "1"}})).unwrap();
    let response = app.post_webhook(&raw, None).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unparseable_body_is_the_only_rejection() {
    let app = TestApp::new().await;
    let response = app.post_webhook(b"{not json", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn get_is_a_liveness_probe() {
    let app = TestApp::new().await;
    let response = app
        .request(Method::GET, "/api/v1/payments/webhook", None, None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response_json(response).await;
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn signed_webhooks_are_verified() {
    let app = TestApp::with_webhook_secret().await;
    let (_, reference) = place_order(&app, "user-1").await;

    let raw = embedded("approved", &reference);

    let response = app.post_webhook(&raw, Some("ts=1,v1=00ff")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        stored_status(&app, &reference).await.0,
        OrderStatus::Pending
    );

    let signature = app.sign_webhook(&raw);
    let response = app.post_webhook(&raw, Some(&signature)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        stored_status(&app, &reference).await.0,
        OrderStatus::Confirmed
    );
}

#[tokio::test]
async fn concurrent_deliveries_converge() {
    let app = TestApp::new().await;
    let (_, reference) = place_order(&app, "user-1").await;

    let raw = embedded("approved", &reference);
    let (a, b, c) = tokio::join!(
        app.post_webhook(&raw, None),
        app.post_webhook(&raw, None),
        app.post_webhook(&raw, None)
    );
    assert_eq!(a.status(), StatusCode::OK);
    assert_eq!(b.status(), StatusCode::OK);
    assert_eq!(c.status(), StatusCode::OK);

    assert_eq!(
        stored_status(&app, &reference).await,
        (OrderStatus::Confirmed, PaymentStatus::Paid, 2)
    );
}
