//! Payment session and status endpoints against a mocked provider.

mod common;

use axum::http::{Method, StatusCode};
use common::{payer, payment_body, preference_body, response_json, TestApp};
use serde_json::json;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, ResponseTemplate,
};

fn session_request() -> serde_json::Value {
    json!({
        "items": [
            {"id": "tee-1", "title": "Tee", "quantity": 2, "unit_price": "100.00"}
        ],
        "payer": payer(),
        "shipping_cost": "50.00",
        "external_reference": "order_test"
    })
}

#[tokio::test]
async fn creates_session_with_shipping_line_and_redirects() {
    let app = TestApp::new().await;

    Mock::given(method("POST"))
        .and(path("/checkout/preferences"))
        .and(header("authorization", "Bearer TEST-access-token"))
        .and(body_partial_json(json!({
            "external_reference": "order_test",
            "auto_return": "approved",
            "expires": true,
            "notification_url": "https://shop.test/api/v1/payments/webhook",
            "back_urls": {
                "success": "https://shop.test/checkout/success",
                "pending": "https://shop.test/checkout/pending",
                "failure": "https://shop.test/checkout/failure"
            }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(preference_body("pref-1")))
        .expect(1)
        .mount(&app.provider)
        .await;

    let token = app.token_for("user-1");
    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/session",
            Some(session_request()),
            Some(&token),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["preference_id"], "pref-1");
    assert!(body["init_point"].as_str().unwrap().contains("pref-1"));

    let requests = app.provider.received_requests().await.unwrap();
    let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let items = sent["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[1]["id"], "shipping");
    assert_eq!(items[1]["unit_price"], json!(50.0));
}

#[tokio::test]
async fn session_without_token_never_reaches_the_provider() {
    let app = TestApp::new().await;

    Mock::given(method("POST"))
        .and(path("/checkout/preferences"))
        .respond_with(ResponseTemplate::new(201).set_body_json(preference_body("pref-1")))
        .expect(0)
        .mount(&app.provider)
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/session",
            Some(session_request()),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/session",
            Some(session_request()),
            Some("not-a-jwt"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn provider_rejection_is_surfaced_with_its_body() {
    let app = TestApp::new().await;

    Mock::given(method("POST"))
        .and(path("/checkout/preferences"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"message": "invalid unit_price"})),
        )
        .expect(1)
        .mount(&app.provider)
        .await;

    let token = app.token_for("user-1");
    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/session",
            Some(session_request()),
            Some(&token),
        )
        .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = response_json(response).await;
    assert!(body["details"].as_str().unwrap().contains("invalid unit_price"));
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn empty_items_are_rejected_before_the_provider() {
    let app = TestApp::new().await;

    Mock::given(method("POST"))
        .and(path("/checkout/preferences"))
        .respond_with(ResponseTemplate::new(201).set_body_json(preference_body("pref-1")))
        .expect(0)
        .mount(&app.provider)
        .await;

    let token = app.token_for("user-1");
    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/session",
            Some(json!({"items": [], "payer": payer()})),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn status_query_reads_the_live_payment() {
    let app = TestApp::new().await;

    Mock::given(method("GET"))
        .and(path("/v1/payments/12345"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(payment_body(12345, "approved", "order_abc")),
        )
        .expect(1)
        .mount(&app.provider)
        .await;

    let token = app.token_for("user-1");
    let response = app
        .request(
            Method::GET,
            "/api/v1/payments/status?collection_id=12345&external_reference=order_abc&status=approved",
            None,
            Some(&token),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["payment"]["id"], "12345");
    assert_eq!(body["payment"]["status"], "approved");
    assert_eq!(body["external_reference"], "order_abc");
    assert_eq!(body["status"], "approved");
}

#[tokio::test]
async fn status_query_validates_token_then_ids() {
    let app = TestApp::new().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&app.provider)
        .await;

    let response = app
        .request(Method::GET, "/api/v1/payments/status?payment_id=1", None, None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let token = app.token_for("user-1");
    let response = app
        .request(
            Method::GET,
            "/api/v1/payments/status?external_reference=order_abc",
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unreachable_provider_is_a_provider_error() {
    let app = TestApp::new().await;

    Mock::given(method("GET"))
        .and(path("/v1/payments/7"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(payment_body(7, "approved", "order_abc"))
                .set_delay(std::time::Duration::from_secs(5)),
        )
        .mount(&app.provider)
        .await;

    let token = app.token_for("user-1");
    let response = app
        .request(
            Method::GET,
            "/api/v1/payments/status?payment_id=7",
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}
