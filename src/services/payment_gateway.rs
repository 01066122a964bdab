use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    auth::{AuthService, AuthUser},
    config::AppConfig,
    errors::ServiceError,
    events::{Event, EventSender},
    models::order::{check_amount, checked_line_total, checked_sum},
};

/// Accepts provider ids sent either as JSON numbers or strings.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate, ToSchema)]
pub struct PaymentItem {
    #[validate(length(min = 1, max = 100))]
    pub id: String,
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    pub description: Option<String>,
    #[validate(range(min = 1, max = 999))]
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate, ToSchema)]
pub struct Payer {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    pub phone: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub address: Option<Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreatePaymentSessionRequest {
    #[validate]
    pub items: Vec<PaymentItem>,
    #[validate]
    pub payer: Payer,
    pub shipping_cost: Option<Decimal>,
    pub external_reference: Option<String>,
}

impl CreatePaymentSessionRequest {
    fn check(&self) -> Result<(), ServiceError> {
        if self.items.is_empty() {
            return Err(ServiceError::ValidationError(
                "items must not be empty".to_string(),
            ));
        }
        self.validate()?;
        for item in &self.items {
            check_amount(&format!("item '{}' unit_price", item.id), item.unit_price)?;
        }
        check_amount("shipping_cost", self.shipping_cost.unwrap_or_default())?;
        checked_sum(
            self.items
                .iter()
                .map(|item| checked_line_total(item.unit_price, item.quantity))
                .collect::<Result<Vec<_>, _>>()?,
        )?;
        Ok(())
    }
}

/// Redirect targets of a hosted session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PaymentSession {
    pub preference_id: String,
    pub init_point: String,
    pub sandbox_init_point: Option<String>,
}

// Provider wire format

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PreferenceItem {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub quantity: i32,
    #[serde(with = "rust_decimal::serde::float")]
    pub unit_price: Decimal,
    pub currency_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PreferencePayer {
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BackUrls {
    pub success: String,
    pub pending: String,
    pub failure: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PreferenceRequest {
    pub items: Vec<PreferenceItem>,
    pub payer: PreferencePayer,
    pub back_urls: BackUrls,
    pub auto_return: String,
    pub notification_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_reference: Option<String>,
    pub expires: bool,
    pub expiration_date_from: String,
    pub expiration_date_to: String,
}

impl PreferenceRequest {
    /// Amount the provider will charge.
    pub fn total(&self) -> Decimal {
        self.items
            .iter()
            .fold(Decimal::ZERO, |acc, item| {
                acc.saturating_add(item.unit_price.saturating_mul(Decimal::from(item.quantity)))
            })
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct PreferenceResponse {
    pub id: String,
    pub init_point: String,
    pub sandbox_init_point: Option<String>,
}

/// Payment as reported by the provider's payment API.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProviderPayment {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: Option<String>,
    pub status: Option<String>,
    pub status_detail: Option<String>,
    pub external_reference: Option<String>,
    pub transaction_amount: Option<Decimal>,
    pub payment_method_id: Option<String>,
    pub payment_type_id: Option<String>,
    pub date_created: Option<String>,
    pub date_approved: Option<String>,
}

/// Seam to the external payment processor.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_preference(
        &self,
        request: &PreferenceRequest,
    ) -> Result<PreferenceResponse, ServiceError>;

    async fn get_payment(&self, payment_id: &str) -> Result<ProviderPayment, ServiceError>;
}

/// REST client for the provider, authenticated with a bearer access token.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
}

impl HttpPaymentGateway {
    pub fn new(
        base_url: impl Into<String>,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token,
        })
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self, ServiceError> {
        if cfg.payment_provider_access_token.is_none() {
            warn!("No payment provider access token configured; provider calls will be rejected");
        }
        Self::new(
            cfg.payment_provider_base_url.clone(),
            cfg.payment_provider_access_token.clone(),
            cfg.provider_timeout(),
        )
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, ServiceError> {
        let response = self.authorized(builder).send().await.map_err(|e| {
            warn!(error = %e, timeout = e.is_timeout(), "payment provider unreachable");
            ServiceError::provider_unavailable(e.to_string())
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ServiceError::provider_unavailable(e.to_string()))?;

        if !status.is_success() {
            error!(status = status.as_u16(), %body, "payment provider rejected request");
            return Err(ServiceError::provider(Some(status.as_u16()), body));
        }

        serde_json::from_str(&body).map_err(|e| {
            error!(error = %e, "unexpected payment provider response");
            ServiceError::provider(Some(status.as_u16()), body)
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, request), fields(items = request.items.len()))]
    async fn create_preference(
        &self,
        request: &PreferenceRequest,
    ) -> Result<PreferenceResponse, ServiceError> {
        let url = format!("{}/checkout/preferences", self.base_url);
        self.send(self.client.post(url).json(request)).await
    }

    #[instrument(skip(self))]
    async fn get_payment(&self, payment_id: &str) -> Result<ProviderPayment, ServiceError> {
        let url = format!("{}/v1/payments/{}", self.base_url, payment_id);
        self.send(self.client.get(url)).await
    }
}

/// Settings that shape every hosted session.
#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub currency: String,
    pub expiry: ChronoDuration,
    pub success_url: String,
    pub pending_url: String,
    pub failure_url: String,
    pub notification_url: String,
}

impl SessionSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            currency: cfg.payment_currency.clone(),
            expiry: ChronoDuration::minutes(cfg.payment_session_expiry_minutes),
            success_url: cfg.public_url("checkout/success"),
            pending_url: cfg.public_url("checkout/pending"),
            // A cancel from the provider lands on the failure page.
            failure_url: cfg.public_url("checkout/failure"),
            notification_url: cfg.public_url("api/v1/payments/webhook"),
        }
    }
}

/// Builds the provider request, adding a shipping line when shipping is charged
/// so the provider bills exactly the order total.
pub fn build_preference(
    request: &CreatePaymentSessionRequest,
    settings: &SessionSettings,
    now: DateTime<Utc>,
) -> PreferenceRequest {
    let mut items: Vec<PreferenceItem> = request
        .items
        .iter()
        .map(|item| PreferenceItem {
            id: item.id.clone(),
            title: item.title.clone(),
            description: item.description.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price.round_dp(2),
            currency_id: settings.currency.clone(),
        })
        .collect();

    let shipping_cost = request.shipping_cost.unwrap_or_default();
    if shipping_cost > Decimal::ZERO {
        items.push(PreferenceItem {
            id: "shipping".to_string(),
            title: "Shipping".to_string(),
            description: None,
            quantity: 1,
            unit_price: shipping_cost.round_dp(2),
            currency_id: settings.currency.clone(),
        });
    }

    PreferenceRequest {
        items,
        payer: PreferencePayer {
            name: request.payer.name.clone(),
            email: request.payer.email.clone(),
            phone: request
                .payer
                .phone
                .as_ref()
                .map(|number| serde_json::json!({ "number": number })),
            address: request.payer.address.clone(),
        },
        back_urls: BackUrls {
            success: settings.success_url.clone(),
            pending: settings.pending_url.clone(),
            failure: settings.failure_url.clone(),
        },
        auto_return: "approved".to_string(),
        notification_url: settings.notification_url.clone(),
        external_reference: request.external_reference.clone(),
        expires: true,
        expiration_date_from: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        expiration_date_to: (now + settings.expiry).to_rfc3339_opts(SecondsFormat::Millis, true),
    }
}

/// Creates hosted payment sessions for authenticated buyers.
#[derive(Clone)]
pub struct PaymentSessionService {
    gateway: Arc<dyn PaymentGateway>,
    auth: Arc<AuthService>,
    settings: SessionSettings,
    event_sender: Option<Arc<EventSender>>,
}

impl PaymentSessionService {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        auth: Arc<AuthService>,
        settings: SessionSettings,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            gateway,
            auth,
            settings,
            event_sender,
        }
    }

    /// Validates the caller's token and the request, then asks the provider
    /// for a session. Provider failures are returned as-is and never retried.
    #[instrument(skip_all, fields(external_reference = ?request.external_reference))]
    pub async fn create_payment_session(
        &self,
        token: Option<&str>,
        request: CreatePaymentSessionRequest,
    ) -> Result<PaymentSession, ServiceError> {
        let user = self.auth.authenticate_bearer(token)?;
        self.open_session(&user, request).await
    }

    /// Session creation for a caller that is already authenticated.
    pub(crate) async fn open_session(
        &self,
        user: &AuthUser,
        request: CreatePaymentSessionRequest,
    ) -> Result<PaymentSession, ServiceError> {
        request.check()?;

        let preference = build_preference(&request, &self.settings, Utc::now());
        let response = self.gateway.create_preference(&preference).await?;

        info!(
            user_id = %user.user_id,
            preference_id = %response.id,
            total = %preference.total(),
            "payment session created"
        );

        if let (Some(sender), Some(reference)) = (&self.event_sender, &request.external_reference)
        {
            sender.send_or_log(Event::PaymentSessionCreated {
                external_reference: reference.clone(),
                preference_id: response.id.clone(),
            });
        }

        Ok(PaymentSession {
            preference_id: response.id,
            init_point: response.init_point,
            sandbox_init_point: response.sandbox_init_point,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::AuthConfig;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    pub(crate) fn auth() -> Arc<AuthService> {
        Arc::new(AuthService::new(AuthConfig::new(
            "k3Jx9QvT2pLm8ZrW5yNc7HbF4dGs1AeU".into(),
            "storefront-auth".into(),
            "authenticated".into(),
        )))
    }

    pub(crate) fn settings() -> SessionSettings {
        SessionSettings {
            currency: "ARS".into(),
            expiry: ChronoDuration::minutes(30),
            success_url: "https://shop.test/checkout/success".into(),
            pending_url: "https://shop.test/checkout/pending".into(),
            failure_url: "https://shop.test/checkout/failure".into(),
            notification_url: "https://shop.test/api/v1/payments/webhook".into(),
        }
    }

    fn request(shipping_cost: Option<Decimal>) -> CreatePaymentSessionRequest {
        CreatePaymentSessionRequest {
            items: vec![PaymentItem {
                id: "p1".into(),
                title: "Tee".into(),
                description: None,
                quantity: 2,
                unit_price: dec!(100),
            }],
            payer: Payer {
                name: "Ana".into(),
                email: "ana@example.com".into(),
                phone: None,
                address: None,
            },
            shipping_cost,
            external_reference: Some("order_abc".into()),
        }
    }

    fn preference_response() -> PreferenceResponse {
        PreferenceResponse {
            id: "pref_123".into(),
            init_point: "https://provider.test/init".into(),
            sandbox_init_point: Some("https://sandbox.provider.test/init".into()),
        }
    }

    #[test]
    fn shipping_becomes_a_synthetic_line() {
        let now = Utc::now();
        let pref = build_preference(&request(Some(dec!(50))), &settings(), now);

        assert_eq!(pref.items.len(), 2);
        let shipping = &pref.items[1];
        assert_eq!(shipping.id, "shipping");
        assert_eq!(shipping.quantity, 1);
        assert_eq!(shipping.unit_price, dec!(50));
        assert_eq!(pref.total(), dec!(250));
        assert_eq!(pref.auto_return, "approved");
        assert!(pref.expires);
        assert_eq!(pref.external_reference.as_deref(), Some("order_abc"));
    }

    #[test]
    fn free_shipping_adds_no_line() {
        let pref = build_preference(&request(Some(Decimal::ZERO)), &settings(), Utc::now());
        assert_eq!(pref.items.len(), 1);
        let pref = build_preference(&request(None), &settings(), Utc::now());
        assert_eq!(pref.total(), dec!(200));
    }

    #[test]
    fn session_expires_after_the_configured_window() {
        let now = DateTime::parse_from_rfc3339("2026-01-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let pref = build_preference(&request(None), &settings(), now);
        assert_eq!(pref.expiration_date_from, "2026-01-01T10:00:00.000Z");
        assert_eq!(pref.expiration_date_to, "2026-01-01T10:30:00.000Z");
    }

    #[test]
    fn unit_price_is_sent_as_a_json_number() {
        let pref = build_preference(&request(Some(dec!(50))), &settings(), Utc::now());
        let value = serde_json::to_value(&pref).unwrap();
        assert_eq!(value["items"][0]["unit_price"], serde_json::json!(100.0));
        assert_eq!(value["back_urls"]["failure"], "https://shop.test/checkout/failure");
    }

    #[test]
    fn provider_payment_accepts_numeric_ids() {
        let payment: ProviderPayment = serde_json::from_value(serde_json::json!({
            "id": 123456789,
            "status": "approved",
            "external_reference": "order_abc",
            "transaction_amount": 250.0
        }))
        .unwrap();
        assert_eq!(payment.id.as_deref(), Some("123456789"));
        assert_eq!(payment.transaction_amount, Some(dec!(250)));
    }

    #[tokio::test]
    async fn unauthenticated_caller_never_reaches_the_provider() {
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_create_preference().times(0);
        let svc = PaymentSessionService::new(Arc::new(gateway), auth(), settings(), None);

        assert_matches!(
            svc.create_payment_session(None, request(None)).await,
            Err(ServiceError::Unauthorized(_))
        );
        assert_matches!(
            svc.create_payment_session(Some("garbage"), request(None)).await,
            Err(ServiceError::Unauthorized(_))
        );
    }

    #[tokio::test]
    async fn invalid_request_never_reaches_the_provider() {
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_create_preference().times(0);
        let auth = auth();
        let token = auth.issue_token("user-1", None).unwrap();
        let svc = PaymentSessionService::new(Arc::new(gateway), auth, settings(), None);

        let mut empty = request(None);
        empty.items.clear();
        assert_matches!(
            svc.create_payment_session(Some(&token), empty).await,
            Err(ServiceError::ValidationError(_))
        );

        let mut zero_qty = request(None);
        zero_qty.items[0].quantity = 0;
        assert_matches!(
            svc.create_payment_session(Some(&token), zero_qty).await,
            Err(ServiceError::ValidationError(_))
        );

        assert_matches!(
            svc.create_payment_session(Some(&token), request(Some(dec!(-1))))
                .await,
            Err(ServiceError::ValidationError(_))
        );

        let mut huge_price = request(None);
        huge_price.items[0].unit_price =
            Decimal::from_str_exact("70000000000000000000000000000").unwrap();
        assert_matches!(
            svc.create_payment_session(Some(&token), huge_price).await,
            Err(ServiceError::ValidationError(_))
        );
    }

    #[tokio::test]
    async fn session_is_created_with_shipping_line() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_preference()
            .withf(|pref| pref.items.len() == 2 && pref.total() == dec!(250))
            .times(1)
            .returning(|_| Ok(preference_response()));
        let auth = auth();
        let token = auth.issue_token("user-1", None).unwrap();
        let svc = PaymentSessionService::new(Arc::new(gateway), auth, settings(), None);

        let session = svc
            .create_payment_session(Some(&token), request(Some(dec!(50))))
            .await
            .unwrap();
        assert_eq!(session.preference_id, "pref_123");
        assert_eq!(session.init_point, "https://provider.test/init");
    }

    #[tokio::test]
    async fn provider_rejection_is_surfaced_with_its_body() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_preference()
            .times(1)
            .returning(|_| Err(ServiceError::provider(Some(400), r#"{"message":"bad"}"#)));
        let auth = auth();
        let token = auth.issue_token("user-1", None).unwrap();
        let svc = PaymentSessionService::new(Arc::new(gateway), auth, settings(), None);

        let err = svc
            .create_payment_session(Some(&token), request(None))
            .await
            .unwrap_err();
        assert_matches!(
            err,
            ServiceError::PaymentProviderError { status: Some(400), ref body, retryable: false } if body.contains("bad")
        );
    }
}
