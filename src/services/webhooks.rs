use hmac::{Hmac, Mac};
use metrics::counter;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use super::{
    orders::OrderService,
    payment_gateway::{string_or_number, PaymentGateway, ProviderPayment},
};
use crate::{
    errors::ServiceError,
    events::{Event, EventSender},
    models::order::{StatusUpdate, StatusUpdateOutcome},
    models::order_status::ProviderPaymentStatus,
};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-signature";

/// HMAC-SHA256 over `"<ts>.<body>"`, sent as `x-signature: ts=<unix>,v1=<hex>`.
#[derive(Clone)]
pub struct WebhookSignatureVerifier {
    secret: String,
    tolerance_secs: u64,
}

impl WebhookSignatureVerifier {
    pub fn new(secret: impl Into<String>, tolerance_secs: u64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs,
        }
    }

    fn mac(&self, timestamp: &str, body: &[u8]) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).ok()?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        Some(mac)
    }

    /// Header value for `body` signed at `timestamp`.
    pub fn sign(&self, timestamp: i64, body: &[u8]) -> String {
        let ts = timestamp.to_string();
        let digest = self
            .mac(&ts, body)
            .map(|mac| hex::encode(mac.finalize().into_bytes()))
            .unwrap_or_default();
        format!("ts={},v1={}", ts, digest)
    }

    pub fn verify(&self, header: Option<&str>, body: &[u8], now: i64) -> bool {
        let Some(header) = header else {
            return false;
        };

        let mut ts = None;
        let mut v1 = None;
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("ts", value)) => ts = Some(value),
                Some(("v1", value)) => v1 = Some(value),
                _ => {}
            }
        }
        let (Some(ts), Some(v1)) = (ts, v1) else {
            return false;
        };

        let Ok(ts_secs) = ts.parse::<i64>() else {
            return false;
        };
        if (now - ts_secs).unsigned_abs() > self.tolerance_secs {
            return false;
        }

        let Ok(expected) = hex::decode(v1) else {
            return false;
        };
        self.mac(ts, body)
            .map(|mac| mac.verify_slice(&expected).is_ok())
            .unwrap_or(false)
    }
}

/// Inbound notification. Only `data.id` is guaranteed; richer senders embed
/// the payment itself.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookNotification {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    /// Older senders name the event here instead of `type`.
    pub topic: Option<String>,
    pub action: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: Option<String>,
    #[serde(default)]
    pub data: WebhookData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookData {
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

impl WebhookNotification {
    /// `type`, falling back to `topic`.
    pub fn kind(&self) -> Option<&str> {
        self.event_type.as_deref().or(self.topic.as_deref())
    }
}

impl WebhookData {
    /// The embedded payment, when it carries enough to act on.
    fn embedded_payment(&self) -> Option<ProviderPayment> {
        if self.status.is_none() || self.external_reference.is_none() {
            return None;
        }
        Some(ProviderPayment {
            id: self.id.clone(),
            status: self.status.clone(),
            status_detail: self.status_detail.clone(),
            external_reference: self.external_reference.clone(),
            transaction_amount: self.transaction_amount,
            payment_method_id: self.payment_method_id.clone(),
            payment_type_id: self.payment_type_id.clone(),
            date_created: self.date_created.clone(),
            date_approved: self.date_approved.clone(),
        })
    }
}

/// What happened to a parsed notification. The provider always gets a 200.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    SignatureRejected,
    IgnoredEventType(String),
    MissingPaymentId,
    PaymentFetchFailed,
    MissingExternalReference,
    Processed(StatusUpdateOutcome),
    UpdateFailed,
}

/// Turns provider notifications into order status updates.
#[derive(Clone)]
pub struct WebhookService {
    orders: OrderService,
    gateway: Arc<dyn PaymentGateway>,
    verifier: Option<WebhookSignatureVerifier>,
    event_sender: Option<Arc<EventSender>>,
}

impl WebhookService {
    pub fn new(
        orders: OrderService,
        gateway: Arc<dyn PaymentGateway>,
        verifier: Option<WebhookSignatureVerifier>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            orders,
            gateway,
            verifier,
            event_sender,
        }
    }

    /// Only an unparseable body is an error; everything else is acknowledged.
    #[instrument(skip_all)]
    pub async fn handle(
        &self,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<WebhookOutcome, ServiceError> {
        let notification: WebhookNotification = serde_json::from_slice(body)
            .map_err(|e| ServiceError::BadRequest(format!("invalid webhook payload: {}", e)))?;

        if let Some(verifier) = &self.verifier {
            if !verifier.verify(signature, body, chrono::Utc::now().timestamp()) {
                warn!(
                    security_event = "webhook_signature_invalid",
                    has_signature = signature.is_some(),
                    "Payment webhook signature verification failed; acknowledging without processing"
                );
                counter!("storefront_webhook_signature_rejected_total", 1);
                return Ok(WebhookOutcome::SignatureRejected);
            }
        }

        let event_type = notification.kind().unwrap_or_default().to_string();
        if event_type != "payment" {
            info!(%event_type, action = ?notification.action, "Ignoring non-payment webhook");
            return Ok(WebhookOutcome::IgnoredEventType(event_type));
        }

        let payment = match notification.data.embedded_payment() {
            Some(payment) => payment,
            None => {
                let Some(payment_id) = notification.data.id.as_deref() else {
                    warn!("Payment webhook without data.id; nothing to fetch");
                    return Ok(WebhookOutcome::MissingPaymentId);
                };
                match self.gateway.get_payment(payment_id).await {
                    Ok(payment) => payment,
                    Err(e) => {
                        error!(
                            %payment_id,
                            error = %e,
                            retryable = e.is_retryable(),
                            "Failed to fetch payment for webhook"
                        );
                        counter!("storefront_webhook_update_failures_total", 1);
                        return Ok(WebhookOutcome::PaymentFetchFailed);
                    }
                }
            }
        };

        let Some(external_reference) = payment.external_reference.clone() else {
            info!(payment_id = ?payment.id, "Payment has no external reference; nothing to update");
            return Ok(WebhookOutcome::MissingExternalReference);
        };

        let provider_status = ProviderPaymentStatus::parse(payment.status.as_deref().unwrap_or(""));
        let payment_id = payment
            .id
            .clone()
            .or_else(|| notification.data.id.clone())
            .unwrap_or_else(|| {
                warn!(%external_reference, "Payment carries no id; recording the external reference instead");
                external_reference.clone()
            });
        let details = serde_json::to_value(&payment).ok();
        let update = StatusUpdate::from_provider(
            &provider_status,
            Some(payment_id),
            payment.payment_method_id.clone(),
            details,
        );

        match self
            .orders
            .update_order_status(&external_reference, update)
            .await
        {
            Ok(outcome) => {
                if outcome == StatusUpdateOutcome::OrderNotFound {
                    info!(%external_reference, "Webhook references no known order");
                } else {
                    info!(%external_reference, ?outcome, "Webhook processed");
                }
                Ok(WebhookOutcome::Processed(outcome))
            }
            Err(e) => {
                error!(%external_reference, error = %e, "Webhook failed to update order");
                counter!("storefront_webhook_update_failures_total", 1);
                if let Some(sender) = &self.event_sender {
                    sender.send_or_log(Event::WebhookUpdateFailed {
                        external_reference: external_reference.clone(),
                        error: e.to_string(),
                    });
                }
                Ok(WebhookOutcome::UpdateFailed)
            }
        }
    }
}
