pub mod cart;
pub mod checkout;
pub mod orders;
pub mod payment_webhooks;
pub mod payments;

use crate::auth::AuthService;
use crate::cache::ReceiptCache;
use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    cart::CartStore,
    checkout::CheckoutService,
    orders::OrderService,
    payment_gateway::{PaymentGateway, PaymentSessionService, SessionSettings},
    payment_status::PaymentStatusService,
    webhooks::{WebhookService, WebhookSignatureVerifier},
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub payment_sessions: Arc<PaymentSessionService>,
    pub payment_status: Arc<PaymentStatusService>,
    pub webhooks: Arc<WebhookService>,
    pub checkout: Arc<CheckoutService>,
    pub carts: CartStore,
    pub receipts: ReceiptCache,
}

impl AppServices {
    /// Wires every service over one pool and one provider client. The cart
    /// store and receipt cache are fresh per container.
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        auth_service: Arc<AuthService>,
        gateway: Arc<dyn PaymentGateway>,
        config: &AppConfig,
    ) -> Self {
        let orders = OrderService::new(db_pool, Some(event_sender.clone()))
            .with_order_number_prefix(config.order_number_prefix.clone());

        let sessions = PaymentSessionService::new(
            gateway.clone(),
            auth_service.clone(),
            SessionSettings::from_config(config),
            Some(event_sender.clone()),
        );

        let verifier = config
            .webhook_secret
            .as_ref()
            .filter(|secret| !secret.is_empty())
            .map(|secret| WebhookSignatureVerifier::new(secret.clone(), config.webhook_tolerance_secs));
        if verifier.is_none() {
            tracing::warn!("webhook_secret not set; payment webhooks are accepted unsigned");
        }

        let webhooks = WebhookService::new(
            orders.clone(),
            gateway.clone(),
            verifier,
            Some(event_sender),
        );

        let carts = CartStore::new();
        let receipts = ReceiptCache::new(config.receipt_cache_ttl());

        let checkout = CheckoutService::new(
            orders.clone(),
            carts.clone(),
            sessions.clone(),
            gateway.clone(),
            receipts.clone(),
            config.payment_currency.clone(),
        );

        Self {
            orders: Arc::new(orders),
            payment_sessions: Arc::new(sessions),
            payment_status: Arc::new(PaymentStatusService::new(gateway, auth_service)),
            webhooks: Arc::new(webhooks),
            checkout: Arc::new(checkout),
            carts,
            receipts,
        }
    }
}
