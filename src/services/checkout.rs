use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use validator::Validate;

use super::{
    cart::{CartLine, CartStore},
    orders::OrderService,
    payment_gateway::{
        CreatePaymentSessionRequest, Payer, PaymentGateway, PaymentItem, PaymentSessionService,
        ProviderPayment,
    },
    payment_status::PaymentStatusQuery,
};
use crate::{
    auth::AuthUser,
    cache::{ReceiptCache, ReceiptSnapshot},
    errors::ServiceError,
    models::order::{Order, OrderDraft, OrderLineDraft, StatusUpdate},
    models::order_status::{OrderStatus, PaymentStatus},
};

#[derive(Clone, Debug, Deserialize, Validate, ToSchema)]
pub struct CheckoutRequest {
    #[validate]
    pub payer: Payer,
    #[validate(length(min = 1, max = 64))]
    #[serde(default = "default_shipping_method")]
    pub shipping_method: String,
    #[serde(default)]
    pub shipping_cost: Decimal,
    #[serde(default)]
    pub discount: Decimal,
    #[schema(value_type = Option<Object>)]
    pub shipping_address: Option<Value>,
}

fn default_shipping_method() -> String {
    "standard".to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CheckoutResponse {
    pub order_id: uuid::Uuid,
    pub order_number: String,
    pub external_reference: String,
    pub total: Decimal,
    pub preference_id: String,
    pub init_point: String,
    pub sandbox_init_point: Option<String>,
}

/// Query parameters the provider appends when it redirects the buyer back.
pub type RedirectParams = PaymentStatusQuery;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReturnPage {
    Success,
    Pending,
    Failure,
}

impl ReturnPage {
    /// Only the persisted status decides the page.
    pub fn for_status(status: OrderStatus) -> Self {
        match status {
            OrderStatus::Confirmed => Self::Success,
            OrderStatus::Cancelled => Self::Failure,
            OrderStatus::Pending | OrderStatus::PendingPayment => Self::Pending,
        }
    }

    pub fn headline(self) -> &'static str {
        match self {
            Self::Success => "Payment received",
            Self::Pending => "Payment being confirmed",
            Self::Failure => "Payment not completed",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::Success => "Your order is confirmed. A receipt is shown below.",
            Self::Pending => {
                "We are waiting for the payment provider to confirm your payment. \
                 This page will reflect the result once it arrives."
            }
            Self::Failure => "The payment did not complete and no charge was made.",
        }
    }
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct CheckoutReturn {
    pub page: ReturnPage,
    pub headline: String,
    pub message: String,
    pub order: Order,
    /// Display only; may be absent once expired.
    pub receipt: Option<ReceiptSnapshot>,
    pub live_payment: Option<ProviderPayment>,
}

/// Drives cart → order → hosted payment, and renders the return leg from the
/// order store.
#[derive(Clone)]
pub struct CheckoutService {
    orders: OrderService,
    carts: CartStore,
    sessions: PaymentSessionService,
    gateway: Arc<dyn PaymentGateway>,
    receipts: ReceiptCache,
    currency: String,
}

impl CheckoutService {
    pub fn new(
        orders: OrderService,
        carts: CartStore,
        sessions: PaymentSessionService,
        gateway: Arc<dyn PaymentGateway>,
        receipts: ReceiptCache,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            orders,
            carts,
            sessions,
            gateway,
            receipts,
            currency: currency.into(),
        }
    }

    #[instrument(skip(self, request), fields(user_id = %user.user_id))]
    pub async fn begin_checkout(
        &self,
        user: &AuthUser,
        request: CheckoutRequest,
    ) -> Result<CheckoutResponse, ServiceError> {
        request.validate()?;

        let cart = self.carts.snapshot(&user.user_id);
        if cart.is_empty() {
            return Err(ServiceError::ValidationError("cart is empty".to_string()));
        }

        let lines: Vec<OrderLineDraft> = cart.items.iter().map(line_draft).collect();
        let mut draft = OrderDraft::priced(
            user.user_id.clone(),
            lines,
            request.discount,
            request.shipping_cost,
            self.currency.clone(),
        );
        if draft.discount > draft.subtotal {
            return Err(ServiceError::ValidationError(
                "discount exceeds the order subtotal".to_string(),
            ));
        }
        draft.shipping_method = Some(request.shipping_method.clone());
        draft.shipping_address = request.shipping_address.clone();
        draft.payment_snapshot = Some(serde_json::json!({
            "payer_name": request.payer.name,
            "payer_email": request.payer.email,
        }));

        let order = self.orders.create_order(draft).await?;

        let session_request = CreatePaymentSessionRequest {
            items: session_items(&cart.items, request.discount, &order.order_number),
            payer: request.payer.clone(),
            shipping_cost: Some(request.shipping_cost),
            external_reference: Some(order.external_reference.clone()),
        };
        let session = match self.sessions.open_session(user, session_request).await {
            Ok(session) => session,
            Err(e) => {
                warn!(
                    order_number = %order.order_number,
                    error = %e,
                    "payment session failed; cancelling order"
                );
                self.abandon(&order).await;
                return Err(e);
            }
        };

        self.receipts.insert(ReceiptSnapshot {
            order_number: order.order_number.clone(),
            shipping_summary: format!(
                "{} ({} {})",
                request.shipping_method, request.shipping_cost, order.currency
            ),
            payment_summary: format!("Hosted checkout for {}", request.payer.email),
            total: order.total,
        });
        self.carts.clear(&user.user_id);

        info!(
            order_number = %order.order_number,
            preference_id = %session.preference_id,
            "checkout started"
        );

        Ok(CheckoutResponse {
            order_id: order.id,
            order_number: order.order_number,
            external_reference: order.external_reference,
            total: order.total,
            preference_id: session.preference_id,
            init_point: session.init_point,
            sandbox_init_point: session.sandbox_init_point,
        })
    }

    async fn abandon(&self, order: &Order) {
        let update = StatusUpdate {
            status: OrderStatus::Cancelled,
            payment_status: PaymentStatus::Failed,
            payment_id: None,
            payment_method: None,
            payment_details: None,
        };
        if let Err(e) = self
            .orders
            .update_order_status(&order.external_reference, update)
            .await
        {
            warn!(order_number = %order.order_number, error = %e, "failed to cancel abandoned order");
        }
    }

    /// Renders the return leg. The redirect's `status` echo is informational
    /// only.
    #[instrument(skip(self, params), fields(user_id = %user.user_id, external_reference = ?params.external_reference))]
    pub async fn resolve_return(
        &self,
        user: &AuthUser,
        params: RedirectParams,
    ) -> Result<CheckoutReturn, ServiceError> {
        let reference = params
            .external_reference
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| ServiceError::BadRequest("external_reference is required".to_string()))?;

        let order = self
            .orders
            .get_order_by_external_reference(reference)
            .await?
            .filter(|order| order.is_owned_by(&user.user_id))
            .ok_or_else(|| ServiceError::NotFound(format!("order {} not found", reference)))?;

        let live_payment = match params.payment_reference() {
            Some(payment_ref) => match self.gateway.get_payment(payment_ref).await {
                Ok(payment) if payment.external_reference.as_deref() == Some(reference) => {
                    Some(payment)
                }
                Ok(_) => {
                    warn!(%payment_ref, "redirect payment belongs to another order");
                    None
                }
                Err(e) => {
                    warn!(%payment_ref, error = %e, "live payment lookup failed");
                    None
                }
            },
            None => None,
        };

        let page = ReturnPage::for_status(order.status());
        if params.status.as_deref() == Some("approved") && page != ReturnPage::Success {
            info!(order_number = %order.order_number, "redirect claims approval before confirmation");
        }

        Ok(CheckoutReturn {
            page,
            headline: page.headline().to_string(),
            message: page.message().to_string(),
            receipt: self.receipts.get(&order.order_number),
            order,
            live_payment,
        })
    }
}

fn line_draft(line: &CartLine) -> OrderLineDraft {
    OrderLineDraft::priced(
        line.product_id.clone(),
        line.variant_id.clone(),
        line.title.clone(),
        line.quantity,
        line.unit_price,
    )
}

/// Provider lines mirroring the order. With a discount the provider gets one
/// line for the discounted amount, since it does not accept negative prices.
fn session_items(lines: &[CartLine], discount: Decimal, order_number: &str) -> Vec<PaymentItem> {
    if discount > Decimal::ZERO {
        let subtotal: Decimal = lines.iter().map(CartLine::line_total).sum();
        return vec![PaymentItem {
            id: order_number.to_string(),
            title: format!("Order {}", order_number),
            description: Some(format!("{} items, discount {}", lines.len(), discount)),
            quantity: 1,
            unit_price: (subtotal - discount).round_dp(2),
        }];
    }
    lines
        .iter()
        .map(|line| PaymentItem {
            id: line.product_id.clone(),
            title: line.title.clone(),
            description: line.variant_id.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
        })
        .collect()
}
