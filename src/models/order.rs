use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::order_status::{OrderStatus, PaymentStatus, ProviderPaymentStatus};
use crate::{
    entities::{order, order_item},
    errors::ServiceError,
};

/// Two amounts are equal when they agree to the cent.
pub fn money_eq(a: Decimal, b: Decimal) -> bool {
    a.round_dp(2) == b.round_dp(2)
}

/// Most units of one product a single line may hold.
pub const MAX_LINE_QUANTITY: i32 = 999;

/// Largest amount accepted for a unit price, shipping cost or discount.
pub fn max_amount() -> Decimal {
    Decimal::new(99_999_999_999, 2)
}

/// Rejects amounts that are negative, above `max_amount()` or finer than a cent.
pub fn check_amount(field: &str, amount: Decimal) -> Result<(), ServiceError> {
    if amount < Decimal::ZERO {
        return Err(ServiceError::ValidationError(format!(
            "{} must not be negative",
            field
        )));
    }
    if amount > max_amount() {
        return Err(ServiceError::ValidationError(format!(
            "{} must not exceed {}",
            field,
            max_amount()
        )));
    }
    if amount.normalize().scale() > 2 {
        return Err(ServiceError::ValidationError(format!(
            "{} must have at most two decimal places",
            field
        )));
    }
    Ok(())
}

/// `unit_price × quantity`, rounded to the cent.
pub fn checked_line_total(unit_price: Decimal, quantity: i32) -> Result<Decimal, ServiceError> {
    unit_price
        .checked_mul(Decimal::from(quantity))
        .map(|total| total.round_dp(2))
        .ok_or_else(|| ServiceError::ValidationError("line total is out of range".to_string()))
}

/// Sum of amounts, failing instead of overflowing.
pub fn checked_sum<I>(amounts: I) -> Result<Decimal, ServiceError>
where
    I: IntoIterator<Item = Decimal>,
{
    amounts
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, amount| acc.checked_add(amount))
        .ok_or_else(|| ServiceError::ValidationError("order amount is out of range".to_string()))
}

/// A priced line of a new order.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct OrderLineDraft {
    #[validate(length(min = 1, max = 100))]
    pub product_id: String,
    pub variant_id: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    #[validate(range(min = 1, max = 999))]
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

impl OrderLineDraft {
    /// Line whose total is computed from quantity and unit price.
    pub fn priced(
        product_id: impl Into<String>,
        variant_id: Option<String>,
        title: impl Into<String>,
        quantity: i32,
        unit_price: Decimal,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            variant_id,
            title: title.into(),
            quantity,
            unit_price,
            line_total: unit_price
                .saturating_mul(Decimal::from(quantity))
                .round_dp(2),
        }
    }
}

/// Everything needed to persist a new order in `pending`.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderDraft {
    pub user_id: String,
    /// Generated when absent.
    pub order_number: Option<String>,
    /// Generated when absent.
    pub external_reference: Option<String>,
    pub items: Vec<OrderLineDraft>,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub shipping_cost: Decimal,
    pub total: Decimal,
    pub currency: String,
    pub shipping_method: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub shipping_address: Option<Value>,
    #[schema(value_type = Option<Object>)]
    pub payment_snapshot: Option<Value>,
}

impl OrderDraft {
    /// Builds a draft whose subtotal and total are derived from the lines.
    pub fn priced(
        user_id: impl Into<String>,
        items: Vec<OrderLineDraft>,
        discount: Decimal,
        shipping_cost: Decimal,
        currency: impl Into<String>,
    ) -> Self {
        let subtotal = items
            .iter()
            .fold(Decimal::ZERO, |acc, line| acc.saturating_add(line.line_total));
        Self {
            user_id: user_id.into(),
            order_number: None,
            external_reference: None,
            items,
            subtotal,
            discount,
            shipping_cost,
            total: subtotal
                .saturating_sub(discount)
                .saturating_add(shipping_cost)
                .round_dp(2),
            currency: currency.into(),
            shipping_method: None,
            shipping_address: None,
            payment_snapshot: None,
        }
    }

    /// Checks the monetary invariants of a new order.
    pub fn validate_totals(&self) -> Result<(), ServiceError> {
        if self.user_id.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "user_id must not be empty".to_string(),
            ));
        }
        if self.items.is_empty() {
            return Err(ServiceError::ValidationError(
                "an order needs at least one item".to_string(),
            ));
        }
        check_amount("discount", self.discount)?;
        check_amount("shipping_cost", self.shipping_cost)?;

        for (idx, line) in self.items.iter().enumerate() {
            line.validate()?;
            check_amount(&format!("item {} unit_price", idx), line.unit_price)?;
            let expected = checked_line_total(line.unit_price, line.quantity)?;
            if !money_eq(line.line_total, expected) {
                return Err(ServiceError::ValidationError(format!(
                    "item {} total {} does not equal {} x {}",
                    idx, line.line_total, line.quantity, line.unit_price
                )));
            }
        }

        let lines_sum = checked_sum(self.items.iter().map(|line| line.line_total))?;
        if !money_eq(lines_sum, self.subtotal) {
            return Err(ServiceError::ValidationError(format!(
                "subtotal {} does not equal the sum of line totals {}",
                self.subtotal, lines_sum
            )));
        }
        if self.discount > self.subtotal {
            return Err(ServiceError::ValidationError(
                "discount exceeds the order subtotal".to_string(),
            ));
        }

        let expected_total = checked_sum([self.subtotal - self.discount, self.shipping_cost])?;
        if !money_eq(self.total, expected_total) {
            return Err(ServiceError::ValidationError(format!(
                "total {} does not equal subtotal - discount + shipping ({})",
                self.total, expected_total
            )));
        }

        Ok(())
    }
}

/// Payment facts recorded on an order by a status update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PaymentRecord {
    pub payment_id: String,
    pub payment_status: PaymentStatus,
    pub payment_method: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub details: Option<Value>,
}

/// Order state with the payment facts each state is allowed to carry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OrderLifecycle {
    Pending,
    PendingPayment { payment: Option<PaymentRecord> },
    Confirmed { payment: PaymentRecord },
    Cancelled { payment: Option<PaymentRecord> },
}

impl OrderLifecycle {
    pub fn status(&self) -> OrderStatus {
        match self {
            Self::Pending => OrderStatus::Pending,
            Self::PendingPayment { .. } => OrderStatus::PendingPayment,
            Self::Confirmed { .. } => OrderStatus::Confirmed,
            Self::Cancelled { .. } => OrderStatus::Cancelled,
        }
    }

    pub fn payment(&self) -> Option<&PaymentRecord> {
        match self {
            Self::Pending => None,
            Self::PendingPayment { payment } | Self::Cancelled { payment } => payment.as_ref(),
            Self::Confirmed { payment } => Some(payment),
        }
    }

    pub fn payment_status(&self) -> PaymentStatus {
        match self {
            Self::Pending => PaymentStatus::Pending,
            Self::Confirmed { .. } => PaymentStatus::Paid,
            Self::PendingPayment { payment } => payment
                .as_ref()
                .map(|p| p.payment_status)
                .unwrap_or(PaymentStatus::Pending),
            Self::Cancelled { payment } => payment
                .as_ref()
                .map(|p| p.payment_status)
                .unwrap_or(PaymentStatus::Failed),
        }
    }

    /// Rebuilds the lifecycle from the flat columns of a row.
    pub fn from_row(row: &order::Model) -> Result<Self, ServiceError> {
        let status = OrderStatus::from_str(&row.status).map_err(|_| {
            ServiceError::InternalError(format!(
                "order {} has unknown status '{}'",
                row.id, row.status
            ))
        })?;
        let payment_status = PaymentStatus::from_str(&row.payment_status).map_err(|_| {
            ServiceError::InternalError(format!(
                "order {} has unknown payment status '{}'",
                row.id, row.payment_status
            ))
        })?;

        let payment = row.payment_id.as_ref().map(|payment_id| PaymentRecord {
            payment_id: payment_id.clone(),
            payment_status,
            payment_method: row.payment_method.clone(),
            details: row.payment_details.clone(),
        });

        match status {
            OrderStatus::Pending => Ok(Self::Pending),
            OrderStatus::PendingPayment => Ok(Self::PendingPayment { payment }),
            OrderStatus::Cancelled => Ok(Self::Cancelled { payment }),
            OrderStatus::Confirmed => payment
                .map(|payment| Self::Confirmed { payment })
                .ok_or_else(|| {
                    ServiceError::InternalError(format!(
                        "order {} is confirmed without a payment id",
                        row.id
                    ))
                }),
        }
    }
}

/// Requested status change, already mapped to the internal vocabulary.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusUpdate {
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_id: Option<String>,
    pub payment_method: Option<String>,
    pub payment_details: Option<Value>,
}

impl StatusUpdate {
    pub fn from_provider(
        provider_status: &ProviderPaymentStatus,
        payment_id: Option<String>,
        payment_method: Option<String>,
        payment_details: Option<Value>,
    ) -> Self {
        let (status, payment_status) = provider_status.target();
        Self {
            status,
            payment_status,
            payment_id,
            payment_method,
            payment_details,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum StatusUpdateOutcome {
    Applied {
        from: OrderStatus,
        to: OrderStatus,
    },
    Unchanged(OrderStatus),
    /// The order is terminal or the change would move it backwards.
    Ignored {
        current: OrderStatus,
        requested: OrderStatus,
    },
    OrderNotFound,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderLine {
    pub id: Uuid,
    pub product_id: String,
    pub variant_id: Option<String>,
    pub title: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

impl From<order_item::Model> for OrderLine {
    fn from(model: order_item::Model) -> Self {
        Self {
            id: model.id,
            product_id: model.product_id,
            variant_id: model.variant_id,
            title: model.title,
            quantity: model.quantity,
            unit_price: model.unit_price,
            line_total: model.line_total,
        }
    }
}

/// Persisted order with its lines, as returned by the order store.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: String,
    pub external_reference: String,
    #[serde(flatten)]
    pub lifecycle: OrderLifecycle,
    pub payment_status: PaymentStatus,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub shipping_cost: Decimal,
    pub total: Decimal,
    pub currency: String,
    pub shipping_method: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub shipping_address: Option<Value>,
    pub items: Vec<OrderLine>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn from_models(
        row: order::Model,
        items: Vec<order_item::Model>,
    ) -> Result<Self, ServiceError> {
        let lifecycle = OrderLifecycle::from_row(&row)?;
        Ok(Self {
            id: row.id,
            order_number: row.order_number,
            user_id: row.user_id,
            external_reference: row.external_reference,
            payment_status: lifecycle.payment_status(),
            lifecycle,
            subtotal: row.subtotal,
            discount: row.discount,
            shipping_cost: row.shipping_cost,
            total: row.total,
            currency: row.currency,
            shipping_method: row.shipping_method,
            shipping_address: row.shipping_address,
            items: items.into_iter().map(OrderLine::from).collect(),
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    pub fn status(&self) -> OrderStatus {
        self.lifecycle.status()
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}
