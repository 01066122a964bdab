//! Order status vocabulary and the provider-status mapping.
//!
//! `pending` may move to `pending_payment`, `confirmed` or `cancelled`;
//! `pending_payment` may move to `confirmed` or `cancelled`. `confirmed` and
//! `cancelled` are terminal and sticky: once reached, no later event changes
//! the order, including one reporting the other terminal state.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    PendingPayment,
    Confirmed,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Confirmed | OrderStatus::Cancelled)
    }

    /// Edges of the state graph, excluding self-loops.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, PendingPayment)
                | (Pending, Confirmed)
                | (Pending, Cancelled)
                | (PendingPayment, Confirmed)
                | (PendingPayment, Cancelled)
        )
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

/// Payment status as reported by the provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderPaymentStatus {
    Approved,
    Pending,
    InProcess,
    Rejected,
    Cancelled,
    Other(String),
}

impl ProviderPaymentStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "approved" => Self::Approved,
            "pending" => Self::Pending,
            "in_process" => Self::InProcess,
            "rejected" => Self::Rejected,
            "cancelled" => Self::Cancelled,
            other => Self::Other(other.to_string()),
        }
    }

    /// Internal (order status, payment status) this provider status maps to.
    /// Unknown statuses are treated as still pending.
    pub fn target(&self) -> (OrderStatus, PaymentStatus) {
        match self {
            Self::Approved => (OrderStatus::Confirmed, PaymentStatus::Paid),
            Self::Rejected | Self::Cancelled => (OrderStatus::Cancelled, PaymentStatus::Failed),
            Self::Pending | Self::InProcess | Self::Other(_) => {
                (OrderStatus::PendingPayment, PaymentStatus::Pending)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionDecision {
    /// Write the new status.
    Apply,
    /// Already in the requested status; nothing to write.
    Unchanged,
    /// Current status is terminal; the event is dropped.
    IgnoreTerminal,
    /// Not an edge of the graph (e.g. `pending_payment` back to `pending`).
    IgnoreRegression,
}

pub fn decide_transition(current: OrderStatus, requested: OrderStatus) -> TransitionDecision {
    if current == requested {
        TransitionDecision::Unchanged
    } else if current.is_terminal() {
        TransitionDecision::IgnoreTerminal
    } else if current.can_transition_to(requested) {
        TransitionDecision::Apply
    } else {
        TransitionDecision::IgnoreRegression
    }
}
