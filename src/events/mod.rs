use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::order_status::OrderStatus;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event; a closed or full bus is logged and otherwise ignored.
    pub fn send_or_log(&self, event: Event) {
        if let Err(e) = self.sender.try_send(event) {
            warn!("Dropping domain event: {}", e);
        }
    }
}

/// Domain events emitted by the order store and the webhook receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        order_number: String,
        external_reference: String,
        total: Decimal,
    },
    OrderStatusChanged {
        order_id: Uuid,
        external_reference: String,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    PaymentSessionCreated {
        external_reference: String,
        preference_id: String,
    },
    WebhookUpdateFailed {
        external_reference: String,
        error: String,
    },
}

/// Drains the event bus until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::OrderCreated {
                order_id,
                order_number,
                external_reference,
                total,
            } => {
                counter!("storefront_orders_created_total", 1);
                info!(
                    %order_id,
                    %order_number,
                    %external_reference,
                    %total,
                    "order created"
                );
            }
            Event::OrderStatusChanged {
                order_id,
                external_reference,
                old_status,
                new_status,
            } => {
                counter!("storefront_order_status_transitions_total", 1, "to" => new_status.to_string());
                info!(
                    %order_id,
                    %external_reference,
                    %old_status,
                    %new_status,
                    "order status changed"
                );
            }
            Event::PaymentSessionCreated {
                external_reference,
                preference_id,
            } => {
                info!(%external_reference, %preference_id, "payment session created");
            }
            Event::WebhookUpdateFailed {
                external_reference,
                error: cause,
            } => {
                error!(
                    %external_reference,
                    error = %cause,
                    "payment webhook could not update order; needs operator follow-up"
                );
            }
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_the_receiver_in_order() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);

        sender
            .send(Event::PaymentSessionCreated {
                external_reference: "order_1".into(),
                preference_id: "pref_1".into(),
            })
            .await
            .unwrap();
        sender.send_or_log(Event::WebhookUpdateFailed {
            external_reference: "order_1".into(),
            error: "db down".into(),
        });

        assert!(matches!(
            rx.recv().await,
            Some(Event::PaymentSessionCreated { .. })
        ));
        assert!(matches!(
            rx.recv().await,
            Some(Event::WebhookUpdateFailed { .. })
        ));
    }

    #[tokio::test]
    async fn send_or_log_tolerates_a_closed_bus() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        sender.send_or_log(Event::PaymentSessionCreated {
            external_reference: "order_1".into(),
            preference_id: "pref_1".into(),
        });
        assert!(sender
            .send(Event::PaymentSessionCreated {
                external_reference: "order_1".into(),
                preference_id: "pref_1".into(),
            })
            .await
            .is_err());
    }
}
