use crate::{
    db::DbPool,
    entities::order::{self, ActiveModel as OrderActiveModel, Entity as OrderEntity},
    entities::order_item::{self, ActiveModel as OrderItemActiveModel, Entity as OrderItemEntity},
    errors::ServiceError,
    events::{Event, EventSender},
    models::order::{Order, OrderDraft, StatusUpdate, StatusUpdateOutcome},
    models::order_status::{decide_transition, OrderStatus, PaymentStatus, TransitionDecision},
};
use chrono::{Duration, Utc};
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set, SqlErr, TransactionTrait,
};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

const MAX_ORDER_NUMBER_ATTEMPTS: i64 = 5;
const MAX_STATUS_UPDATE_ATTEMPTS: u32 = 3;

/// `<PREFIX>-<last 8 digits of epoch millis>`
pub fn generate_order_number(prefix: &str, epoch_millis: i64) -> String {
    format!("{}-{:08}", prefix, epoch_millis.rem_euclid(100_000_000))
}

fn is_order_number_collision(err: &DbErr) -> bool {
    matches!(
        err.sql_err(),
        Some(SqlErr::UniqueConstraintViolation(msg)) if msg.contains("order_number")
    )
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

/// Durable source of truth for orders. Status changes go through
/// `update_order_status` only.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    order_number_prefix: String,
}

impl OrderService {
    /// Creates a new order service instance
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
            order_number_prefix: "ORD".to_string(),
        }
    }

    pub fn with_order_number_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.order_number_prefix = prefix.into();
        self
    }

    /// Persists a validated draft and its lines in `pending`, atomically.
    #[instrument(skip(self, draft), fields(user_id = %draft.user_id, items = draft.items.len()))]
    pub async fn create_order(&self, draft: OrderDraft) -> Result<Order, ServiceError> {
        draft.validate_totals()?;

        let order_id = Uuid::new_v4();
        let external_reference = draft
            .external_reference
            .clone()
            .unwrap_or_else(|| format!("order_{}", order_id.simple()));
        let base_millis = Utc::now().timestamp_millis();

        let mut attempt = 0;
        let order = loop {
            let order_number = match &draft.order_number {
                Some(number) => number.clone(),
                None => generate_order_number(&self.order_number_prefix, base_millis + attempt),
            };

            match self
                .insert_order(&draft, order_id, &order_number, &external_reference)
                .await
            {
                Ok(order) => break order,
                Err(ServiceError::DatabaseError(e))
                    if is_order_number_collision(&e)
                        && draft.order_number.is_none()
                        && attempt + 1 < MAX_ORDER_NUMBER_ATTEMPTS =>
                {
                    warn!(%order_number, attempt, "order number collision, retrying");
                    attempt += 1;
                }
                Err(ServiceError::DatabaseError(e)) if is_unique_violation(&e) => {
                    return Err(ServiceError::Conflict(format!(
                        "an order with number or external reference '{}' already exists",
                        external_reference
                    )));
                }
                Err(e) => return Err(e),
            }
        };

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            external_reference = %order.external_reference,
            "Order created successfully"
        );

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender
                .send(Event::OrderCreated {
                    order_id: order.id,
                    order_number: order.order_number.clone(),
                    external_reference: order.external_reference.clone(),
                    total: order.total,
                })
                .await
            {
                warn!(error = %e, order_id = %order.id, "Failed to send order created event");
            }
        }

        Ok(order)
    }

    async fn insert_order(
        &self,
        draft: &OrderDraft,
        order_id: Uuid,
        order_number: &str,
        external_reference: &str,
    ) -> Result<Order, ServiceError> {
        let db = &*self.db_pool;
        let now = Utc::now();

        // Dropping the transaction on any error below rolls back the header.
        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        let header = OrderActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.to_string()),
            user_id: Set(draft.user_id.clone()),
            status: Set(OrderStatus::Pending.to_string()),
            payment_status: Set(PaymentStatus::Pending.to_string()),
            subtotal: Set(draft.subtotal.round_dp(2)),
            discount: Set(draft.discount.round_dp(2)),
            shipping_cost: Set(draft.shipping_cost.round_dp(2)),
            total: Set(draft.total.round_dp(2)),
            currency: Set(draft.currency.clone()),
            shipping_method: Set(draft.shipping_method.clone()),
            external_reference: Set(external_reference.to_string()),
            payment_id: Set(None),
            payment_method: Set(None),
            payment_details: Set(None),
            shipping_address: Set(draft.shipping_address.clone()),
            payment_snapshot: Set(draft.payment_snapshot.clone()),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        };

        let header = header.insert(&txn).await.map_err(|e| {
            error!(error = %e, %order_id, "Failed to insert order header");
            ServiceError::DatabaseError(e)
        })?;

        let mut items = Vec::with_capacity(draft.items.len());
        for (idx, line) in draft.items.iter().enumerate() {
            let item = OrderItemActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id.clone()),
                variant_id: Set(line.variant_id.clone()),
                title: Set(line.title.clone()),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price.round_dp(2)),
                line_total: Set(line.line_total.round_dp(2)),
                // Offset keeps lines in draft order when sorted by creation time.
                created_at: Set(now + Duration::microseconds(idx as i64)),
            };
            let item = item.insert(&txn).await.map_err(|e| {
                error!(error = %e, %order_id, line = idx, "Failed to insert order line");
                ServiceError::DatabaseError(e)
            })?;
            items.push(item);
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, %order_id, "Failed to commit order creation transaction");
            ServiceError::DatabaseError(e)
        })?;

        Order::from_models(header, items)
    }

    /// All orders of a user, newest first, with their lines.
    #[instrument(skip(self))]
    pub async fn get_orders_for_user(&self, user_id: &str) -> Result<Vec<Order>, ServiceError> {
        let db = &*self.db_pool;

        let rows = OrderEntity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .order_by_desc(order::Column::OrderNumber)
            .all(db)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to list orders for user");
                ServiceError::DatabaseError(e)
            })?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
        let mut items_by_order: HashMap<Uuid, Vec<order_item::Model>> = HashMap::new();
        for item in OrderItemEntity::find()
            .filter(order_item::Column::OrderId.is_in(ids))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(db)
            .await?
        {
            items_by_order.entry(item.order_id).or_default().push(item);
        }

        rows.into_iter()
            .map(|row| {
                let items = items_by_order.remove(&row.id).unwrap_or_default();
                Order::from_models(row, items)
            })
            .collect()
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order_by_id(&self, order_id: Uuid) -> Result<Option<Order>, ServiceError> {
        let row = OrderEntity::find_by_id(order_id)
            .one(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, %order_id, "Failed to fetch order from database");
                ServiceError::DatabaseError(e)
            })?;
        self.with_items(row).await
    }

    #[instrument(skip(self))]
    pub async fn get_order_by_number(
        &self,
        order_number: &str,
    ) -> Result<Option<Order>, ServiceError> {
        let row = OrderEntity::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(&*self.db_pool)
            .await?;
        self.with_items(row).await
    }

    #[instrument(skip(self))]
    pub async fn get_order_by_external_reference(
        &self,
        external_reference: &str,
    ) -> Result<Option<Order>, ServiceError> {
        let row = OrderEntity::find()
            .filter(order::Column::ExternalReference.eq(external_reference))
            .one(&*self.db_pool)
            .await?;
        self.with_items(row).await
    }

    async fn with_items(&self, row: Option<order::Model>) -> Result<Option<Order>, ServiceError> {
        let Some(row) = row else {
            return Ok(None);
        };
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(row.id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(&*self.db_pool)
            .await?;
        Order::from_models(row, items).map(Some)
    }

    /// Applies a status change to the order identified by its external
    /// reference. Terminal orders never change; repeating an update is a no-op.
    #[instrument(skip(self, update), fields(requested = %update.status))]
    pub async fn update_order_status(
        &self,
        external_reference: &str,
        update: StatusUpdate,
    ) -> Result<StatusUpdateOutcome, ServiceError> {
        let db = &*self.db_pool;

        for attempt in 1..=MAX_STATUS_UPDATE_ATTEMPTS {
            let row = OrderEntity::find()
                .filter(order::Column::ExternalReference.eq(external_reference))
                .one(db)
                .await
                .map_err(|e| {
                    error!(error = %e, %external_reference, "Failed to find order for status update");
                    ServiceError::DatabaseError(e)
                })?;

            let Some(row) = row else {
                info!(%external_reference, "No order for external reference");
                return Ok(StatusUpdateOutcome::OrderNotFound);
            };

            let current = OrderStatus::from_str(&row.status).map_err(|_| {
                ServiceError::InternalError(format!(
                    "order {} has unknown status '{}'",
                    row.id, row.status
                ))
            })?;

            match decide_transition(current, update.status) {
                TransitionDecision::Apply => {}
                TransitionDecision::Unchanged => {
                    info!(%external_reference, status = %current, "Status unchanged");
                    return Ok(StatusUpdateOutcome::Unchanged(current));
                }
                TransitionDecision::IgnoreTerminal | TransitionDecision::IgnoreRegression => {
                    warn!(
                        %external_reference,
                        current = %current,
                        requested = %update.status,
                        "Ignoring status update that would leave a terminal state or move backwards"
                    );
                    counter!("storefront_order_status_ignored_total", 1);
                    return Ok(StatusUpdateOutcome::Ignored {
                        current,
                        requested: update.status,
                    });
                }
            }

            if self.compare_and_swap(&row, &update).await? {
                info!(
                    order_id = %row.id,
                    %external_reference,
                    old_status = %current,
                    new_status = %update.status,
                    "Order status updated successfully"
                );

                if let Some(event_sender) = &self.event_sender {
                    if let Err(e) = event_sender
                        .send(Event::OrderStatusChanged {
                            order_id: row.id,
                            external_reference: external_reference.to_string(),
                            old_status: current,
                            new_status: update.status,
                        })
                        .await
                    {
                        warn!(error = %e, order_id = %row.id, "Failed to send order status changed event");
                    }
                }

                return Ok(StatusUpdateOutcome::Applied {
                    from: current,
                    to: update.status,
                });
            }

            warn!(%external_reference, attempt, "Concurrent status update detected, re-reading order");
        }

        Err(ServiceError::Conflict(format!(
            "order '{}' kept changing while updating its status",
            external_reference
        )))
    }

    /// Writes `update` only if the row still has the status and version it
    /// was read with. Returns whether the write won.
    async fn compare_and_swap(
        &self,
        row: &order::Model,
        update: &StatusUpdate,
    ) -> Result<bool, ServiceError> {
        let payment_id = update.payment_id.clone().or_else(|| row.payment_id.clone());
        if update.status == OrderStatus::Confirmed && payment_id.is_none() {
            return Err(ServiceError::ValidationError(
                "a confirmed order needs a payment id".to_string(),
            ));
        }
        let payment_method = update
            .payment_method
            .clone()
            .or_else(|| row.payment_method.clone());
        let payment_details = update
            .payment_details
            .clone()
            .or_else(|| row.payment_details.clone());

        let result = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(update.status.to_string()))
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(update.payment_status.to_string()),
            )
            .col_expr(order::Column::PaymentId, Expr::value(payment_id))
            .col_expr(order::Column::PaymentMethod, Expr::value(payment_method))
            .col_expr(order::Column::PaymentDetails, Expr::value(payment_details))
            .col_expr(order::Column::Version, Expr::value(row.version + 1))
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(order::Column::Id.eq(row.id))
            .filter(order::Column::Version.eq(row.version))
            .filter(order::Column::Status.eq(row.status.clone()))
            .exec(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, order_id = %row.id, "Failed to update order status");
                ServiceError::DatabaseError(e)
            })?;

        Ok(result.rows_affected == 1)
    }
}
