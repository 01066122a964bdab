use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    errors::ServiceError,
    models::order::{check_amount, checked_line_total, MAX_LINE_QUANTITY},
};

/// A cart line. The unit price is captured when the item is added and is what
/// checkout charges.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CartLine {
    pub product_id: String,
    pub variant_id: Option<String>,
    pub title: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl CartLine {
    /// Lines are bounded on the way in, so this never saturates in practice.
    pub fn line_total(&self) -> Decimal {
        self.unit_price.saturating_mul(Decimal::from(self.quantity))
    }

    fn matches(&self, product_id: &str, variant_id: Option<&str>) -> bool {
        self.product_id == product_id && self.variant_id.as_deref() == variant_id
    }
}

#[derive(Clone, Debug, Deserialize, Validate, ToSchema)]
pub struct AddCartItem {
    #[validate(length(min = 1, max = 100))]
    pub product_id: String,
    pub variant_id: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    #[validate(range(min = 1, max = 999))]
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct CartSnapshot {
    pub items: Vec<CartLine>,
    pub item_count: i32,
    pub subtotal: Decimal,
}

impl CartSnapshot {
    fn from_lines(items: Vec<CartLine>) -> Self {
        Self {
            item_count: items
                .iter()
                .fold(0i32, |acc, l| acc.saturating_add(l.quantity)),
            subtotal: sum_lines(&items),
            items,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn sum_lines(lines: &[CartLine]) -> Decimal {
    lines
        .iter()
        .fold(Decimal::ZERO, |acc, line| acc.saturating_add(line.line_total()))
}

fn check_quantity(quantity: i32) -> Result<(), ServiceError> {
    if quantity > MAX_LINE_QUANTITY {
        return Err(ServiceError::ValidationError(format!(
            "quantity must not exceed {}",
            MAX_LINE_QUANTITY
        )));
    }
    Ok(())
}

/// In-process carts keyed by user id. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct CartStore {
    carts: Arc<DashMap<String, Vec<CartLine>>>,
}

impl CartStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a line, or bumps the quantity of a matching one. A repeat add
    /// refreshes the captured price and title.
    #[instrument(skip(self, item), fields(product_id = %item.product_id))]
    pub fn add_item(&self, user_id: &str, item: AddCartItem) -> Result<CartSnapshot, ServiceError> {
        item.validate()?;
        check_amount("unit_price", item.unit_price)?;

        let mut lines = self.carts.entry(user_id.to_string()).or_default();
        let existing = lines
            .iter()
            .position(|l| l.matches(&item.product_id, item.variant_id.as_deref()));
        match existing {
            Some(idx) => {
                let quantity = lines[idx].quantity.saturating_add(item.quantity);
                check_quantity(quantity)?;
                checked_line_total(item.unit_price, quantity)?;
                let line = &mut lines[idx];
                line.quantity = quantity;
                line.unit_price = item.unit_price;
                line.title = item.title;
            }
            None => {
                checked_line_total(item.unit_price, item.quantity)?;
                lines.push(CartLine {
                    product_id: item.product_id,
                    variant_id: item.variant_id,
                    title: item.title,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                });
            }
        }
        debug!(lines = lines.len(), "cart updated");
        Ok(CartSnapshot::from_lines(lines.clone()))
    }

    /// Sets a line's quantity; zero removes it.
    pub fn update_quantity(
        &self,
        user_id: &str,
        product_id: &str,
        variant_id: Option<&str>,
        quantity: i32,
    ) -> Result<CartSnapshot, ServiceError> {
        if quantity < 0 {
            return Err(ServiceError::ValidationError(
                "quantity must not be negative".to_string(),
            ));
        }
        if quantity == 0 {
            return self.remove_item(user_id, product_id, variant_id);
        }
        check_quantity(quantity)?;

        let mut lines = self
            .carts
            .get_mut(user_id)
            .ok_or_else(|| ServiceError::NotFound(format!("cart item {} not found", product_id)))?;
        let line = lines
            .iter_mut()
            .find(|l| l.matches(product_id, variant_id))
            .ok_or_else(|| ServiceError::NotFound(format!("cart item {} not found", product_id)))?;
        line.quantity = quantity;
        Ok(CartSnapshot::from_lines(lines.clone()))
    }

    pub fn remove_item(
        &self,
        user_id: &str,
        product_id: &str,
        variant_id: Option<&str>,
    ) -> Result<CartSnapshot, ServiceError> {
        let mut lines = self
            .carts
            .get_mut(user_id)
            .ok_or_else(|| ServiceError::NotFound(format!("cart item {} not found", product_id)))?;
        let before = lines.len();
        lines.retain(|l| !l.matches(product_id, variant_id));
        if lines.len() == before {
            return Err(ServiceError::NotFound(format!(
                "cart item {} not found",
                product_id
            )));
        }
        Ok(CartSnapshot::from_lines(lines.clone()))
    }

    pub fn clear(&self, user_id: &str) {
        self.carts.remove(user_id);
    }

    pub fn snapshot(&self, user_id: &str) -> CartSnapshot {
        let lines = self
            .carts
            .get(user_id)
            .map(|lines| lines.clone())
            .unwrap_or_default();
        CartSnapshot::from_lines(lines)
    }

    pub fn subtotal(&self, user_id: &str) -> Decimal {
        self.carts
            .get(user_id)
            .map(|lines| sum_lines(&lines))
            .unwrap_or(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;
    use std::str::FromStr;

    fn item(product_id: &str, quantity: i32, price: Decimal) -> AddCartItem {
        AddCartItem {
            product_id: product_id.into(),
            variant_id: None,
            title: format!("Product {}", product_id),
            quantity,
            unit_price: price,
        }
    }

    #[test]
    fn adding_the_same_product_merges_lines() {
        let store = CartStore::new();
        store.add_item("u1", item("p1", 1, dec!(100))).unwrap();
        let cart = store.add_item("u1", item("p1", 2, dec!(100))).unwrap();

        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.item_count, 3);
        assert_eq!(cart.subtotal, dec!(300));
    }

    #[test]
    fn variants_are_distinct_lines() {
        let store = CartStore::new();
        store.add_item("u1", item("p1", 1, dec!(100))).unwrap();
        let mut large = item("p1", 1, dec!(120));
        large.variant_id = Some("L".into());
        let cart = store.add_item("u1", large).unwrap();

        assert_eq!(cart.items.len(), 2);
        assert_eq!(store.subtotal("u1"), dec!(220));
    }

    #[test]
    fn update_and_remove() {
        let store = CartStore::new();
        store.add_item("u1", item("p1", 1, dec!(10))).unwrap();
        store.add_item("u1", item("p2", 1, dec!(5))).unwrap();

        let cart = store.update_quantity("u1", "p1", None, 4).unwrap();
        assert_eq!(cart.subtotal, dec!(45));

        let cart = store.update_quantity("u1", "p2", None, 0).unwrap();
        assert_eq!(cart.items.len(), 1);

        assert_matches!(
            store.remove_item("u1", "nope", None),
            Err(ServiceError::NotFound(_))
        );
        assert_matches!(
            store.update_quantity("u1", "p1", None, -1),
            Err(ServiceError::ValidationError(_))
        );
    }

    #[test]
    fn invalid_items_are_rejected() {
        let store = CartStore::new();
        assert_matches!(
            store.add_item("u1", item("p1", 0, dec!(10))),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            store.add_item("u1", item("p1", 1, dec!(-1))),
            Err(ServiceError::ValidationError(_))
        );
        assert!(store.snapshot("u1").is_empty());
    }

    #[test]
    fn out_of_range_prices_never_reach_the_cart() {
        let store = CartStore::new();
        let huge = Decimal::from_str("70000000000000000000000000000").unwrap();
        assert_matches!(
            store.add_item("u1", item("p1", 2, huge)),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            store.add_item("u1", item("p1", 1, dec!(9.999))),
            Err(ServiceError::ValidationError(_))
        );

        let cart = store.snapshot("u1");
        assert!(cart.is_empty());
        assert_eq!(cart.subtotal, Decimal::ZERO);
    }

    #[test]
    fn merged_quantity_is_capped() {
        let store = CartStore::new();
        store.add_item("u1", item("p1", 999, dec!(1))).unwrap();
        assert_matches!(
            store.add_item("u1", item("p1", 1, dec!(1))),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            store.update_quantity("u1", "p1", None, 1000),
            Err(ServiceError::ValidationError(_))
        );
        assert_eq!(store.snapshot("u1").item_count, 999);
    }

    #[test]
    fn carts_are_isolated_per_user_and_per_store() {
        let a = CartStore::new();
        let b = CartStore::new();
        a.add_item("u1", item("p1", 1, dec!(10))).unwrap();

        assert!(a.snapshot("u2").is_empty());
        assert!(b.snapshot("u1").is_empty());

        let shared = a.clone();
        shared.clear("u1");
        assert!(a.snapshot("u1").is_empty());
        assert_eq!(a.subtotal("u1"), Decimal::ZERO);
    }
}
