use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Timestamp;

/// One line of an order, priced at checkout time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: Uuid,
    pub name: String,
    pub quantity: u32,
    pub price: i64,
}

/// A customer order.
///
/// `order_code` is the numeric reference handed to the payment provider and
/// is unique across all orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_code: i64,
    pub items: Vec<OrderItem>,
    pub total_price: i64,
    pub paid_at: Option<Timestamp>,
    pub checkout_url: Option<String>,
    pub delivered: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Order {
    /// Creates an unpaid order. The total is computed from the items.
    pub fn new(user_id: Uuid, order_code: i64, items: Vec<OrderItem>) -> Self {
        let now = Timestamp::now();
        let total_price = items
            .iter()
            .map(|item| item.price * i64::from(item.quantity))
            .sum();
        Self {
            id: Uuid::new_v4(),
            user_id,
            order_code,
            items,
            total_price,
            paid_at: None,
            checkout_url: None,
            delivered: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_paid(&self) -> bool {
        self.paid_at.is_some()
    }
}
