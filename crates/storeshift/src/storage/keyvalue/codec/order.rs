use storeshift_core::model::{EntityType, Order, OrderItem};
use storeshift_core::storage::{RepositoryError, Result};

use super::attributes::{self as attr, Item};
use super::ProjectionKey;
use crate::storage::keyvalue::keys;

const ENTITY: EntityType = EntityType::Order;

// Order lines are stored as one JSON string so the item keeps a flat shape.

pub(super) fn encode(order: &Order) -> Result<(Item, Vec<ProjectionKey>)> {
    let items = serde_json::to_string(&order.items)
        .map_err(|e| RepositoryError::encoding(ENTITY, format!("order items: {e}")))?;

    let mut item = Item::new();
    attr::put_string(&mut item, "id", order.id.to_string());
    attr::put_string(&mut item, "userId", order.user_id.to_string());
    attr::put_number(&mut item, "orderCode", order.order_code);
    attr::put_string(&mut item, "items", items);
    attr::put_number(&mut item, "totalPrice", order.total_price);
    attr::put_optional_timestamp(&mut item, "paidAt", order.paid_at);
    attr::put_optional_string(&mut item, "checkoutUrl", order.checkout_url.as_deref());
    attr::put_bool(&mut item, "delivered", order.delivered);
    attr::put_timestamp(&mut item, "createdAt", order.created_at);
    attr::put_timestamp(&mut item, "updatedAt", order.updated_at);

    Ok((
        item,
        vec![
            ProjectionKey::unique(keys::order_code_pk(order.order_code)),
            ProjectionKey::shared(keys::user_pk(order.user_id)),
        ],
    ))
}

pub(super) fn decode(item: &Item) -> Result<Order> {
    let lines = attr::get_string(item, ENTITY, "items")?;
    let items: Vec<OrderItem> = serde_json::from_str(&lines)
        .map_err(|e| RepositoryError::encoding(ENTITY, format!("malformed attribute `items`: {e}")))?;

    Ok(Order {
        id: attr::get_uuid(item, ENTITY, "id")?,
        user_id: attr::get_uuid(item, ENTITY, "userId")?,
        order_code: attr::get_number(item, ENTITY, "orderCode")?,
        items,
        total_price: attr::get_number(item, ENTITY, "totalPrice")?,
        paid_at: attr::get_optional_timestamp(item, ENTITY, "paidAt")?,
        checkout_url: attr::get_optional_string(item, "checkoutUrl"),
        delivered: attr::get_bool(item, ENTITY, "delivered")?,
        created_at: attr::get_timestamp(item, ENTITY, "createdAt")?,
        updated_at: attr::get_timestamp(item, ENTITY, "updatedAt")?,
    })
}
