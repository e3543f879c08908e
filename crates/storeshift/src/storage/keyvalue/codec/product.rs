use storeshift_core::model::{EntityType, Product};
use storeshift_core::storage::Result;

use super::attributes::{self as attr, Item};
use super::ProjectionKey;
use crate::storage::keyvalue::keys;

const ENTITY: EntityType = EntityType::Product;

pub(super) fn encode(product: &Product) -> Result<(Item, Vec<ProjectionKey>)> {
    attr::require_key_part(ENTITY, "category", &product.category)?;

    let mut item = Item::new();
    attr::put_string(&mut item, "id", product.id.to_string());
    attr::put_string(&mut item, "name", product.name.as_str());
    attr::put_string(&mut item, "category", product.category.as_str());
    attr::put_string(&mut item, "description", product.description.as_str());
    attr::put_number(&mut item, "price", product.price);
    attr::put_string_list(&mut item, "images", &product.images);
    attr::put_number(&mut item, "stock", product.stock);
    attr::put_timestamp(&mut item, "createdAt", product.created_at);
    attr::put_timestamp(&mut item, "updatedAt", product.updated_at);

    Ok((
        item,
        vec![ProjectionKey::shared(keys::category_pk(&product.category))],
    ))
}

pub(super) fn decode(item: &Item) -> Result<Product> {
    Ok(Product {
        id: attr::get_uuid(item, ENTITY, "id")?,
        name: attr::get_string(item, ENTITY, "name")?,
        category: attr::get_string(item, ENTITY, "category")?,
        description: attr::get_string(item, ENTITY, "description")?,
        price: attr::get_number(item, ENTITY, "price")?,
        images: attr::get_string_list(item, ENTITY, "images")?,
        stock: attr::get_number(item, ENTITY, "stock")?,
        created_at: attr::get_timestamp(item, ENTITY, "createdAt")?,
        updated_at: attr::get_timestamp(item, ENTITY, "updatedAt")?,
    })
}
