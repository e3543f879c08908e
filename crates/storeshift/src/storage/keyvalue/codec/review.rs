use storeshift_core::model::{EntityType, Review};
use storeshift_core::storage::Result;

use super::attributes::{self as attr, Item};
use super::ProjectionKey;
use crate::storage::keyvalue::keys;

const ENTITY: EntityType = EntityType::Review;

pub(super) fn encode(review: &Review) -> Result<(Item, Vec<ProjectionKey>)> {
    let mut item = Item::new();
    attr::put_string(&mut item, "id", review.id.to_string());
    attr::put_string(&mut item, "productId", review.product_id.to_string());
    attr::put_string(&mut item, "userId", review.user_id.to_string());
    attr::put_string(&mut item, "authorName", review.author_name.as_str());
    attr::put_number(&mut item, "rating", review.rating);
    attr::put_string(&mut item, "comment", review.comment.as_str());
    attr::put_timestamp(&mut item, "createdAt", review.created_at);
    attr::put_timestamp(&mut item, "updatedAt", review.updated_at);

    Ok((
        item,
        vec![
            ProjectionKey::shared(keys::product_pk(review.product_id)),
            ProjectionKey::shared(keys::user_pk(review.user_id)),
        ],
    ))
}

pub(super) fn decode(item: &Item) -> Result<Review> {
    Ok(Review {
        id: attr::get_uuid(item, ENTITY, "id")?,
        product_id: attr::get_uuid(item, ENTITY, "productId")?,
        user_id: attr::get_uuid(item, ENTITY, "userId")?,
        author_name: attr::get_string(item, ENTITY, "authorName")?,
        rating: attr::get_number(item, ENTITY, "rating")?,
        comment: attr::get_string(item, ENTITY, "comment")?,
        created_at: attr::get_timestamp(item, ENTITY, "createdAt")?,
        updated_at: attr::get_timestamp(item, ENTITY, "updatedAt")?,
    })
}
