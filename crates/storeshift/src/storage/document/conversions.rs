//! BSON document conversion functions.
//!
//! Pure functions for converting between MongoDB documents and domain types.
//! Documents use the record's UUID string as `_id`, camelCase field names and
//! BSON dates for timestamps.

use mongodb::bson::{doc, Bson, DateTime as BsonDateTime, Document};
use uuid::Uuid;

use storeshift_core::model::{
    Order, OrderItem, PasswordReset, Product, Review, Timestamp, User,
};
use storeshift_core::storage::{
    OrderFilter, ProductFilter, RepositoryError, Result, ReviewFilter, UserFilter,
};

// ============================================================================
// Collections
// ============================================================================

pub const USERS: &str = "users";
pub const PRODUCTS: &str = "products";
pub const ORDERS: &str = "orders";
pub const REVIEWS: &str = "reviews";

pub fn id_filter(id: Uuid) -> Document {
    doc! { "_id": id.to_string() }
}

/// Matches the record only while its stored `updatedAt` is not later than
/// `updated_at`.
pub fn not_newer_filter(id: Uuid, updated_at: Timestamp) -> Document {
    doc! { "_id": id.to_string(), "updatedAt": { "$lte": bson_date(updated_at) } }
}

// ============================================================================
// Field helpers
// ============================================================================

fn bson_date(ts: Timestamp) -> BsonDateTime {
    BsonDateTime::from_millis(ts.timestamp_millis())
}

fn invalid(field: &str, reason: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::InvalidData(format!("document field `{field}`: {reason}"))
}

fn get_str(doc: &Document, field: &str) -> Result<String> {
    doc.get_str(field)
        .map(str::to_string)
        .map_err(|e| invalid(field, e))
}

fn get_optional_str(doc: &Document, field: &str) -> Option<String> {
    doc.get_str(field).ok().map(str::to_string)
}

fn get_uuid(doc: &Document, field: &str) -> Result<Uuid> {
    let value = get_str(doc, field)?;
    Uuid::parse_str(&value).map_err(|e| invalid(field, e))
}

/// Reads an integer stored as Int32, Int64 or a whole Double.
fn get_integer(doc: &Document, field: &str) -> Result<i64> {
    match doc.get(field) {
        Some(Bson::Int32(value)) => Ok(i64::from(*value)),
        Some(Bson::Int64(value)) => Ok(*value),
        Some(Bson::Double(value)) if value.fract() == 0.0 => Ok(*value as i64),
        Some(other) => Err(invalid(field, format!("expected integer, got {other}"))),
        None => Err(invalid(field, "missing")),
    }
}

fn get_bounded<T: TryFrom<i64>>(doc: &Document, field: &str) -> Result<T> {
    let value = get_integer(doc, field)?;
    T::try_from(value).map_err(|_| invalid(field, format!("{value} is out of range")))
}

fn get_timestamp(doc: &Document, field: &str) -> Result<Timestamp> {
    let value = doc.get_datetime(field).map_err(|e| invalid(field, e))?;
    Timestamp::from_millis(value.timestamp_millis()).ok_or_else(|| invalid(field, "out of range"))
}

fn get_optional_timestamp(doc: &Document, field: &str) -> Result<Option<Timestamp>> {
    match doc.get(field) {
        None | Some(Bson::Null) => Ok(None),
        Some(_) => get_timestamp(doc, field).map(Some),
    }
}

fn get_bool(doc: &Document, field: &str) -> Result<bool> {
    doc.get_bool(field).map_err(|e| invalid(field, e))
}

// ============================================================================
// User conversions
// ============================================================================

pub fn user_to_document(user: &User) -> Document {
    let mut document = doc! {
        "_id": user.id.to_string(),
        "name": &user.name,
        "email": &user.email,
        "password": &user.password,
        "role": user.role.as_str(),
        "createdAt": bson_date(user.created_at),
        "updatedAt": bson_date(user.updated_at),
    };
    if let Some(reset) = &user.reset_password {
        document.insert("resetPasswordToken", &reset.token);
        document.insert("resetPasswordExpiresAt", bson_date(reset.expires_at));
    }
    document
}

pub fn document_to_user(doc: &Document) -> Result<User> {
    let reset_password = match get_optional_str(doc, "resetPasswordToken") {
        Some(token) => Some(PasswordReset {
            token,
            expires_at: get_timestamp(doc, "resetPasswordExpiresAt")?,
        }),
        None => None,
    };

    Ok(User {
        id: get_uuid(doc, "_id")?,
        name: get_str(doc, "name")?,
        email: get_str(doc, "email")?,
        password: get_str(doc, "password")?,
        role: get_str(doc, "role")?.parse()?,
        reset_password,
        created_at: get_timestamp(doc, "createdAt")?,
        updated_at: get_timestamp(doc, "updatedAt")?,
    })
}

/// `$set`/`$unset` update for a reset token change.
pub fn reset_token_update(reset: Option<&PasswordReset>, updated_at: Timestamp) -> Document {
    match reset {
        Some(reset) => doc! {
            "$set": {
                "resetPasswordToken": &reset.token,
                "resetPasswordExpiresAt": bson_date(reset.expires_at),
                "updatedAt": bson_date(updated_at),
            }
        },
        None => doc! {
            "$set": { "updatedAt": bson_date(updated_at) },
            "$unset": { "resetPasswordToken": "", "resetPasswordExpiresAt": "" },
        },
    }
}

pub fn password_update(password_hash: &str, updated_at: Timestamp) -> Document {
    doc! {
        "$set": {
            "password": password_hash,
            "updatedAt": bson_date(updated_at),
        }
    }
}

/// Filter and update pair that pays an unpaid order.
pub fn mark_paid_update(
    id: Uuid,
    paid_at: Timestamp,
    updated_at: Timestamp,
) -> (Document, Document) {
    (
        doc! { "_id": id.to_string(), "paidAt": Bson::Null },
        doc! { "$set": { "paidAt": bson_date(paid_at), "updatedAt": bson_date(updated_at) } },
    )
}

// ============================================================================
// Product conversions
// ============================================================================

pub fn product_to_document(product: &Product) -> Document {
    doc! {
        "_id": product.id.to_string(),
        "name": &product.name,
        "category": &product.category,
        "description": &product.description,
        "price": product.price,
        "images": product.images.clone(),
        "stock": i64::from(product.stock),
        "createdAt": bson_date(product.created_at),
        "updatedAt": bson_date(product.updated_at),
    }
}

pub fn document_to_product(doc: &Document) -> Result<Product> {
    let images = doc
        .get_array("images")
        .map_err(|e| invalid("images", e))?
        .iter()
        .map(|image| {
            image
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| invalid("images", "element is not a string"))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Product {
        id: get_uuid(doc, "_id")?,
        name: get_str(doc, "name")?,
        category: get_str(doc, "category")?,
        description: get_optional_str(doc, "description").unwrap_or_default(),
        price: get_integer(doc, "price")?,
        images,
        stock: get_bounded(doc, "stock")?,
        created_at: get_timestamp(doc, "createdAt")?,
        updated_at: get_timestamp(doc, "updatedAt")?,
    })
}

// ============================================================================
// Order conversions
// ============================================================================

fn order_item_to_document(item: &OrderItem) -> Document {
    doc! {
        "productId": item.product_id.to_string(),
        "name": &item.name,
        "quantity": i64::from(item.quantity),
        "price": item.price,
    }
}

fn document_to_order_item(doc: &Document) -> Result<OrderItem> {
    Ok(OrderItem {
        product_id: get_uuid(doc, "productId")?,
        name: get_str(doc, "name")?,
        quantity: get_bounded(doc, "quantity")?,
        price: get_integer(doc, "price")?,
    })
}

pub fn order_to_document(order: &Order) -> Document {
    let items: Vec<Document> = order.items.iter().map(order_item_to_document).collect();
    doc! {
        "_id": order.id.to_string(),
        "userId": order.user_id.to_string(),
        "orderCode": order.order_code,
        "items": items,
        "totalPrice": order.total_price,
        "paidAt": order.paid_at.map(bson_date),
        "checkoutUrl": order.checkout_url.as_deref(),
        "isDelivered": order.delivered,
        "createdAt": bson_date(order.created_at),
        "updatedAt": bson_date(order.updated_at),
    }
}

pub fn document_to_order(doc: &Document) -> Result<Order> {
    let items = doc
        .get_array("items")
        .map_err(|e| invalid("items", e))?
        .iter()
        .map(|item| match item {
            Bson::Document(item) => document_to_order_item(item),
            _ => Err(invalid("items", "element is not a document")),
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Order {
        id: get_uuid(doc, "_id")?,
        user_id: get_uuid(doc, "userId")?,
        order_code: get_integer(doc, "orderCode")?,
        items,
        total_price: get_integer(doc, "totalPrice")?,
        paid_at: get_optional_timestamp(doc, "paidAt")?,
        checkout_url: get_optional_str(doc, "checkoutUrl"),
        delivered: get_bool(doc, "isDelivered")?,
        created_at: get_timestamp(doc, "createdAt")?,
        updated_at: get_timestamp(doc, "updatedAt")?,
    })
}

// ============================================================================
// Review conversions
// ============================================================================

pub fn review_to_document(review: &Review) -> Document {
    doc! {
        "_id": review.id.to_string(),
        "productId": review.product_id.to_string(),
        "userId": review.user_id.to_string(),
        "authorName": &review.author_name,
        "rating": i32::from(review.rating),
        "comment": &review.comment,
        "createdAt": bson_date(review.created_at),
        "updatedAt": bson_date(review.updated_at),
    }
}

pub fn document_to_review(doc: &Document) -> Result<Review> {
    Ok(Review {
        id: get_uuid(doc, "_id")?,
        product_id: get_uuid(doc, "productId")?,
        user_id: get_uuid(doc, "userId")?,
        author_name: get_str(doc, "authorName")?,
        rating: get_bounded(doc, "rating")?,
        comment: get_str(doc, "comment")?,
        created_at: get_timestamp(doc, "createdAt")?,
        updated_at: get_timestamp(doc, "updatedAt")?,
    })
}

// ============================================================================
// Filters
// ============================================================================

pub fn user_filter(filter: &UserFilter) -> Document {
    let mut query = Document::new();
    if let Some(role) = filter.role {
        query.insert("role", role.as_str());
    }
    query
}

pub fn product_filter(filter: &ProductFilter) -> Document {
    let mut query = Document::new();
    if let Some(category) = &filter.category {
        query.insert("category", category);
    }
    query
}

pub fn order_filter(filter: &OrderFilter) -> Document {
    let mut query = Document::new();
    if let Some(user_id) = filter.user_id {
        query.insert("userId", user_id.to_string());
    }
    match filter.paid {
        // `null` also matches a missing field.
        Some(true) => {
            query.insert("paidAt", doc! { "$ne": Bson::Null });
        }
        Some(false) => {
            query.insert("paidAt", Bson::Null);
        }
        None => {}
    }
    query
}

pub fn review_filter(filter: &ReviewFilter) -> Document {
    let mut query = Document::new();
    if let Some(product_id) = filter.product_id {
        query.insert("productId", product_id.to_string());
    }
    if let Some(user_id) = filter.user_id {
        query.insert("userId", user_id.to_string());
    }
    if let Some(rating) = filter.rating {
        query.insert("rating", i32::from(rating));
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use storeshift_core::model::UserRole;

    fn at(millis: i64) -> Timestamp {
        Timestamp::from_millis(millis).unwrap()
    }

    #[test]
    fn test_user_round_trip() {
        let mut user = User::new("Ana", "a@x.com", "h1").with_role(UserRole::Admin);
        user.reset_password = Some(PasswordReset {
            token: "tok".to_string(),
            expires_at: at(1_700_000_000_123),
        });

        let doc = user_to_document(&user);
        assert_eq!(doc.get_str("_id").unwrap(), user.id.to_string());
        assert_eq!(document_to_user(&doc).unwrap(), user);
    }

    #[test]
    fn test_order_round_trip_with_nulls() {
        let mut order = Order::new(
            Uuid::new_v4(),
            12345,
            vec![OrderItem {
                product_id: Uuid::new_v4(),
                name: "Mug".to_string(),
                quantity: 2,
                price: 49_500,
            }],
        );
        let doc = order_to_document(&order);
        assert_eq!(doc.get("paidAt"), Some(&Bson::Null));
        assert_eq!(document_to_order(&doc).unwrap(), order);

        order.paid_at = Some(at(1_700_000_000_000));
        order.checkout_url = Some("https://pay.example/c".to_string());
        assert_eq!(document_to_order(&order_to_document(&order)).unwrap(), order);
    }

    #[test]
    fn test_mark_paid_only_matches_unpaid() {
        let id = Uuid::new_v4();
        let (filter, update) =
            mark_paid_update(id, at(1_700_000_000_000), at(1_700_000_000_500));

        assert_eq!(filter.get("paidAt"), Some(&Bson::Null));
        assert_eq!(filter.get_str("_id").unwrap(), id.to_string());
        let set = update.get_document("$set").unwrap();
        assert_eq!(
            set.get_datetime("updatedAt").unwrap().timestamp_millis(),
            1_700_000_000_500
        );
    }

    #[test]
    fn test_product_accepts_int32_numbers() {
        let product = Product::new("Mug", "kitchen", 1_500).with_images(vec!["a.png".into()]);
        let mut doc = product_to_document(&product);
        doc.insert("price", 1_500_i32);
        doc.insert("stock", 0_i32);

        assert_eq!(document_to_product(&doc).unwrap(), product);
    }

    #[test]
    fn test_review_rating_out_of_range() {
        let review = Review::new(Uuid::new_v4(), Uuid::new_v4(), "Ana", 4, "Nice");
        let mut doc = review_to_document(&review);
        doc.insert("rating", 300_i32);

        assert!(matches!(
            document_to_review(&doc),
            Err(RepositoryError::InvalidData(_))
        ));
    }

    #[test]
    fn test_order_filter_paid() {
        let paid = order_filter(&OrderFilter {
            user_id: None,
            paid: Some(true),
        });
        assert_eq!(paid, doc! { "paidAt": { "$ne": Bson::Null } });

        let unpaid = order_filter(&OrderFilter {
            user_id: None,
            paid: Some(false),
        });
        assert_eq!(unpaid, doc! { "paidAt": Bson::Null });
    }

    #[test]
    fn test_clear_reset_token_unsets_fields() {
        let update = reset_token_update(None, at(0));
        assert!(update.get_document("$unset").unwrap().contains_key("resetPasswordToken"));
    }
}
