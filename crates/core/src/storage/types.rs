use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{Order, Product, Review, User, UserRole};

// Every filter field is an exact match and fields combine with AND. An empty
// filter matches everything. Drivers that push filters down to their store
// must agree with `matches`.

/// Filter for listing users.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFilter {
    pub role: Option<UserRole>,
}

impl UserFilter {
    pub fn role(role: UserRole) -> Self {
        Self { role: Some(role) }
    }

    pub fn matches(&self, user: &User) -> bool {
        self.role.is_none_or(|role| user.role == role)
    }
}

/// Filter for listing products.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductFilter {
    pub category: Option<String>,
}

impl ProductFilter {
    pub fn category(category: impl Into<String>) -> Self {
        Self {
            category: Some(category.into()),
        }
    }

    pub fn matches(&self, product: &Product) -> bool {
        self.category
            .as_deref()
            .is_none_or(|category| product.category == category)
    }
}

/// Filter for listing orders.
///
/// `paid` selects orders by whether `paid_at` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFilter {
    pub user_id: Option<Uuid>,
    pub paid: Option<bool>,
}

impl OrderFilter {
    pub fn user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            paid: None,
        }
    }

    pub fn matches(&self, order: &Order) -> bool {
        self.user_id.is_none_or(|user_id| order.user_id == user_id)
            && self.paid.is_none_or(|paid| order.is_paid() == paid)
    }
}

/// Filter for listing reviews.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewFilter {
    pub product_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub rating: Option<u8>,
}

impl ReviewFilter {
    pub fn product(product_id: Uuid) -> Self {
        Self {
            product_id: Some(product_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, review: &Review) -> bool {
        self.product_id
            .is_none_or(|product_id| review.product_id == product_id)
            && self.user_id.is_none_or(|user_id| review.user_id == user_id)
            && self.rating.is_none_or(|rating| review.rating == rating)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Timestamp;

    #[test]
    fn test_empty_filter_matches_all() {
        let user = User::new("Ana", "a@x.com", "h1");
        assert!(UserFilter::default().matches(&user));
        assert!(!UserFilter::role(UserRole::Admin).matches(&user));
    }

    #[test]
    fn test_order_paid_filter() {
        let mut order = Order::new(Uuid::new_v4(), 1, Vec::new());
        let paid = OrderFilter {
            paid: Some(true),
            ..OrderFilter::default()
        };
        assert!(!paid.matches(&order));

        order.paid_at = Some(Timestamp::now());
        assert!(paid.matches(&order));
        assert!(OrderFilter::user(order.user_id).matches(&order));
        assert!(!OrderFilter::user(Uuid::new_v4()).matches(&order));
    }

    #[test]
    fn test_review_filter_combines_fields() {
        let review = Review::new(Uuid::new_v4(), Uuid::new_v4(), "Ana", 4, "Nice");
        let filter = ReviewFilter {
            product_id: Some(review.product_id),
            rating: Some(4),
            ..ReviewFilter::default()
        };
        assert!(filter.matches(&review));

        let wrong_rating = ReviewFilter {
            rating: Some(5),
            ..filter
        };
        assert!(!wrong_rating.matches(&review));
    }

    #[test]
    fn test_product_category_is_exact() {
        let product = Product::new("Mug", "kitchen", 1_500);
        assert!(ProductFilter::category("kitchen").matches(&product));
        assert!(!ProductFilter::category("Kitchen").matches(&product));
    }
}
