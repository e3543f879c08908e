use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Timestamp;
use crate::storage::RepositoryError;

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;

/// A product review written by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: Uuid,
    pub product_id: Uuid,
    pub user_id: Uuid,
    /// Display name of the author when the review was written.
    pub author_name: String,
    pub rating: u8,
    pub comment: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Review {
    pub fn new(
        product_id: Uuid,
        user_id: Uuid,
        author_name: impl Into<String>,
        rating: u8,
        comment: impl Into<String>,
    ) -> Self {
        let now = Timestamp::now();
        Self {
            id: Uuid::new_v4(),
            product_id,
            user_id,
            author_name: author_name.into(),
            rating,
            comment: comment.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Checks the rating is within `1..=5`.
    pub fn validate(&self) -> Result<(), RepositoryError> {
        if (MIN_RATING..=MAX_RATING).contains(&self.rating) {
            Ok(())
        } else {
            Err(RepositoryError::InvalidData(format!(
                "Review rating must be between {MIN_RATING} and {MAX_RATING}, got {}",
                self.rating
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rating_bounds() {
        let mut review = Review::new(Uuid::new_v4(), Uuid::new_v4(), "Ana", 5, "Great");
        assert!(review.validate().is_ok());

        review.rating = 0;
        assert!(review.validate().is_err());

        review.rating = 6;
        assert!(review.validate().is_err());
    }
}
