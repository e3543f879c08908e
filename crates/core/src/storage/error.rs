use thiserror::Error;

use crate::model::EntityType;

/// Errors that can occur during repository operations.
///
/// Absence is not an error: lookups return `Ok(None)`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("{entity_type} not found: {id}")]
    NotFound { entity_type: EntityType, id: String },
    #[error("{entity_type} already exists: {key}")]
    DuplicateKey { entity_type: EntityType, key: String },
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("Cannot encode {entity_type}: {reason}")]
    Encoding {
        entity_type: EntityType,
        reason: String,
    },
    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),
    #[error("Query failed: {0}")]
    QueryFailed(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl RepositoryError {
    pub fn not_found(entity_type: EntityType, id: impl ToString) -> Self {
        RepositoryError::NotFound {
            entity_type,
            id: id.to_string(),
        }
    }

    pub fn encoding(entity_type: EntityType, reason: impl Into<String>) -> Self {
        RepositoryError::Encoding {
            entity_type,
            reason: reason.into(),
        }
    }

    /// True for item codec failures, which point at schema drift between the stores.
    pub fn is_codec(&self) -> bool {
        matches!(
            self,
            RepositoryError::Encoding { .. } | RepositoryError::UnknownEntityType(_)
        )
    }
}

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, RepositoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let error = RepositoryError::not_found(EntityType::Order, "abc-123");
        assert_eq!(error.to_string(), "Order not found: abc-123");
    }

    #[test]
    fn test_duplicate_key_display() {
        let error = RepositoryError::DuplicateKey {
            entity_type: EntityType::User,
            key: "a@x.com".to_string(),
        };
        assert_eq!(error.to_string(), "User already exists: a@x.com");
    }

    #[test]
    fn test_encoding_display() {
        let error = RepositoryError::encoding(EntityType::Product, "missing attribute `price`");
        assert_eq!(
            error.to_string(),
            "Cannot encode Product: missing attribute `price`"
        );
        assert!(error.is_codec());
    }

    #[test]
    fn test_backend_unavailable_is_not_codec() {
        let error = RepositoryError::BackendUnavailable("timed out after 2s".to_string());
        assert_eq!(error.to_string(), "Backend unavailable: timed out after 2s");
        assert!(!error.is_codec());
    }
}
