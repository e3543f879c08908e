//! Pure functions for mapping repository errors to HTTP status codes.
//!
//! Controllers sit outside this workspace; this mapping is what they are
//! expected to apply at their boundary.

use super::RepositoryError;

/// Maps a [`RepositoryError`] to an HTTP status code.
///
/// - `NotFound` -> 404 (Not Found)
/// - `DuplicateKey` -> 409 (Conflict)
/// - `BackendUnavailable` -> 503 (Service Unavailable)
/// - `InvalidData` -> 400 (Bad Request)
/// - codec and query failures -> 500 (Internal Server Error)
///
/// # Examples
///
/// ```
/// use storeshift_core::model::EntityType;
/// use storeshift_core::storage::{repository_error_to_status_code, RepositoryError};
///
/// let error = RepositoryError::not_found(EntityType::Order, "abc-123");
/// assert_eq!(repository_error_to_status_code(&error), 404);
/// ```
pub fn repository_error_to_status_code(error: &RepositoryError) -> u16 {
    match error {
        RepositoryError::NotFound { .. } => 404,
        RepositoryError::DuplicateKey { .. } => 409,
        RepositoryError::BackendUnavailable(_) => 503,
        RepositoryError::InvalidData(_) => 400,
        RepositoryError::Encoding { .. }
        | RepositoryError::UnknownEntityType(_)
        | RepositoryError::QueryFailed(_) => 500,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityType;

    #[test]
    fn test_duplicate_and_unavailable_are_distinct() {
        let duplicate = RepositoryError::DuplicateKey {
            entity_type: EntityType::User,
            key: "a@x.com".to_string(),
        };
        let unavailable = RepositoryError::BackendUnavailable("timeout".to_string());

        assert_eq!(repository_error_to_status_code(&duplicate), 409);
        assert_eq!(repository_error_to_status_code(&unavailable), 503);
    }

    #[test]
    fn test_codec_errors_map_to_500() {
        let encoding = RepositoryError::encoding(EntityType::Review, "missing attribute `rating`");
        let unknown = RepositoryError::UnknownEntityType("Invoice".to_string());

        assert_eq!(repository_error_to_status_code(&encoding), 500);
        assert_eq!(repository_error_to_status_code(&unknown), 500);
    }

    #[test]
    fn test_invalid_data_maps_to_400() {
        let error = RepositoryError::InvalidData("rating out of range".to_string());
        assert_eq!(repository_error_to_status_code(&error), 400);
    }
}
