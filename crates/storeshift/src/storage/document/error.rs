//! MongoDB error mapping.

use mongodb::error::{Error, ErrorKind, WriteFailure};

use storeshift_core::model::EntityType;
use storeshift_core::storage::RepositoryError;

const DUPLICATE_KEY_CODE: i32 = 11000;

/// Maps a driver error to a repository error.
///
/// Server selection and I/O failures mean the database could not be reached.
pub fn map_error(err: Error) -> RepositoryError {
    match *err.kind {
        ErrorKind::ServerSelection { .. }
        | ErrorKind::Io(_)
        | ErrorKind::ConnectionPoolCleared { .. } => {
            RepositoryError::BackendUnavailable(err.to_string())
        }
        _ => RepositoryError::QueryFailed(err.to_string()),
    }
}

/// Maps a write error, turning unique index violations into `DuplicateKey`.
///
/// `keys` pairs each unique field with its value; the reported key is the one
/// whose field the server names in its message, else the first.
pub fn map_write_error(
    err: Error,
    entity_type: EntityType,
    keys: &[(&str, String)],
) -> RepositoryError {
    let Some(message) = duplicate_key_message(&err) else {
        return map_error(err);
    };
    let key = keys
        .iter()
        .find(|(field, _)| message.contains(&format!("{field}_")))
        .or_else(|| keys.first())
        .map(|(_, value)| value.clone())
        .unwrap_or_default();
    RepositoryError::DuplicateKey { entity_type, key }
}

fn duplicate_key_message(err: &Error) -> Option<&str> {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_err))
            if write_err.code == DUPLICATE_KEY_CODE =>
        {
            Some(&write_err.message)
        }
        ErrorKind::Command(command_err) if command_err.code == DUPLICATE_KEY_CODE => {
            Some(&command_err.message)
        }
        _ => None,
    }
}
