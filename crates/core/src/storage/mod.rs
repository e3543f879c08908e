mod error;
mod http_mapping;
mod records;
mod traits;
mod types;

pub use error::{RepositoryError, Result};
pub use http_mapping::repository_error_to_status_code;
pub use records::{create_record, delete_record, fetch_record, list_records, update_record};
pub use traits::{
    OrderRepository, ProductRepository, RecordReplay, ReviewRepository, Store, UserRepository,
};
pub use types::{OrderFilter, ProductFilter, ReviewFilter, UserFilter};
