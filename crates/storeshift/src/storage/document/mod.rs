//! MongoDB document store driver.
//!
//! Each entity type lives in its own collection (`users`, `products`,
//! `orders`, `reviews`) keyed by the record id as a string `_id`.

mod conversions;
mod error;
mod repository;

pub use repository::MongoDocumentStore;
