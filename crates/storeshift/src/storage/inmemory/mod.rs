//! In-memory document store.
//!
//! Stands in for MongoDB in tests and when running without a database.

mod repository;

pub use repository::InMemoryDocumentStore;
