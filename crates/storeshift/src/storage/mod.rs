//! Backend drivers.
//!
//! - [`document`]: MongoDB, the source of the migration
//! - [`keyvalue`]: the DynamoDB single table, the target
//! - [`inmemory`]: an in-process stand-in for the document store

pub mod document;
pub mod inmemory;
pub mod keyvalue;
