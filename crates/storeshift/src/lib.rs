//! Migration-aware repository layer.
//!
//! Controllers talk to the [`repository`] facades. The facades route through
//! the [`migration::MigrationRouter`], which picks the MongoDB document store,
//! the DynamoDB single table or both, depending on the migration phase.

pub mod app;
pub mod config;
pub mod migration;
pub mod repository;
pub mod storage;
pub mod verify;
