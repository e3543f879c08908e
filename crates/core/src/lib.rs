//! Core types for storeshift.
//!
//! This crate holds everything that does not touch a real store: the domain
//! records, the per-entity repository contracts, the migration phase state
//! machine, the shadow write envelope and the record diffing used by the
//! consistency checks. Apart from the write clock in
//! [`model::Timestamp`], all functions here are pure.

pub mod migration;
pub mod model;
pub mod storage;
