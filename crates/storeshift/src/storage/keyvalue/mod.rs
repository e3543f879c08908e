//! Key-value store driver for the single-table layout.
//!
//! Records of all four entity types live in one table:
//!
//! | Entity  | Primary `PK`/`SK` | Projections (`PK` / `SK`)                         |
//! |---------|-------------------|---------------------------------------------------|
//! | User    | `USER#<id>`       | `EMAIL#<email>`, `RESET#<token>` / `USER#<id>`    |
//! | Product | `PRODUCT#<id>`    | `CATEGORY#<category>` / `PRODUCT#<id>`            |
//! | Order   | `ORDER#<id>`      | `ORDERCODE#<code>`, `USER#<userId>` / `ORDER#<id>`|
//! | Review  | `REVIEW#<id>`     | `PRODUCT#<productId>`, `USER#<userId>` / `REVIEW#<id>` |
//!
//! Primary items also carry `GSI1PK = <EntityType>` and `GSI1SK = <PK>`,
//! which back the `GSI1` type index used for unfiltered listings.

pub mod codec;
mod dynamodb;
pub mod keys;
mod memory;
mod repository;
mod table;

pub use dynamodb::DynamoDbTable;
pub use memory::InMemoryTable;
pub use repository::KeyValueStore;
pub use table::{ItemTable, TableError, TableResult, TableWrite, WriteCondition};
