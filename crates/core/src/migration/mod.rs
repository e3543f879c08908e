mod phase;
mod reconciliation;
mod shadow;

pub use phase::{Access, Backend, Dispatch, MigrationPhase, PhaseError};
pub use reconciliation::{diff_records, FieldDiff, ReconciliationRecord};
pub use shadow::{retry_delay, Mutation, Operation, QueuedWrite, ShadowWrite};
