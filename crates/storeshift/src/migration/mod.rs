//! Migration machinery around the two stores.
//!
//! - [`router`]: phase-aware dispatch used by the repository facades
//! - [`controller`]: operator control of the phase
//! - [`queue`]: durable outbox of shadow writes
//! - [`replicator`]: applies queued shadow writes to the key-value store
//! - [`copy`]: copies records that predate dual writing

pub mod controller;
pub mod copy;
mod locks;
pub mod queue;
pub mod replicator;
pub mod router;

pub use controller::{
    read_phase_file, write_phase_file, ControllerError, PhaseController, PhaseHandle,
};
pub use copy::{BulkCopier, CopyError, CopyReport};
pub use locks::KeyLocks;
pub use queue::{InMemoryShadowQueue, QueueError, ShadowQueue, SqliteShadowQueue};
pub use replicator::{BackfillReport, ReplicatorSettings, ShadowReplicator};
pub use router::{MigrationRouter, SampledRead, ShadowPlan};
