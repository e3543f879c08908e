use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::{DomainRecord, EntityKey, Timestamp};

/// Repository operation that produced a shadow write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    Create,
    Update,
    Delete,
    UpdatePassword,
    SetResetPasswordToken,
    MarkPaid,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::UpdatePassword => "updatePassword",
            Operation::SetResetPasswordToken => "setResetPasswordToken",
            Operation::MarkPaid => "markPaid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        [
            Operation::Create,
            Operation::Update,
            Operation::Delete,
            Operation::UpdatePassword,
            Operation::SetResetPasswordToken,
            Operation::MarkPaid,
        ]
        .into_iter()
        .find(|op| op.as_str() == value)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The change to replay on the shadow store.
///
/// `Refresh` carries no payload: the primary committed a write whose result
/// could not be read back, so the replicator copies the primary's current
/// state instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "camelCase")]
pub enum Mutation {
    Create(DomainRecord),
    Update(DomainRecord),
    Delete,
    Refresh,
}

/// A write committed to the primary store that must be mirrored to the shadow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShadowWrite {
    pub key: EntityKey,
    pub operation: Operation,
    pub mutation: Mutation,
    pub submitted_at: Timestamp,
}

impl ShadowWrite {
    pub fn new(key: EntityKey, operation: Operation, mutation: Mutation) -> Self {
        Self {
            key,
            operation,
            mutation,
            submitted_at: Timestamp::now(),
        }
    }
}

/// A shadow write waiting in the queue.
///
/// `seq` orders entries by submission. An entry with `attempts > 0` has
/// failed at least once and is waiting for backfill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedWrite {
    pub seq: u64,
    pub write: ShadowWrite,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub next_attempt_at: Timestamp,
}

impl QueuedWrite {
    pub fn is_failure(&self) -> bool {
        self.attempts > 0
    }

    pub fn is_due(&self, now: Timestamp) -> bool {
        self.next_attempt_at <= now
    }
}

/// Exponential backoff after `attempts` failures, capped at `max`.
pub fn retry_delay(attempts: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempts.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent).min(max)
}
