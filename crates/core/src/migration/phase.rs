use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which backend(s) are authoritative at a given time.
///
/// Phases only move forward, one step at a time, and only by operator action.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationPhase {
    #[default]
    SourceOnly,
    DualWrite,
    DualWriteVerify,
    TargetOnly,
}

/// One of the two storage backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Document,
    KeyValue,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Document => "document",
            Backend::KeyValue => "keyvalue",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// Routing decision for one repository call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    /// Backend whose result is returned to the caller.
    pub primary: Backend,
    /// Backend that receives a shadow write after the primary commits.
    pub shadow: Option<Backend>,
    /// Whether reads are sampled against the other backend.
    pub verify_reads: bool,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PhaseError {
    #[error("Unknown migration phase: {0}")]
    Unknown(String),
    #[error("Cannot move from {from} back to {to}: rollback is not supported")]
    Backward {
        from: MigrationPhase,
        to: MigrationPhase,
    },
    #[error("Cannot skip from {from} to {to}: phases advance one step at a time")]
    Skip {
        from: MigrationPhase,
        to: MigrationPhase,
    },
    #[error("{0} is the final phase")]
    Final(MigrationPhase),
}

impl MigrationPhase {
    pub const ALL: [MigrationPhase; 4] = [
        MigrationPhase::SourceOnly,
        MigrationPhase::DualWrite,
        MigrationPhase::DualWriteVerify,
        MigrationPhase::TargetOnly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationPhase::SourceOnly => "SOURCE_ONLY",
            MigrationPhase::DualWrite => "DUAL_WRITE",
            MigrationPhase::DualWriteVerify => "DUAL_WRITE_VERIFY",
            MigrationPhase::TargetOnly => "TARGET_ONLY",
        }
    }

    /// The phase an operator may advance to, if any.
    pub fn next(&self) -> Option<MigrationPhase> {
        match self {
            MigrationPhase::SourceOnly => Some(MigrationPhase::DualWrite),
            MigrationPhase::DualWrite => Some(MigrationPhase::DualWriteVerify),
            MigrationPhase::DualWriteVerify => Some(MigrationPhase::TargetOnly),
            MigrationPhase::TargetOnly => None,
        }
    }

    /// True while both stores receive writes.
    pub fn is_dual_write(&self) -> bool {
        matches!(
            self,
            MigrationPhase::DualWrite | MigrationPhase::DualWriteVerify
        )
    }

    /// Validates a transition requested by an operator.
    ///
    /// Asking for the current phase is accepted and changes nothing.
    pub fn transition_to(&self, target: MigrationPhase) -> Result<MigrationPhase, PhaseError> {
        if target == *self {
            return Ok(target);
        }
        if target < *self {
            return Err(PhaseError::Backward {
                from: *self,
                to: target,
            });
        }
        match self.next() {
            Some(next) if next == target => Ok(target),
            _ => Err(PhaseError::Skip {
                from: *self,
                to: target,
            }),
        }
    }

    /// Routing table keyed by phase and access kind.
    pub fn dispatch(&self, access: Access) -> Dispatch {
        let (primary, shadow) = match self {
            MigrationPhase::SourceOnly => (Backend::Document, None),
            MigrationPhase::DualWrite | MigrationPhase::DualWriteVerify => {
                (Backend::Document, Some(Backend::KeyValue))
            }
            MigrationPhase::TargetOnly => (Backend::KeyValue, None),
        };
        match access {
            Access::Read => Dispatch {
                primary,
                shadow: None,
                verify_reads: *self == MigrationPhase::DualWriteVerify,
            },
            Access::Write => Dispatch {
                primary,
                shadow,
                verify_reads: false,
            },
        }
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MigrationPhase {
    type Err = PhaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        MigrationPhase::ALL
            .into_iter()
            .find(|phase| phase.as_str() == normalized)
            .ok_or_else(|| PhaseError::Unknown(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_lenient() {
        assert_eq!(
            "dual-write-verify".parse::<MigrationPhase>().unwrap(),
            MigrationPhase::DualWriteVerify
        );
        assert_eq!(
            " TARGET_ONLY\n".parse::<MigrationPhase>().unwrap(),
            MigrationPhase::TargetOnly
        );
        assert!(matches!(
            "shadow".parse::<MigrationPhase>(),
            Err(PhaseError::Unknown(_))
        ));
    }

    #[test]
    fn test_transitions_are_forward_one_step() {
        use MigrationPhase::*;

        assert_eq!(SourceOnly.transition_to(DualWrite), Ok(DualWrite));
        assert_eq!(DualWrite.transition_to(DualWrite), Ok(DualWrite));
        assert!(matches!(
            SourceOnly.transition_to(TargetOnly),
            Err(PhaseError::Skip { .. })
        ));
        assert!(matches!(
            TargetOnly.transition_to(DualWriteVerify),
            Err(PhaseError::Backward { .. })
        ));
        assert_eq!(TargetOnly.next(), None);
    }

    #[test]
    fn test_dispatch_table() {
        use MigrationPhase::*;

        let read = SourceOnly.dispatch(Access::Read);
        assert_eq!(read.primary, Backend::Document);
        assert_eq!(SourceOnly.dispatch(Access::Write).shadow, None);

        let write = DualWrite.dispatch(Access::Write);
        assert_eq!(write.primary, Backend::Document);
        assert_eq!(write.shadow, Some(Backend::KeyValue));
        assert!(!DualWrite.dispatch(Access::Read).verify_reads);

        let verify = DualWriteVerify.dispatch(Access::Read);
        assert_eq!(verify.primary, Backend::Document);
        assert_eq!(verify.shadow, None);
        assert!(verify.verify_reads);

        let target = TargetOnly.dispatch(Access::Write);
        assert_eq!(target.primary, Backend::KeyValue);
        assert_eq!(target.shadow, None);
    }

    #[test]
    fn test_serde_uses_screaming_case() {
        let json = serde_json::to_string(&MigrationPhase::DualWriteVerify).unwrap();
        assert_eq!(json, "\"DUAL_WRITE_VERIFY\"");
    }
}
