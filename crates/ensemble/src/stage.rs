//! Progress of a reconfiguration request

use std::fmt;

use crate::error::ErrorKind;
use crate::selector::Algorithm;

/// Where the service is in handling a request
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReconfigurationStage {
    /// No request has been handled yet.
    Idle,

    /// Checking the request against the fleet and the current ensemble.
    Validating,

    /// Deriving the target ensemble.
    ComputingTarget,

    /// Creating the target's cluster and member profiles.
    PersistingProfiles,

    /// Moving the fleet onto the target ensemble.
    Migrating(Algorithm),

    /// Waiting for the fleet to settle on the target ensemble.
    AwaitingConvergence,

    /// Dropping profile references to retired ensembles.
    CleaningUp,

    /// The last request completed.
    Done,

    /// The last request failed.
    Failed(ErrorKind),
}

impl ReconfigurationStage {
    /// Returns true if no request is in flight
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Idle | Self::Done | Self::Failed(_))
    }
}

impl fmt::Display for ReconfigurationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("IDLE"),
            Self::Validating => f.write_str("VALIDATING"),
            Self::ComputingTarget => f.write_str("COMPUTING_TARGET"),
            Self::PersistingProfiles => f.write_str("PERSISTING_PROFILES"),
            Self::Migrating(algorithm) => write!(f, "MIGRATING({algorithm})"),
            Self::AwaitingConvergence => f.write_str("AWAITING_CONVERGENCE"),
            Self::CleaningUp => f.write_str("CLEANING_UP"),
            Self::Done => f.write_str("DONE"),
            Self::Failed(kind) => write!(f, "FAILED({kind})"),
        }
    }
}
