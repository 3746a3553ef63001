//! Error types for ensemble reconfiguration
//!
//! Every failure surfaced to a caller carries one of the reason codes in
//! [`ErrorKind`]. Failures of individual node polls never surface directly;
//! they collapse into [`Error::Timeout`] for the wait that observed them.

use std::fmt;
use std::time::Duration;

use proven_fleet::{FleetError, FleetErrorKind, NodeId};
use proven_registry::RegistryError;
use thiserror::Error;

/// Result type for ensemble operations
pub type EnsembleResult<T> = Result<T, Error>;

/// Reason code attached to every [`Error`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// The request was malformed.
    InvalidArguments,

    /// One or more involved nodes are not reachable.
    ContainersNotAlive,

    /// An add named nodes that are already members.
    ContainersAlreadyInEnsemble,

    /// A remove named nodes that are not members.
    ContainersNotInEnsemble,

    /// A bounded wait exceeded the migration timeout.
    Timeout,

    /// Persisted state could not be reconstructed, or a profile ID collided.
    IllegalState,

    /// The request was cancelled.
    Cancelled,

    /// Any other failure during data migration.
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Self::InvalidArguments => "INVALID_ARGUMENTS",
            Self::ContainersNotAlive => "CONTAINERS_NOT_ALIVE",
            Self::ContainersAlreadyInEnsemble => "CONTAINERS_ALREADY_IN_ENSEMBLE",
            Self::ContainersNotInEnsemble => "CONTAINERS_NOT_IN_ENSEMBLE",
            Self::Timeout => "TIMEOUT",
            Self::IllegalState => "ILLEGAL_STATE",
            Self::Cancelled => "CANCELLED",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(code)
    }
}

fn join(nodes: &[NodeId]) -> String {
    nodes
        .iter()
        .map(NodeId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Main ensemble error type
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed request
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Nodes involved in the request are not alive
    #[error("Containers not alive: {}", join(.0))]
    ContainersNotAlive(Vec<NodeId>),

    /// Nodes to add are already ensemble members
    #[error("Containers already in ensemble: {}", join(.0))]
    ContainersAlreadyInEnsemble(Vec<NodeId>),

    /// Nodes to remove are not ensemble members
    #[error("Containers not in ensemble: {}", join(.0))]
    ContainersNotInEnsemble(Vec<NodeId>),

    /// A bounded wait expired
    #[error("Timed out after {timeout:?} waiting for {what}")]
    Timeout {
        /// What was being waited for
        what: String,
        /// The bound that expired
        timeout: Duration,
    },

    /// Persisted state is inconsistent
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// The request was cancelled
    #[error("Reconfiguration cancelled")]
    Cancelled,

    /// Registry operation failed
    #[error("Registry error: {0}")]
    Registry(String),

    /// Profile registry operation failed
    #[error("Profile error: {0}")]
    Profile(String),

    /// Node inventory query failed
    #[error("Fleet error: {0}")]
    Fleet(String),
}

impl Error {
    /// Returns the reason code of this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArguments(_) => ErrorKind::InvalidArguments,
            Self::ContainersNotAlive(_) => ErrorKind::ContainersNotAlive,
            Self::ContainersAlreadyInEnsemble(_) => ErrorKind::ContainersAlreadyInEnsemble,
            Self::ContainersNotInEnsemble(_) => ErrorKind::ContainersNotInEnsemble,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::IllegalState(_) => ErrorKind::IllegalState,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Registry(_) | Self::Profile(_) | Self::Fleet(_) => ErrorKind::Unknown,
        }
    }

    pub(crate) fn registry<E: RegistryError>(context: &str, error: &E) -> Self {
        Self::Registry(format!("{context}: {error}"))
    }

    pub(crate) fn profiles<E: FleetError>(context: &str, error: &E) -> Self {
        match error.kind() {
            FleetErrorKind::NotFound | FleetErrorKind::AlreadyExists => {
                Self::IllegalState(format!("{context}: {error}"))
            }
            _ => Self::Profile(format!("{context}: {error}")),
        }
    }

    pub(crate) fn fleet<E: FleetError>(context: &str, error: &E) -> Self {
        Self::Fleet(format!("{context}: {error}"))
    }
}
