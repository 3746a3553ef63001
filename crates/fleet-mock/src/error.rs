//! Error types for the mock fleet implementation.

use proven_fleet::{FleetError, FleetErrorKind};
use thiserror::Error;

/// Error type for the mock fleet implementation.
#[derive(Debug, Error)]
pub enum Error {
    /// Error when a node is not found in the inventory.
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Error when a profile is not found.
    #[error("Profile not found: {version}/{id}")]
    ProfileNotFound {
        /// The profile version.
        version: String,
        /// The profile ID.
        id: String,
    },

    /// Error when creating a profile whose ID is taken.
    #[error("Profile already exists: {version}/{id}")]
    ProfileExists {
        /// The profile version.
        version: String,
        /// The profile ID.
        id: String,
    },

    /// Error when a node's health channel does not answer.
    #[error("Node unreachable: {0}")]
    Unreachable(String),

    /// Error when loading or parsing the fleet file.
    #[error("Fleet file error: {0}")]
    FleetFile(String),
}

impl FleetError for Error {
    fn kind(&self) -> FleetErrorKind {
        match self {
            Self::NodeNotFound(_) | Self::ProfileNotFound { .. } => FleetErrorKind::NotFound,
            Self::ProfileExists { .. } => FleetErrorKind::AlreadyExists,
            Self::Unreachable(_) => FleetErrorKind::Unreachable,
            Self::FleetFile(_) => FleetErrorKind::Other,
        }
    }
}
