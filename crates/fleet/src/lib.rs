//! Abstract interfaces onto the fleet an ensemble serves: the node inventory,
//! each node's health channel, and the profile registry.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod node;
mod profile;

pub use node::{EnsembleView, FleetNode, NodeId};
pub use profile::Profile;

use std::error::Error;
use std::fmt::{self, Debug, Display};

use async_trait::async_trait;

/// The kind of fleet error.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FleetErrorKind {
    /// The requested node or profile does not exist
    NotFound,

    /// The entity being created already exists
    AlreadyExists,

    /// The remote side could not be reached
    Unreachable,

    /// Other/unknown error
    Other,
}

impl Display for FleetErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Marker trait for fleet collaborator errors
pub trait FleetError: Debug + Error + Send + Sync + 'static {
    /// Returns the kind of this error
    fn kind(&self) -> FleetErrorKind;
}

/// Read-only view of the nodes known to the fleet.
#[async_trait]
pub trait NodeInventory
where
    Self: Clone + Send + Sync + 'static,
{
    /// The error type for this inventory.
    type Error: FleetError;

    /// List every known node.
    async fn list_nodes(&self) -> Result<Vec<FleetNode>, Self::Error>;

    /// Check whether a node is currently alive.
    async fn is_alive(&self, node_id: &NodeId) -> Result<bool, Self::Error>;
}

/// Remote query of the ensemble a node currently believes it belongs to.
#[async_trait]
pub trait HealthChannel
where
    Self: Clone + Send + Sync + 'static,
{
    /// The error type for this channel.
    type Error: FleetError;

    /// The node's current ensemble view, or `None` if it runs no ensemble
    /// client at all.
    async fn ensemble_view(&self, node_id: &NodeId) -> Result<Option<EnsembleView>, Self::Error>;
}

/// Versioned profile storage.
#[async_trait]
pub trait ProfileRegistry
where
    Self: Clone + Send + Sync + 'static,
{
    /// The error type for this registry.
    type Error: FleetError;

    /// Create a profile; fails with [`FleetErrorKind::AlreadyExists`] if the
    /// ID is taken in `version`.
    async fn create_profile(&self, version: &str, profile: Profile) -> Result<(), Self::Error>;

    /// Check whether a profile exists in `version`.
    async fn has_profile(&self, version: &str, id: &str) -> Result<bool, Self::Error>;

    /// Get a profile; fails with [`FleetErrorKind::NotFound`] if missing.
    async fn get_required_profile(&self, version: &str, id: &str) -> Result<Profile, Self::Error>;
}
