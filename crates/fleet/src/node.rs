//! Node identity types for the fleet

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a node (container) in the fleet.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a new node ID
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    /// Get the node ID as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A node as known to the fleet inventory.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FleetNode {
    /// The identity of the node.
    pub id: NodeId,

    /// The network address (host name or IP) the node is reachable at.
    pub address: String,

    /// Whether the node is currently reachable.
    pub alive: bool,
}

impl FleetNode {
    /// Create a live node
    pub fn new<I: Into<NodeId>, A: Into<String>>(id: I, address: A) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            alive: true,
        }
    }
}

/// The ensemble a node currently believes it belongs to.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct EnsembleView {
    /// The cluster identity the node is running under.
    pub cluster_id: u32,

    /// The connection URL the node uses to reach the ensemble, when known.
    pub connection_url: Option<String>,
}
