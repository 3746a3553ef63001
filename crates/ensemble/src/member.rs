//! Ensemble member value types

use std::fmt;

use proven_fleet::NodeId;
use serde::{Deserialize, Serialize};

/// The ports every ensemble member reserves.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum PortType {
    /// Serves client sessions.
    Client,

    /// Carries follower-to-leader traffic.
    Peer,

    /// Carries leader election traffic.
    Election,
}

impl PortType {
    /// Every port type, in allocation order.
    pub const ALL: [Self; 3] = [Self::Client, Self::Peer, Self::Election];

    /// The well-known port allocation starts from.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Client => 2181,
            Self::Peer => 2888,
            Self::Election => 3888,
        }
    }

    /// Short lowercase name, used in persisted attributes.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Peer => "peer",
            Self::Election => "election",
        }
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The ports reserved by one member.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PortAllocation {
    /// Client port
    pub client: u16,
    /// Peer port
    pub peer: u16,
    /// Election port
    pub election: u16,
}

impl PortAllocation {
    /// Get the port of one type
    #[must_use]
    pub const fn get(&self, port_type: PortType) -> u16 {
        match port_type {
            PortType::Client => self.client,
            PortType::Peer => self.peer,
            PortType::Election => self.election,
        }
    }

    /// Iterate every (type, port) pair
    pub fn iter(&self) -> impl Iterator<Item = (PortType, u16)> + '_ {
        PortType::ALL.into_iter().map(|t| (t, self.get(t)))
    }
}

/// One node's slot in an ensemble.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ClusterMember {
    node_id: NodeId,
    address: String,
    ports: PortAllocation,
}

impl ClusterMember {
    /// Create a member
    pub fn new<A: Into<String>>(node_id: NodeId, address: A, ports: PortAllocation) -> Self {
        Self {
            node_id,
            address: address.into(),
            ports,
        }
    }

    /// The node holding this slot
    #[must_use]
    pub const fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// The address the member serves on
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The reserved ports
    #[must_use]
    pub const fn ports(&self) -> &PortAllocation {
        &self.ports
    }

    /// `address:clientPort`
    #[must_use]
    pub fn client_endpoint(&self) -> String {
        format!("{}:{}", self.address, self.ports.client)
    }
}
