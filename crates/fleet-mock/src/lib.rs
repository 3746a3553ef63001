//! Mock implementation of the fleet interfaces for testing purposes.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod config;
mod error;
mod profiles;

use config::Config;
pub use error::Error;
pub use profiles::MockProfiles;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use proven_fleet::{EnsembleView, FleetNode, HealthChannel, NodeId, NodeInventory};
use tokio::sync::RwLock;

/// Mock node inventory and health channel.
///
/// Ensemble views are whatever the test last set; nodes marked unreachable
/// fail their health query.
#[derive(Clone, Debug, Default)]
pub struct MockFleet {
    nodes: Arc<RwLock<BTreeMap<NodeId, FleetNode>>>,
    views: Arc<RwLock<HashMap<NodeId, EnsembleView>>>,
    unreachable: Arc<RwLock<HashSet<NodeId>>>,
}

impl MockFleet {
    /// Create a new mock fleet with the given nodes.
    #[must_use]
    pub fn new(nodes: Vec<FleetNode>) -> Self {
        let nodes = nodes
            .into_iter()
            .map(|node| (node.id.clone(), node))
            .collect();

        Self {
            nodes: Arc::new(RwLock::new(nodes)),
            ..Self::default()
        }
    }

    /// Create a new mock fleet from a JSON fleet file
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The fleet file cannot be read
    /// - The fleet file contains invalid JSON
    pub fn from_fleet_file<P: AsRef<Path>>(fleet_path: P) -> Result<Self, Error> {
        let mut file = File::open(fleet_path)
            .map_err(|e| Error::FleetFile(format!("Failed to open fleet file: {e}")))?;

        let mut content = String::new();
        file.read_to_string(&mut content)
            .map_err(|e| Error::FleetFile(format!("Failed to read fleet file: {e}")))?;

        let config: Config = serde_json::from_str(&content)
            .map_err(|e| Error::FleetFile(format!("Failed to parse fleet file: {e}")))?;

        let nodes = config
            .nodes
            .into_iter()
            .map(|n| FleetNode {
                id: NodeId::new(n.id),
                address: n.address,
                alive: n.alive,
            })
            .collect();

        Ok(Self::new(nodes))
    }

    /// Add a node, replacing any node with the same ID.
    pub async fn add_node(&self, node: FleetNode) {
        self.nodes.write().await.insert(node.id.clone(), node);
    }

    /// Mark a node alive or dead.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is unknown.
    pub async fn set_alive(&self, node_id: &NodeId, alive: bool) -> Result<(), Error> {
        let mut nodes = self.nodes.write().await;
        let node = nodes
            .get_mut(node_id)
            .ok_or_else(|| Error::NodeNotFound(node_id.to_string()))?;
        node.alive = alive;
        Ok(())
    }

    /// Set the ensemble view a node reports.
    pub async fn set_view(&self, node_id: &NodeId, view: EnsembleView) {
        self.views.write().await.insert(node_id.clone(), view);
    }

    /// Make a node report no ensemble view.
    pub async fn clear_view(&self, node_id: &NodeId) {
        self.views.write().await.remove(node_id);
    }

    /// Make a node's health channel fail (or answer again).
    pub async fn set_reachable(&self, node_id: &NodeId, reachable: bool) {
        let mut unreachable = self.unreachable.write().await;
        if reachable {
            unreachable.remove(node_id);
        } else {
            unreachable.insert(node_id.clone());
        }
    }
}

#[async_trait]
impl NodeInventory for MockFleet {
    type Error = Error;

    async fn list_nodes(&self) -> Result<Vec<FleetNode>, Self::Error> {
        Ok(self.nodes.read().await.values().cloned().collect())
    }

    async fn is_alive(&self, node_id: &NodeId) -> Result<bool, Self::Error> {
        self.nodes
            .read()
            .await
            .get(node_id)
            .map(|node| node.alive)
            .ok_or_else(|| Error::NodeNotFound(node_id.to_string()))
    }
}

#[async_trait]
impl HealthChannel for MockFleet {
    type Error = Error;

    async fn ensemble_view(&self, node_id: &NodeId) -> Result<Option<EnsembleView>, Self::Error> {
        if self.unreachable.read().await.contains(node_id) {
            return Err(Error::Unreachable(node_id.to_string()));
        }

        if !self.nodes.read().await.contains_key(node_id) {
            return Err(Error::NodeNotFound(node_id.to_string()));
        }

        Ok(self.views.read().await.get(node_id).cloned())
    }
}
