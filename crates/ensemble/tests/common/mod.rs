//! Test helpers for driving reconfigurations against a simulated fleet
//!
//! Node agents are simulated: a node follows the newest in-memory ensemble
//! that holds its profile set and reports the ensemble its member profile
//! names. A node without a member profile reports whatever ensemble the
//! registry points at, the way a plain client of the ensemble would.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use proven_ensemble::{
    Collaborators, ENSEMBLES_PATH, EnsembleOptions, EnsembleOptionsBuilder, FleetNode, NodeId,
    ReconfigurationService, container_path, profile_cluster_id, url_path,
};
use proven_fleet::{EnsembleView, HealthChannel, NodeInventory};
use proven_fleet_mock::{Error as FleetMockError, MockFleet, MockProfiles};
use proven_registry::RegistryClient;
use proven_registry_memory::{MemoryConnector, MemoryRegistry};
use tokio::sync::RwLock;

/// The environment every test runs against
pub type TestEnvironment = Collaborators<MemoryConnector, MockFleet, SimulatedAgents, MockProfiles>;

/// Health channel backed by simulated node agents
#[derive(Clone, Debug)]
pub struct SimulatedAgents {
    fleet: MockFleet,
    connector: MemoryConnector,
    version: String,
    frozen: Arc<RwLock<HashMap<NodeId, Option<EnsembleView>>>>,
}

fn decode(data: Option<bytes::Bytes>) -> Option<String> {
    data.and_then(|data| String::from_utf8(data.to_vec()).ok())
}

async fn read(store: &MemoryRegistry, path: &str) -> Option<String> {
    decode(store.read(path).await.ok().flatten())
}

async fn view_through_pointer(store: &MemoryRegistry) -> Option<EnsembleView> {
    let cluster_id: u32 = read(store, ENSEMBLES_PATH).await?.parse().ok()?;
    Some(EnsembleView {
        cluster_id,
        connection_url: read(store, &url_path(cluster_id)).await,
    })
}

impl SimulatedAgents {
    /// Simulate agents for every node in `fleet`
    pub fn new(fleet: MockFleet, connector: MemoryConnector, version: &str) -> Self {
        Self {
            fleet,
            connector,
            version: version.to_string(),
            frozen: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Stop `node_id` from following any further profile change
    pub async fn freeze(&self, node_id: &NodeId) {
        let view = self.observe(node_id).await;
        self.frozen.write().await.insert(node_id.clone(), view);
    }

    /// Let `node_id` follow profile changes again
    pub async fn thaw(&self, node_id: &NodeId) {
        self.frozen.write().await.remove(node_id);
    }

    async fn observe(&self, node_id: &NodeId) -> Option<EnsembleView> {
        let path = container_path(&self.version, node_id);
        let stores = self.connector.registries().await;

        for store in &stores {
            let Some(profiles) = read(store, &path).await else {
                continue;
            };

            let cluster_id = profiles
                .split_whitespace()
                .filter_map(profile_cluster_id)
                .max();

            return match cluster_id {
                Some(cluster_id) => Some(EnsembleView {
                    cluster_id,
                    connection_url: read(store, &url_path(cluster_id)).await,
                }),
                None => view_through_pointer(store).await,
            };
        }

        for store in &stores {
            if let Some(view) = view_through_pointer(store).await {
                return Some(view);
            }
        }

        None
    }
}

#[async_trait]
impl HealthChannel for SimulatedAgents {
    type Error = FleetMockError;

    async fn ensemble_view(&self, node_id: &NodeId) -> Result<Option<EnsembleView>, Self::Error> {
        if !self.fleet.is_alive(node_id).await? {
            return Err(FleetMockError::Unreachable(node_id.to_string()));
        }

        if let Some(view) = self.frozen.read().await.get(node_id) {
            return Ok(view.clone());
        }

        Ok(self.observe(node_id).await)
    }
}

/// A fleet of nodes `n1..=nN`, managed from `n1`
pub struct TestFleet {
    pub fleet: MockFleet,
    pub connector: MemoryConnector,
    pub profiles: MockProfiles,
    pub agents: SimulatedAgents,
    pub service: ReconfigurationService<TestEnvironment>,
}

impl TestFleet {
    /// Create a fleet of `node_count` nodes; no ensemble exists yet
    pub fn new(node_count: usize) -> Self {
        Self::from_nodes(
            (1..=node_count)
                .map(|i| FleetNode::new(format!("n{i}"), format!("10.0.0.{i}")))
                .collect(),
        )
    }

    /// Create a fleet of `node_count` nodes sharing `host`; no ensemble
    /// exists yet
    pub fn on_host(node_count: usize, host: &str) -> Self {
        Self::from_nodes(
            (1..=node_count)
                .map(|i| FleetNode::new(format!("n{i}"), host))
                .collect(),
        )
    }

    fn from_nodes(nodes: Vec<FleetNode>) -> Self {
        let fleet = MockFleet::new(nodes);
        let connector = MemoryConnector::new();
        let profiles = MockProfiles::new();
        let options = options();
        let agents = SimulatedAgents::new(fleet.clone(), connector.clone(), &options.version);

        let env = Collaborators::new(
            connector.clone(),
            fleet.clone(),
            agents.clone(),
            profiles.clone(),
        );
        let service = ReconfigurationService::new(env, NodeId::new("n1"), options);

        Self {
            fleet,
            connector,
            profiles,
            agents,
            service,
        }
    }

    /// Create a fleet with a standalone ensemble on `n1`
    pub async fn bootstrapped(node_count: usize) -> Self {
        let fleet = Self::new(node_count);
        fleet
            .service
            .create_cluster(&[], options())
            .await
            .expect("bootstrap failed");
        fleet
    }

    /// Create a fleet with an ensemble of `members` nodes `n1..`
    pub async fn with_members(node_count: usize, members: usize) -> Self {
        let fleet = Self::bootstrapped(node_count).await;
        if members > 1 {
            fleet
                .service
                .create_cluster(&ids_up_to(members), options())
                .await
                .expect("growing the ensemble failed");
        }
        fleet
    }

    /// Session the service currently uses
    pub async fn active(&self) -> MemoryRegistry {
        self.service
            .active_client()
            .await
            .expect("no active registry session")
    }

    /// The ensemble id `/config/ensembles` points at
    pub async fn cluster_id(&self) -> Option<u32> {
        read(&self.active().await, ENSEMBLES_PATH)
            .await
            .and_then(|value| value.parse().ok())
    }

    /// The profile set assigned to `node`
    pub async fn profile_set(&self, node: &str) -> Vec<String> {
        read(
            &self.active().await,
            &container_path("1.0", &NodeId::new(node)),
        )
        .await
        .map(|value| value.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
    }

    /// The ensemble `node` reports through its health channel
    pub async fn view(&self, node: &str) -> Option<EnsembleView> {
        self.agents
            .ensemble_view(&NodeId::new(node))
            .await
            .ok()
            .flatten()
    }
}

/// Options with short waits for tests
pub fn options() -> EnsembleOptions {
    EnsembleOptionsBuilder::new()
        .password("secret")
        .migration_timeout(Duration::from_secs(10))
        .poll_interval(Duration::from_millis(50))
        .settle_delay(Duration::from_millis(500))
        .build()
}

/// Node ids from names
pub fn ids(names: &[&str]) -> Vec<NodeId> {
    names.iter().map(|name| NodeId::new(*name)).collect()
}

/// Node ids `n1..=nN`
pub fn ids_up_to(count: usize) -> Vec<NodeId> {
    (1..=count).map(|i| NodeId::new(format!("n{i}"))).collect()
}
