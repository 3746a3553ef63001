//! The reconfiguration service
//!
//! Validates a requested membership, derives the target ensemble, persists
//! its profiles, runs the migration the topology delta calls for and waits
//! for the fleet to settle on the result. One request runs at a time.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use futures::future::try_join_all;
use parking_lot::Mutex;
use proven_fleet::{FleetNode, NodeId, NodeInventory};
use proven_registry::{RegistryClient, Transaction};
use tokio::sync::{RwLock, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{EnsembleOptions, generate_password};
use crate::context::{CompletionSignal, OperationContext};
use crate::environment::{ClientOf, Environment};
use crate::error::{EnsembleResult, Error};
use crate::layout::{cluster_key, container_path, profile_cluster_id, render_profile_set};
use crate::migration;
use crate::persistence::{load_state, mint_cluster, persist_profiles};
use crate::registry::{self, read_profile_set, topology_transaction};
use crate::selector::{keeps_quorum, select};
use crate::stage::ReconfigurationStage;
use crate::state::ClusterState;
use crate::wait::{Poller, wait_alive, wait_all_for_cluster_id, wait_for_cluster_id};

/// Manages the membership of the ensemble serving the fleet
pub struct ReconfigurationService<E: Environment> {
    env: E,
    local_node: NodeId,
    options: EnsembleOptions,
    active: Arc<RwLock<Option<ClientOf<E>>>>,
    stage: Arc<watch::Sender<ReconfigurationStage>>,
    cancel: Arc<Mutex<CancellationToken>>,
    in_flight: Arc<tokio::sync::Mutex<()>>,
}

impl<E: Environment> Clone for ReconfigurationService<E> {
    fn clone(&self) -> Self {
        Self {
            env: self.env.clone(),
            local_node: self.local_node.clone(),
            options: self.options.clone(),
            active: Arc::clone(&self.active),
            stage: Arc::clone(&self.stage),
            cancel: Arc::clone(&self.cancel),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<E: Environment> ReconfigurationService<E> {
    /// Create a service running on `local_node`
    ///
    /// `options` supply the profile version and timeouts used outside of a
    /// request (reads, attaching to an existing ensemble).
    pub fn new(env: E, local_node: NodeId, options: EnsembleOptions) -> Self {
        info!("Creating reconfiguration service on node {local_node}");

        let (stage, _) = watch::channel(ReconfigurationStage::Idle);
        Self {
            env,
            local_node,
            options,
            active: Arc::new(RwLock::new(None)),
            stage: Arc::new(stage),
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            in_flight: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// The node this service runs on
    pub const fn local_node(&self) -> &NodeId {
        &self.local_node
    }

    /// The current stage
    pub fn stage(&self) -> ReconfigurationStage {
        *self.stage.borrow()
    }

    /// Observe stage changes
    pub fn subscribe(&self) -> watch::Receiver<ReconfigurationStage> {
        self.stage.subscribe()
    }

    /// Abort the request in flight, if any
    pub fn cancel(&self) {
        info!("Cancelling reconfiguration");
        self.cancel.lock().cancel();
    }

    /// Session against the ensemble currently in use
    pub async fn active_client(&self) -> Option<ClientOf<E>> {
        self.active.read().await.clone()
    }

    /// Adopt the existing ensemble at `url`
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if no session can be established in time.
    pub async fn attach(&self, url: &str, password: &str) -> EnsembleResult<()> {
        let poller = Poller::from_options(&self.options, CancellationToken::new());
        let client = registry::connect(self.env.connector(), url, password, &poller).await?;
        self.swap_active(client).await;
        info!("Attached to ensemble at {url}");
        Ok(())
    }

    /// Node ids of the current members, in membership order
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` if the persisted ensemble cannot be rebuilt.
    pub async fn get_ensemble_containers(&self) -> EnsembleResult<Vec<NodeId>> {
        Ok(self
            .load_current(&self.options)
            .await?
            .map(|state| state.node_ids())
            .unwrap_or_default())
    }

    /// The cluster configuration of the current ensemble
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` if the persisted ensemble cannot be rebuilt.
    pub async fn get_ensemble_configuration(&self) -> EnsembleResult<BTreeMap<String, String>> {
        Ok(self
            .load_current(&self.options)
            .await?
            .map(|state| state.cluster_configuration())
            .unwrap_or_default())
    }

    /// Add `node_ids` to the current membership
    ///
    /// # Errors
    ///
    /// Returns `ContainersAlreadyInEnsemble` if any node is a member already,
    /// otherwise whatever [`create_cluster`](Self::create_cluster) returns.
    pub async fn add_to_cluster(
        &self,
        node_ids: &[NodeId],
        options: EnsembleOptions,
    ) -> EnsembleResult<()> {
        let mut members = self.load_members(&options).await?;

        let already: Vec<NodeId> = node_ids
            .iter()
            .filter(|node_id| members.contains(node_id))
            .cloned()
            .collect();
        if !already.is_empty() {
            return Err(Error::ContainersAlreadyInEnsemble(already));
        }

        members.extend(node_ids.iter().cloned());
        self.create_cluster(&members, options).await
    }

    /// Remove `node_ids` from the current membership
    ///
    /// # Errors
    ///
    /// Returns `ContainersNotInEnsemble` if any node is not a member,
    /// otherwise whatever [`create_cluster`](Self::create_cluster) returns.
    pub async fn remove_from_cluster(
        &self,
        node_ids: &[NodeId],
        options: EnsembleOptions,
    ) -> EnsembleResult<()> {
        let members = self.load_members(&options).await?;

        let missing: Vec<NodeId> = node_ids
            .iter()
            .filter(|node_id| !members.contains(node_id))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(Error::ContainersNotInEnsemble(missing));
        }

        let remaining: Vec<NodeId> = members
            .into_iter()
            .filter(|node_id| !node_ids.contains(node_id))
            .collect();
        self.create_cluster(&remaining, options).await
    }

    /// Move the ensemble to exactly `node_ids`
    ///
    /// With no ensemble in place, an empty request or one naming only the
    /// local node bootstraps a standalone ensemble on the local node.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArguments` or `ContainersNotAlive` before anything is
    /// written, and `Timeout`, `Cancelled`, `IllegalState` or `Unknown` once
    /// the migration has started. Nothing is rolled back.
    pub async fn create_cluster(
        &self,
        node_ids: &[NodeId],
        options: EnsembleOptions,
    ) -> EnsembleResult<()> {
        let _guard = self.in_flight.lock().await;

        let cancel = {
            let mut token = self.cancel.lock();
            *token = CancellationToken::new();
            token.clone()
        };

        let result = self.reconfigure(node_ids, options, cancel).await;
        match &result {
            Ok(()) => self.set_stage(ReconfigurationStage::Done),
            Err(e) => {
                error!("Reconfiguration failed: {e}");
                self.set_stage(ReconfigurationStage::Failed(e.kind()));
            }
        }
        result
    }

    fn set_stage(&self, stage: ReconfigurationStage) {
        info!("Reconfiguration stage: {stage}");
        self.stage.send_replace(stage);
    }

    async fn swap_active(&self, client: ClientOf<E>) {
        let previous = self.active.write().await.replace(client);
        if let Some(previous) = previous {
            previous.close();
        }
    }

    async fn load_current(
        &self,
        options: &EnsembleOptions,
    ) -> EnsembleResult<Option<ClusterState>> {
        let Some(client) = self.active_client().await else {
            return Ok(None);
        };
        load_state(&client, self.env.profiles(), options).await
    }

    async fn load_members(&self, options: &EnsembleOptions) -> EnsembleResult<Vec<NodeId>> {
        Ok(self
            .load_current(options)
            .await?
            .map(|state| state.node_ids())
            .unwrap_or_default())
    }

    async fn reconfigure(
        &self,
        node_ids: &[NodeId],
        options: EnsembleOptions,
        cancel: CancellationToken,
    ) -> EnsembleResult<()> {
        self.set_stage(ReconfigurationStage::Validating);
        options.validate()?;

        let mut seen = HashSet::new();
        if let Some(duplicate) = node_ids.iter().find(|node_id| !seen.insert(*node_id)) {
            return Err(Error::InvalidArguments(format!(
                "node {duplicate} requested more than once"
            )));
        }

        let nodes = self
            .env
            .inventory()
            .list_nodes()
            .await
            .map_err(|e| Error::fleet("Failed to list nodes", &e))?;

        let active = self.active_client().await;
        let current = match &active {
            Some(client) => load_state(client, self.env.profiles(), &options).await?,
            None => None,
        };

        match (active, current) {
            (Some(active), Some(current)) => {
                self.migrate(&active, current, node_ids, nodes, options, cancel)
                    .await
            }
            _ => self.bootstrap(node_ids, &nodes, options, cancel).await,
        }
    }

    async fn bootstrap(
        &self,
        node_ids: &[NodeId],
        nodes: &[FleetNode],
        options: EnsembleOptions,
        cancel: CancellationToken,
    ) -> EnsembleResult<()> {
        let local_only = node_ids.len() == 1 && node_ids[0] == self.local_node;
        if !(node_ids.is_empty() || local_only) {
            return Err(Error::InvalidArguments(
                "no ensemble exists; only the local node can bootstrap one".to_string(),
            ));
        }

        let local = nodes
            .iter()
            .find(|node| node.id == self.local_node)
            .ok_or_else(|| {
                Error::InvalidArguments(format!("local node {} is unknown", self.local_node))
            })?;
        if !local.alive {
            return Err(Error::ContainersNotAlive(vec![local.id.clone()]));
        }

        self.set_stage(ReconfigurationStage::ComputingTarget);
        let password = options.password.clone().unwrap_or_else(generate_password);
        let target = ClusterState::new(0, options.with_password(password)).add_member(local)?;

        self.set_stage(ReconfigurationStage::PersistingProfiles);
        persist_profiles(self.env.profiles(), &target).await?;

        self.set_stage(ReconfigurationStage::AwaitingConvergence);
        let poller = Poller::from_options(target.options(), cancel);
        let client = registry::connect(
            self.env.connector(),
            &target.connection_url(true),
            target.password().unwrap_or_default(),
            &poller,
        )
        .await?;

        let committed = match topology_transaction(&client, &target, &[], true).await {
            Ok(transaction) => client
                .transaction(transaction)
                .await
                .map_err(|e| Error::registry("Failed to create ensemble root", &e)),
            Err(e) => Err(e),
        };
        if let Err(e) = committed {
            client.close();
            return Err(e);
        }

        self.swap_active(client).await;
        info!(
            "Bootstrapped ensemble {} on node {}",
            cluster_key(target.cluster_id()),
            self.local_node
        );

        wait_for_cluster_id(
            &poller,
            self.env.health(),
            &self.local_node,
            target.cluster_id(),
        )
        .await
    }

    async fn migrate(
        &self,
        active: &ClientOf<E>,
        current: ClusterState,
        node_ids: &[NodeId],
        nodes: Vec<FleetNode>,
        options: EnsembleOptions,
        cancel: CancellationToken,
    ) -> EnsembleResult<()> {
        if node_ids.is_empty() {
            return Err(Error::InvalidArguments(
                "an ensemble needs at least one member".to_string(),
            ));
        }

        if node_ids.len() == 2 {
            return Err(Error::InvalidArguments(
                "an ensemble of two cannot survive the loss of either member".to_string(),
            ));
        }

        let mut dead = Vec::new();
        for node_id in node_ids {
            match nodes.iter().find(|node| &node.id == node_id) {
                None => {
                    return Err(Error::InvalidArguments(format!("node {node_id} is unknown")));
                }
                Some(node) if !node.alive => dead.push(node_id.clone()),
                Some(_) => {}
            }
        }
        if !dead.is_empty() {
            return Err(Error::ContainersNotAlive(dead));
        }

        let requested: HashSet<&NodeId> = node_ids.iter().collect();
        let members = current.node_ids();
        if members.len() == requested.len() && members.iter().all(|id| requested.contains(id)) {
            info!(
                "Ensemble {} already has the requested members",
                cluster_key(current.cluster_id())
            );
            return Ok(());
        }

        self.set_stage(ReconfigurationStage::ComputingTarget);
        let target = self.compute_target(&current, node_ids, &nodes, options).await?;

        let retained = target
            .node_ids()
            .iter()
            .filter(|node_id| current.contains(node_id))
            .count();
        let algorithm = select(
            target.len() - retained,
            current.len() - retained,
            current.len(),
            target.len(),
        )
        .ok_or_else(|| Error::IllegalState("no migration for an unchanged topology".to_string()))?;

        if algorithm.is_rolling() && !keeps_quorum(retained, current.len(), target.len()) {
            return Err(Error::InvalidArguments(format!(
                "{retained} of {} members would carry over to an ensemble of {}; \
                 a {algorithm} migration needs a majority of both",
                current.len(),
                target.len()
            )));
        }

        self.set_stage(ReconfigurationStage::PersistingProfiles);
        persist_profiles(self.env.profiles(), &target).await?;

        let poller = Poller::from_options(target.options(), cancel);
        let ctx = OperationContext::new(&self.env, active, current, target, nodes, poller);

        self.set_stage(ReconfigurationStage::Migrating(algorithm));
        migration::run(algorithm, &ctx).await?;

        self.set_stage(ReconfigurationStage::AwaitingConvergence);
        self.adopt(&ctx).await?;
        self.await_convergence(&ctx).await?;

        self.set_stage(ReconfigurationStage::CleaningUp);
        self.clean_up(ctx.target(), ctx.nodes()).await
    }

    async fn compute_target(
        &self,
        current: &ClusterState,
        node_ids: &[NodeId],
        nodes: &[FleetNode],
        options: EnsembleOptions,
    ) -> EnsembleResult<ClusterState> {
        let mut target = current.clone();

        for member in current.node_ids() {
            if !node_ids.contains(&member) {
                target = target.remove_member(&member)?;
            }
        }

        for node_id in node_ids {
            if current.contains(node_id) {
                continue;
            }
            let node = nodes
                .iter()
                .find(|node| &node.id == node_id)
                .ok_or_else(|| Error::InvalidArguments(format!("node {node_id} is unknown")))?;
            target = target.add_member(node)?;
        }

        let password = options
            .password
            .clone()
            .or_else(|| current.password().map(ToString::to_string))
            .unwrap_or_else(generate_password);

        mint_cluster(
            self.env.profiles(),
            &target.with_options(options.with_password(password)),
        )
        .await
    }

    /// Switch the active session to the target ensemble in the background
    /// and wait for the switch to be reported
    async fn adopt(&self, ctx: &OperationContext<'_, E>) -> EnsembleResult<()> {
        let connector = self.env.connector().clone();
        let active = Arc::clone(&self.active);
        let url = ctx.target().connection_url(true);
        let password = ctx.password().unwrap_or_default().to_string();
        let poller = ctx.poller().clone();
        let signal: CompletionSignal = ctx.completion().clone();

        let worker = tokio::spawn(async move {
            match registry::connect(&connector, &url, &password, &poller).await {
                Ok(client) => {
                    let previous = active.write().await.replace(client);
                    if let Some(previous) = previous {
                        previous.close();
                    }
                    info!("Adopted ensemble at {url}");
                    signal.fire();
                }
                Err(e) => {
                    warn!("Failed to adopt ensemble at {url}: {e}");
                    signal.fail(e.to_string());
                }
            }
        });

        let result = ctx.completion().wait(ctx.poller()).await;
        if result.is_err() {
            worker.abort();
        }
        result
    }

    async fn await_convergence(&self, ctx: &OperationContext<'_, E>) -> EnsembleResult<()> {
        let target = ctx.target();
        wait_all_for_cluster_id(
            ctx.poller(),
            self.env.health(),
            &target.node_ids(),
            target.cluster_id(),
        )
        .await?;

        let alive = ctx.alive_nodes();
        try_join_all(
            alive
                .iter()
                .map(|node_id| wait_alive(ctx.poller(), self.env.inventory(), node_id)),
        )
        .await?;

        info!(
            "Fleet converged on ensemble {}",
            cluster_key(target.cluster_id())
        );
        Ok(())
    }

    /// Drop references to every ensemble but `target` from the fleet's
    /// profile sets
    async fn clean_up(&self, target: &ClusterState, nodes: &[FleetNode]) -> EnsembleResult<()> {
        let client = self
            .active_client()
            .await
            .ok_or_else(|| Error::IllegalState("no active registry session".to_string()))?;
        let version = &target.options().version;

        let mut transaction = Transaction::new();
        for node in nodes {
            let profiles = read_profile_set(&client, version, &node.id).await?;
            let retained: Vec<String> = profiles
                .iter()
                .filter(|id| profile_cluster_id(id).is_none_or(|cid| cid == target.cluster_id()))
                .cloned()
                .collect();

            if retained.len() != profiles.len() {
                debug!("Dropping retired ensemble profiles from {}", node.id);
                transaction = transaction.write(
                    container_path(version, &node.id),
                    render_profile_set(&retained),
                );
            }
        }

        if transaction.is_empty() {
            return Ok(());
        }

        client
            .transaction(transaction)
            .await
            .map_err(|e| Error::registry("Failed to drop retired ensemble profiles", &e))
    }
}
