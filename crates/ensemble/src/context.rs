//! Per-request context handed to a migration

use std::sync::Arc;

use proven_fleet::{FleetNode, NodeId};
use tokio::sync::watch;

use crate::environment::{ClientOf, Environment};
use crate::error::{EnsembleResult, Error};
use crate::state::ClusterState;
use crate::wait::Poller;

#[derive(Clone, Debug, Eq, PartialEq)]
enum Adoption {
    Pending,
    Adopted,
    Failed(String),
}

/// Fires once the consuming side has switched to the new registry
#[derive(Clone, Debug)]
pub struct CompletionSignal {
    sender: Arc<watch::Sender<Adoption>>,
}

impl CompletionSignal {
    /// Create an unfired signal
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(Adoption::Pending);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Report that the new registry is in use
    pub fn fire(&self) {
        self.sender.send_replace(Adoption::Adopted);
    }

    /// Report that the new registry could not be adopted
    pub fn fail(&self, reason: String) {
        self.sender.send_replace(Adoption::Failed(reason));
    }

    /// Wait for the signal, bounded by `poller`
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the signal does not fire in time, or a registry
    /// error if adoption failed.
    pub async fn wait(&self, poller: &Poller) -> EnsembleResult<()> {
        let mut receiver = self.sender.subscribe();
        poller
            .within("registry adoption", async move {
                let outcome = receiver
                    .wait_for(|adoption| *adoption != Adoption::Pending)
                    .await
                    .map_err(|_| Error::IllegalState("completion signal dropped".to_string()))?
                    .clone();

                match outcome {
                    Adoption::Failed(reason) => Err(Error::Registry(reason)),
                    Adoption::Pending | Adoption::Adopted => Ok(()),
                }
            })
            .await
    }
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a migration needs, fixed for the duration of one request
pub struct OperationContext<'a, E: Environment> {
    env: &'a E,
    active: &'a ClientOf<E>,
    current: ClusterState,
    target: ClusterState,
    to_add: Vec<NodeId>,
    to_remove: Vec<NodeId>,
    nodes: Vec<FleetNode>,
    poller: Poller,
    completion: CompletionSignal,
}

impl<'a, E: Environment> OperationContext<'a, E> {
    /// Build the context, deriving the node deltas from the two states
    pub fn new(
        env: &'a E,
        active: &'a ClientOf<E>,
        current: ClusterState,
        target: ClusterState,
        nodes: Vec<FleetNode>,
        poller: Poller,
    ) -> Self {
        let to_add = target
            .node_ids()
            .into_iter()
            .filter(|node_id| !current.contains(node_id))
            .collect();
        let to_remove = current
            .node_ids()
            .into_iter()
            .filter(|node_id| !target.contains(node_id))
            .collect();

        Self {
            env,
            active,
            current,
            target,
            to_add,
            to_remove,
            nodes,
            poller,
            completion: CompletionSignal::new(),
        }
    }

    /// The collaborators
    pub const fn env(&self) -> &'a E {
        self.env
    }

    /// Session against the ensemble in use when the request started
    pub const fn active(&self) -> &'a ClientOf<E> {
        self.active
    }

    /// The ensemble before the request
    pub const fn current(&self) -> &ClusterState {
        &self.current
    }

    /// The ensemble the request converges to
    pub const fn target(&self) -> &ClusterState {
        &self.target
    }

    /// Nodes joining, in target membership order
    pub fn to_add(&self) -> &[NodeId] {
        &self.to_add
    }

    /// Nodes leaving
    pub fn to_remove(&self) -> &[NodeId] {
        &self.to_remove
    }

    /// Fleet inventory snapshot taken when the request started
    pub fn nodes(&self) -> &[FleetNode] {
        &self.nodes
    }

    /// Nodes alive when the request started
    pub fn alive_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|node| node.alive)
            .map(|node| node.id.clone())
            .collect()
    }

    /// The bound on every wait
    pub const fn poller(&self) -> &Poller {
        &self.poller
    }

    /// The target ensemble password
    pub fn password(&self) -> Option<&str> {
        self.target.password()
    }

    /// Fires once the new registry is adopted
    pub const fn completion(&self) -> &CompletionSignal {
        &self.completion
    }
}
