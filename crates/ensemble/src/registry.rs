//! Registry primitives shared by every migration
//!
//! Topology records (`/config/ensembles`, the member list, the password, the
//! connection URL and the per-node profile sets) are only ever written
//! together, in one transaction, so a node reading the registry never sees a
//! half-applied topology.

use bytes::Bytes;
use proven_fleet::NodeId;
use proven_registry::{RegistryClient, RegistryConnector, Transaction, child_path};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::{EnsembleResult, Error};
use crate::layout::{
    ENSEMBLES_PATH, cluster_key, container_path, ensemble_path, member_profile_id,
    parse_profile_set, password_path, render_profile_set, rewrite_profile_set, url_path,
};
use crate::state::ClusterState;
use crate::wait::{Poller, wait_connected};

/// Read a UTF-8 value
pub async fn read_string<C: RegistryClient>(
    client: &C,
    path: &str,
) -> EnsembleResult<Option<String>> {
    let Some(data) = client
        .read(path)
        .await
        .map_err(|e| Error::registry(&format!("Failed to read {path}"), &e))?
    else {
        return Ok(None);
    };

    String::from_utf8(data.to_vec())
        .map(Some)
        .map_err(|_| Error::IllegalState(format!("{path} is not valid UTF-8")))
}

/// Read the identity of the ensemble currently in use, if any
pub async fn read_cluster_id<C: RegistryClient>(client: &C) -> EnsembleResult<Option<u32>> {
    read_string(client, ENSEMBLES_PATH)
        .await?
        .map(|value| {
            value.trim().parse().map_err(|_| {
                Error::IllegalState(format!("{ENSEMBLES_PATH} holds malformed id {value}"))
            })
        })
        .transpose()
}

/// Read the profile set assigned to `node_id`
pub async fn read_profile_set<C: RegistryClient>(
    client: &C,
    version: &str,
    node_id: &NodeId,
) -> EnsembleResult<Vec<String>> {
    Ok(read_string(client, &container_path(version, node_id))
        .await?
        .map(|value| parse_profile_set(&value))
        .unwrap_or_default())
}

/// Copy every value under `root` from `source` into `target` in one
/// transaction
///
/// # Errors
///
/// Returns `Unknown` (as a registry error) if a read or the commit fails.
pub async fn copy_subtree<S, T>(source: &S, target: &T, root: &str) -> EnsembleResult<()>
where
    S: RegistryClient,
    T: RegistryClient,
{
    let mut pending = vec![root.to_string()];
    let mut transaction = Transaction::new();

    while let Some(path) = pending.pop() {
        let data: Option<Bytes> = source
            .read(&path)
            .await
            .map_err(|e| Error::registry(&format!("Failed to copy {path}"), &e))?;
        if let Some(data) = data {
            transaction = transaction.write(path.clone(), data);
        }

        let children = source
            .children(&path)
            .await
            .map_err(|e| Error::registry(&format!("Failed to list {path}"), &e))?;
        pending.extend(children.iter().map(|child| child_path(&path, child)));
    }

    debug!("Copying {} values under {root}", transaction.len());

    if transaction.is_empty() {
        return Ok(());
    }

    target
        .transaction(transaction)
        .await
        .map_err(|e| Error::registry("Failed to write copied subtree", &e))
}

fn ensemble_password(state: &ClusterState) -> EnsembleResult<&str> {
    state.password().ok_or_else(|| {
        Error::IllegalState(format!(
            "ensemble {} has no password",
            cluster_key(state.cluster_id())
        ))
    })
}

/// Build the transaction describing `state` as the ensemble in use
///
/// Every member's profile set is pointed at its member profile and every
/// node in `removed` loses its ensemble profiles. With `bootstrap` the
/// ensemble root is created rather than overwritten, so a concurrent
/// bootstrap fails the commit.
pub async fn topology_transaction<C: RegistryClient>(
    client: &C,
    state: &ClusterState,
    removed: &[NodeId],
    bootstrap: bool,
) -> EnsembleResult<Transaction> {
    let cluster_id = state.cluster_id();
    let version = &state.options().version;
    let members = state
        .node_ids()
        .iter()
        .map(NodeId::as_str)
        .collect::<Vec<_>>()
        .join(",");

    let root = cluster_key(cluster_id);
    let mut transaction = if bootstrap {
        Transaction::new().create(ENSEMBLES_PATH, root)
    } else {
        Transaction::new().write(ENSEMBLES_PATH, root)
    };

    transaction = transaction
        .write(ensemble_path(cluster_id), members)
        .write(password_path(cluster_id), ensemble_password(state)?.to_string())
        .write(url_path(cluster_id), state.connection_url(true));

    for (membership_id, member) in state.members() {
        let profiles = read_profile_set(client, version, member.node_id()).await?;
        let profile_id = member_profile_id(cluster_id, *membership_id);
        transaction = transaction.write(
            container_path(version, member.node_id()),
            render_profile_set(&rewrite_profile_set(&profiles, Some(&profile_id))),
        );
    }

    for node_id in removed {
        let profiles = read_profile_set(client, version, node_id).await?;
        transaction = transaction.write(
            container_path(version, node_id),
            render_profile_set(&rewrite_profile_set(&profiles, None)),
        );
    }

    Ok(transaction)
}

/// Commit `state` as the ensemble in use on `client`
pub async fn commit_topology<C: RegistryClient>(
    client: &C,
    state: &ClusterState,
    removed: &[NodeId],
) -> EnsembleResult<()> {
    let transaction = topology_transaction(client, state, removed, false).await?;
    client
        .transaction(transaction)
        .await
        .map_err(|e| Error::registry("Failed to commit ensemble topology", &e))?;

    info!(
        "Committed ensemble {} with members {}",
        cluster_key(state.cluster_id()),
        state.connection_url(true)
    );
    Ok(())
}

/// Point `node_id` at its member profile in `state`
pub async fn push_member_profile<C: RegistryClient>(
    client: &C,
    state: &ClusterState,
    node_id: &NodeId,
) -> EnsembleResult<()> {
    let (membership_id, _) = state
        .member(node_id)
        .ok_or_else(|| Error::ContainersNotInEnsemble(vec![node_id.clone()]))?;
    let version = &state.options().version;

    let profiles = read_profile_set(client, version, node_id).await?;
    let profile_id = member_profile_id(state.cluster_id(), membership_id);
    let updated = rewrite_profile_set(&profiles, Some(&profile_id));

    client
        .transaction(Transaction::new().write(
            container_path(version, node_id),
            render_profile_set(&updated),
        ))
        .await
        .map_err(|e| Error::registry(&format!("Failed to push profile to {node_id}"), &e))?;

    info!("Switched node {node_id} to profile {profile_id}");
    Ok(())
}

/// Write the connection URL of ensemble `cluster_id`
pub async fn write_connection_url<C: RegistryClient>(
    client: &C,
    cluster_id: u32,
    url: &str,
) -> EnsembleResult<()> {
    client
        .transaction(Transaction::new().write(url_path(cluster_id), url.to_string()))
        .await
        .map_err(|e| Error::registry("Failed to write connection url", &e))
}

/// Connect to the ensemble at `url` and wait for the session
///
/// The client is closed again if the session never comes up.
pub async fn connect<R: RegistryConnector>(
    connector: &R,
    url: &str,
    password: &str,
    poller: &Poller,
) -> EnsembleResult<R::Client> {
    debug!("Connecting to ensemble at {url}");

    let client = connector
        .connect(url, password)
        .await
        .map_err(|e| Error::registry(&format!("Failed to connect to {url}"), &e))?;

    if let Err(e) = wait_connected(poller, &client).await {
        client.close();
        return Err(e);
    }

    Ok(client)
}

/// A [`ClusterState`] with a lazily opened registry session
///
/// The session is closed when the handle is dropped unless it was detached.
pub struct EnsembleHandle<R: RegistryConnector> {
    state: ClusterState,
    connector: R,
    client: OnceCell<R::Client>,
}

impl<R: RegistryConnector> EnsembleHandle<R> {
    /// Create a handle; no session is opened yet
    pub fn new(state: ClusterState, connector: R) -> Self {
        Self {
            state,
            connector,
            client: OnceCell::new(),
        }
    }

    /// The ensemble this handle targets
    pub const fn state(&self) -> &ClusterState {
        &self.state
    }

    /// The session, opening it on first use
    pub async fn client(&self, poller: &Poller) -> EnsembleResult<&R::Client> {
        self.client
            .get_or_try_init(|| async {
                let password = ensemble_password(&self.state)?;
                connect(
                    &self.connector,
                    &self.state.connection_url(true),
                    password,
                    poller,
                )
                .await
            })
            .await
    }

    /// Hand the session to the caller instead of closing it on drop
    pub fn detach(mut self) -> Option<R::Client> {
        self.client.take()
    }
}

impl<R: RegistryConnector> Drop for EnsembleHandle<R> {
    fn drop(&mut self) {
        if let Some(client) = self.client.get() {
            debug!(
                "Closing session to ensemble {}",
                cluster_key(self.state.cluster_id())
            );
            client.close();
        }
    }
}
