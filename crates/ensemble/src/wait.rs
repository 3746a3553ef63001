//! Bounded, cancellable polling
//!
//! Every wait a reconfiguration performs goes through a [`Poller`]: it
//! re-evaluates a check at a fixed interval until the check holds, the
//! migration timeout elapses, or the request is cancelled. Collaborator
//! errors seen while polling are logged and treated as "not yet".

use std::future::Future;
use std::time::Duration;

use futures::future::try_join_all;
use proven_fleet::{HealthChannel, NodeId, NodeInventory};
use proven_registry::RegistryClient;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::EnsembleOptions;
use crate::error::{EnsembleResult, Error};

/// Re-evaluates checks until they hold, bounded by a timeout
#[derive(Clone, Debug)]
pub struct Poller {
    timeout: Duration,
    interval: Duration,
    cancel: CancellationToken,
}

impl Poller {
    /// Create a poller
    #[must_use]
    pub const fn new(timeout: Duration, interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            timeout,
            interval,
            cancel,
        }
    }

    /// Create a poller bounded by the options' migration timeout
    #[must_use]
    pub fn from_options(options: &EnsembleOptions, cancel: CancellationToken) -> Self {
        Self::new(options.migration_timeout, options.poll_interval, cancel)
    }

    /// The bound on every wait
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Poll `check` until it returns true
    ///
    /// # Errors
    ///
    /// Returns `Timeout` naming `what` once the bound elapses, or
    /// `Cancelled` if the request is cancelled first.
    pub async fn until<F, Fut>(&self, what: &str, mut check: F) -> EnsembleResult<()>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = bool> + Send,
    {
        let poll = async {
            loop {
                if self.cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }

                if check().await {
                    return Ok(());
                }

                debug!("still waiting for {what}");

                tokio::select! {
                    () = self.cancel.cancelled() => return Err(Error::Cancelled),
                    () = tokio::time::sleep(self.interval) => {}
                }
            }
        };

        tokio::time::timeout(self.timeout, poll)
            .await
            .unwrap_or_else(|_| {
                Err(Error::Timeout {
                    what: what.to_string(),
                    timeout: self.timeout,
                })
            })
    }

    /// Drive `future` to completion within the bound
    ///
    /// # Errors
    ///
    /// Returns `Timeout` naming `what` once the bound elapses, `Cancelled`
    /// if the request is cancelled first, or the future's own error.
    pub async fn within<F, T>(&self, what: &str, future: F) -> EnsembleResult<T>
    where
        F: Future<Output = EnsembleResult<T>> + Send,
    {
        let bounded = async {
            tokio::select! {
                () = self.cancel.cancelled() => Err(Error::Cancelled),
                result = future => result,
            }
        };

        tokio::time::timeout(self.timeout, bounded)
            .await
            .unwrap_or_else(|_| {
                Err(Error::Timeout {
                    what: what.to_string(),
                    timeout: self.timeout,
                })
            })
    }

    /// Sleep for `duration` unless cancelled first
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` if the request is cancelled while sleeping.
    pub async fn pause(&self, duration: Duration) -> EnsembleResult<()> {
        tokio::select! {
            () = self.cancel.cancelled() => Err(Error::Cancelled),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Fail fast if the request was cancelled
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` once the token has fired.
    pub fn check_cancelled(&self) -> EnsembleResult<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Wait until `node` reports membership of ensemble `cluster_id`
pub async fn wait_for_cluster_id<H: HealthChannel>(
    poller: &Poller,
    health: &H,
    node_id: &NodeId,
    cluster_id: u32,
) -> EnsembleResult<()> {
    let what = format!("node {node_id} to join ensemble {cluster_id:04}");
    poller
        .until(&what, || async {
            match health.ensemble_view(node_id).await {
                Ok(Some(view)) => view.cluster_id == cluster_id,
                Ok(None) => false,
                Err(e) => {
                    warn!("Failed to read ensemble view of {node_id}: {e}");
                    false
                }
            }
        })
        .await
}

/// Wait until every node in `node_ids` reports ensemble `cluster_id`
pub async fn wait_all_for_cluster_id<H: HealthChannel>(
    poller: &Poller,
    health: &H,
    node_ids: &[NodeId],
    cluster_id: u32,
) -> EnsembleResult<()> {
    try_join_all(
        node_ids
            .iter()
            .map(|node_id| wait_for_cluster_id(poller, health, node_id, cluster_id)),
    )
    .await
    .map(|_| ())
}

/// Wait until `node` reports it is connected through `url`
pub async fn wait_for_connection_url<H: HealthChannel>(
    poller: &Poller,
    health: &H,
    node_id: &NodeId,
    url: &str,
) -> EnsembleResult<()> {
    let what = format!("node {node_id} to connect through {url}");
    poller
        .until(&what, || async {
            match health.ensemble_view(node_id).await {
                Ok(Some(view)) => view.connection_url.as_deref() == Some(url),
                Ok(None) => false,
                Err(e) => {
                    warn!("Failed to read ensemble view of {node_id}: {e}");
                    false
                }
            }
        })
        .await
}

/// Wait until the inventory reports `node` alive
pub async fn wait_alive<I: NodeInventory>(
    poller: &Poller,
    inventory: &I,
    node_id: &NodeId,
) -> EnsembleResult<()> {
    let what = format!("node {node_id} to be alive");
    poller
        .until(&what, || async {
            match inventory.is_alive(node_id).await {
                Ok(alive) => alive,
                Err(e) => {
                    warn!("Failed to check liveness of {node_id}: {e}");
                    false
                }
            }
        })
        .await
}

/// Wait until `client` has a live session
pub async fn wait_connected<C: RegistryClient>(poller: &Poller, client: &C) -> EnsembleResult<()> {
    poller
        .until("registry session", || client.is_connected())
        .await
}
