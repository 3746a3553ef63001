//! Shrinking to a standalone server
//!
//! The fleet is first moved onto the survivors of the current ensemble,
//! then the survivor is switched to standalone and the registry is carried
//! over from the bridge.

use futures::future::try_join_all;
use tracing::info;

use crate::context::OperationContext;
use crate::environment::Environment;
use crate::error::EnsembleResult;
use crate::registry::{
    EnsembleHandle, commit_topology, copy_subtree, push_member_profile, write_connection_url,
};
use crate::wait::{wait_for_cluster_id, wait_for_connection_url};

pub async fn run<E: Environment>(ctx: &OperationContext<'_, E>) -> EnsembleResult<()> {
    let current = ctx.current();
    let target = ctx.target();
    let leaving = ctx.to_remove();
    let poller = ctx.poller();
    let health = ctx.env().health();

    let intermediate = current.retain_members(|node_id| !leaving.contains(node_id));
    let bridge_url = intermediate.connection_url(true);

    write_connection_url(ctx.active(), current.cluster_id(), &bridge_url).await?;
    let observers = ctx.alive_nodes();
    try_join_all(
        observers
            .iter()
            .map(|node_id| wait_for_connection_url(poller, health, node_id, &bridge_url)),
    )
    .await?;
    info!("Fleet moved onto bridging ensemble at {bridge_url}");

    for node_id in target.node_ids() {
        poller.check_cancelled()?;
        push_member_profile(ctx.active(), target, &node_id).await?;
        wait_for_cluster_id(poller, health, &node_id, target.cluster_id()).await?;
    }

    let bridge = EnsembleHandle::new(intermediate, ctx.env().connector().clone());
    let standalone = EnsembleHandle::new(target.clone(), ctx.env().connector().clone());
    let bridge_client = bridge.client(poller).await?;
    let standalone_client = standalone.client(poller).await?;

    copy_subtree(bridge_client, standalone_client, "/").await?;
    commit_topology(bridge_client, target, leaving).await?;
    commit_topology(standalone_client, target, leaving).await
}
