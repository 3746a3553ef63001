//! Growing a standalone server
//!
//! A single server cannot become several in one step: the new members
//! first form a bridging ensemble among themselves, receive a copy of the
//! registry, and the final topology is then written on both sides.

use tracing::info;

use crate::context::OperationContext;
use crate::environment::Environment;
use crate::error::EnsembleResult;
use crate::registry::{EnsembleHandle, commit_topology, copy_subtree, push_member_profile};
use crate::wait::wait_all_for_cluster_id;

pub async fn run<E: Environment>(ctx: &OperationContext<'_, E>) -> EnsembleResult<()> {
    let target = ctx.target();
    let joining = ctx.to_add();

    for node_id in joining {
        ctx.poller().check_cancelled()?;
        push_member_profile(ctx.active(), target, node_id).await?;
    }
    wait_all_for_cluster_id(ctx.poller(), ctx.env().health(), joining, target.cluster_id()).await?;

    let bridge = EnsembleHandle::new(
        target.retain_members(|node_id| joining.contains(node_id)),
        ctx.env().connector().clone(),
    );
    let bridge_client = bridge.client(ctx.poller()).await?;
    info!(
        "Bridging ensemble up at {}",
        bridge.state().connection_url(true)
    );

    copy_subtree(ctx.active(), bridge_client, "/").await?;
    commit_topology(bridge_client, target, &[]).await?;
    commit_topology(ctx.active(), target, &[]).await
}
