//! Steady-state rolling migrations
//!
//! Nodes switch one at a time and each must report the new ensemble before
//! the next one is touched, so at most one member is restarting at any
//! moment.

use proven_fleet::NodeId;
use tracing::info;

use crate::context::OperationContext;
use crate::environment::Environment;
use crate::error::EnsembleResult;
use crate::registry::{commit_topology, push_member_profile};
use crate::wait::wait_for_cluster_id;

async fn switch<E: Environment>(
    ctx: &OperationContext<'_, E>,
    node_id: &NodeId,
) -> EnsembleResult<()> {
    ctx.poller().check_cancelled()?;

    let target = ctx.target();
    push_member_profile(ctx.active(), target, node_id).await?;
    wait_for_cluster_id(ctx.poller(), ctx.env().health(), node_id, target.cluster_id()).await?;

    info!("Node {node_id} joined ensemble {:04}", target.cluster_id());
    Ok(())
}

/// Switch joining nodes first, then the existing members
pub async fn add<E: Environment>(ctx: &OperationContext<'_, E>) -> EnsembleResult<()> {
    let existing = ctx
        .target()
        .node_ids()
        .into_iter()
        .filter(|node_id| !ctx.to_add().contains(node_id));
    let order: Vec<NodeId> = ctx.to_add().iter().cloned().chain(existing).collect();

    for node_id in &order {
        switch(ctx, node_id).await?;
    }

    commit_topology(ctx.active(), ctx.target(), &[]).await
}

/// Switch the surviving members, pausing between them, then drop the
/// leaving nodes' ensemble profiles with the commit
pub async fn remove<E: Environment>(ctx: &OperationContext<'_, E>) -> EnsembleResult<()> {
    let settle_delay = ctx.target().options().settle_delay;

    for (index, node_id) in ctx.target().node_ids().iter().enumerate() {
        if index > 0 && !settle_delay.is_zero() {
            ctx.poller().pause(settle_delay).await?;
        }
        switch(ctx, node_id).await?;
    }

    commit_topology(ctx.active(), ctx.target(), ctx.to_remove()).await
}
