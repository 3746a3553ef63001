//! The four migration algorithms
//!
//! Each algorithm leaves the target topology committed on every registry
//! the fleet may still be reading from. None of them roll back: a failed
//! step leaves whatever was pushed so far in place and the request is
//! retried as a whole.

mod downgrade;
mod rolling;
mod upgrade;

use tracing::info;

use crate::context::OperationContext;
use crate::environment::Environment;
use crate::error::EnsembleResult;
use crate::layout::cluster_key;
use crate::selector::Algorithm;

/// Run `algorithm` against `ctx`
///
/// # Errors
///
/// Returns `Timeout` if a node does not switch in time, `Cancelled` if the
/// request is cancelled, or a registry error if a commit fails.
pub async fn run<E: Environment>(
    algorithm: Algorithm,
    ctx: &OperationContext<'_, E>,
) -> EnsembleResult<()> {
    info!(
        "Migrating ensemble {} to {} using {algorithm}",
        cluster_key(ctx.current().cluster_id()),
        cluster_key(ctx.target().cluster_id())
    );

    match algorithm {
        Algorithm::RollingAdd => rolling::add(ctx).await,
        Algorithm::RollingRemove => rolling::remove(ctx).await,
        Algorithm::UpgradeFromSingleServer => upgrade::run(ctx).await,
        Algorithm::DowngradeToSingleServer => downgrade::run(ctx).await,
    }
}
