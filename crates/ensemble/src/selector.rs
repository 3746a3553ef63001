//! Choosing a migration strategy from the topology delta

use std::fmt;

/// The four ways an ensemble can move between memberships
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Algorithm {
    /// Switch nodes one at a time onto a larger ensemble.
    RollingAdd,

    /// Switch nodes one at a time onto a smaller ensemble.
    RollingRemove,

    /// Grow a standalone server through a bridging ensemble of the new nodes.
    UpgradeFromSingleServer,

    /// Shrink to a standalone server through a bridging ensemble of the
    /// survivors.
    DowngradeToSingleServer,
}

impl Algorithm {
    /// Returns true for the algorithms that switch nodes in place
    #[must_use]
    pub const fn is_rolling(self) -> bool {
        matches!(self, Self::RollingAdd | Self::RollingRemove)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RollingAdd => "rolling-add",
            Self::RollingRemove => "rolling-remove",
            Self::UpgradeFromSingleServer => "upgrade-from-single-server",
            Self::DowngradeToSingleServer => "downgrade-to-single-server",
        };
        f.write_str(name)
    }
}

/// Pick the migration for a topology change
///
/// Additions take precedence over removals. Returns `None` when nothing is
/// added or removed.
#[must_use]
pub const fn select(
    to_add: usize,
    to_remove: usize,
    current_size: usize,
    target_size: usize,
) -> Option<Algorithm> {
    if to_add > 0 {
        if current_size == 1 {
            Some(Algorithm::UpgradeFromSingleServer)
        } else {
            Some(Algorithm::RollingAdd)
        }
    } else if to_remove > 0 {
        if target_size == 1 {
            Some(Algorithm::DowngradeToSingleServer)
        } else {
            Some(Algorithm::RollingRemove)
        }
    } else {
        None
    }
}

/// Returns true if the `retained` members common to both memberships form a
/// majority of each
///
/// A rolling migration needs this: the target must reach quorum only with
/// nodes holding the ensemble's data, and the current ensemble must lose
/// quorum once they have switched.
#[must_use]
pub const fn keeps_quorum(retained: usize, current_size: usize, target_size: usize) -> bool {
    retained * 2 > current_size && retained * 2 > target_size
}
