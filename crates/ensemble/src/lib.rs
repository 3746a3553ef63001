//! Membership reconfiguration for the coordination ensemble serving a
//! fleet: growing, shrinking and re-bootstrapping the ensemble without a
//! window in which neither the old nor the new membership holds a quorum.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod config;
mod context;
mod environment;
mod error;
mod layout;
mod member;
mod migration;
mod persistence;
mod registry;
mod selector;
mod service;
mod stage;
mod state;
mod wait;

pub use config::{
    DEFAULT_INIT_LIMIT, DEFAULT_MIGRATION_TIMEOUT, DEFAULT_POLL_INTERVAL, DEFAULT_SETTLE_DELAY,
    DEFAULT_SYNC_LIMIT, DEFAULT_TICK_TIME, EnsembleOptions, EnsembleOptionsBuilder,
    generate_password,
};
pub use context::{CompletionSignal, OperationContext};
pub use environment::{ClientOf, Collaborators, Environment};
pub use error::{EnsembleResult, Error, ErrorKind};
pub use layout::{
    ENSEMBLES_PATH, cluster_profile_id, container_path, ensemble_path, member_profile_id,
    password_path, profile_cluster_id, url_path,
};
pub use member::{ClusterMember, PortAllocation, PortType};
pub use migration::run as run_migration;
pub use persistence::{cluster_profile, load_state, member_profile, mint_cluster, persist_profiles};
pub use registry::{
    EnsembleHandle, commit_topology, copy_subtree, push_member_profile, read_cluster_id,
    read_profile_set,
};
pub use selector::{Algorithm, keeps_quorum, select};
pub use service::ReconfigurationService;
pub use stage::ReconfigurationStage;
pub use state::{ClusterState, ServerEntry, parse_server_entries};
pub use wait::Poller;

pub use proven_fleet::{FleetNode, NodeId};
