//! Registry paths and profile identifiers

use proven_fleet::NodeId;

/// Holds the identity of the ensemble currently in use
pub const ENSEMBLES_PATH: &str = "/config/ensembles";

const ENSEMBLE_ROOT: &str = "/config/ensemble";
const VERSIONS_ROOT: &str = "/config/versions";

/// Prefix shared by every ensemble-owned profile
pub const ENSEMBLE_PROFILE_PREFIX: &str = "ensemble-";

/// Cluster profile attribute listing membership ids
pub const MEMBERS_ATTRIBUTE: &str = "ensemble.members";

/// Member profile attribute naming the node
pub const MEMBER_NODE_ATTRIBUTE: &str = "member.node";

/// Member profile attribute carrying the address
pub const MEMBER_ADDRESS_ATTRIBUTE: &str = "member.address";

/// Render a cluster id the way it appears in paths and profile ids
#[must_use]
pub fn cluster_key(cluster_id: u32) -> String {
    format!("{cluster_id:04}")
}

/// `/config/ensemble/<cid>`, holding the comma-joined member node ids
#[must_use]
pub fn ensemble_path(cluster_id: u32) -> String {
    format!("{ENSEMBLE_ROOT}/{}", cluster_key(cluster_id))
}

/// `/config/ensemble/<cid>/password`
#[must_use]
pub fn password_path(cluster_id: u32) -> String {
    format!("{}/password", ensemble_path(cluster_id))
}

/// `/config/ensemble/<cid>/url`
#[must_use]
pub fn url_path(cluster_id: u32) -> String {
    format!("{}/url", ensemble_path(cluster_id))
}

/// `/config/versions/<version>/containers/<node>`, holding the node's
/// space-joined profile ids
#[must_use]
pub fn container_path(version: &str, node_id: &NodeId) -> String {
    format!("{VERSIONS_ROOT}/{version}/containers/{node_id}")
}

/// Profile id of the cluster profile
#[must_use]
pub fn cluster_profile_id(cluster_id: u32) -> String {
    format!("{ENSEMBLE_PROFILE_PREFIX}{}", cluster_key(cluster_id))
}

/// Profile id of one member profile
#[must_use]
pub fn member_profile_id(cluster_id: u32, membership_id: u32) -> String {
    format!("{}-{membership_id}", cluster_profile_id(cluster_id))
}

/// Attribute key holding one member port
#[must_use]
pub fn member_port_attribute(name: &str) -> String {
    format!("member.port.{name}")
}

/// Cluster id referenced by an ensemble profile id, if `id` is one
#[must_use]
pub fn profile_cluster_id(id: &str) -> Option<u32> {
    let rest = id.strip_prefix(ENSEMBLE_PROFILE_PREFIX)?;
    let key = rest.split('-').next()?;
    key.parse().ok()
}

/// Split a stored profile set
#[must_use]
pub fn parse_profile_set(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

/// Render a profile set for storage
#[must_use]
pub fn render_profile_set(profiles: &[String]) -> String {
    profiles.join(" ")
}

/// Replace every ensemble profile in `profiles` with `replacement`, keeping
/// the other entries in order
#[must_use]
pub fn rewrite_profile_set(profiles: &[String], replacement: Option<&str>) -> Vec<String> {
    let mut rewritten: Vec<String> = profiles
        .iter()
        .filter(|id| profile_cluster_id(id).is_none())
        .cloned()
        .collect();
    if let Some(replacement) = replacement {
        rewritten.push(replacement.to_string());
    }
    rewritten
}
