//! Cluster and member profiles, and rebuilding a [`ClusterState`] from them

use std::collections::BTreeMap;

use proven_fleet::{NodeId, Profile, ProfileRegistry};
use proven_registry::RegistryClient;
use tracing::{debug, info};

use crate::config::EnsembleOptions;
use crate::error::{EnsembleResult, Error};
use crate::layout::{
    MEMBER_ADDRESS_ATTRIBUTE, MEMBER_NODE_ATTRIBUTE, MEMBERS_ATTRIBUTE, cluster_key,
    cluster_profile_id, member_port_attribute, member_profile_id, password_path,
};
use crate::member::{ClusterMember, PortAllocation, PortType};
use crate::registry::{read_cluster_id, read_string};
use crate::state::{ClusterState, DERIVED_KEYS, SERVER_PREFIX};

/// The profile shared by every member of `state`
#[must_use]
pub fn cluster_profile(state: &ClusterState) -> Profile {
    let members = state
        .members()
        .keys()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");

    let mut attributes = BTreeMap::new();
    attributes.insert(MEMBERS_ATTRIBUTE.to_string(), members);

    Profile::new(cluster_profile_id(state.cluster_id()))
        .with_attributes(attributes)
        .with_configuration(state.cluster_configuration())
}

/// The profile of one member of `state`
///
/// # Errors
///
/// Returns `ContainersNotInEnsemble` if `node_id` is not a member.
pub fn member_profile(state: &ClusterState, node_id: &NodeId) -> EnsembleResult<Profile> {
    let (membership_id, member) = state
        .member(node_id)
        .ok_or_else(|| Error::ContainersNotInEnsemble(vec![node_id.clone()]))?;

    let mut attributes = BTreeMap::new();
    attributes.insert(
        MEMBER_NODE_ATTRIBUTE.to_string(),
        member.node_id().to_string(),
    );
    attributes.insert(
        MEMBER_ADDRESS_ATTRIBUTE.to_string(),
        member.address().to_string(),
    );
    for (port_type, port) in member.ports().iter() {
        attributes.insert(member_port_attribute(port_type.name()), port.to_string());
    }

    Ok(
        Profile::new(member_profile_id(state.cluster_id(), membership_id))
            .with_parent(cluster_profile_id(state.cluster_id()))
            .with_attributes(attributes)
            .with_configuration(state.member_configuration(node_id)?),
    )
}

/// Create the cluster profile and every member profile of `state`
///
/// Every id is checked before anything is created, so a collision leaves
/// the profile registry untouched.
///
/// # Errors
///
/// Returns `IllegalState` if any profile id is already taken.
pub async fn persist_profiles<P: ProfileRegistry>(
    profiles: &P,
    state: &ClusterState,
) -> EnsembleResult<()> {
    let version = &state.options().version;

    let mut pending = vec![cluster_profile(state)];
    for node_id in state.node_ids() {
        pending.push(member_profile(state, &node_id)?);
    }

    for profile in &pending {
        let exists = profiles
            .has_profile(version, &profile.id)
            .await
            .map_err(|e| Error::profiles(&format!("Failed to look up {}", profile.id), &e))?;
        if exists {
            return Err(Error::IllegalState(format!(
                "profile {} already exists in version {version}",
                profile.id
            )));
        }
    }

    for profile in pending {
        let id = profile.id.clone();
        profiles
            .create_profile(version, profile)
            .await
            .map_err(|e| Error::profiles(&format!("Failed to create {id}"), &e))?;
        debug!("Created profile {id}");
    }

    info!(
        "Persisted profiles for ensemble {}",
        cluster_key(state.cluster_id())
    );
    Ok(())
}

/// Mint the next cluster identity for `state` whose cluster profile does
/// not exist yet
///
/// Profiles persisted by an earlier request that failed part way are never
/// reused; their identity is skipped.
///
/// # Errors
///
/// Returns `Unknown` if the profile registry cannot be queried.
pub async fn mint_cluster<P: ProfileRegistry>(
    profiles: &P,
    state: &ClusterState,
) -> EnsembleResult<ClusterState> {
    let version = &state.options().version;
    let mut next = state.new_cluster();

    loop {
        let id = cluster_profile_id(next.cluster_id());
        let taken = profiles
            .has_profile(version, &id)
            .await
            .map_err(|e| Error::profiles(&format!("Failed to look up {id}"), &e))?;
        if !taken {
            return Ok(next);
        }

        debug!("Skipping ensemble {} left by an earlier request", cluster_key(next.cluster_id()));
        next = next.new_cluster();
    }
}

fn required_attribute<'a>(profile: &'a Profile, key: &str) -> EnsembleResult<&'a str> {
    profile.attribute(key).ok_or_else(|| {
        Error::IllegalState(format!("profile {} lacks attribute {key}", profile.id))
    })
}

fn parse_number<T: std::str::FromStr>(
    profile: &Profile,
    key: &str,
    value: &str,
) -> EnsembleResult<T> {
    value.trim().parse().map_err(|_| {
        Error::IllegalState(format!(
            "profile {} holds malformed {key}: {value}",
            profile.id
        ))
    })
}

async fn load_member<P: ProfileRegistry>(
    profiles: &P,
    version: &str,
    cluster_id: u32,
    membership_id: u32,
) -> EnsembleResult<ClusterMember> {
    let id = member_profile_id(cluster_id, membership_id);
    let profile = profiles
        .get_required_profile(version, &id)
        .await
        .map_err(|e| Error::profiles(&format!("Failed to load member profile {id}"), &e))?;

    let node_id = NodeId::new(required_attribute(&profile, MEMBER_NODE_ATTRIBUTE)?);
    let address = required_attribute(&profile, MEMBER_ADDRESS_ATTRIBUTE)?;

    let mut ports = [0_u16; 3];
    for (slot, port_type) in ports.iter_mut().zip(PortType::ALL) {
        let key = member_port_attribute(port_type.name());
        *slot = parse_number(&profile, &key, required_attribute(&profile, &key)?)?;
    }

    Ok(ClusterMember::new(
        node_id,
        address,
        PortAllocation {
            client: ports[0],
            peer: ports[1],
            election: ports[2],
        },
    ))
}

/// Rebuild the state of the ensemble currently in use
///
/// Returns `None` if the registry names no ensemble. The returned state
/// carries `options` with the stored password in place of the requested one.
///
/// # Errors
///
/// Returns `IllegalState` if any profile, attribute or registry record the
/// ensemble needs is missing or malformed.
pub async fn load_state<C, P>(
    client: &C,
    profiles: &P,
    options: &EnsembleOptions,
) -> EnsembleResult<Option<ClusterState>>
where
    C: RegistryClient,
    P: ProfileRegistry,
{
    let Some(cluster_id) = read_cluster_id(client).await? else {
        return Ok(None);
    };
    let version = &options.version;

    let id = cluster_profile_id(cluster_id);
    let profile = profiles
        .get_required_profile(version, &id)
        .await
        .map_err(|e| Error::profiles(&format!("Failed to load cluster profile {id}"), &e))?;

    let mut members = BTreeMap::new();
    for membership_id in required_attribute(&profile, MEMBERS_ATTRIBUTE)?
        .split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        let membership_id: u32 = parse_number(&profile, MEMBERS_ATTRIBUTE, membership_id)?;
        let member = load_member(profiles, version, cluster_id, membership_id).await?;
        members.insert(membership_id, member);
    }

    let configuration = profile
        .configuration
        .iter()
        .filter(|(key, _)| {
            !key.starts_with(SERVER_PREFIX) && !DERIVED_KEYS.contains(&key.as_str())
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    let password = read_string(client, &password_path(cluster_id))
        .await?
        .ok_or_else(|| {
            Error::IllegalState(format!(
                "ensemble {} has no stored password",
                cluster_key(cluster_id)
            ))
        })?;

    let state = ClusterState::from_parts(
        cluster_id,
        members,
        configuration,
        options.clone().with_password(password),
    )?;

    debug!(
        "Loaded ensemble {} with {} members",
        cluster_key(cluster_id),
        state.len()
    );
    Ok(Some(state))
}
