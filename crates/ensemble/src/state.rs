//! Immutable ensemble state
//!
//! A [`ClusterState`] is a persistent value: every transformation returns a
//! new state and leaves the receiver untouched. Membership IDs are never
//! renumbered implicitly; gaps left by removed members persist until
//! [`ClusterState::compact`] is called, so a node leaving and a node joining
//! within one rolling migration can never be handed the same ID.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use proven_fleet::{FleetNode, NodeId};

use crate::config::EnsembleOptions;
use crate::error::{EnsembleResult, Error};
use crate::member::{ClusterMember, PortAllocation, PortType};

/// Prefix of the per-server entries in the cluster configuration
pub const SERVER_PREFIX: &str = "server.";

/// Key of a member's own membership ID in its member configuration
pub const SERVER_ID_KEY: &str = "server.id";

/// Key of the client port in a member configuration
pub const CLIENT_PORT_KEY: &str = "clientPort";

/// Key of the client bind address in a member configuration
pub const CLIENT_PORT_ADDRESS_KEY: &str = "clientPortAddress";

const TICK_TIME_KEY: &str = "tickTime";
const INIT_LIMIT_KEY: &str = "initLimit";
const SYNC_LIMIT_KEY: &str = "syncLimit";
const DATA_DIR_KEY: &str = "dataDir";
const DATA_LOG_DIR_KEY: &str = "dataLogDir";

/// Configuration keys derived from [`EnsembleOptions`] rather than stored
pub const DERIVED_KEYS: [&str; 5] = [
    TICK_TIME_KEY,
    INIT_LIMIT_KEY,
    SYNC_LIMIT_KEY,
    DATA_DIR_KEY,
    DATA_LOG_DIR_KEY,
];

/// Snapshot of an ensemble's identity, membership and configuration
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClusterState {
    cluster_id: u32,
    members: BTreeMap<u32, ClusterMember>,
    configuration: BTreeMap<String, String>,
    options: EnsembleOptions,
}

impl ClusterState {
    /// Create an empty ensemble state
    #[must_use]
    pub const fn new(cluster_id: u32, options: EnsembleOptions) -> Self {
        Self {
            cluster_id,
            members: BTreeMap::new(),
            configuration: BTreeMap::new(),
            options,
        }
    }

    /// Assemble a state from persisted parts, checking its invariants
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` if a membership ID is zero, a node holds two
    /// slots, or two members on one address share a port.
    pub fn from_parts(
        cluster_id: u32,
        members: BTreeMap<u32, ClusterMember>,
        configuration: BTreeMap<String, String>,
        options: EnsembleOptions,
    ) -> EnsembleResult<Self> {
        if members.contains_key(&0) {
            return Err(Error::IllegalState(
                "membership ids must be positive".to_string(),
            ));
        }

        let mut nodes = HashSet::new();
        let mut endpoints = HashSet::new();
        for member in members.values() {
            if !nodes.insert(member.node_id()) {
                return Err(Error::IllegalState(format!(
                    "node {} holds more than one membership",
                    member.node_id()
                )));
            }

            for (_, port) in member.ports().iter() {
                if !endpoints.insert((member.address(), port)) {
                    return Err(Error::IllegalState(format!(
                        "port {port} on {} is allocated twice",
                        member.address()
                    )));
                }
            }
        }

        Ok(Self {
            cluster_id,
            members,
            configuration,
            options,
        })
    }

    /// The cluster identity
    #[must_use]
    pub const fn cluster_id(&self) -> u32 {
        self.cluster_id
    }

    /// Members keyed by membership ID
    #[must_use]
    pub const fn members(&self) -> &BTreeMap<u32, ClusterMember> {
        &self.members
    }

    /// Number of members
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns true if the state has no members
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Returns true if the ensemble runs a single standalone server
    #[must_use]
    pub fn is_standalone(&self) -> bool {
        self.members.len() == 1
    }

    /// Member node IDs ordered by membership ID
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.members
            .values()
            .map(|member| member.node_id().clone())
            .collect()
    }

    /// Returns true if `node_id` holds a slot
    #[must_use]
    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.member(node_id).is_some()
    }

    /// The membership ID and member entry of `node_id`
    #[must_use]
    pub fn member(&self, node_id: &NodeId) -> Option<(u32, &ClusterMember)> {
        self.members
            .iter()
            .find(|(_, member)| member.node_id() == node_id)
            .map(|(id, member)| (*id, member))
    }

    /// The ensemble options
    #[must_use]
    pub const fn options(&self) -> &EnsembleOptions {
        &self.options
    }

    /// The ensemble password, if one is set
    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.options.password.as_deref()
    }

    /// Explicit configuration overrides (without derived keys)
    #[must_use]
    pub const fn configuration(&self) -> &BTreeMap<String, String> {
        &self.configuration
    }

    /// Admit `node`, allocating the smallest free membership ID and the
    /// first free port of each type at the node's address
    ///
    /// # Errors
    ///
    /// Returns `ContainersAlreadyInEnsemble` if the node is a member, or
    /// `IllegalState` if no port is left to allocate.
    pub fn add_member(&self, node: &FleetNode) -> EnsembleResult<Self> {
        if self.contains(&node.id) {
            return Err(Error::ContainersAlreadyInEnsemble(vec![node.id.clone()]));
        }

        let membership_id = (1..)
            .find(|id| !self.members.contains_key(id))
            .ok_or_else(|| Error::IllegalState("membership ids exhausted".to_string()))?;

        let taken: HashSet<u16> = self
            .members
            .values()
            .filter(|member| member.address() == node.address)
            .flat_map(|member| member.ports().iter().map(|(_, port)| port))
            .collect();

        let mut allocated: Vec<u16> = Vec::with_capacity(PortType::ALL.len());
        for port_type in PortType::ALL {
            let port = (port_type.default_port()..=u16::MAX)
                .find(|port| !taken.contains(port) && !allocated.contains(port))
                .ok_or_else(|| {
                    Error::IllegalState(format!(
                        "no free {port_type} port left on {}",
                        node.address
                    ))
                })?;
            allocated.push(port);
        }

        let ports = PortAllocation {
            client: allocated[0],
            peer: allocated[1],
            election: allocated[2],
        };

        let mut next = self.clone();
        next.members.insert(
            membership_id,
            ClusterMember::new(node.id.clone(), node.address.clone(), ports),
        );
        Ok(next)
    }

    /// Drop `node_id`, leaving every other membership ID unchanged
    ///
    /// # Errors
    ///
    /// Returns `ContainersNotInEnsemble` if the node is not a member.
    pub fn remove_member(&self, node_id: &NodeId) -> EnsembleResult<Self> {
        let (membership_id, _) = self
            .member(node_id)
            .ok_or_else(|| Error::ContainersNotInEnsemble(vec![node_id.clone()]))?;

        let mut next = self.clone();
        next.members.remove(&membership_id);
        Ok(next)
    }

    /// Keep only the members `keep` accepts, IDs unchanged
    #[must_use]
    pub fn retain_members<F>(&self, mut keep: F) -> Self
    where
        F: FnMut(&NodeId) -> bool,
    {
        let mut next = self.clone();
        next.members.retain(|_, member| keep(member.node_id()));
        next
    }

    /// Mint the next cluster identity with the same membership
    #[must_use]
    pub fn new_cluster(&self) -> Self {
        let mut next = self.clone();
        next.cluster_id += 1;
        next
    }

    /// Replace the options
    #[must_use]
    pub fn with_options(&self, options: EnsembleOptions) -> Self {
        let mut next = self.clone();
        next.options = options;
        next
    }

    /// Overlay configuration keys
    ///
    /// # Errors
    ///
    /// Returns `InvalidArguments` for `server.*` keys, which are derived from
    /// membership, and for keys derived from the options.
    pub fn update_configuration(
        &self,
        configuration: BTreeMap<String, String>,
    ) -> EnsembleResult<Self> {
        if let Some(key) = configuration
            .keys()
            .find(|key| key.starts_with(SERVER_PREFIX) || DERIVED_KEYS.contains(&key.as_str()))
        {
            return Err(Error::InvalidArguments(format!(
                "configuration key {key} cannot be set directly"
            )));
        }

        let mut next = self.clone();
        next.configuration.extend(configuration);
        Ok(next)
    }

    /// Renumber members `1..=n`, preserving their order
    #[must_use]
    pub fn compact(&self) -> Self {
        let mut next = self.clone();
        next.members = self
            .members
            .values()
            .cloned()
            .zip(1..)
            .map(|(member, id)| (id, member))
            .collect();
        next
    }

    /// Configuration shared by every member: the options-derived keys plus
    /// the explicit overrides
    #[must_use]
    pub fn shared_configuration(&self) -> BTreeMap<String, String> {
        let mut configuration = BTreeMap::new();
        configuration.insert(TICK_TIME_KEY.to_string(), self.options.tick_time.to_string());
        configuration.insert(
            INIT_LIMIT_KEY.to_string(),
            self.options.init_limit.to_string(),
        );
        configuration.insert(
            SYNC_LIMIT_KEY.to_string(),
            self.options.sync_limit.to_string(),
        );
        configuration.insert(
            DATA_DIR_KEY.to_string(),
            format!(
                "{}/{:04}",
                self.options.data_dir.trim_end_matches('/'),
                self.cluster_id
            ),
        );
        if let Some(data_log_dir) = &self.options.data_log_dir {
            configuration.insert(
                DATA_LOG_DIR_KEY.to_string(),
                format!("{}/{:04}", data_log_dir.trim_end_matches('/'), self.cluster_id),
            );
        }
        configuration.extend(self.configuration.clone());
        configuration
    }

    /// Everything a running member needs to know about its peers
    #[must_use]
    pub fn cluster_configuration(&self) -> BTreeMap<String, String> {
        let mut configuration = self.shared_configuration();
        if self.members.len() > 1 {
            for (id, member) in &self.members {
                let entry = ServerEntry::from_member(*id, member);
                configuration.insert(entry.key(), entry.value());
            }
        }
        configuration
    }

    /// Configuration of one member
    ///
    /// # Errors
    ///
    /// Returns `ContainersNotInEnsemble` if the node is not a member.
    pub fn member_configuration(
        &self,
        node_id: &NodeId,
    ) -> EnsembleResult<BTreeMap<String, String>> {
        let (membership_id, member) = self
            .member(node_id)
            .ok_or_else(|| Error::ContainersNotInEnsemble(vec![node_id.clone()]))?;

        let mut configuration = self.shared_configuration();
        configuration.insert(CLIENT_PORT_KEY.to_string(), member.ports().client.to_string());
        configuration.insert(
            CLIENT_PORT_ADDRESS_KEY.to_string(),
            member.address().to_string(),
        );
        if self.members.len() > 1 {
            configuration.insert(SERVER_ID_KEY.to_string(), membership_id.to_string());
        }
        Ok(configuration)
    }

    /// Client endpoints joined with `,`
    ///
    /// With `substituted = false` each address is replaced by a
    /// `${node:<id>}` placeholder that the reading node resolves itself.
    #[must_use]
    pub fn connection_url(&self, substituted: bool) -> String {
        self.members
            .values()
            .map(|member| {
                if substituted {
                    member.client_endpoint()
                } else {
                    format!("${{node:{}}}:{}", member.node_id(), member.ports().client)
                }
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// One `server.<id> = address:peerPort:electionPort` entry
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerEntry {
    /// Membership ID
    pub id: u32,
    /// Member address
    pub address: String,
    /// Peer port
    pub peer_port: u16,
    /// Election port
    pub election_port: u16,
}

impl ServerEntry {
    fn from_member(id: u32, member: &ClusterMember) -> Self {
        Self {
            id,
            address: member.address().to_string(),
            peer_port: member.ports().peer,
            election_port: member.ports().election,
        }
    }

    /// The configuration key, `server.<id>`
    #[must_use]
    pub fn key(&self) -> String {
        format!("{SERVER_PREFIX}{}", self.id)
    }

    /// The configuration value, `address:peerPort:electionPort`
    #[must_use]
    pub fn value(&self) -> String {
        format!("{}:{}:{}", self.address, self.peer_port, self.election_port)
    }

    /// Parse one entry; `None` if `key` is not a numbered server key
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` if the key is numbered but the value is malformed.
    pub fn parse(key: &str, value: &str) -> EnsembleResult<Option<Self>> {
        let Some(id) = key
            .strip_prefix(SERVER_PREFIX)
            .and_then(|id| u32::from_str(id).ok())
        else {
            return Ok(None);
        };

        let malformed = || Error::IllegalState(format!("malformed server entry {key}={value}"));

        let mut parts = value.rsplitn(3, ':');
        let election_port = parts.next().and_then(|p| p.parse().ok()).ok_or_else(malformed)?;
        let peer_port = parts.next().and_then(|p| p.parse().ok()).ok_or_else(malformed)?;
        let address = parts
            .next()
            .filter(|address| !address.is_empty())
            .ok_or_else(malformed)?;

        Ok(Some(Self {
            id,
            address: address.to_string(),
            peer_port,
            election_port,
        }))
    }
}

impl fmt::Display for ServerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key(), self.value())
    }
}

/// Parse every `server.<id>` entry of a cluster configuration
///
/// # Errors
///
/// Returns `IllegalState` if any numbered entry is malformed.
pub fn parse_server_entries(
    configuration: &BTreeMap<String, String>,
) -> EnsembleResult<BTreeMap<u32, ServerEntry>> {
    let mut entries = BTreeMap::new();
    for (key, value) in configuration {
        if let Some(entry) = ServerEntry::parse(key, value)? {
            entries.insert(entry.id, entry);
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::error::ErrorKind;

    fn node(id: &str, address: &str) -> FleetNode {
        FleetNode::new(id, address)
    }

    fn three_members() -> ClusterState {
        ClusterState::new(0, EnsembleOptions::default())
            .add_member(&node("n1", "10.0.0.1"))
            .unwrap()
            .add_member(&node("n2", "10.0.0.2"))
            .unwrap()
            .add_member(&node("n3", "10.0.0.3"))
            .unwrap()
    }

    fn assert_invariants(state: &ClusterState) {
        assert!(state.members().keys().all(|id| *id > 0));
        let mut seen = HashSet::new();
        for member in state.members().values() {
            for (_, port) in member.ports().iter() {
                assert!(seen.insert((member.address().to_string(), port)));
            }
        }
    }

    #[test]
    fn test_add_member_allocates_defaults() {
        let state = ClusterState::new(0, EnsembleOptions::default())
            .add_member(&node("n1", "10.0.0.1"))
            .unwrap();

        let (id, member) = state.member(&NodeId::new("n1")).unwrap();
        assert_eq!(id, 1);
        assert_eq!(
            *member.ports(),
            PortAllocation {
                client: 2181,
                peer: 2888,
                election: 3888
            }
        );
        assert!(state.is_standalone());
    }

    #[test]
    fn test_colocated_members_get_distinct_ports() {
        let state = ClusterState::new(0, EnsembleOptions::default())
            .add_member(&node("n1", "localhost"))
            .unwrap()
            .add_member(&node("n2", "localhost"))
            .unwrap()
            .add_member(&node("n3", "localhost"))
            .unwrap();

        let ports: Vec<_> = state.members().values().map(|m| *m.ports()).collect();
        assert_eq!(ports[1].client, 2182);
        assert_eq!(ports[2].peer, 2890);
        assert_eq!(ports[2].election, 3890);
        assert_invariants(&state);
    }

    #[test]
    fn test_add_existing_member_fails() {
        let state = three_members();
        assert_matches!(
            state.add_member(&node("n2", "10.0.0.2")),
            Err(Error::ContainersAlreadyInEnsemble(_))
        );
    }

    #[test]
    fn test_remove_preserves_gaps() {
        let state = three_members().remove_member(&NodeId::new("n2")).unwrap();
        assert_eq!(state.members().keys().copied().collect::<Vec<_>>(), vec![1, 3]);

        // the gap is reused by the next admission
        let state = state.add_member(&node("n4", "10.0.0.4")).unwrap();
        assert_eq!(state.member(&NodeId::new("n4")).unwrap().0, 2);
        assert_eq!(state.member(&NodeId::new("n3")).unwrap().0, 3);
    }

    #[test]
    fn test_add_then_remove_restores_members() {
        let original = three_members().remove_member(&NodeId::new("n1")).unwrap();
        let round_trip = original
            .add_member(&node("n9", "10.0.0.9"))
            .unwrap()
            .remove_member(&NodeId::new("n9"))
            .unwrap();
        assert_eq!(round_trip.members(), original.members());
    }

    #[test]
    fn test_remove_missing_member_fails() {
        let err = three_members().remove_member(&NodeId::new("n9")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContainersNotInEnsemble);
    }

    #[test]
    fn test_standalone_has_no_server_entries() {
        let state = ClusterState::new(0, EnsembleOptions::default())
            .add_member(&node("n1", "10.0.0.1"))
            .unwrap();

        let configuration = state.cluster_configuration();
        assert!(!configuration.keys().any(|k| k.starts_with(SERVER_PREFIX)));

        let member = state.member_configuration(&NodeId::new("n1")).unwrap();
        assert_eq!(member.get(CLIENT_PORT_KEY).unwrap(), "2181");
        assert!(!member.contains_key(SERVER_ID_KEY));
    }

    #[test]
    fn test_cluster_configuration_round_trip() {
        let state = three_members().remove_member(&NodeId::new("n2")).unwrap();
        let entries = parse_server_entries(&state.cluster_configuration()).unwrap();

        assert_eq!(entries.len(), 2);
        for (id, member) in state.members() {
            let entry = &entries[id];
            assert_eq!(entry.address, member.address());
            assert_eq!(entry.peer_port, member.ports().peer);
            assert_eq!(entry.election_port, member.ports().election);
        }
    }

    #[test]
    fn test_member_configuration_carries_server_id() {
        let state = three_members();
        let configuration = state.member_configuration(&NodeId::new("n3")).unwrap();
        assert_eq!(configuration.get(SERVER_ID_KEY).unwrap(), "3");
        assert_eq!(configuration.get(CLIENT_PORT_ADDRESS_KEY).unwrap(), "10.0.0.3");
        assert_eq!(configuration.get("dataDir").unwrap(), "data/ensemble/0000");
    }

    #[test]
    fn test_connection_url() {
        let state = three_members();
        assert_eq!(
            state.connection_url(true),
            "10.0.0.1:2181,10.0.0.2:2181,10.0.0.3:2181"
        );
        assert_eq!(
            state.connection_url(false),
            "${node:n1}:2181,${node:n2}:2181,${node:n3}:2181"
        );
    }

    #[test]
    fn test_new_cluster_keeps_membership() {
        let state = three_members();
        let next = state.new_cluster();
        assert_eq!(next.cluster_id(), state.cluster_id() + 1);
        assert_eq!(next.members(), state.members());
        assert_eq!(
            next.shared_configuration().get("dataDir").unwrap(),
            "data/ensemble/0001"
        );
    }

    #[test]
    fn test_update_configuration() {
        let state = three_members();
        let mut overrides = BTreeMap::new();
        overrides.insert("maxClientCnxns".to_string(), "120".to_string());
        let updated = state.update_configuration(overrides).unwrap();
        assert_eq!(
            updated.cluster_configuration().get("maxClientCnxns").unwrap(),
            "120"
        );
        assert!(state.configuration().is_empty());

        let mut derived = BTreeMap::new();
        derived.insert("server.7".to_string(), "x:1:2".to_string());
        assert_matches!(
            state.update_configuration(derived),
            Err(Error::InvalidArguments(_))
        );
    }

    #[test]
    fn test_compact() {
        let state = three_members()
            .remove_member(&NodeId::new("n1"))
            .unwrap()
            .compact();
        assert_eq!(state.members().keys().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(state.node_ids(), vec![NodeId::new("n2"), NodeId::new("n3")]);
    }

    #[test]
    fn test_from_parts_rejects_shared_port() {
        let ports = PortAllocation {
            client: 2181,
            peer: 2888,
            election: 3888,
        };
        let mut members = BTreeMap::new();
        members.insert(1, ClusterMember::new(NodeId::new("a"), "host", ports));
        members.insert(2, ClusterMember::new(NodeId::new("b"), "host", ports));

        let err = ClusterState::from_parts(0, members, BTreeMap::new(), EnsembleOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalState);
    }

    #[test]
    fn test_parse_server_entry() {
        assert_eq!(ServerEntry::parse("server.id", "2").unwrap(), None);
        assert_eq!(ServerEntry::parse("tickTime", "2000").unwrap(), None);

        let entry = ServerEntry::parse("server.4", "10.0.0.4:2889:3889")
            .unwrap()
            .unwrap();
        assert_eq!(entry.id, 4);
        assert_eq!(entry.to_string(), "server.4=10.0.0.4:2889:3889");

        assert!(ServerEntry::parse("server.4", "10.0.0.4:x:3889").is_err());
    }
}
