use std::time::Duration;

use assert_matches::assert_matches;
use proven_ensemble::{Error, ErrorKind, NodeId, ReconfigurationStage, parse_server_entries};
use proven_fleet::{Profile, ProfileRegistry};
use proven_registry::{RegistryClient, Transaction};
use tracing_test::traced_test;

mod common;
use common::{TestFleet, ids, ids_up_to, options};

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_bootstrap_standalone_ensemble() {
    let fleet = TestFleet::new(3);
    assert_eq!(fleet.service.stage(), ReconfigurationStage::Idle);
    assert!(fleet.service.get_ensemble_containers().await.unwrap().is_empty());

    fleet.service.create_cluster(&[], options()).await.unwrap();

    assert_eq!(fleet.service.stage(), ReconfigurationStage::Done);
    assert_eq!(fleet.cluster_id().await, Some(0));
    assert_eq!(
        fleet.service.get_ensemble_containers().await.unwrap(),
        ids(&["n1"])
    );
    assert_eq!(
        fleet.profiles.profile_ids("1.0").await,
        vec!["ensemble-0000", "ensemble-0000-1"]
    );
    assert_eq!(fleet.profile_set("n1").await, vec!["ensemble-0000-1"]);

    let view = fleet.view("n1").await.unwrap();
    assert_eq!(view.cluster_id, 0);
    assert_eq!(view.connection_url.as_deref(), Some("10.0.0.1:2181"));

    let configuration = fleet.service.get_ensemble_configuration().await.unwrap();
    assert!(parse_server_entries(&configuration).unwrap().is_empty());
    assert_eq!(configuration.get("dataDir").unwrap(), "data/ensemble/0000");
}

#[tokio::test(start_paused = true)]
async fn test_bootstrap_only_from_local_node() {
    let fleet = TestFleet::new(3);

    let err = fleet
        .service
        .create_cluster(&ids(&["n2"]), options())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArguments);
    assert_eq!(
        fleet.service.stage(),
        ReconfigurationStage::Failed(ErrorKind::InvalidArguments)
    );
    assert_eq!(fleet.connector.ensemble_count().await, 0);

    fleet
        .service
        .create_cluster(&ids(&["n1"]), options())
        .await
        .unwrap();
    assert_eq!(fleet.cluster_id().await, Some(0));
}

#[tokio::test(start_paused = true)]
async fn test_bootstrap_requires_live_local_node() {
    let fleet = TestFleet::new(3);
    fleet.fleet.set_alive(&NodeId::new("n1"), false).await.unwrap();

    assert_matches!(
        fleet.service.create_cluster(&[], options()).await,
        Err(Error::ContainersNotAlive(nodes)) if nodes == ids(&["n1"])
    );
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_upgrade_from_single_server() {
    let fleet = TestFleet::bootstrapped(3).await;

    fleet
        .service
        .create_cluster(&ids(&["n1", "n2", "n3"]), options())
        .await
        .unwrap();
    assert!(logs_contain("MIGRATING(upgrade-from-single-server)"));

    // the bridging ensemble of the new members becomes the ensemble in use
    assert_eq!(fleet.connector.ensemble_count().await, 2);
    assert_eq!(fleet.cluster_id().await, Some(1));
    assert_eq!(
        fleet.service.get_ensemble_containers().await.unwrap(),
        ids(&["n1", "n2", "n3"])
    );

    let entries = parse_server_entries(&fleet.service.get_ensemble_configuration().await.unwrap())
        .unwrap();
    assert_eq!(entries.len(), 3);
    for entry in entries.values() {
        assert_eq!(entry.peer_port, 2888);
        assert_eq!(entry.election_port, 3888);
    }

    // the original member reports the new ensemble too
    for node in ["n1", "n2", "n3"] {
        assert_eq!(fleet.view(node).await.unwrap().cluster_id, 1);
    }

    // retired ensemble profiles are gone from every profile set
    assert_eq!(fleet.profile_set("n1").await, vec!["ensemble-0001-1"]);
    assert_eq!(fleet.profile_set("n3").await, vec!["ensemble-0001-3"]);

    // data written before the upgrade survives it
    assert_eq!(
        fleet
            .active()
            .await
            .read("/config/ensemble/0000/password")
            .await
            .unwrap()
            .as_deref(),
        Some(b"secret".as_slice())
    );
}

#[tokio::test(start_paused = true)]
async fn test_upgrade_waits_for_original_member() {
    let fleet = TestFleet::bootstrapped(3).await;
    fleet.agents.freeze(&NodeId::new("n1")).await;

    let err = fleet
        .service
        .create_cluster(&ids(&["n1", "n2", "n3"]), options())
        .await
        .unwrap_err();

    assert_matches!(&err, Error::Timeout { what, .. } if what.contains("n1"));
    assert_eq!(
        fleet.service.stage(),
        ReconfigurationStage::Failed(ErrorKind::Timeout)
    );
}

#[tokio::test(start_paused = true)]
async fn test_colocated_upgrade_allocates_distinct_ports() {
    let fleet = TestFleet::on_host(3, "localhost");
    fleet.service.create_cluster(&[], options()).await.unwrap();

    fleet
        .service
        .create_cluster(&ids(&["n1", "n2", "n3"]), options())
        .await
        .unwrap();

    assert_eq!(fleet.cluster_id().await, Some(1));
    let entries = parse_server_entries(&fleet.service.get_ensemble_configuration().await.unwrap())
        .unwrap();
    let ports: Vec<(u16, u16)> = entries
        .values()
        .map(|entry| (entry.peer_port, entry.election_port))
        .collect();
    assert_eq!(ports, vec![(2888, 3888), (2889, 3889), (2890, 3890)]);
    assert!(entries.values().all(|entry| entry.address == "localhost"));

    let view = fleet.view("n3").await.unwrap();
    assert_eq!(view.cluster_id, 1);
    assert_eq!(
        view.connection_url.as_deref(),
        Some("localhost:2181,localhost:2182,localhost:2183")
    );
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_downgrade_to_single_server() {
    let fleet = TestFleet::with_members(3, 3).await;
    let ensembles = fleet.connector.ensemble_count().await;

    fleet
        .service
        .create_cluster(&ids(&["n1"]), options())
        .await
        .unwrap();
    assert!(logs_contain("MIGRATING(downgrade-to-single-server)"));

    assert_eq!(fleet.connector.ensemble_count().await, ensembles);
    assert_eq!(fleet.cluster_id().await, Some(2));
    assert_eq!(
        fleet.service.get_ensemble_containers().await.unwrap(),
        ids(&["n1"])
    );
    assert_eq!(fleet.profile_set("n1").await, vec!["ensemble-0002-1"]);
    assert!(fleet.profile_set("n2").await.is_empty());
    assert!(fleet.profile_set("n3").await.is_empty());

    let view = fleet.view("n1").await.unwrap();
    assert_eq!(view.cluster_id, 2);
    assert_eq!(view.connection_url.as_deref(), Some("10.0.0.1:2181"));
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_rolling_add() {
    let fleet = TestFleet::with_members(4, 3).await;
    let ensembles = fleet.connector.ensemble_count().await;

    fleet
        .service
        .add_to_cluster(&ids(&["n4"]), options())
        .await
        .unwrap();
    assert!(logs_contain("MIGRATING(rolling-add)"));

    // rolling migrations stay on the ensemble in use
    assert_eq!(fleet.connector.ensemble_count().await, ensembles);
    assert_eq!(fleet.cluster_id().await, Some(2));
    assert_eq!(
        fleet.service.get_ensemble_containers().await.unwrap(),
        ids_up_to(4)
    );
    assert_eq!(fleet.profile_set("n4").await, vec!["ensemble-0002-4"]);
    assert_eq!(
        fleet
            .active()
            .await
            .read("/config/ensemble/0002")
            .await
            .unwrap()
            .as_deref(),
        Some(b"n1,n2,n3,n4".as_slice())
    );
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_rolling_remove_settles_between_nodes() {
    let fleet = TestFleet::with_members(5, 5).await;

    let started = tokio::time::Instant::now();
    fleet
        .service
        .remove_from_cluster(&ids(&["n4", "n5"]), options())
        .await
        .unwrap();
    assert!(logs_contain("MIGRATING(rolling-remove)"));

    // three survivors switch one after another with a pause in between
    assert!(started.elapsed() >= options().settle_delay * 2);
    assert_eq!(
        fleet.service.get_ensemble_containers().await.unwrap(),
        ids_up_to(3)
    );
    assert!(fleet.profile_set("n4").await.is_empty());
    assert!(fleet.profile_set("n5").await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_exactly_two_members_rejected() {
    let fleet = TestFleet::with_members(4, 3).await;

    assert_matches!(
        fleet
            .service
            .create_cluster(&ids(&["n1", "n2"]), options())
            .await,
        Err(Error::InvalidArguments(_))
    );
    assert_eq!(fleet.cluster_id().await, Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_unchanged_membership_is_a_no_op() {
    let fleet = TestFleet::with_members(3, 3).await;
    let profiles = fleet.profiles.profile_ids("1.0").await;

    fleet
        .service
        .create_cluster(&ids(&["n3", "n1", "n2"]), options())
        .await
        .unwrap();

    assert_eq!(fleet.service.stage(), ReconfigurationStage::Done);
    assert_eq!(fleet.cluster_id().await, Some(1));
    assert_eq!(fleet.profiles.profile_ids("1.0").await, profiles);
}

#[tokio::test(start_paused = true)]
async fn test_request_validation() {
    let fleet = TestFleet::with_members(4, 3).await;

    let err = fleet
        .service
        .create_cluster(&[], options())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArguments);

    let err = fleet
        .service
        .create_cluster(&ids(&["n1", "n2", "n9"]), options())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArguments);

    let err = fleet
        .service
        .create_cluster(&ids(&["n1", "n2", "n2"]), options())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArguments);

    fleet.fleet.set_alive(&NodeId::new("n4"), false).await.unwrap();
    assert_matches!(
        fleet.service.add_to_cluster(&ids(&["n4"]), options()).await,
        Err(Error::ContainersNotAlive(nodes)) if nodes == ids(&["n4"])
    );

    let mut invalid = options();
    invalid.migration_timeout = Duration::ZERO;
    let err = fleet
        .service
        .create_cluster(&ids_up_to(4), invalid)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArguments);

    // nothing was written by any rejected request
    assert_eq!(fleet.cluster_id().await, Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_add_and_remove_reject_inconsistent_sets() {
    let fleet = TestFleet::with_members(4, 3).await;

    assert_matches!(
        fleet.service.add_to_cluster(&ids(&["n2"]), options()).await,
        Err(Error::ContainersAlreadyInEnsemble(nodes)) if nodes == ids(&["n2"])
    );
    assert_matches!(
        fleet
            .service
            .remove_from_cluster(&ids(&["n4"]), options())
            .await,
        Err(Error::ContainersNotInEnsemble(nodes)) if nodes == ids(&["n4"])
    );
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_node_missing_readiness_times_out() {
    let fleet = TestFleet::with_members(4, 3).await;
    fleet.agents.freeze(&NodeId::new("n4")).await;

    let err = fleet
        .service
        .add_to_cluster(&ids(&["n4"]), options())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(
        fleet.service.stage(),
        ReconfigurationStage::Failed(ErrorKind::Timeout)
    );

    // the final topology was never committed
    assert_eq!(fleet.cluster_id().await, Some(1));
    assert_eq!(
        fleet.service.get_ensemble_containers().await.unwrap(),
        ids_up_to(3)
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_in_flight_request() {
    let fleet = TestFleet::with_members(4, 3).await;
    fleet.agents.freeze(&NodeId::new("n4")).await;

    let service = fleet.service.clone();
    let mut stages = fleet.service.subscribe();
    let request =
        tokio::spawn(async move { service.add_to_cluster(&ids(&["n4"]), options()).await });

    stages
        .wait_for(|stage| matches!(stage, ReconfigurationStage::Migrating(_)))
        .await
        .unwrap();
    fleet.service.cancel();

    assert_matches!(request.await.unwrap(), Err(Error::Cancelled));
    assert_eq!(
        fleet.service.stage(),
        ReconfigurationStage::Failed(ErrorKind::Cancelled)
    );
    assert_eq!(fleet.cluster_id().await, Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_registry_failure_surfaces_as_unknown() {
    let fleet = TestFleet::with_members(4, 3).await;
    fleet.connector.fail_next_transaction();

    let err = fleet
        .service
        .add_to_cluster(&ids(&["n4"]), options())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Unknown);
    assert_eq!(fleet.cluster_id().await, Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_profile_collision_is_illegal_state() {
    let fleet = TestFleet::with_members(4, 3).await;
    fleet
        .profiles
        .create_profile("1.0", Profile::new("ensemble-0002-4"))
        .await
        .unwrap();

    let err = fleet
        .service
        .add_to_cluster(&ids(&["n4"]), options())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::IllegalState);
    assert!(!fleet.profiles.profile_ids("1.0").await.contains(&"ensemble-0002".to_string()));
    assert_eq!(fleet.cluster_id().await, Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_password_is_kept_across_reconfigurations() {
    let fleet = TestFleet::with_members(4, 3).await;

    let mut unset = options();
    unset.password = None;
    fleet
        .service
        .add_to_cluster(&ids(&["n4"]), unset)
        .await
        .unwrap();

    assert_eq!(
        fleet
            .active()
            .await
            .read("/config/ensemble/0002/password")
            .await
            .unwrap()
            .as_deref(),
        Some(b"secret".as_slice())
    );
}

#[tokio::test(start_paused = true)]
async fn test_attach_to_existing_ensemble() {
    let fleet = TestFleet::with_members(3, 3).await;
    let url = fleet
        .active()
        .await
        .read("/config/ensemble/0001/url")
        .await
        .unwrap()
        .unwrap();
    let url = String::from_utf8(url.to_vec()).unwrap();

    let other = proven_ensemble::ReconfigurationService::new(
        proven_ensemble::Collaborators::new(
            fleet.connector.clone(),
            fleet.fleet.clone(),
            fleet.agents.clone(),
            fleet.profiles.clone(),
        ),
        NodeId::new("n2"),
        options(),
    );
    other.attach(&url, "secret").await.unwrap();

    assert_eq!(
        other.get_ensemble_containers().await.unwrap(),
        ids(&["n1", "n2", "n3"])
    );
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_swap_must_keep_a_majority() {
    let fleet = TestFleet::with_members(6, 3).await;
    fleet
        .active()
        .await
        .transaction(Transaction::new().create("/apps/data", "payload"))
        .await
        .unwrap();

    for request in [ids(&["n4", "n5", "n6"]), ids(&["n4"])] {
        let err = fleet
            .service
            .create_cluster(&request, options())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArguments);
    }

    // rejected before anything was written
    assert_eq!(fleet.cluster_id().await, Some(1));
    assert_eq!(
        fleet.service.get_ensemble_containers().await.unwrap(),
        ids_up_to(3)
    );
    assert!(!fleet.profiles.profile_ids("1.0").await.contains(&"ensemble-0002".to_string()));

    // replacing one member keeps two of three
    fleet
        .service
        .create_cluster(&ids(&["n1", "n2", "n4"]), options())
        .await
        .unwrap();
    assert!(logs_contain("MIGRATING(rolling-add)"));

    assert_eq!(fleet.cluster_id().await, Some(2));
    assert_eq!(
        fleet.service.get_ensemble_containers().await.unwrap(),
        ids(&["n1", "n2", "n4"])
    );
    assert!(fleet.profile_set("n3").await.is_empty());
    assert_eq!(
        fleet.active().await.read("/apps/data").await.unwrap().as_deref(),
        Some(b"payload".as_slice())
    );
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_timeout() {
    let fleet = TestFleet::with_members(4, 3).await;
    let n4 = NodeId::new("n4");
    fleet.agents.freeze(&n4).await;

    let err = fleet
        .service
        .add_to_cluster(&ids(&["n4"]), options())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);

    fleet.agents.thaw(&n4).await;
    fleet
        .service
        .add_to_cluster(&ids(&["n4"]), options())
        .await
        .unwrap();

    // the identity minted by the failed attempt is skipped, not reused
    assert_eq!(fleet.cluster_id().await, Some(3));
    assert!(fleet.profiles.profile_ids("1.0").await.contains(&"ensemble-0002".to_string()));
    assert_eq!(
        fleet.service.get_ensemble_containers().await.unwrap(),
        ids_up_to(4)
    );
    assert_eq!(fleet.profile_set("n4").await, vec!["ensemble-0003-4"]);
    assert_eq!(fleet.view("n4").await.unwrap().cluster_id, 3);
}
