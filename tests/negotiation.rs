//! Membership negotiation scenarios against an in-memory cluster

mod common;

use common::{config, run_node, ADMIN_PASSWORD, ADMIN_USER};
use replset_bootstrap::coordinator::{BootstrapOutcome, PeerSet};
use replset_bootstrap::engine::mock::MockCluster;
use replset_bootstrap::engine::ReplicaSetRole;
use replset_bootstrap::{Credentials, Error};
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test(start_paused = true)]
async fn test_single_node_initiates_without_backoff() {
    let dir = TempDir::new().unwrap();
    let conf = config(dir.path(), true);
    let cluster = MockCluster::new(["node-0.svc"]);
    let peers = PeerSet::new(["node-0.svc"]);

    let started = tokio::time::Instant::now();
    let report = run_node(&cluster, &conf, &peers, "node-0").await.unwrap();

    assert_eq!(report.negotiation.outcome, BootstrapOutcome::InitiatedNewSet);
    assert_eq!(report.negotiation.primary.as_deref(), Some("node-0.svc"));
    assert!(started.elapsed() < conf.race_backoff());
    assert_eq!(cluster.initiations(), 1);
    assert_eq!(cluster.replica_set().as_deref(), Some("rs0"));
    assert_eq!(cluster.members(), vec!["node-0.svc:27017"]);
    assert_eq!(cluster.password_of(ADMIN_USER).as_deref(), Some(ADMIN_PASSWORD));
}

#[tokio::test(start_paused = true)]
async fn test_existing_primary_is_recognised() {
    let dir = TempDir::new().unwrap();
    let conf = config(dir.path(), false);
    let cluster = MockCluster::new(["node-0.svc", "node-1.svc"]);
    cluster.form_set("rs0", "node-0.svc", &["node-1.svc"]);
    let peers = PeerSet::new(["node-0.svc", "node-1.svc"]);

    let report = run_node(&cluster, &conf, &peers, "node-0").await.unwrap();

    assert_eq!(report.negotiation.outcome, BootstrapOutcome::AlreadyPrimary);
    assert_eq!(report.negotiation.primary.as_deref(), Some("node-0.svc"));
    assert_eq!(cluster.initiations(), 0);
    assert_eq!(cluster.command_count("rs.add"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_new_node_joins_existing_set() {
    let dir = TempDir::new().unwrap();
    let conf = config(dir.path(), true);
    let cluster = MockCluster::new(["node-0.svc", "node-1.svc", "node-2.svc"]);
    cluster.form_set("rs0", "node-0.svc", &["node-1.svc"]);
    cluster.put_user(&Credentials::new(ADMIN_USER, ADMIN_PASSWORD));
    cluster.set_catch_up_polls(3);
    let peers = PeerSet::new(["node-0.svc", "node-1.svc", "node-2.svc"]);

    let report = run_node(&cluster, &conf, &peers, "node-2").await.unwrap();

    assert_eq!(report.negotiation.outcome, BootstrapOutcome::JoinedAsSecondary);
    assert_eq!(report.negotiation.primary.as_deref(), Some("node-0.svc"));
    assert_eq!(cluster.role_of("node-2.svc"), ReplicaSetRole::Secondary);
    assert!(cluster.members().contains(&"node-2.svc:27017".to_string()));
    assert_eq!(cluster.command_count("rs.add"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_listed_member_is_not_added_again() {
    let dir = TempDir::new().unwrap();
    let conf = config(dir.path(), false);
    let cluster = MockCluster::new(["node-0.svc", "node-1.svc"]);
    cluster.form_set("rs0", "node-0.svc", &["node-1.svc"]);
    let peers = PeerSet::new(["node-0.svc", "node-1.svc"]);

    let report = run_node(&cluster, &conf, &peers, "node-1").await.unwrap();

    assert_eq!(report.negotiation.outcome, BootstrapOutcome::JoinedAsSecondary);
    assert_eq!(cluster.command_count("rs.add"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_quorum_failure_stops_everything() {
    let dir = TempDir::new().unwrap();
    let conf = common::with_metrics(config(dir.path(), true));
    let cluster = MockCluster::new(["node-0.svc", "node-1.svc"]);
    cluster.form_set("rs0", "node-0.svc", &[]);
    cluster.put_user(&Credentials::new(ADMIN_USER, ADMIN_PASSWORD));
    cluster.fail_quorum_checks(true);
    let peers = PeerSet::new(["node-0.svc", "node-1.svc"]);

    let report = run_node(&cluster, &conf, &peers, "node-1").await.unwrap();

    assert_eq!(report.negotiation.outcome, BootstrapOutcome::QuorumFailed);
    assert!(report.negotiation.outcome.is_fatal());
    assert_eq!(report.credentials, None);
    assert_eq!(report.metrics_user, None);

    let commands = cluster.commands();
    let (last, host) = commands.last().unwrap();
    assert_eq!((last.as_str(), host.as_str()), ("rs.add", "node-0.svc"));
    assert_eq!(cluster.command_count("createUser"), 0);
    assert!(!cluster.has_user("metrics"));
}

#[tokio::test(start_paused = true)]
async fn test_other_add_member_rejection_is_an_error() {
    let dir = TempDir::new().unwrap();
    let conf = config(dir.path(), false);
    let cluster = MockCluster::new(["node-0.svc", "node-1.svc"]);
    cluster.form_set("rs0", "node-0.svc", &[]);
    cluster.reject_add_member("NewReplicaSetConfigurationIncompatible: duplicate host");
    let peers = PeerSet::new(["node-0.svc", "node-1.svc"]);

    let err = run_node(&cluster, &conf, &peers, "node-1").await.unwrap_err();
    match err {
        Error::MembershipRejected {
            primary,
            host,
            reason,
        } => {
            assert_eq!(primary, "node-0.svc");
            assert_eq!(host, "node-1.svc:27017");
            assert!(reason.contains("Incompatible"));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_racing_nodes_initiate_once() {
    for reversed in [false, true] {
        let dir0 = TempDir::new().unwrap();
        let dir1 = TempDir::new().unwrap();
        let conf0 = config(dir0.path(), true);
        let conf1 = config(dir1.path(), true);
        let cluster = MockCluster::new(["node-0.svc", "node-1.svc"]);
        let peers = PeerSet::new(["node-0.svc", "node-1.svc"]);

        let node0 = run_node(&cluster, &conf0, &peers, "node-0");
        let node1 = run_node(&cluster, &conf1, &peers, "node-1");
        let (r0, r1) = if reversed {
            let (r1, r0) = tokio::join!(node1, node0);
            (r0, r1)
        } else {
            tokio::join!(node0, node1)
        };
        let outcomes = [r0.unwrap().negotiation.outcome, r1.unwrap().negotiation.outcome];

        assert_eq!(cluster.initiations(), 1, "reversed={}", reversed);
        assert_eq!(
            outcomes,
            [BootstrapOutcome::InitiatedNewSet, BootstrapOutcome::JoinedAsSecondary],
            "reversed={}",
            reversed
        );
        assert_eq!(cluster.members(), vec!["node-0.svc:27017", "node-1.svc:27017"]);
    }
}

#[tokio::test(start_paused = true)]
async fn test_dead_first_peer_does_not_block_founding() {
    let dir = TempDir::new().unwrap();
    let conf = config(dir.path(), false);
    let cluster = MockCluster::new(["node-0.svc", "node-1.svc", "node-2.svc"]);
    cluster.set_down("node-0.svc", true);
    let peers = PeerSet::new(["node-0.svc", "node-1.svc", "node-2.svc"]);

    let started = tokio::time::Instant::now();
    let report = run_node(&cluster, &conf, &peers, "node-1").await.unwrap();

    assert_eq!(report.negotiation.outcome, BootstrapOutcome::InitiatedNewSet);
    assert!(started.elapsed() < Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_follower_without_founder_gives_up_quietly() {
    let dir = TempDir::new().unwrap();
    let mut conf = config(dir.path(), false);
    conf.max_probe_iterations = 2;
    let cluster = MockCluster::new(["node-0.svc", "node-1.svc"]);
    let peers = PeerSet::new(["node-0.svc", "node-1.svc"]);

    // node-0 is up but never runs its own coordinator
    let report = run_node(&cluster, &conf, &peers, "node-1").await.unwrap();

    assert_eq!(report.negotiation.outcome, BootstrapOutcome::RetryExhausted);
    assert!(!report.negotiation.outcome.is_fatal());
    assert_eq!(report.negotiation.primary, None);
    assert_eq!(cluster.initiations(), 0);
}
