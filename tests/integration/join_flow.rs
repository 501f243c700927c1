//! Integration test: joining and founding over real TCP.
//!
//! Every node listens on a loopback port and answers join requests through
//! the same responder the daemon uses.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tidepool_cluster::{
    AbortReason, AbortSignal, JoinCoordinator, JoinOutcome, StaticAddressSource, abort_signal,
};
use tidepool_integration_tests::{
    RecordingTransport, ScriptedDiscovery, TestNode, dead_address, join_config,
};
use tidepool_types::MemberView;

fn joined(outcome: JoinOutcome) -> MemberView {
    match outcome {
        JoinOutcome::Joined(view) => view,
        other => panic!("expected to join, got {other:?}"),
    }
}

/// A second node joins the founder and both end up with the same view.
#[tokio::test]
async fn test_joiner_receives_view_from_founder() {
    let founder = TestNode::founder("founder").await;
    let joiner = TestNode::bind("joiner").await;

    let view = joined(joiner.join(&[founder.address().clone()]).await);

    assert_eq!(view.master, *founder.address());
    assert_eq!(view.version, 2);
    assert_eq!(view.len(), 2);
    assert_eq!(view.members[0], founder.member);
    assert_eq!(view.members[1], joiner.member);
    assert_eq!(founder.view().await, view);
    assert_eq!(joiner.view().await, view);
    assert!(!joiner.state().is_master().await);
}

/// Three joiners in a row: each admission bumps the version.
#[tokio::test]
async fn test_cluster_grows_one_member_at_a_time() {
    let founder = TestNode::founder("founder").await;
    let mut nodes = Vec::new();
    for i in 0..3 {
        let node = TestNode::bind(&format!("node-{i}")).await;
        let view = joined(node.join(&[founder.address().clone()]).await);
        assert_eq!(view.len(), i + 2);
        assert_eq!(view.version as usize, i + 2);
        nodes.push(node);
    }

    let view = founder.view().await;
    assert_eq!(view.len(), 4);
    for node in &nodes {
        assert!(view.contains(node.address()));
    }
}

/// A joiner that only knows a follower is redirected to the master.
#[tokio::test]
async fn test_follower_redirects_to_master() {
    let founder = TestNode::founder("founder").await;
    let follower = TestNode::bind("follower").await;
    joined(follower.join(&[founder.address().clone()]).await);

    let joiner = TestNode::bind("joiner").await;
    let transport = RecordingTransport::new();
    let config = join_config();
    let source = StaticAddressSource::new(
        joiner.address().clone(),
        vec![follower.address().clone()],
    );
    let coordinator = JoinCoordinator::new(
        config.clone(),
        Arc::new(source),
        joiner.handshake_via(&config, transport.clone()),
    )
    .unwrap();
    let view = joined(
        joiner
            .run_join(&coordinator, &AbortSignal::never())
            .await
            .unwrap(),
    );

    assert_eq!(
        transport.connects(),
        vec![follower.address().clone(), founder.address().clone()]
    );
    assert_eq!(view.master, *founder.address());
    assert_eq!(view.len(), 3);
    assert!(view.contains(follower.address()));
    assert!(view.contains(joiner.address()));
}

/// Nobody to talk to: the node founds its own cluster after `max_wait`.
#[tokio::test]
async fn test_no_peers_founds_after_max_wait() {
    let mut config = join_config();
    config.max_wait = Duration::from_millis(300);

    let node = TestNode::bind("lonely").await;
    let discovery = ScriptedDiscovery::new(Vec::new(), Vec::new());
    let coordinator = node.coordinator_with_discovery(config, discovery.clone());

    let start = Instant::now();
    let outcome = node
        .run_join(&coordinator, &AbortSignal::never())
        .await
        .unwrap();

    assert_eq!(outcome, JoinOutcome::BecomeFounder);
    assert!(start.elapsed() >= Duration::from_millis(300));
    assert!(discovery.calls() > 1, "discovery should be polled repeatedly");
    assert!(node.state().is_master().await);

    // The new founder answers joins right away.
    let joiner = TestNode::bind("joiner").await;
    let view = joined(joiner.join(&[node.address().clone()]).await);
    assert_eq!(view.master, *node.address());
}

/// Discovery finds the founder only after a few empty polls.
#[tokio::test]
async fn test_late_discovery_still_joins() {
    let founder = TestNode::founder("founder").await;
    let joiner = TestNode::bind("joiner").await;
    let discovery = ScriptedDiscovery::after_empty(3, &[founder.address().clone()]);
    let coordinator = joiner.coordinator_with_discovery(join_config(), discovery.clone());

    let outcome = joiner
        .run_join(&coordinator, &AbortSignal::never())
        .await
        .unwrap();

    let view = joined(outcome);
    assert_eq!(view.master, *founder.address());
    assert_eq!(discovery.calls(), 4);
}

/// Discovery reporting the node itself is never treated as a candidate.
#[tokio::test]
async fn test_self_only_discovery_founds() {
    let mut config = join_config();
    config.max_wait = Duration::from_millis(500);

    let node = TestNode::bind("self").await;
    let discovery = ScriptedDiscovery::after_empty(0, &[node.address().clone()]);
    let coordinator = node.coordinator_with_discovery(config, discovery);

    let outcome = node
        .run_join(&coordinator, &AbortSignal::never())
        .await
        .unwrap();
    assert_eq!(outcome, JoinOutcome::BecomeFounder);
}

/// An unreachable candidate is skipped in favour of the next one.
#[tokio::test]
async fn test_unreachable_candidate_is_skipped() {
    let founder = TestNode::founder("founder").await;
    let dead = dead_address().await;
    let joiner = TestNode::bind("joiner").await;

    let view = joined(joiner.join(&[dead.clone(), founder.address().clone()]).await);

    assert_eq!(view.master, *founder.address());
    assert!(!view.contains(&dead));
}

/// A master of another cluster rejects the joiner, which then founds its own.
#[tokio::test]
async fn test_cluster_name_mismatch_founds_separately() {
    let other = TestNode::bind_named("other", "prod").await;
    let mut config = join_config();
    config.max_wait = Duration::from_millis(500);
    let coordinator = other.coordinator_for(config.clone(), &[]);
    other
        .run_join(&coordinator, &AbortSignal::never())
        .await
        .unwrap();

    let joiner = TestNode::bind("joiner").await;
    let coordinator = joiner.coordinator_for(config, &[other.address().clone()]);
    let outcome = joiner
        .run_join(&coordinator, &AbortSignal::never())
        .await
        .unwrap();

    assert_eq!(outcome, JoinOutcome::BecomeFounder);
    assert_eq!(other.view().await.len(), 1);
    assert!(joiner.state().is_master().await);
}

/// A restarted node (same address, new id) replaces its stale entry.
#[tokio::test]
async fn test_restarted_node_replaces_stale_entry() {
    let founder = TestNode::founder("founder").await;
    let first = TestNode::bind("worker").await;
    joined(first.join(&[founder.address().clone()]).await);
    let address = first.address().clone();
    first.stop().await;

    let restarted = TestNode::bind_at("worker-restarted", &address).await;
    let view = joined(restarted.join(&[founder.address().clone()]).await);

    assert_eq!(view.len(), 2);
    assert_eq!(view.version, 3);
    let entry = view
        .members
        .iter()
        .find(|m| m.address == address)
        .unwrap();
    assert_eq!(entry.node_id, restarted.member.node_id);
}

/// Two nodes started together, each listing the other: the lower address
/// founds and the other joins it, well before `max_wait`.
#[tokio::test]
async fn test_nodes_started_together_form_one_cluster() {
    let a = TestNode::bind("node-a").await;
    let b = TestNode::bind("node-b").await;
    let config = join_config();
    let coordinator_a = a.coordinator_for(config.clone(), &[b.address().clone()]);
    let coordinator_b = b.coordinator_for(config.clone(), &[a.address().clone()]);

    let start = Instant::now();
    let abort = AbortSignal::never();
    let (outcome_a, outcome_b) = tokio::join!(
        a.run_join(&coordinator_a, &abort),
        b.run_join(&coordinator_b, &abort),
    );
    let (outcome_a, outcome_b) = (outcome_a.unwrap(), outcome_b.unwrap());
    assert!(start.elapsed() < config.max_wait);

    let (founder, joiner, joined_outcome) = if a.address() < b.address() {
        assert_eq!(outcome_a, JoinOutcome::BecomeFounder);
        (&a, &b, outcome_b)
    } else {
        assert_eq!(outcome_b, JoinOutcome::BecomeFounder);
        (&b, &a, outcome_a)
    };
    let view = joined(joined_outcome);
    assert_eq!(view.master, *founder.address());
    assert_eq!(view.len(), 2);
    assert!(founder.state().is_master().await);
    assert!(!joiner.state().is_master().await);
    assert_eq!(founder.view().await, view);
}

/// Three nodes started together end up in a single cluster.
#[tokio::test]
async fn test_three_nodes_started_together_agree_on_master() {
    let nodes = [
        TestNode::bind("node-0").await,
        TestNode::bind("node-1").await,
        TestNode::bind("node-2").await,
    ];
    let addresses: Vec<_> = nodes.iter().map(|n| n.address().clone()).collect();
    let coordinators: Vec<_> = nodes
        .iter()
        .map(|n| n.coordinator_for(join_config(), &addresses))
        .collect();

    let abort = AbortSignal::never();
    let (r0, r1, r2) = tokio::join!(
        nodes[0].run_join(&coordinators[0], &abort),
        nodes[1].run_join(&coordinators[1], &abort),
        nodes[2].run_join(&coordinators[2], &abort),
    );
    let outcomes = [r0.unwrap(), r1.unwrap(), r2.unwrap()];

    let founders = outcomes
        .iter()
        .filter(|o| **o == JoinOutcome::BecomeFounder)
        .count();
    assert_eq!(founders, 1);

    let lowest = addresses.iter().min().unwrap();
    let master = nodes.iter().find(|n| n.address() == lowest).unwrap();
    let view = master.view().await;
    assert_eq!(view.master, *lowest);
    assert_eq!(view.len(), 3);
    for node in &nodes {
        assert_eq!(node.state().master().await.as_ref(), Some(lowest));
    }
}

/// Aborting the attempt stops it before the deadline.
#[tokio::test]
async fn test_abort_stops_search() {
    let mut config = join_config();
    config.max_wait = Duration::from_secs(30);

    let node = TestNode::bind("aborted").await;
    let discovery = ScriptedDiscovery::new(Vec::new(), Vec::new());
    let coordinator = node.coordinator_with_discovery(config, discovery);

    let (handle, signal) = abort_signal();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();
    });

    let start = Instant::now();
    let outcome = node.run_join(&coordinator, &signal).await.unwrap();

    assert_eq!(outcome, JoinOutcome::Aborted(AbortReason::Cancelled));
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(node.state().view().await.is_none());
}
