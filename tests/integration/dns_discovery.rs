//! Integration test: DNS-based discovery.
//!
//! Resolves `localhost` to find a founder listening on loopback.

use std::sync::Arc;
use std::time::Duration;

use tidepool_cluster::{AbortSignal, DiscoveryPort, DnsDiscovery, JoinOutcome};
use tidepool_integration_tests::{TestNode, join_config};

#[tokio::test]
async fn test_join_founder_found_through_dns() {
    let founder = TestNode::founder("founder").await;
    let discovery = DnsDiscovery::new("localhost", founder.address().port()).unwrap();

    let joiner = TestNode::bind("joiner").await;
    let coordinator = joiner.coordinator_with_discovery(join_config(), Arc::new(discovery));
    let outcome = joiner
        .run_join(&coordinator, &AbortSignal::never())
        .await
        .unwrap();

    let JoinOutcome::Joined(view) = outcome else {
        panic!("expected to join, got {outcome:?}");
    };
    assert_eq!(view.master, *founder.address());
    assert!(view.contains(joiner.address()));
}

#[tokio::test]
async fn test_unresolvable_host_founds() {
    let discovery = DnsDiscovery::new("tidepool.invalid", 5701)
        .unwrap()
        .with_lookup_timeout(Duration::from_millis(200));
    assert!(discovery.discover_peers().await.unwrap().is_empty());

    let mut config = join_config();
    config.max_wait = Duration::from_millis(300);
    let node = TestNode::bind("lonely").await;
    let coordinator = node.coordinator_with_discovery(config, Arc::new(discovery));

    let outcome = node
        .run_join(&coordinator, &AbortSignal::never())
        .await
        .unwrap();
    assert_eq!(outcome, JoinOutcome::BecomeFounder);
}
