#[path = "common/mod.rs"]
mod common;

use std::sync::Arc;

use common::{make_node_id, NetworkRegistry, TestNode};
use iroh::{EndpointAddr, SecretKey};
use iroh_dht_values::net::{contact_for, join_endpoint};
use iroh_dht_values::ContentId;

#[tokio::test]
async fn iterative_find_node_returns_expected_contacts() {
    let registry = Arc::new(NetworkRegistry::default());
    let main = TestNode::new(registry.clone(), 0x10, 20, 3).await;
    let peer_one = TestNode::new(registry.clone(), 0x11, 20, 3).await;
    let peer_two = TestNode::new(registry.clone(), 0x12, 20, 3).await;

    for peer in [&peer_one, &peer_two] {
        main.node.observe_contact(peer.contact()).await;
        peer.node.observe_contact(main.contact()).await;
    }

    let target = peer_two.contact().id;
    let results = main
        .node
        .iterative_find_node(target)
        .await
        .expect("lookup succeeds");

    assert_eq!(results.first().map(|c| c.id), Some(peer_two.contact().id));
    assert!(results.iter().any(|c| c.id == peer_one.contact().id));
    assert!(results.iter().all(|c| c.id != main.contact().id));
}

#[tokio::test]
async fn lookup_discovers_peers_through_intermediaries() {
    let registry = Arc::new(NetworkRegistry::default());
    let a = TestNode::new(registry.clone(), 1, 20, 3).await;
    let b = TestNode::new(registry.clone(), 2, 20, 3).await;
    let c = TestNode::new(registry.clone(), 3, 20, 3).await;

    // a only knows b; b knows c.
    a.node.observe_contact(b.contact()).await;
    b.node.observe_contact(c.contact()).await;

    let results = a
        .node
        .iterative_find_node(c.contact().id)
        .await
        .expect("lookup succeeds");
    assert_eq!(results.first().map(|c| c.id), Some(c.contact().id));
    assert!(a.node.find_peer(c.contact().id).await.unwrap().is_some());
}

#[tokio::test]
async fn bootstrap_joins_through_a_seed() {
    let registry = Arc::new(NetworkRegistry::default());
    let seed = TestNode::new(registry.clone(), 0x40, 20, 3).await;
    let other = TestNode::new(registry.clone(), 0x41, 20, 3).await;
    seed.node.observe_contact(other.contact()).await;

    let joiner = TestNode::new(registry.clone(), 0x42, 20, 3).await;
    let known = joiner
        .node
        .bootstrap(vec![seed.contact()])
        .await
        .expect("bootstrap succeeds");

    assert_eq!(known, 2);
    let seed_knows: Vec<_> = seed.node.known_contacts().await.iter().map(|c| c.id).collect();
    assert!(seed_knows.contains(&joiner.contact().id));
}

#[tokio::test]
async fn bootstrap_fails_when_no_seed_answers() {
    let registry = Arc::new(NetworkRegistry::default());
    let joiner = TestNode::new(registry.clone(), 0x50, 20, 3).await;
    let ghost = common::make_contact(0x51);

    assert!(joiner.node.bootstrap(vec![ghost]).await.is_err());
    assert!(joiner.node.known_contacts().await.is_empty());
}

#[tokio::test]
async fn announced_provider_is_found_from_another_node() {
    let registry = Arc::new(NetworkRegistry::default());
    let holder = TestNode::new(registry.clone(), 0x20, 20, 3).await;
    let middle = TestNode::new(registry.clone(), 0x21, 20, 3).await;
    let seeker = TestNode::new(registry.clone(), 0x22, 20, 3).await;

    holder.node.observe_contact(middle.contact()).await;
    middle.node.observe_contact(holder.contact()).await;
    seeker.node.observe_contact(middle.contact()).await;

    let key = ContentId::for_value(b"hello routing").routing_key();
    let accepted = holder
        .node
        .announce_provider(key)
        .await
        .expect("announce succeeds");
    assert!(accepted >= 1);
    assert!(holder
        .network
        .announce_calls()
        .await
        .iter()
        .any(|(to, k)| *to == middle.contact().id && *k == key));

    let providers = seeker
        .node
        .find_providers(key)
        .await
        .expect("provider lookup succeeds");
    assert_eq!(providers.first().map(|c| c.id), Some(holder.contact().id));
}

#[tokio::test]
async fn lone_announce_is_kept_locally() {
    let registry = Arc::new(NetworkRegistry::default());
    let alone = TestNode::new(registry.clone(), 0x60, 20, 3).await;
    let key = ContentId::for_value(b"solo").routing_key();

    assert_eq!(alone.node.announce_provider(key).await.unwrap(), 0);
    let providers = alone.node.find_providers(key).await.unwrap();
    assert_eq!(providers, vec![alone.contact()]);
    assert_eq!(alone.node.telemetry_snapshot().await.provider_keys, 1);
}

#[tokio::test]
async fn unknown_key_has_no_providers() {
    let registry = Arc::new(NetworkRegistry::default());
    let a = TestNode::new(registry.clone(), 0x70, 20, 3).await;
    let b = TestNode::new(registry.clone(), 0x71, 20, 3).await;
    a.node.observe_contact(b.contact()).await;
    b.node.observe_contact(a.contact()).await;

    let key = ContentId::for_value(b"nobody has this").routing_key();
    assert!(a.node.find_providers(key).await.unwrap().is_empty());
}

#[tokio::test]
async fn announce_fails_when_every_peer_rejects() {
    let registry = Arc::new(NetworkRegistry::default());
    let main = TestNode::new(registry.clone(), 0x30, 20, 3).await;
    let peer = TestNode::new(registry.clone(), 0x31, 20, 3).await;
    main.node.observe_contact(peer.contact()).await;
    peer.node.observe_contact(main.contact()).await;

    let key = make_node_id(0xAA);
    main.network.set_rejects_providers(peer.contact().id, true).await;
    assert!(main.node.announce_provider(key).await.is_err());

    // The local record is still kept.
    assert_eq!(
        main.node.find_providers(key).await.unwrap(),
        vec![main.contact()]
    );

    main.network.set_rejects_providers(peer.contact().id, false).await;
    assert_eq!(main.node.announce_provider(key).await.unwrap(), 1);
}

#[tokio::test]
async fn unreachable_peer_leaves_announce_local() {
    let registry = Arc::new(NetworkRegistry::default());
    let main = TestNode::new(registry.clone(), 0x38, 20, 3).await;
    let peer = TestNode::new(registry.clone(), 0x39, 20, 3).await;
    main.node.observe_contact(peer.contact()).await;

    main.network.set_failure(peer.contact().id, true).await;
    let key = make_node_id(0xBB);
    // The lookup skips the dead peer, so the record stays here.
    assert_eq!(main.node.announce_provider(key).await.unwrap(), 0);
    assert_eq!(main.node.known_contacts().await, vec![peer.contact()]);
}

#[tokio::test]
async fn failing_peer_is_dropped_from_lookups() {
    let registry = Arc::new(NetworkRegistry::default());
    let main = TestNode::new(registry.clone(), 0x80, 20, 3).await;
    let good = TestNode::new(registry.clone(), 0x81, 20, 3).await;
    let bad = TestNode::new(registry.clone(), 0x82, 20, 3).await;
    for peer in [&good, &bad] {
        main.node.observe_contact(peer.contact()).await;
        peer.node.observe_contact(main.contact()).await;
    }

    main.network.set_failure(bad.contact().id, true).await;
    let results = main
        .node
        .iterative_find_node(make_node_id(0x82))
        .await
        .expect("lookup tolerates failure");
    assert!(results.iter().all(|c| c.id != bad.contact().id));
    assert!(results.iter().any(|c| c.id == good.contact().id));

    let snapshot = main.node.telemetry_snapshot().await;
    assert_eq!(snapshot.known_peers, 2);
    assert_eq!(snapshot.replication_factor, 20);
    assert_eq!(snapshot.concurrency, 3);
}

#[tokio::test]
async fn transient_lookup_failure_keeps_the_contact() {
    let registry = Arc::new(NetworkRegistry::default());
    let main = TestNode::new(registry.clone(), 0x84, 20, 3).await;
    let flaky = TestNode::new(registry.clone(), 0x85, 20, 3).await;
    main.node.observe_contact(flaky.contact()).await;

    main.network.set_failure(flaky.contact().id, true).await;
    let target = flaky.contact().id;
    assert!(main.node.iterative_find_node(target).await.unwrap().is_empty());
    assert!(main.node.known_contacts().await.contains(&flaky.contact()));

    main.network.set_failure(flaky.contact().id, false).await;
    let results = main.node.iterative_find_node(target).await.unwrap();
    assert_eq!(results.first().map(|c| c.id), Some(target));
}

#[tokio::test]
async fn discovered_endpoint_is_joined_once() {
    let registry = Arc::new(NetworkRegistry::default());
    let addr = EndpointAddr::new(SecretKey::from_bytes(&[7u8; 32]).public());
    let found = TestNode::with_contact(registry.clone(), contact_for(&addr).unwrap(), 20, 3).await;
    let other = TestNode::new(registry.clone(), 0x91, 20, 3).await;
    found.node.observe_contact(other.contact()).await;

    let local = TestNode::new(registry.clone(), 0x90, 20, 3).await;
    assert_eq!(join_endpoint(&local.node, &addr).await.unwrap(), Some(2));
    let found_knows = found.node.known_contacts().await;
    assert!(found_knows.contains(&local.contact()));

    let pings = local.network.ping_calls().await.len();
    assert_eq!(join_endpoint(&local.node, &addr).await.unwrap(), None);
    assert_eq!(local.network.ping_calls().await.len(), pings);
}
