//! §8 scenario 1: two-node join.

mod support;

use std::sync::Arc;

use support::{next_event, recorder, test_config, Event};

#[tokio::test]
async fn both_nodes_see_each_other_active_with_empty_passive() {
    let (b_cb, mut b_events) = recorder();
    let b = hyparnet::start(test_config(), Arc::new(b_cb)).await.unwrap();

    let (a_cb, mut a_events) = recorder();
    let a = hyparnet::start(test_config(), Arc::new(a_cb)).await.unwrap();

    a.join_cluster(b.self_id());

    assert_eq!(next_event(&mut b_events).await, Event::LinkUp(a.self_id()));
    assert_eq!(next_event(&mut a_events).await, Event::LinkUp(b.self_id()));

    let a_peers = a.peers().await;
    assert_eq!(a_peers.len(), 1);
    assert_eq!(a_peers[0].0, b.self_id());
    assert!(a.passive_peers().await.is_empty());

    let b_peers = b.peers().await;
    assert_eq!(b_peers.len(), 1);
    assert_eq!(b_peers[0].0, a.self_id());
    assert!(b.passive_peers().await.is_empty());

    a.stop();
    b.stop();
}
