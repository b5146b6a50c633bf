//! §8 scenario 2: forward-join propagation. Joining a fourth node through an
//! existing triangle exercises FORWARDJOIN fan-out and the passive-view
//! seeding that happens at `ttl == prwl` along the way (§4.4.2).
//!
//! The exact path a forward-join bounces through past the first hop is a
//! random walk (§4.4.2's tie-break), so this asserts the protocol's
//! invariants and termination (P1, P2, P6) rather than one fixed route.

mod support;

use std::sync::Arc;
use std::time::Duration;

use hyparnet::NodeHandle;
use support::{next_event, recorder, test_config, Event};

async fn assert_invariants(node: &NodeHandle, active_size: u8, passive_size: u8) {
    let active = node.peers().await;
    let passive = node.passive_peers().await;
    let self_id = node.self_id();

    assert!(active.len() <= active_size as usize, "active view over budget");
    assert!(passive.len() <= passive_size as usize, "passive view over budget");
    assert!(active.iter().all(|(id, _)| *id != self_id), "self in own active view");
    assert!(passive.iter().all(|id| *id != self_id), "self in own passive view");

    let active_ids: std::collections::HashSet<_> = active.iter().map(|(id, _)| *id).collect();
    assert!(passive.iter().all(|id| !active_ids.contains(id)), "active/passive overlap");
}

#[tokio::test]
async fn new_node_joins_through_existing_triangle_without_violating_invariants() {
    let config = test_config();

    let (a_cb, mut a_events) = recorder();
    let a = hyparnet::start(config.clone(), Arc::new(a_cb)).await.unwrap();

    let (b_cb, mut b_events) = recorder();
    let b = hyparnet::start(config.clone(), Arc::new(b_cb)).await.unwrap();
    b.join_cluster(a.self_id());
    assert_eq!(next_event(&mut a_events).await, Event::LinkUp(b.self_id()));
    assert_eq!(next_event(&mut b_events).await, Event::LinkUp(a.self_id()));

    let (c_cb, mut c_events) = recorder();
    let c = hyparnet::start(config.clone(), Arc::new(c_cb)).await.unwrap();
    c.join_cluster(b.self_id());
    // B admits C directly, then forward-joins A; A's active view is only
    // {B} at this point so the terminating case (§4.4.2) fires and A
    // dials C directly too, producing a full triangle.
    assert_eq!(next_event(&mut b_events).await, Event::LinkUp(c.self_id()));
    assert_eq!(next_event(&mut c_events).await, Event::LinkUp(b.self_id()));
    assert_eq!(next_event(&mut a_events).await, Event::LinkUp(c.self_id()));
    assert_eq!(next_event(&mut c_events).await, Event::LinkUp(a.self_id()));

    let (d_cb, mut d_events) = recorder();
    let d = hyparnet::start(config.clone(), Arc::new(d_cb)).await.unwrap();
    d.join_cluster(c.self_id());
    assert_eq!(next_event(&mut c_events).await, Event::LinkUp(d.self_id()));
    assert_eq!(next_event(&mut d_events).await, Event::LinkUp(c.self_id()));

    // Let the forward-join wavefront from C finish bouncing around A/B/C
    // before asserting — it is bounded by `arwl` hops (P6) but asynchronous.
    tokio::time::sleep(Duration::from_millis(200)).await;

    for node in [&a, &b, &c, &d] {
        assert_invariants(node, config.active_size, config.passive_size).await;
    }

    assert!(!d.peers().await.is_empty(), "D should have at least its joining peer active");
}
