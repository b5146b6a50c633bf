//! §8 scenarios 3 & 4: NEIGHBOUR decline and accept-with-eviction, driven
//! against a raw socket role-playing the requester so the exact wire
//! exchange (ACCEPT/DECLINE) can be observed directly.

mod support;

use std::net::Ipv4Addr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use hyparnet::wire::{Codec, Frame};
use hyparnet::{Config, Id};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use support::{next_event, recorder, test_config, Event};

fn single_peer_config() -> Config {
    Config { active_size: 1, ..test_config() }
}

#[tokio::test]
async fn low_priority_neighbour_is_declined_when_active_view_is_full() {
    let (n_cb, _n_events) = recorder();
    let n = hyparnet::start(single_peer_config(), Arc::new(n_cb)).await.unwrap();

    let (x_cb, mut x_events) = recorder();
    let x = hyparnet::start(single_peer_config(), Arc::new(x_cb)).await.unwrap();
    x.join_cluster(n.self_id());
    assert_eq!(next_event(&mut x_events).await, Event::LinkUp(n.self_id()));

    let addr = std::net::SocketAddrV4::new(n.self_id().ip, n.self_id().port);
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut framed = Framed::new(stream, Codec);

    let fake_requester = Id::new(Ipv4Addr::LOCALHOST, 0);
    framed.send(Frame::LNeighbour(fake_requester)).await.unwrap();

    let reply = framed.next().await.unwrap().unwrap();
    assert_eq!(reply, Frame::Decline);

    // The connection is a one-shot `Temporary` and should be closed from
    // the node's side right after DECLINE.
    assert!(framed.next().await.is_none());

    assert_eq!(n.peers().await.len(), 1);
    assert_eq!(n.peers().await[0].0, x.self_id());
    assert!(n.passive_peers().await.is_empty());
}

#[tokio::test]
async fn high_priority_neighbour_is_accepted_and_evicts_the_incumbent() {
    let (n_cb, _n_events) = recorder();
    let n = hyparnet::start(single_peer_config(), Arc::new(n_cb)).await.unwrap();

    let (x_cb, mut x_events) = recorder();
    let x = hyparnet::start(single_peer_config(), Arc::new(x_cb)).await.unwrap();
    x.join_cluster(n.self_id());
    assert_eq!(next_event(&mut x_events).await, Event::LinkUp(n.self_id()));

    let addr = std::net::SocketAddrV4::new(n.self_id().ip, n.self_id().port);
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut framed = Framed::new(stream, Codec);

    let fake_requester = Id::new(Ipv4Addr::LOCALHOST, 0);
    framed.send(Frame::HNeighbour(fake_requester)).await.unwrap();

    let reply = framed.next().await.unwrap().unwrap();
    assert_eq!(reply, Frame::Accept);

    // X is evicted: it sees DISCONNECT on its own connection and a link-down.
    assert_eq!(next_event(&mut x_events).await, Event::LinkDown(n.self_id()));

    let n_active = n.peers().await;
    assert_eq!(n_active.len(), 1);
    assert_eq!(n_active[0].0, fake_requester);

    let n_passive = n.passive_peers().await;
    assert_eq!(n_passive, vec![x.self_id()]);
}
