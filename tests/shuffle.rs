//! §8 scenario 5: shuffle round trip. A raw socket plays the role of the
//! single active peer a node shuffles with, and of the one-shot connection
//! that eventually carries the SHUFFLEREPLY back, so the exact frames
//! A sends and the way it integrates a reply can be asserted directly.

mod support;

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use hyparnet::wire::{Codec, Frame};
use hyparnet::Id;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use support::{recorder, test_config, WAIT};

#[tokio::test]
async fn shuffle_tick_sends_xlist_and_reply_is_integrated_into_passive() {
    let config = test_config();
    let (n_cb, _n_events) = recorder();
    let a = hyparnet::start(config.clone(), Arc::new(n_cb)).await.unwrap();

    let addr = SocketAddrV4::new(a.self_id().ip, a.self_id().port);

    // Z joins A's active view by playing the JOIN handshake directly.
    let z_id = Id::new(Ipv4Addr::LOCALHOST, 1);
    let z_stream = TcpStream::connect(addr).await.unwrap();
    let mut z = Framed::new(z_stream, Codec);
    z.send(Frame::Join(z_id)).await.unwrap();

    let deadline = tokio::time::Instant::now() + WAIT;
    while !a.peers().await.iter().any(|(id, _)| *id == z_id) {
        assert!(tokio::time::Instant::now() < deadline, "Z never became active");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // A's only active peer is Z; forcing a shuffle tick must target Z.
    a.shuffle();
    let frame = z.next().await.unwrap().unwrap();
    let (requester, ttl, xlist) = match frame {
        Frame::Shuffle { requester, ttl, xlist } => (requester, ttl, xlist),
        other => panic!("expected SHUFFLE, got {other:?}"),
    };
    assert_eq!(requester, a.self_id());
    assert_eq!(ttl, config.arwl.saturating_sub(1));
    assert!(xlist.contains(&a.self_id()));
    assert!(xlist.contains(&z_id));

    // Z now plays the one-shot SHUFFLEREPLY connection back to A, offering
    // an identifier A doesn't know about yet.
    let fresh = Id::new(Ipv4Addr::LOCALHOST, 2);
    let reply_stream = TcpStream::connect(addr).await.unwrap();
    let mut reply = Framed::new(reply_stream, Codec);
    reply.send(Frame::ShuffleReply { xlist: vec![fresh] }).await.unwrap();
    drop(reply);

    let deadline = tokio::time::Instant::now() + WAIT;
    while !a.passive_peers().await.contains(&fresh) {
        assert!(tokio::time::Instant::now() < deadline, "fresh identifier never reached A's passive view");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
