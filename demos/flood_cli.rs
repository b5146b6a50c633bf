//! Reference binary: wires `Config::from_env`, a running node, and the
//! [`hyparnet::flood::Flooder`] together into a standalone process, for
//! manual and scripted end-to-end testing of the overlay (§10.4).
//!
//! ```text
//! HYPARVIEW_BIND_PORT=7001 hyparnet-flood
//! HYPARVIEW_BIND_PORT=7002 hyparnet-flood 127.0.0.1:7001
//! ```
//!
//! Lines typed on stdin are flooded to the overlay; messages received from
//! peers are printed to stdout as `<sender> <payload>`.

use std::net::SocketAddrV4;
use std::sync::Arc;

use bytes::Bytes;
use hyparnet::flood::Flooder;
use hyparnet::{Callback, Config, Id};
use once_cell::sync::OnceCell;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

/// `hyparnet::start` needs a [`Callback`] before it can hand back the
/// [`hyparnet::NodeHandle`] that [`Flooder::new`] requires, so this cell
/// starts empty and is filled exactly once, right after the node comes up.
#[derive(Default)]
struct DeferredFlooder(OnceCell<Flooder>);

impl DeferredFlooder {
    fn install(&self, flooder: Flooder) {
        self.0.set(flooder).unwrap_or_else(|_| unreachable!("installed exactly once at startup"));
    }

    fn get(&self) -> &Flooder {
        self.0.get().expect("installed before the node can deliver any event")
    }
}

impl Callback for DeferredFlooder {
    fn link_up(&self, peer: Id) {
        self.get().link_up(peer);
    }

    fn link_down(&self, peer: Id) {
        self.get().link_down(peer);
    }

    fn deliver(&self, sender: Id, payload: Bytes) {
        self.get().deliver(sender, payload);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let contact = std::env::args().nth(1).map(|arg| {
        arg.parse::<SocketAddrV4>().unwrap_or_else(|err| panic!("invalid contact address {arg:?}: {err}"))
    });

    let callback = Arc::new(DeferredFlooder::default());
    let node = hyparnet::start(Config::from_env(), callback.clone()).await?;
    callback.install(Flooder::new(node.clone()));
    info!(self_id = %node.self_id(), "node listening");

    if let Some(contact) = contact {
        info!(%contact, "joining cluster");
        node.join_cluster(contact.into());
    }

    let flooder = callback.get();
    let mut received = flooder.subscribe();
    tokio::spawn(async move {
        while let Ok((sender, payload)) = received.recv().await {
            println!("{sender} {}", String::from_utf8_lossy(&payload));
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        flooder.broadcast(Bytes::from(line)).await;
    }

    node.stop();
    Ok(())
}
