//! Shared scaffolding for the end-to-end tests (§8's literal scenarios):
//! a recording [`Callback`] and a couple of small polling helpers, since
//! every scenario drives real loopback TCP sockets and the node's reactions
//! to handshakes are asynchronous.

use std::net::Ipv4Addr;
use std::time::Duration;

use bytes::Bytes;
use hyparnet::{Callback, Config, Id};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    LinkUp(Id),
    LinkDown(Id),
    Deliver(Id, Vec<u8>),
}

/// Records every callback invocation on an unbounded channel so a test can
/// `recv` and assert on them in order.
pub struct Recorder {
    tx: mpsc::UnboundedSender<Event>,
}

pub struct Recording {
    pub rx: mpsc::UnboundedReceiver<Event>,
}

pub fn recorder() -> (Recorder, Recording) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Recorder { tx }, Recording { rx })
}

impl Callback for Recorder {
    fn link_up(&self, peer: Id) {
        let _ = self.tx.send(Event::LinkUp(peer));
    }

    fn link_down(&self, peer: Id) {
        let _ = self.tx.send(Event::LinkDown(peer));
    }

    fn deliver(&self, sender: Id, payload: Bytes) {
        let _ = self.tx.send(Event::Deliver(sender, payload.to_vec()));
    }
}

/// Default timeout for test assertions that wait on network round trips.
pub const WAIT: Duration = Duration::from_secs(5);

/// Receives the next event within [`WAIT`], panicking on timeout.
pub async fn next_event(recording: &mut Recording) -> Event {
    tokio::time::timeout(WAIT, recording.rx.recv())
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for an event"))
        .expect("recorder channel closed")
}

/// A config for loopback tests: binds to an OS-assigned port, disables the
/// periodic shuffle tick (scenarios exercise `shuffle()` explicitly so a
/// background tick firing mid-assertion would make them flaky), and uses
/// short timeouts so a genuinely failed handshake doesn't stall a test.
pub fn test_config() -> Config {
    Config {
        bind_addr: Ipv4Addr::LOCALHOST,
        shuffle_period: None,
        timeout: Duration::from_secs(2),
        send_timeout: Duration::from_secs(2),
        ..Config::default()
    }
}
