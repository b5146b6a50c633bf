//! Reference flooding broadcast application.
//!
//! §1 scopes this out of the node/connection core and specifies it "only
//! via their interfaces"; §10.4 supplements it as a fully-implemented
//! reference since the node would otherwise be impossible to exercise
//! end-to-end. Implements [`Callback`] against a [`NodeHandle`].

use std::collections::HashSet;

use bytes::Bytes;
use parking_lot::Mutex;
use sha1::{Digest, Sha1};
use tokio::sync::broadcast;
use tracing::debug;

use crate::callback::Callback;
use crate::id::{Id, ID_WIRE_SIZE};
use crate::node::NodeHandle;

/// Capacity of the delivered-message broadcast channel (§10.4's "surfaces
/// the payload once to its own listeners"). A slow listener that falls this
/// far behind starts missing messages rather than backpressuring the flood.
const LISTENER_CHANNEL_CAPACITY: usize = 1024;

/// Content-hash identifier used to suppress duplicate deliveries: SHA-1 of
/// `payload ++ encode(sender)` (§9's resolved ambiguity over the source's
/// mixed balanced-tree/list dedup strategy).
type MessageId = [u8; 20];

fn message_id(sender: Id, payload: &[u8]) -> MessageId {
    let mut sender_bytes = Vec::with_capacity(ID_WIRE_SIZE);
    sender.encode(&mut sender_bytes);

    let mut hasher = Sha1::new();
    hasher.update(payload);
    hasher.update(&sender_bytes);
    hasher.finalize().into()
}

/// At-most-once flooding broadcast over a [`NodeHandle`]'s active view.
///
/// No eviction policy is specified for the seen-set (§9); this reference
/// implementation leaves it unbounded, matching the original behaviour,
/// rather than inventing a bound nothing here calls for.
pub struct Flooder {
    node: NodeHandle,
    seen: Mutex<HashSet<MessageId>>,
    delivered: broadcast::Sender<(Id, Bytes)>,
}

impl Flooder {
    pub fn new(node: NodeHandle) -> Self {
        let (delivered, _) = broadcast::channel(LISTENER_CHANNEL_CAPACITY);
        Self { node, seen: Mutex::new(HashSet::new()), delivered }
    }

    pub fn node(&self) -> &NodeHandle {
        &self.node
    }

    /// Subscribes to messages this flooder has delivered: every first-sight
    /// payload received from a peer is published here exactly once, after
    /// dedup and relay (§10.4). A receiver that lags behind drops messages
    /// rather than blocking delivery.
    pub fn subscribe(&self) -> broadcast::Receiver<(Id, Bytes)> {
        self.delivered.subscribe()
    }

    /// Originates a new message: sent to every currently active peer, and
    /// its own hash recorded so an echo coming back through the overlay is
    /// suppressed rather than relayed or redelivered.
    pub async fn broadcast(&self, payload: Bytes) {
        let id = message_id(self.node.self_id(), &payload);
        self.seen.lock().insert(id);

        let peers = self.node.peers().await;
        debug!(bytes = payload.len(), peers = peers.len(), "flood: broadcasting");
        for (_, handle) in peers {
            handle.send(payload.clone());
        }
    }
}

impl Callback for Flooder {
    fn link_up(&self, peer: Id) {
        debug!(%peer, "flood: link up");
    }

    fn link_down(&self, peer: Id) {
        debug!(%peer, "flood: link down");
    }

    fn deliver(&self, sender: Id, payload: Bytes) {
        let id = message_id(sender, &payload);
        let first_sight = self.seen.lock().insert(id);
        if !first_sight {
            debug!(%sender, "flood: duplicate, dropping");
            return;
        }

        debug!(%sender, bytes = payload.len(), "flood: delivering and relaying");

        // send_to_all_but(sender) (§9): relay to every active peer except
        // the one we heard it from. Peer enumeration needs the node's
        // event loop, which this synchronous callback can't await into,
        // so the relay itself is offloaded to a task.
        let node = self.node.clone();
        let relay_payload = payload.clone();
        tokio::spawn(async move {
            for (peer, handle) in node.peers().await {
                if peer != sender {
                    handle.send(relay_payload.clone());
                }
            }
        });

        let _ = self.delivered.send((sender, payload));
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    #[test]
    fn message_id_depends_on_sender_and_payload() {
        let a = Id::new(Ipv4Addr::new(127, 0, 0, 1), 1);
        let b = Id::new(Ipv4Addr::new(127, 0, 0, 1), 2);

        let id1 = message_id(a, b"hello");
        let id2 = message_id(b, b"hello");
        let id3 = message_id(a, b"world");

        assert_ne!(id1, id2);
        assert_ne!(id1, id3);
        assert_eq!(id1, message_id(a, b"hello"));
    }
}
