//! Connection layer: wire framing lives in [`crate::wire`]; this module owns
//! the per-socket state machine (§4.2) and the outgoing handshake logic
//! (§4.3, in [`manager`]).
//!
//! A connection is modelled as one `tokio` task holding the socket and a
//! channel to the node (§9's "process-per-peer → task-per-connection").
//! Callers never see the `WaitForSocket` / `WaitForAccept` / `WaitIncoming`
//! states directly: the public [`ConnectionHandle`] only exists once a
//! connection has reached `Active`, at which point it is handed to the
//! node alongside the peer's [`Id`].

pub mod fsm;
pub mod manager;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::id::Id;

/// Priority carried by a NEIGHBOUR request (§4.4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High,
    Low,
}

/// Commands the node (or anything else holding a [`ConnectionHandle`])
/// enqueues on an `Active` connection — the public contract of §4.2.
#[derive(Debug)]
pub enum ToConnection {
    Send(Bytes),
    ForwardJoin { new: Id, ttl: u8 },
    Shuffle { requester: Id, ttl: u8, xlist: Vec<Id> },
    Disconnect,
    /// Tear the connection down without sending DISCONNECT or emitting
    /// `LinkDown`/`ConnectionError`. Used when a handle is rejected by
    /// `add_node_active` (duplicate or self id, §4.4.5): the caller already
    /// left the registered peer of this id untouched, so releasing the
    /// rejected handle must not surface an id-named event that would cause
    /// `on_peer_gone` to tear down that unrelated, still-healthy peer.
    Discard,
}

/// A cheap, cloneable reference to an `Active` connection.
///
/// Mirrors the "peer references its connection, connection never
/// references the peer record" rule in §9: this handle carries no back
/// pointer into node state, only a channel to the task that owns the
/// socket.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    remote: Id,
    tx: mpsc::UnboundedSender<ToConnection>,
}

impl ConnectionHandle {
    pub(crate) fn new(remote: Id, tx: mpsc::UnboundedSender<ToConnection>) -> Self {
        Self { remote, tx }
    }

    pub fn remote(&self) -> Id {
        self.remote
    }

    /// Enqueues an application payload as a MESSAGE frame (§4.2's `send`).
    /// A failure here means the connection task has already exited; the
    /// node will separately observe a [`NodeEvent::ConnectionError`] or
    /// [`NodeEvent::LinkDown`] for the same peer.
    pub fn send(&self, payload: Bytes) {
        let _ = self.tx.send(ToConnection::Send(payload));
    }

    pub fn forward_join(&self, new: Id, ttl: u8) {
        let _ = self.tx.send(ToConnection::ForwardJoin { new, ttl });
    }

    pub fn shuffle(&self, requester: Id, ttl: u8, xlist: Vec<Id>) {
        let _ = self.tx.send(ToConnection::Shuffle { requester, ttl, xlist });
    }

    /// Synchronous from the caller's point of view: the DISCONNECT frame,
    /// socket close and link-down notification happen on the connection's
    /// own task, asynchronously with respect to this call, but the node
    /// never needs to wait on it (§4.2).
    pub fn disconnect(&self) {
        let _ = self.tx.send(ToConnection::Disconnect);
    }

    /// Releases a handle that was never registered as a peer (§4.4.5: "the
    /// candidate's connection, if any, is the responsibility of the caller
    /// to release"). Closes the socket with no DISCONNECT frame and no
    /// `LinkDown`/`ConnectionError` event, so it cannot be mistaken for the
    /// teardown of an active peer sharing the same identifier.
    pub fn discard(&self) {
        let _ = self.tx.send(ToConnection::Discard);
    }
}

/// Outcome of an outgoing NEIGHBOUR attempt issued during failure recovery
/// or an explicit promotion (§4.4.4).
#[derive(Debug)]
pub enum NeighbourOutcome {
    Accepted(ConnectionHandle),
    Declined,
    Failed,
}

/// Outcome of an outgoing JOIN or JOINREPLY attempt.
#[derive(Debug)]
pub enum ConnectOutcome {
    Connected(ConnectionHandle),
    Failed,
}

/// Events the connection layer surfaces into the node's event loop.
///
/// Control frames that require a view mutation (FORWARDJOIN, SHUFFLE,
/// SHUFFLEREPLY, JOIN, JOINREPLY, NEIGHBOUR) become events; MESSAGE frames
/// are delivered straight to the application callback by the connection
/// task itself and never reach this channel (§4.2's "MESSAGE -> deliver
/// to app").
#[derive(Debug)]
pub enum NodeEvent {
    /// An incoming JOIN was accepted by the handshake; `handle` is already
    /// `Active`.
    Join { id: Id, handle: ConnectionHandle },

    /// An incoming JOINREPLY was accepted.
    JoinReply { id: Id, handle: ConnectionHandle },

    /// An incoming NEIGHBOUR request; the node must answer through `reply`
    /// before the connection task can proceed (§4.2's `WaitIncoming`
    /// dispatch for HNEIGHBOUR/LNEIGHBOUR). This is a pure policy decision
    /// (§4.4.4) — it needs no connection handle, since eviction of an
    /// incumbent active peer (if any) only concerns identifiers already
    /// known to the node.
    Neighbour {
        id: Id,
        priority: Priority,
        reply: oneshot::Sender<bool>,
    },

    /// The incoming connection from `id` sent ACCEPT's counterpart: having
    /// been told to admit `id`, the connection task has sent ACCEPT and is
    /// now `Active`. The node inserts `(id, handle)` into the active view
    /// (§4.4.5), possibly evicting an existing member.
    NeighbourAdmitted { id: Id, handle: ConnectionHandle },

    /// A FORWARDJOIN arrived over `sender`'s existing active connection.
    ForwardJoin { sender: Id, new: Id, ttl: u8 },

    /// A SHUFFLE arrived over `sender`'s existing active connection.
    Shuffle { sender: Id, requester: Id, ttl: u8, xlist: Vec<Id> },

    /// A SHUFFLEREPLY arrived on a one-shot incoming connection.
    ShuffleReply { xlist: Vec<Id> },

    /// `sender` sent DISCONNECT, or this side voluntarily closed the
    /// connection. The node's handler is idempotent: if `sender` is no
    /// longer in the active view (because the node itself initiated the
    /// teardown) this is a no-op.
    LinkDown(Id),

    /// `sender`'s connection failed (read/write/timeout error).
    ConnectionError(Id),

    /// Result of an async outgoing JOIN issued by `join_cluster`.
    JoinOutcome(ConnectOutcome),

    /// Result of an async outgoing JOINREPLY issued for a terminating
    /// forward-join.
    JoinReplyOutcome { new: Id, outcome: ConnectOutcome },

    /// Result of an async outgoing NEIGHBOUR issued by the replacement
    /// loop or an explicit promotion.
    NeighbourResult { id: Id, outcome: NeighbourOutcome },
}
