//! The Hypar node — the event-serialized core of §4.4.
//!
//! One task owns [`view::Views`] and drives every protocol handler; all
//! interaction happens through [`NodeHandle`] (application-facing
//! commands) and the connection layer's [`NodeEvent`] channel. Outgoing
//! handshakes that require network I/O (join, join-reply, neighbour,
//! shuffle-reply) are spawned as helper tasks that report their result
//! back over the same event channel, so the node's own loop never blocks
//! on a TCP round-trip (§5).

mod view;

use std::net::SocketAddrV4;
use std::sync::Arc;

use metrics::{gauge, increment_counter};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::callback::Callback;
use crate::config::Config;
use crate::connection::{self, fsm, manager, ConnectOutcome, ConnectionHandle, NeighbourOutcome, NodeEvent, Priority};
use crate::error::{DeclineError, Error, StateError, TransportError};
use crate::id::Id;
use view::Views;

/// Commands accepted from the application via [`NodeHandle`].
enum Control {
    Stop,
    JoinCluster(Id),
    Shuffle,
    Peers(oneshot::Sender<Vec<(Id, ConnectionHandle)>>),
    PassivePeers(oneshot::Sender<Vec<Id>>),
}

/// A handle to a running node. Cheap to clone; every clone talks to the
/// same actor task.
#[derive(Clone)]
pub struct NodeHandle {
    self_id: Id,
    control: mpsc::UnboundedSender<Control>,
}

impl NodeHandle {
    pub fn self_id(&self) -> Id {
        self.self_id
    }

    /// §4.4.2 `join_cluster(contact)`.
    pub fn join_cluster(&self, contact: Id) {
        let _ = self.control.send(Control::JoinCluster(contact));
    }

    /// Forces an immediate shuffle tick, bypassing `shuffle_period`.
    pub fn shuffle(&self) {
        let _ = self.control.send(Control::Shuffle);
    }

    /// Closes every connection and stops accepting new ones. The node
    /// task exits once this has been processed; further calls on this or
    /// any cloned handle are silently dropped.
    pub fn stop(&self) {
        let _ = self.control.send(Control::Stop);
    }

    /// Snapshot of `(id, connection_handle)` pairs currently active.
    pub async fn peers(&self) -> Vec<(Id, ConnectionHandle)> {
        let (tx, rx) = oneshot::channel();
        if self.control.send(Control::Peers(tx)).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Snapshot of passive identifiers.
    pub async fn passive_peers(&self) -> Vec<Id> {
        let (tx, rx) = oneshot::channel();
        if self.control.send(Control::PassivePeers(tx)).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }
}

/// §6 `start(options)`: binds the listener, seeds the PRNG from entropy,
/// and spawns the node actor and accept loop.
pub async fn start(config: Config, callback: Arc<dyn Callback>) -> Result<NodeHandle, Error> {
    start_with_rng(config, callback, StdRng::from_entropy()).await
}

/// As [`start`], but with an injectable PRNG (§9: "make it injectable so
/// tests can pin sequences for deterministic scenarios").
pub async fn start_with_rng(config: Config, callback: Arc<dyn Callback>, rng: StdRng) -> Result<NodeHandle, Error> {
    let bind_addr = SocketAddrV4::new(config.bind_addr, config.bind_port);
    let listener = TcpListener::bind(bind_addr).await.map_err(TransportError::Io)?;
    let bound_port = listener.local_addr().map_err(TransportError::Io)?.port();
    let self_id = Id::new(config.bind_addr, bound_port);

    info!(%self_id, "node starting");

    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let accept_task = tokio::spawn(accept_loop(listener, callback.clone(), event_tx.clone(), config.clone()));

    let actor = NodeActor {
        self_id,
        config: config.clone(),
        callback,
        views: Views::new(self_id, config.active_size, config.passive_size),
        rng,
        event_tx,
        last_xlist: Vec::new(),
        recovery_declined: Vec::new(),
        accept_task,
    };
    tokio::spawn(actor.run(control_rx, event_rx));

    Ok(NodeHandle { self_id, control: control_tx })
}

async fn accept_loop(listener: TcpListener, callback: Arc<dyn Callback>, events: mpsc::UnboundedSender<NodeEvent>, config: Config) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!(%addr, "accepted incoming connection");
                tokio::spawn(fsm::handle_incoming(stream, callback.clone(), events.clone(), config.clone()));
            }
            Err(err) => {
                warn!(%err, "accept failed");
            }
        }
    }
}

struct NodeActor {
    self_id: Id,
    config: Config,
    callback: Arc<dyn Callback>,
    views: Views,
    rng: StdRng,
    event_tx: mpsc::UnboundedSender<NodeEvent>,
    last_xlist: Vec<Id>,
    /// Identifiers declined during the current failure-recovery episode
    /// (§4.4.4 step 5: "keep identifier on the side"), set aside from
    /// `try_recover`'s candidate pool so the replacement loop can't
    /// re-select a peer that just declined. Restored to the live passive
    /// view once the episode ends in success or passive exhaustion. If a
    /// second peer fails while one episode is still in flight the two
    /// episodes' declined sets merge here; harmless, since every entry is
    /// still a valid passive candidate regardless of which failure
    /// triggered the attempt.
    recovery_declined: Vec<Id>,
    accept_task: JoinHandle<()>,
}

impl NodeActor {
    async fn run(mut self, mut control_rx: mpsc::UnboundedReceiver<Control>, mut event_rx: mpsc::UnboundedReceiver<NodeEvent>) {
        let mut shuffle_interval = self.config.shuffle_period.map(tokio::time::interval);

        loop {
            tokio::select! {
                control = control_rx.recv() => {
                    match control {
                        Some(Control::Stop) | None => break,
                        Some(other) => self.handle_control(other),
                    }
                }
                event = event_rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event),
                        None => break,
                    }
                }
                _ = tick(&mut shuffle_interval) => {
                    self.do_shuffle();
                }
            }
        }

        self.shutdown();
    }

    fn shutdown(&mut self) {
        info!(self_id = %self.self_id, "node stopping");
        self.accept_task.abort();
        for (_, handle) in self.views.peers() {
            handle.disconnect();
        }
    }

    fn handle_control(&mut self, control: Control) {
        match control {
            Control::Stop => unreachable!("handled in run()"),
            Control::JoinCluster(contact) => self.join_cluster(contact),
            Control::Shuffle => self.do_shuffle(),
            Control::Peers(reply) => {
                let _ = reply.send(self.views.peers());
            }
            Control::PassivePeers(reply) => {
                let _ = reply.send(self.views.passive_ids().to_vec());
            }
        }
    }

    fn handle_event(&mut self, event: NodeEvent) {
        match event {
            NodeEvent::Join { id, handle } => self.on_join(id, handle),
            NodeEvent::JoinReply { id, handle } => self.on_join_reply(id, handle),
            NodeEvent::Neighbour { id, priority, reply } => self.on_neighbour_request(id, priority, reply),
            NodeEvent::NeighbourAdmitted { id, handle } => self.on_peer_admitted(id, handle),
            NodeEvent::ForwardJoin { sender, new, ttl } => self.on_forward_join(sender, new, ttl),
            NodeEvent::Shuffle { sender, requester, ttl, xlist } => self.on_shuffle(sender, requester, ttl, xlist),
            NodeEvent::ShuffleReply { xlist } => self.on_shuffle_reply(xlist),
            NodeEvent::LinkDown(id) => self.on_peer_gone(id),
            NodeEvent::ConnectionError(id) => self.on_peer_gone(id),
            NodeEvent::JoinOutcome(outcome) => self.on_connect_outcome(outcome),
            NodeEvent::JoinReplyOutcome { outcome, .. } => self.on_connect_outcome(outcome),
            NodeEvent::NeighbourResult { id, outcome } => self.on_neighbour_result(id, outcome),
        }
        self.record_view_sizes();
    }

    fn record_view_sizes(&self) {
        gauge!("hyparnet_active_view_size", self.views.active_len() as f64);
        gauge!("hyparnet_passive_view_size", self.views.passive_len() as f64);
    }

    fn join_cluster(&mut self, contact: Id) {
        debug!(%contact, "join_cluster");
        self.spawn_join(contact);
    }

    fn spawn_join(&self, contact: Id) {
        tokio::spawn(manager::connect_and_join(
            self.config.clone(),
            self.self_id,
            contact,
            self.callback.clone(),
            self.event_tx.clone(),
        ));
    }

    fn spawn_join_reply(&self, new: Id) {
        tokio::spawn(manager::connect_and_join_reply(
            self.config.clone(),
            self.self_id,
            new,
            self.callback.clone(),
            self.event_tx.clone(),
        ));
    }

    fn spawn_neighbour_attempt(&self, target: Id, priority: Priority) {
        tokio::spawn(manager::connect_and_neighbour(
            self.config.clone(),
            self.self_id,
            target,
            priority,
            self.callback.clone(),
            self.event_tx.clone(),
        ));
    }

    fn spawn_shuffle_reply(&self, target: Id, xlist: Vec<Id>) {
        tokio::spawn(manager::connect_and_shuffle_reply(self.config.clone(), self.self_id, target, xlist));
    }

    /// §4.4.3: every `shuffle_period` the node samples its own views and
    /// sends a SHUFFLE to one random active peer.
    fn do_shuffle(&mut self) {
        if self.views.active_len() == 0 {
            return;
        }
        let Some(target) = self.views.choose_random_active(&mut self.rng) else {
            return;
        };

        let mut xlist = Vec::with_capacity(1 + self.config.k_active as usize + self.config.k_passive as usize);
        xlist.push(self.self_id);
        xlist.extend(self.views.sample_active(self.config.k_active as usize, &mut self.rng));
        xlist.extend(self.views.sample_passive(self.config.k_passive as usize, &mut self.rng));

        let ttl = self.config.arwl.saturating_sub(1);
        if let Some(handle) = self.views.handle_of(target) {
            debug!(%target, count = xlist.len(), "sending shuffle");
            handle.shuffle(self.self_id, ttl, xlist.clone());
            self.last_xlist = xlist;
        }
    }

    /// Wraps `Views::add_node_active` (§4.4.5): on rejection (self id, or
    /// already active) the candidate's connection is released with
    /// `discard`, not dropped outright, so tearing it down can never
    /// surface a `LinkDown` for an id that still names a live, registered
    /// peer (P4: "inserting an identifier already in active leaves all
    /// views unchanged").
    fn register_active(&mut self, id: Id, handle: ConnectionHandle) -> bool {
        match self.views.add_node_active(id, handle, self.callback.as_ref(), &mut self.rng) {
            Ok(()) => true,
            Err(handle) => {
                let err = StateError::AlreadyActive(id);
                debug!(%err, "rejecting duplicate active insertion, discarding connection silently");
                handle.discard();
                false
            }
        }
    }

    /// §4.4.2, incoming JOIN.
    fn on_join(&mut self, sender: Id, handle: ConnectionHandle) {
        increment_counter!("hyparnet_join_received");
        if !self.register_active(sender, handle) {
            return;
        }
        let arwl = self.config.arwl;
        let others: Vec<Id> = self.views.active_ids().filter(|id| *id != sender).collect();
        for peer in others {
            if let Some(h) = self.views.handle_of(peer) {
                h.forward_join(sender, arwl);
            }
        }
    }

    /// §4.4.2, incoming JOINREPLY: the reply confirms a peer we forwarded
    /// a join for now wants us active; no further propagation.
    fn on_join_reply(&mut self, sender: Id, handle: ConnectionHandle) {
        increment_counter!("hyparnet_join_reply_received");
        self.register_active(sender, handle);
    }

    /// §4.4.2, incoming FORWARDJOIN.
    fn on_forward_join(&mut self, sender: Id, new: Id, ttl: u8) {
        increment_counter!("hyparnet_forward_join_received");
        if new == self.self_id {
            return;
        }

        let terminating = ttl == 0 || self.views.active_len() == 1;
        if terminating {
            debug!(%new, "forward-join terminates here, sending JOINREPLY");
            self.spawn_join_reply(new);
            return;
        }

        if ttl == self.config.prwl {
            self.views.add_node_passive(new, &mut self.rng);
        }

        if let Some(next) = self.views.choose_active_excluding(&mut self.rng, sender) {
            if let Some(h) = self.views.handle_of(next) {
                h.forward_join(new, ttl - 1);
            }
        }
    }

    /// §4.4.4, incoming NEIGHBOUR: a pure policy decision, answered
    /// through `reply` without touching any connection handle.
    fn on_neighbour_request(&mut self, id: Id, priority: Priority, reply: oneshot::Sender<bool>) {
        increment_counter!("hyparnet_neighbour_received");
        let accept = match priority {
            Priority::High => true,
            Priority::Low => self.views.active_len() < self.config.active_size as usize,
        };
        debug!(%id, ?priority, accept, "neighbour request decision");
        let _ = reply.send(accept);
    }

    /// The connection that was just told "accept" has become `Active`;
    /// register it (§4.4.5).
    fn on_peer_admitted(&mut self, id: Id, handle: ConnectionHandle) {
        self.register_active(id, handle);
    }

    /// §4.4.3, incoming SHUFFLE.
    fn on_shuffle(&mut self, sender: Id, requester: Id, ttl: u8, xlist: Vec<Id>) {
        increment_counter!("hyparnet_shuffle_received");
        if ttl > 0 && self.views.active_len() > 1 {
            if let Some(next) = self.views.choose_active_excluding(&mut self.rng, sender) {
                if let Some(h) = self.views.handle_of(next) {
                    h.shuffle(requester, ttl - 1, xlist);
                    return;
                }
            }
        }

        let reply_xlist = self.views.sample_passive(xlist.len(), &mut self.rng);
        self.spawn_shuffle_reply(requester, reply_xlist.clone());
        self.views.integrate(&xlist, &reply_xlist, &mut self.rng);
    }

    /// §4.4.3, incoming SHUFFLEREPLY.
    fn on_shuffle_reply(&mut self, xlist: Vec<Id>) {
        increment_counter!("hyparnet_shuffle_reply_received");
        let hint = std::mem::take(&mut self.last_xlist);
        self.views.integrate(&xlist, &hint, &mut self.rng);
    }

    /// §4.4.4: an active connection errored, or the peer disconnected.
    /// Idempotent against a peer already removed by a deliberate eviction.
    fn on_peer_gone(&mut self, id: Id) {
        if self.views.remove_active_and_notify(id, self.callback.as_ref()).is_some() {
            debug!(%id, "active peer gone, attempting replacement");
            self.try_recover();
        }
    }

    /// §4.4.4 steps 1-6: tries one passive candidate per call. Declined and
    /// already-tried candidates are never re-selected (they are drawn out
    /// of the live passive pool by `take_random_passive` and, on decline,
    /// held in `recovery_declined` rather than returned to it); the episode
    /// ends — and the declined set is restored — either here, when the
    /// pool is exhausted, or in `on_neighbour_result` on acceptance.
    fn try_recover(&mut self) {
        let Some(candidate) = self.views.take_random_passive(&mut self.rng) else {
            debug!("passive view exhausted, ending replacement attempt");
            self.restore_recovery_declined();
            return;
        };
        let priority = if self.views.active_len() == 0 { Priority::High } else { Priority::Low };
        self.spawn_neighbour_attempt(candidate, priority);
    }

    /// Returns every identifier set aside by a declined NEIGHBOUR request
    /// during the current replacement episode to the live passive view
    /// (§4.4.4 step 4: "restore non-tried identifiers to passive").
    fn restore_recovery_declined(&mut self) {
        for id in std::mem::take(&mut self.recovery_declined) {
            self.views.add_node_passive(id, &mut self.rng);
        }
    }

    /// Result of an async NEIGHBOUR attempt, from either the replacement
    /// loop or an explicit caller (§4.4.4 steps 4-6).
    fn on_neighbour_result(&mut self, id: Id, outcome: NeighbourOutcome) {
        match outcome {
            NeighbourOutcome::Accepted(handle) => {
                self.register_active(id, handle);
                self.restore_recovery_declined();
            }
            NeighbourOutcome::Declined => {
                let err = DeclineError(id);
                debug!(%err, "keeping declined candidate aside, trying another passive entry");
                self.recovery_declined.push(id);
                self.try_recover();
            }
            NeighbourOutcome::Failed => {
                self.try_recover();
            }
        }
    }

    fn on_connect_outcome(&mut self, outcome: ConnectOutcome) {
        if let ConnectOutcome::Connected(handle) = outcome {
            let remote = handle.remote();
            self.register_active(remote, handle);
        }
    }
}

async fn tick(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

// Re-exported so downstream crates can name the connection types without
// reaching into `crate::connection` directly.
pub use connection::{ConnectionHandle as PeerHandle, Priority as NeighbourPriority};
