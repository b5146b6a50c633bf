//! Outgoing connection handshakes (§4.3).
//!
//! Each function here is spawned as its own task by the node (the "offload
//! to helper tasks" option in §5) and reports its outcome back over the
//! node's event channel rather than returning a value the node would have
//! to await; this keeps the node's serialization domain from stalling on
//! a TCP round-trip while handling unrelated events.

use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::warn;

use crate::callback::Callback;
use crate::config::Config;
use crate::connection::fsm;
use crate::connection::{ConnectOutcome, NeighbourOutcome, NodeEvent, Priority};
use crate::error::{ProtocolError, TransportError};
use crate::id::Id;
use crate::wire::{Codec, Frame};

type Socket = Framed<TcpStream, Codec>;

async fn connect_socket(config: &Config, self_id: Id, target: Id) -> Result<TcpStream, TransportError> {
    let local = SocketAddr::V4(SocketAddrV4::new(self_id.ip, 0));
    let socket = TcpSocket::new_v4()?;
    socket.bind(local)?;

    let remote = SocketAddr::V4(SocketAddrV4::from(target));
    let stream = tokio::time::timeout(config.timeout, socket.connect(remote))
        .await
        .map_err(|_| TransportError::ConnectTimeout(target))??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

async fn send_frame(framed: &mut Socket, frame: Frame, timeout: Duration) -> bool {
    matches!(tokio::time::timeout(timeout, framed.send(frame)).await, Ok(Ok(())))
}

async fn connect_and_send(config: &Config, self_id: Id, target: Id, frame: Frame) -> Result<Socket, TransportError> {
    let stream = connect_socket(config, self_id, target).await?;
    let mut framed = Framed::new(stream, Codec);
    if !send_frame(&mut framed, frame, config.send_timeout).await {
        return Err(TransportError::WriteTimeout(target));
    }
    Ok(framed)
}

/// `join_cluster(contact)` (§4.4.2): connect, send JOIN, hand the result
/// back as a [`NodeEvent::JoinOutcome`].
pub(crate) async fn connect_and_join(
    config: Config,
    self_id: Id,
    contact: Id,
    callback: Arc<dyn Callback>,
    events: mpsc::UnboundedSender<NodeEvent>,
) {
    let outcome = match connect_and_send(&config, self_id, contact, Frame::Join(self_id)).await {
        Ok(framed) => {
            let handle = fsm::enter_active(contact, framed, callback, events.clone(), config.send_timeout);
            ConnectOutcome::Connected(handle)
        }
        Err(err) => {
            warn!(%contact, %err, "outgoing JOIN failed");
            ConnectOutcome::Failed
        }
    };
    let _ = events.send(NodeEvent::JoinOutcome(outcome));
}

/// Terminating forward-join case (§4.4.2): connect to `new`, send
/// JOINREPLY, hand the result back as a [`NodeEvent::JoinReplyOutcome`].
pub(crate) async fn connect_and_join_reply(
    config: Config,
    self_id: Id,
    new: Id,
    callback: Arc<dyn Callback>,
    events: mpsc::UnboundedSender<NodeEvent>,
) {
    let outcome = match connect_and_send(&config, self_id, new, Frame::JoinReply(self_id)).await {
        Ok(framed) => {
            let handle = fsm::enter_active(new, framed, callback, events.clone(), config.send_timeout);
            ConnectOutcome::Connected(handle)
        }
        Err(err) => {
            warn!(%new, %err, "outgoing JOINREPLY failed");
            ConnectOutcome::Failed
        }
    };
    let _ = events.send(NodeEvent::JoinReplyOutcome { new, outcome });
}

/// A NEIGHBOUR request, used both by the failure-recovery replacement loop
/// and by any other caller that wants to promote a passive identifier
/// (§4.4.4). Reports back as a [`NodeEvent::NeighbourResult`].
pub(crate) async fn connect_and_neighbour(
    config: Config,
    self_id: Id,
    target: Id,
    priority: Priority,
    callback: Arc<dyn Callback>,
    events: mpsc::UnboundedSender<NodeEvent>,
) {
    let outcome = connect_and_neighbour_inner(&config, self_id, target, priority, callback, events.clone()).await;
    let _ = events.send(NodeEvent::NeighbourResult { id: target, outcome });
}

async fn connect_and_neighbour_inner(
    config: &Config,
    self_id: Id,
    target: Id,
    priority: Priority,
    callback: Arc<dyn Callback>,
    events: mpsc::UnboundedSender<NodeEvent>,
) -> NeighbourOutcome {
    let stream = match connect_socket(config, self_id, target).await {
        Ok(stream) => stream,
        Err(err) => {
            warn!(%target, %err, "outgoing NEIGHBOUR connect failed");
            return NeighbourOutcome::Failed;
        }
    };
    let mut framed = Framed::new(stream, Codec);
    let request = match priority {
        Priority::High => Frame::HNeighbour(self_id),
        Priority::Low => Frame::LNeighbour(self_id),
    };
    if !send_frame(&mut framed, request, config.send_timeout).await {
        warn!(%target, "outgoing NEIGHBOUR send failed");
        return NeighbourOutcome::Failed;
    }

    match tokio::time::timeout(config.timeout, framed.next()).await {
        Ok(Some(Ok(Frame::Accept))) => {
            let handle = fsm::enter_active(target, framed, callback, events, config.send_timeout);
            NeighbourOutcome::Accepted(handle)
        }
        Ok(Some(Ok(Frame::Decline))) => NeighbourOutcome::Declined,
        Ok(Some(Ok(other))) => {
            let err = ProtocolError::UnexpectedReply(other.tag());
            warn!(%target, %err, "unexpected reply to NEIGHBOUR");
            NeighbourOutcome::Failed
        }
        Ok(Some(Err(err))) => {
            warn!(%target, %err, "NEIGHBOUR reply decode error");
            NeighbourOutcome::Failed
        }
        Ok(None) => {
            warn!(%target, "connection closed waiting for NEIGHBOUR reply");
            NeighbourOutcome::Failed
        }
        Err(_) => {
            let err = TransportError::ReadTimeout(target);
            warn!(%target, %err, "NEIGHBOUR reply timed out");
            NeighbourOutcome::Failed
        }
    }
}

/// Shuffle reply (§4.3 point 4): one-shot outgoing connection, closed
/// immediately after the frame is sent. No event is reported; the
/// triggering node already integrated its own xlist synchronously.
pub(crate) async fn connect_and_shuffle_reply(config: Config, self_id: Id, target: Id, xlist: Vec<Id>) {
    let stream = match connect_socket(&config, self_id, target).await {
        Ok(stream) => stream,
        Err(err) => {
            warn!(%target, %err, "outgoing SHUFFLEREPLY connect failed");
            return;
        }
    };
    let mut framed = Framed::new(stream, Codec);
    if !send_frame(&mut framed, Frame::ShuffleReply { xlist }, config.send_timeout).await {
        warn!(%target, "outgoing SHUFFLEREPLY send failed");
    }
}
