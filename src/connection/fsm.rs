//! Per-socket state machine (§4.2).
//!
//! `handle_incoming` runs the `WaitForAccept` / `WaitIncoming` half: it
//! reads exactly one leading frame off a freshly accepted socket and
//! decides what the connection becomes. `run_active` runs the `Active`
//! half for both incoming and outgoing connections once a remote identity
//! is known; it is spawned as its own task so the task that performed the
//! handshake can return immediately; socket ownership moves with it.
//! `Temporary`/`Closed` are not distinct types here — they are simply the
//! points where a task returns without ever calling [`enter_active`].

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::callback::Callback;
use crate::config::Config;
use crate::connection::{ConnectionHandle, NodeEvent, Priority, ToConnection};
use crate::id::Id;
use crate::wire::{Codec, Frame};

type Socket = Framed<TcpStream, Codec>;

/// Spawns the `Active` read/write loop and returns a handle to it
/// immediately. The caller gives up ownership of `framed`.
pub(crate) fn enter_active(
    remote: Id,
    framed: Socket,
    callback: Arc<dyn Callback>,
    events: mpsc::UnboundedSender<NodeEvent>,
    send_timeout: Duration,
) -> ConnectionHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run_active(remote, framed, callback, events, rx, send_timeout));
    ConnectionHandle::new(remote, tx)
}

/// Accepts one freshly-opened incoming socket and negotiates its role
/// (§4.2, incoming side). Runs to completion inside its own task; never
/// blocks the listener loop or the node.
pub(crate) async fn handle_incoming(
    stream: TcpStream,
    callback: Arc<dyn Callback>,
    events: mpsc::UnboundedSender<NodeEvent>,
    config: Config,
) {
    if let Err(err) = stream.set_nodelay(true) {
        debug!(%err, "failed to set TCP_NODELAY on incoming socket");
    }
    let mut framed = Framed::new(stream, Codec);

    let frame = match tokio::time::timeout(config.timeout, framed.next()).await {
        Ok(Some(Ok(frame))) => frame,
        Ok(Some(Err(err))) => {
            debug!(%err, "incoming connection: frame decode error, closing");
            return;
        }
        Ok(None) => return,
        Err(_) => {
            debug!("incoming connection: handshake timed out, closing");
            return;
        }
    };

    match frame {
        Frame::Join(id) => {
            debug!(%id, "incoming JOIN");
            let handle = enter_active(id, framed, callback, events.clone(), config.send_timeout);
            let _ = events.send(NodeEvent::Join { id, handle });
        }
        Frame::JoinReply(id) => {
            debug!(%id, "incoming JOINREPLY");
            let handle = enter_active(id, framed, callback, events.clone(), config.send_timeout);
            let _ = events.send(NodeEvent::JoinReply { id, handle });
        }
        Frame::HNeighbour(id) => {
            incoming_neighbour(id, Priority::High, framed, callback, events, config).await;
        }
        Frame::LNeighbour(id) => {
            incoming_neighbour(id, Priority::Low, framed, callback, events, config).await;
        }
        Frame::ShuffleReply { xlist } => {
            debug!(count = xlist.len(), "incoming SHUFFLEREPLY");
            let _ = events.send(NodeEvent::ShuffleReply { xlist });
        }
        other => {
            warn!(?other, "unexpected leading frame on incoming connection, closing");
        }
    }
}

async fn incoming_neighbour(
    id: Id,
    priority: Priority,
    mut framed: Socket,
    callback: Arc<dyn Callback>,
    events: mpsc::UnboundedSender<NodeEvent>,
    config: Config,
) {
    debug!(%id, ?priority, "incoming NEIGHBOUR");
    let (reply_tx, reply_rx) = oneshot::channel();
    if events.send(NodeEvent::Neighbour { id, priority, reply: reply_tx }).is_err() {
        return;
    }
    let accept = reply_rx.await.unwrap_or(false);
    if accept {
        if framed.send(Frame::Accept).await.is_err() {
            return;
        }
        let handle = enter_active(id, framed, callback, events.clone(), config.send_timeout);
        let _ = events.send(NodeEvent::NeighbourAdmitted { id, handle });
    } else {
        let _ = framed.send(Frame::Decline).await;
    }
}

async fn send_frame(framed: &mut Socket, frame: Frame, timeout: Duration) -> bool {
    matches!(tokio::time::timeout(timeout, framed.send(frame)).await, Ok(Ok(())))
}

/// The `Active` read/write loop (§4.2). Runs until the remote closes,
/// DISCONNECTs, errors, or this side is told to disconnect.
async fn run_active(
    remote: Id,
    mut framed: Socket,
    callback: Arc<dyn Callback>,
    events: mpsc::UnboundedSender<NodeEvent>,
    mut rx: mpsc::UnboundedReceiver<ToConnection>,
    send_timeout: Duration,
) {
    loop {
        tokio::select! {
            frame = framed.next() => {
                match frame {
                    Some(Ok(Frame::Message(payload))) => callback.deliver(remote, payload),
                    Some(Ok(Frame::ForwardJoin { new, ttl })) => {
                        let _ = events.send(NodeEvent::ForwardJoin { sender: remote, new, ttl });
                    }
                    Some(Ok(Frame::Shuffle { requester, ttl, xlist })) => {
                        let _ = events.send(NodeEvent::Shuffle { sender: remote, requester, ttl, xlist });
                    }
                    Some(Ok(Frame::Disconnect)) => {
                        debug!(%remote, "peer sent DISCONNECT");
                        let _ = events.send(NodeEvent::LinkDown(remote));
                        break;
                    }
                    Some(Ok(other)) => {
                        warn!(%remote, ?other, "unexpected frame on active connection, ignoring");
                    }
                    Some(Err(err)) => {
                        debug!(%remote, %err, "frame decode error on active connection");
                        let _ = events.send(NodeEvent::ConnectionError(remote));
                        break;
                    }
                    None => {
                        debug!(%remote, "active connection closed by peer");
                        let _ = events.send(NodeEvent::ConnectionError(remote));
                        break;
                    }
                }
            }
            cmd = rx.recv() => {
                match cmd {
                    Some(ToConnection::Send(payload)) => {
                        if !send_frame(&mut framed, Frame::Message(payload), send_timeout).await {
                            let _ = events.send(NodeEvent::ConnectionError(remote));
                            break;
                        }
                    }
                    Some(ToConnection::ForwardJoin { new, ttl }) => {
                        if !send_frame(&mut framed, Frame::ForwardJoin { new, ttl }, send_timeout).await {
                            let _ = events.send(NodeEvent::ConnectionError(remote));
                            break;
                        }
                    }
                    Some(ToConnection::Shuffle { requester, ttl, xlist }) => {
                        if !send_frame(&mut framed, Frame::Shuffle { requester, ttl, xlist }, send_timeout).await {
                            let _ = events.send(NodeEvent::ConnectionError(remote));
                            break;
                        }
                    }
                    Some(ToConnection::Disconnect) | None => {
                        let _ = framed.send(Frame::Disconnect).await;
                        let _ = events.send(NodeEvent::LinkDown(remote));
                        break;
                    }
                    Some(ToConnection::Discard) => {
                        debug!(%remote, "discarding rejected connection silently");
                        break;
                    }
                }
            }
        }
    }
}
