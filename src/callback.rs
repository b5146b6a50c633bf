//! Application callback interface (§6).
//!
//! Implemented by the consumer of this crate and invoked by the node and
//! connection layer. Passed in at node construction time as a capability,
//! never reached through process-wide state.

use bytes::Bytes;

use crate::id::Id;

/// Events the node and connection FSM surface to the embedding application.
pub trait Callback: Send + Sync + 'static {
    /// A new active peer is available.
    fn link_up(&self, peer: Id);

    /// An active peer has gone away.
    fn link_down(&self, peer: Id);

    /// An application MESSAGE frame arrived from `sender`.
    fn deliver(&self, sender: Id, payload: Bytes);
}

/// A callback that does nothing; useful for tests that only exercise view
/// management and don't care about application delivery.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCallback;

impl Callback for NullCallback {
    fn link_up(&self, _peer: Id) {}
    fn link_down(&self, _peer: Id) {}
    fn deliver(&self, _sender: Id, _payload: Bytes) {}
}
