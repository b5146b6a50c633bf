//! HyParView membership and gossip-broadcast overlay.
//!
//! A node maintains a small, bounded active view of directly connected
//! peers and a larger, bounded passive view of candidate peers known by
//! hearsay, per Leitão, Pereira & Rodrigues, "HyParView: a membership
//! protocol for reliable gossip-based broadcast" (DSN 2007). This crate
//! implements the membership node, the wire codec, and the connection
//! layer that transports control messages and application payloads
//! between peers over plain TCP. [`flood`] ships a minimal reference
//! broadcast application for exercising the node end-to-end.

pub mod callback;
pub mod config;
pub mod connection;
pub mod error;
pub mod flood;
pub mod id;
pub mod node;
pub mod wire;

pub use callback::Callback;
pub use config::Config;
pub use connection::ConnectionHandle;
pub use error::Error;
pub use id::Id;
pub use node::{start, start_with_rng, NodeHandle};
