// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Onion message routing and construction for Lightning-style peer-to-peer
//! networks.
//!
//! An onion message wraps an application payload in nested layers of
//! public-key encryption, one per hop, so that each forwarding node learns
//! only the next hop's identity. This crate provides the sending half of that
//! machinery:
//!
//! * [`pathfind::find_path`] discovers a shortest path through the channel
//!   graph, restricted to nodes advertising the onion message feature bit.
//! * [`messenger::send_to_destination`] combines pathfinding, blinded-path
//!   derivation, Sphinx packet construction, and dispatch to the first hop's
//!   peer actor.
//! * [`messenger::send_direct`] skips pathfinding for callers that already
//!   know a working path, e.g. a directly connected peer that is absent from
//!   the graph.
//! * [`messenger::peel_onion_message`] decodes one layer of an incoming
//!   message, for embedders implementing the forwarding/receive side.
//!
//! The channel graph and the peer actor runtime are external: the crate
//! consumes them through the [`graph::NodeTraverser`] and
//! [`registry::ActorRegistry`] traits and holds no persistent state of its
//! own.

#[macro_use]
pub mod logger;
pub mod ser;
pub mod types;
pub mod features;
pub mod graph;
pub mod crypto;
pub mod blinded_path;
pub(crate) mod packet;
pub mod pathfind;
pub mod registry;
pub mod messenger;

#[cfg(test)]
mod test_utils;

pub use crate::messenger::{
	peel_onion_message, send_direct, send_to_destination, CryptoStage, PeeledOnion, SendConfig,
	SendContext, SendError,
};
pub use crate::pathfind::find_path;
pub use crate::types::{FinalHopTlv, OnionMessage, OnionMessagePath, Vertex};
