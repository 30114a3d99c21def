// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The peer actor registry consumed for dispatch. The actor runtime itself
//! (transports, mailboxes, reconnection) lives outside this crate; sending
//! only needs to resolve a first hop to a handle and hand the envelope over.

use crate::types::{OnionMessage, Vertex};

/// A handle to a connected peer's actor, typed for onion message requests.
pub trait PeerActor {
	/// Hands the envelope to the peer's mailbox without awaiting delivery.
	///
	/// This is fire-and-forget: implementations must not block the caller on
	/// transport progress, and transport failures after the handoff are the
	/// peer subsystem's concern.
	fn tell(&self, msg: OnionMessage);
}

/// Lookup of peer actors by node identity.
pub trait ActorRegistry {
	/// The handle type returned by lookups.
	type Actor: PeerActor;

	/// Returns the actor registered for the given node's serialized public
	/// key, or `None` if the node has no running peer actor (e.g. it is not
	/// currently connected).
	fn find_peer_actor(&self, node_id: &Vertex) -> Option<Self::Actor>;
}
