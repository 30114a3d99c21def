// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The send pipeline: pathfind, derive a blinded path, build the onion, and
//! hand the envelope to the first hop's peer actor. Peeling of received
//! onions lives here too, as the inverse of construction.

use core::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bitcoin_hashes::hmac::{Hmac, HmacEngine};
use bitcoin_hashes::sha256::Hash as Sha256;
use bitcoin_hashes::{Hash, HashEngine};
use secp256k1::ecdh::SharedSecret;
use secp256k1::{self, PublicKey, Scalar, Secp256k1, SecretKey};

use crate::blinded_path::{blinded_hops, BlindedHop, BlindedPath, ForwardTlvs};
use crate::crypto::EntropySource;
use crate::graph::{GraphError, NodeTraverser};
use crate::logger::Logger;
use crate::packet::{
	construct_onion_keys, construct_onion_message_packet, decode_next_message_hop,
	gen_rho_from_shared_secret, next_hop_pubkey, Packet, ParsedPayload, Payload,
	FINAL_HOP_TLV_MIN_TYPE,
};
use crate::pathfind::find_path_in_context;
use crate::registry::{ActorRegistry, PeerActor};
use crate::ser::{DecodeError, VecWriter, Writeable};
use crate::types::{FinalHopTlv, OnionMessage, OnionMessagePath, Vertex};

/// The stage of onion construction at which a cryptographic or encoding
/// failure occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CryptoStage {
	/// Deriving the blinded path over the discovered hops.
	BlindedPath,
	/// Converting the blinded path into onion payloads and hop keys.
	PacketConvert,
	/// Assembling the layered onion packet.
	OnionBuild,
	/// Serializing the finished packet.
	Serialization,
}

impl fmt::Display for CryptoStage {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			CryptoStage::BlindedPath => write!(f, "blinded-path derivation"),
			CryptoStage::PacketConvert => write!(f, "packet conversion"),
			CryptoStage::OnionBuild => write!(f, "onion construction"),
			CryptoStage::Serialization => write!(f, "packet serialization"),
		}
	}
}

/// Errors that may occur when finding a path or sending an onion message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendError {
	/// The destination could not be looked up in the graph. Callers may fall
	/// back to [`send_direct`] if the destination is a connected peer.
	DestinationUnknown,
	/// The destination does not advertise onion message support.
	DestinationNoOnionSupport,
	/// No path to the destination exists within the hop cap.
	NoPathFound,
	/// [`send_to_destination`] resolved an empty path because the destination
	/// is the local node.
	PathToSelfUnsupported,
	/// [`send_direct`] was handed a path with no hops.
	EmptyPath,
	/// The hop at the contained index does not parse as a valid public key.
	InvalidHopKey(usize),
	/// A final hop record used a TLV type reserved for routing control.
	InvalidFinalHopTlv,
	/// A cryptographic primitive or encoder failed at the contained stage.
	Crypto(CryptoStage),
	/// The first hop has no registered peer actor. Callers may retry after
	/// re-establishing the connection.
	PeerActorNotFound,
	/// The graph backend failed while traversing.
	Graph(GraphError),
	/// The send context was cancelled before the message was handed off.
	Cancelled,
}

impl fmt::Display for SendError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			SendError::DestinationUnknown => write!(f, "destination not found in graph"),
			SendError::DestinationNoOnionSupport => {
				write!(f, "destination does not support onion messages")
			},
			SendError::NoPathFound => write!(f, "no path found to destination"),
			SendError::PathToSelfUnsupported => write!(f, "path to self is not supported"),
			SendError::EmptyPath => write!(f, "path must have at least one hop"),
			SendError::InvalidHopKey(i) => write!(f, "invalid public key at hop {}", i),
			SendError::InvalidFinalHopTlv => {
				write!(f, "final hop TLV types below {} are reserved", FINAL_HOP_TLV_MIN_TYPE)
			},
			SendError::Crypto(stage) => write!(f, "failure during {}", stage),
			SendError::PeerActorNotFound => write!(f, "no peer actor found for first hop"),
			SendError::Graph(e) => write!(f, "graph traversal failed: {}", e),
			SendError::Cancelled => write!(f, "send was cancelled"),
		}
	}
}

impl std::error::Error for SendError {}

/// A cancellation token threaded through a send.
///
/// Cancellation is honored at graph-adapter boundaries and immediately before
/// the actor tell; once the envelope has been handed off, cancelling has no
/// effect. Clones share the same flag.
#[derive(Clone, Debug, Default)]
pub struct SendContext {
	cancelled: Arc<AtomicBool>,
}

impl SendContext {
	/// Creates a fresh, uncancelled context.
	pub fn new() -> Self {
		Self::default()
	}

	/// Signals cancellation to every clone of this context.
	pub fn cancel(&self) {
		self.cancelled.store(true, Ordering::Release);
	}

	/// Returns whether [`Self::cancel`] has been called.
	pub fn is_cancelled(&self) -> bool {
		self.cancelled.load(Ordering::Acquire)
	}
}

/// The dependencies needed to find a path and send an onion message. All
/// referenced collaborators outlive individual sends and are shared across
/// them; the config itself carries no per-send state.
pub struct SendConfig<'a, G: ?Sized, R: ?Sized, E: ?Sized, L: ?Sized> {
	/// Read-only access to the channel graph for pathfinding.
	pub graph: &'a G,
	/// Our node's public key, used as the BFS source.
	pub our_pubkey: Vertex,
	/// Peer actor lookup for dispatching to the first hop.
	pub registry: &'a R,
	/// Inclusive upper bound on the number of hops in a discovered path.
	pub max_hops: usize,
	/// Source of session scalars and packet filler seeds.
	pub entropy_source: &'a E,
	/// Logger for pathfinding and dispatch events.
	pub logger: &'a L,
}

/// Finds a path to `destination`, constructs a blinded onion message carrying
/// `final_hop_tlvs` (and `reply_path`, if any), and hands it to the first
/// hop's peer actor.
///
/// Pathfinding errors are returned unchanged so callers can fall back to
/// [`send_direct`] when the destination is a directly connected peer that the
/// graph does not know about.
pub fn send_to_destination<G, R, E, L>(
	ctx: &SendContext, cfg: &SendConfig<G, R, E, L>, destination: Vertex,
	final_hop_tlvs: Vec<FinalHopTlv>, reply_path: Option<BlindedPath>,
) -> Result<(), SendError>
where
	G: NodeTraverser + ?Sized,
	R: ActorRegistry + ?Sized,
	E: EntropySource + ?Sized,
	L: Logger + ?Sized,
{
	let path = find_path_in_context(
		cfg.graph, &cfg.our_pubkey, &destination, cfg.max_hops, ctx, cfg.logger,
	)?;

	if path.hops.is_empty() {
		return Err(SendError::PathToSelfUnsupported);
	}

	let message =
		build_onion_message_for_path(cfg.entropy_source, &path, reply_path, final_hop_tlvs)?;

	send_to_first_hop(ctx, cfg.registry, &path.hops[0], message, cfg.logger)
}

/// Builds a blinded onion message for the given pre-built path (no
/// pathfinding, no feature checks) and sends it to the first hop's peer
/// actor.
///
/// The caller asserts that every hop supports onion messages and is
/// reachable. This is the fallback for destinations that are directly
/// connected peers absent from the graph, used with the single-hop path
/// `[destination]`.
pub fn send_direct<G, R, E, L>(
	ctx: &SendContext, cfg: &SendConfig<G, R, E, L>, path: &OnionMessagePath,
	final_hop_tlvs: Vec<FinalHopTlv>, reply_path: Option<BlindedPath>,
) -> Result<(), SendError>
where
	G: NodeTraverser + ?Sized,
	R: ActorRegistry + ?Sized,
	E: EntropySource + ?Sized,
	L: Logger + ?Sized,
{
	if path.hops.is_empty() {
		return Err(SendError::EmptyPath);
	}
	if ctx.is_cancelled() {
		return Err(SendError::Cancelled);
	}

	let message =
		build_onion_message_for_path(cfg.entropy_source, path, reply_path, final_hop_tlvs)?;

	send_to_first_hop(ctx, cfg.registry, &path.hops[0], message, cfg.logger)
}

/// Constructs the blinded onion message for a path: derives a blinded path
/// with a fresh session scalar, converts it into onion payloads, and packs
/// them with a second, independent session scalar.
///
/// The two scalars are disjoint cryptographic objects: the first derives the
/// per-hop ephemeral keys of the blinded path, the second drives the Sphinx
/// mixing header. Both are drawn fresh per call.
pub(crate) fn build_onion_message_for_path<E: EntropySource + ?Sized>(
	entropy_source: &E, path: &OnionMessagePath, reply_path: Option<BlindedPath>,
	final_hop_tlvs: Vec<FinalHopTlv>,
) -> Result<OnionMessage, SendError> {
	if path.hops.is_empty() {
		return Err(SendError::EmptyPath);
	}
	for tlv in &final_hop_tlvs {
		if tlv.tlv_type < FINAL_HOP_TLV_MIN_TYPE {
			return Err(SendError::InvalidFinalHopTlv);
		}
	}

	let secp_ctx = Secp256k1::new();

	let mut hop_pubkeys = Vec::with_capacity(path.hops.len());
	for (i, hop) in path.hops.iter().enumerate() {
		hop_pubkeys.push(hop.to_pubkey().map_err(|_| SendError::InvalidHopKey(i))?);
	}

	let blinding_secret =
		SecretKey::from_slice(&entropy_source.get_secure_random_bytes()).expect("RNG is busted");
	let blinding_point = PublicKey::from_secret_key(&secp_ctx, &blinding_secret);
	let hops = blinded_hops(&secp_ctx, &hop_pubkeys, &blinding_secret)
		.map_err(|_| SendError::Crypto(CryptoStage::BlindedPath))?;

	let onion_session_key =
		SecretKey::from_slice(&entropy_source.get_secure_random_bytes()).expect("RNG is busted");
	let blinded_ids: Vec<PublicKey> = hops.iter().map(|hop| hop.blinded_node_id).collect();
	let onion_keys = construct_onion_keys(&secp_ctx, &blinded_ids, &onion_session_key)
		.map_err(|_| SendError::Crypto(CryptoStage::PacketConvert))?;
	let payloads = message_payloads(hops, reply_path, final_hop_tlvs);

	let prng_seed = entropy_source.get_secure_random_bytes();
	let packet = construct_onion_message_packet(payloads, onion_keys, prng_seed)
		.map_err(|()| SendError::Crypto(CryptoStage::OnionBuild))?;

	let mut blob = VecWriter(Vec::new());
	packet.write(&mut blob).map_err(|_| SendError::Crypto(CryptoStage::Serialization))?;

	Ok(OnionMessage { path_key: blinding_point, onion_blob: blob.0 })
}

/// Maps each blinded hop to its onion payload. The final hop additionally
/// carries the reply path and application records; attaching them anywhere
/// else is unrepresentable.
fn message_payloads(
	mut hops: Vec<BlindedHop>, reply_path: Option<BlindedPath>, final_hop_tlvs: Vec<FinalHopTlv>,
) -> Vec<Payload> {
	let final_hop = hops.pop().expect("the path was checked to be non-empty");
	let mut payloads: Vec<Payload> = hops
		.into_iter()
		.map(|hop| Payload::Forward { encrypted_route_data: hop.encrypted_payload })
		.collect();
	payloads.push(Payload::Receive {
		encrypted_route_data: final_hop.encrypted_payload,
		reply_path,
		final_hop_tlvs,
	});
	payloads
}

/// Looks up the peer actor for the first hop and hands it the envelope.
fn send_to_first_hop<R, L>(
	ctx: &SendContext, registry: &R, first_hop: &Vertex, message: OnionMessage, logger: &L,
) -> Result<(), SendError>
where
	R: ActorRegistry + ?Sized,
	L: Logger + ?Sized,
{
	let actor = match registry.find_peer_actor(first_hop) {
		Some(actor) => actor,
		None => {
			log_debug!(logger, "No peer actor registered for first hop {}", first_hop);
			return Err(SendError::PeerActorNotFound);
		},
	};

	// Last cancellation point: after the tell the message is in flight and
	// cancelling has no effect.
	if ctx.is_cancelled() {
		return Err(SendError::Cancelled);
	}
	actor.tell(message);
	log_trace!(logger, "Dispatched onion message via first hop {}", first_hop);
	Ok(())
}

/// A processed incoming onion message: either the next layer to forward or
/// the decrypted contents for the local node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeeledOnion {
	/// The message is for someone else; forward the new envelope to the named
	/// node.
	Forward {
		/// The node to forward to.
		next_node_id: PublicKey,
		/// The re-wrapped envelope for that node.
		onion_message: OnionMessage,
	},
	/// The message terminates here.
	Receive {
		/// The path id embedded when this node handed out the blinded path,
		/// if the sender used one of ours.
		path_id: Option<[u8; 32]>,
		/// A reply path supplied by the sender, if any.
		reply_path: Option<BlindedPath>,
		/// The application records, delivered verbatim.
		final_hop_tlvs: Vec<FinalHopTlv>,
	},
}

/// Decodes one layer of an incoming [`OnionMessage`] with the local node's
/// secret key.
///
/// Returns either the next layer for forwarding or the decrypted content for
/// the receiver. Any parse, HMAC, or key failure yields an error; an onion
/// that fails here must be dropped, never forwarded.
pub fn peel_onion_message<T: secp256k1::Signing + secp256k1::Verification>(
	secp_ctx: &Secp256k1<T>, msg: &OnionMessage, node_secret: &SecretKey,
) -> Result<PeeledOnion, DecodeError> {
	let packet = Packet::decode(&msg.onion_blob)?;

	let control_tlvs_ss = SharedSecret::new(&msg.path_key, node_secret);
	let control_tlvs_rho = gen_rho_from_shared_secret(&control_tlvs_ss.secret_bytes());

	// The onion layer was built over our blinded node id, so the packet
	// secret is derived with our key tweaked by the blinding factor.
	let onion_decode_ss = {
		let blinding_factor = {
			let mut hmac = HmacEngine::<Sha256>::new(b"blinded_node_id");
			hmac.input(&control_tlvs_ss.secret_bytes());
			Hmac::from_engine(hmac).to_byte_array()
		};
		let tweaked_secret = node_secret
			.mul_tweak(&Scalar::from_be_bytes(blinding_factor).unwrap())
			.map_err(|_| DecodeError::InvalidValue)?;
		SharedSecret::new(&packet.public_key, &tweaked_secret)
	};

	match decode_next_message_hop(
		onion_decode_ss.secret_bytes(),
		control_tlvs_rho,
		&packet.hop_data,
		packet.hmac,
	)? {
		(ParsedPayload::Receive { tlvs, reply_path, final_hop_tlvs }, None) => {
			Ok(PeeledOnion::Receive { path_id: tlvs.path_id, reply_path, final_hop_tlvs })
		},
		(
			ParsedPayload::Forward(ForwardTlvs { next_node_id, next_blinding_override }),
			Some((next_hop_hmac, new_packet_bytes)),
		) => {
			let new_pubkey =
				next_hop_pubkey(secp_ctx, packet.public_key, &onion_decode_ss.secret_bytes())
					.map_err(|_| DecodeError::InvalidValue)?;
			let next_path_key = match next_blinding_override {
				Some(blinding_point) => blinding_point,
				None => {
					next_hop_pubkey(secp_ctx, msg.path_key, &control_tlvs_ss.secret_bytes())
						.map_err(|_| DecodeError::InvalidValue)?
				},
			};
			let outgoing_packet = Packet {
				version: 0,
				public_key: new_pubkey,
				hop_data: new_packet_bytes,
				hmac: next_hop_hmac,
			};
			Ok(PeeledOnion::Forward {
				next_node_id,
				onion_message: OnionMessage {
					path_key: next_path_key,
					onion_blob: outgoing_packet.encode(),
				},
			})
		},
		_ => Err(DecodeError::InvalidValue),
	}
}
