// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Core identity and wire types shared across the crate.

use core::fmt;
use std::io::{self, Read};

use secp256k1::constants::PUBLIC_KEY_SIZE;
use secp256k1::PublicKey;

use crate::ser::{DecodeError, Readable, Writeable, Writer};

/// The 33-byte compressed public key identifying a node in the channel graph.
///
/// This is the canonical identity used for graph lookups, peer lookups, and
/// onion hop keys. Equality and hashing are byte-wise, so vertices can be
/// compared without parsing the underlying key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Vertex([u8; PUBLIC_KEY_SIZE]);

impl Vertex {
	/// Builds a `Vertex` from the compressed serialization of a public key.
	pub fn from_pubkey(pubkey: &PublicKey) -> Self {
		Vertex(pubkey.serialize())
	}

	/// Builds a `Vertex` from raw bytes. No validation is performed; parsing
	/// is deferred to [`Self::to_pubkey`].
	pub fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
		Vertex(bytes)
	}

	/// Returns the vertex bytes as a slice.
	pub fn as_slice(&self) -> &[u8] {
		&self.0
	}

	/// Returns the vertex bytes as a fixed-size array reference.
	pub fn as_array(&self) -> &[u8; PUBLIC_KEY_SIZE] {
		&self.0
	}

	/// Parses the vertex into a [`PublicKey`], failing if the bytes are not a
	/// valid compressed point.
	pub fn to_pubkey(&self) -> Result<PublicKey, secp256k1::Error> {
		PublicKey::from_slice(&self.0)
	}
}

impl From<PublicKey> for Vertex {
	fn from(pubkey: PublicKey) -> Self {
		Vertex::from_pubkey(&pubkey)
	}
}

impl fmt::Display for Vertex {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		for b in self.0.iter() {
			write!(f, "{:02x}", b)?;
		}
		Ok(())
	}
}

impl fmt::Debug for Vertex {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "Vertex({})", self)
	}
}

/// A route for an onion message, ordered from the first-hop peer to the
/// destination. The sending node itself is never included.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OnionMessagePath {
	/// The hops of the path. The last entry is the destination.
	pub hops: Vec<Vertex>,
}

impl OnionMessagePath {
	/// Returns the first hop of the path, if the path is non-empty.
	pub fn first_hop(&self) -> Option<&Vertex> {
		self.hops.first()
	}
}

/// A typed application record destined for the final hop of an onion message.
///
/// Types below 64 are reserved for routing control records and are rejected
/// at build time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinalHopTlv {
	/// The TLV type of the record.
	pub tlv_type: u64,
	/// The raw record value, delivered verbatim to the recipient.
	pub value: Vec<u8>,
}

/// The wire envelope for an onion message: the blinding public key for the
/// first hop plus the serialized onion packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OnionMessage {
	/// The public component of the blinding session scalar, used by the first
	/// hop to decrypt its route data.
	pub path_key: PublicKey,
	/// The serialized onion packet.
	pub onion_blob: Vec<u8>,
}

impl Writeable for OnionMessage {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		self.path_key.write(w)?;
		self.onion_blob.write(w)?;
		Ok(())
	}
}

impl Readable for OnionMessage {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		let path_key = Readable::read(r)?;
		let onion_blob = Readable::read(r)?;
		Ok(OnionMessage { path_key, onion_blob })
	}
}
