// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Blinded paths replace intermediate node identities with per-hop ephemeral
//! keys derived from a shared blinding scalar, so forwarders cannot recognize
//! the true identities. Creating them and the per-hop route data they carry
//! lives here.

use std::io::{self, Cursor, Read};

use bitcoin_hashes::hmac::{Hmac, HmacEngine};
use bitcoin_hashes::sha256::Hash as Sha256;
use bitcoin_hashes::{Hash, HashEngine};
use secp256k1::ecdh::SharedSecret;
use secp256k1::{self, PublicKey, Scalar, Secp256k1, SecretKey};

use crate::crypto::chachapoly_encrypt;
use crate::packet::gen_rho_from_shared_secret;
use crate::ser::{
	encode_tlv_record, read_tlv_stream, DecodeError, FixedLengthReader, Readable, Writeable, Writer,
};

/// A route whose hop identities have been blinded. The sender includes one of
/// these in a message's final hop as a reply path, and every outbound onion
/// is built over a freshly derived one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlindedPath {
	/// To send to a blinded path, the sender first reaches the unblinded
	/// `introduction_node_id`, which can unblind its [`encrypted_payload`] to
	/// find out the message's next hop and forward it along.
	///
	/// [`encrypted_payload`]: BlindedHop::encrypted_payload
	pub introduction_node_id: PublicKey,
	/// Used by the introduction node to decrypt its [`encrypted_payload`].
	///
	/// [`encrypted_payload`]: BlindedHop::encrypted_payload
	pub blinding_point: PublicKey,
	/// The hops composing the blinded path.
	pub blinded_hops: Vec<BlindedHop>,
}

/// One hop of a [`BlindedPath`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlindedHop {
	/// The blinded node id of this hop in a blinded path.
	pub blinded_node_id: PublicKey,
	/// The encrypted route data intended for this hop.
	pub encrypted_payload: Vec<u8>,
}

impl BlindedPath {
	/// Creates a blinded path to be forwarded along `node_pks`, using a fresh
	/// `blinding_secret`. The last key in `node_pks` is the destination.
	///
	/// Errors if no hops are provided or a hop key is invalid.
	pub fn new_for_message<T: secp256k1::Signing + secp256k1::Verification>(
		secp_ctx: &Secp256k1<T>, node_pks: &[PublicKey], blinding_secret: &SecretKey,
	) -> Result<Self, secp256k1::Error> {
		if node_pks.is_empty() {
			return Err(secp256k1::Error::InvalidPublicKey);
		}
		Ok(BlindedPath {
			introduction_node_id: node_pks[0],
			blinding_point: PublicKey::from_secret_key(secp_ctx, blinding_secret),
			blinded_hops: blinded_hops(secp_ctx, node_pks, blinding_secret)?,
		})
	}
}

impl Writeable for BlindedPath {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		self.introduction_node_id.write(w)?;
		self.blinding_point.write(w)?;
		(self.blinded_hops.len() as u8).write(w)?;
		for hop in &self.blinded_hops {
			hop.blinded_node_id.write(w)?;
			hop.encrypted_payload.write(w)?;
		}
		Ok(())
	}
}

impl Readable for BlindedPath {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		let introduction_node_id = Readable::read(r)?;
		let blinding_point = Readable::read(r)?;
		let num_hops: u8 = Readable::read(r)?;
		if num_hops == 0 {
			return Err(DecodeError::InvalidValue);
		}
		let mut blinded_hops: Vec<BlindedHop> = Vec::with_capacity(num_hops.into());
		for _ in 0..num_hops {
			let blinded_node_id = Readable::read(r)?;
			let encrypted_payload = Readable::read(r)?;
			blinded_hops.push(BlindedHop { blinded_node_id, encrypted_payload });
		}
		Ok(BlindedPath { introduction_node_id, blinding_point, blinded_hops })
	}
}

/// Route data for an intermediate hop, carried encrypted inside
/// [`BlindedHop::encrypted_payload`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForwardTlvs {
	/// The node id of the next hop in the message's path.
	pub next_node_id: PublicKey,
	/// Senders concatenating a route onto an existing blinded path use this
	/// to hand the next hop a replacement blinding point. Never set for
	/// locally constructed paths.
	pub next_blinding_override: Option<PublicKey>,
}

/// Route data for the final hop. Carries nothing but an optional path id the
/// recipient may use to recognize its own reply paths.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceiveTlvs {
	/// An identifier the recipient embedded when handing out the blinded
	/// path, opaque to everyone else.
	pub path_id: Option<[u8; 32]>,
}

/// Route data in either of its two shapes. A hop cannot know which shape it
/// will decrypt until it has done so.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlTlvs {
	/// This hop is expected to forward the message.
	Forward(ForwardTlvs),
	/// This hop is the final recipient.
	Receive(ReceiveTlvs),
}

impl Writeable for ControlTlvs {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		match self {
			ControlTlvs::Forward(ForwardTlvs { next_node_id, next_blinding_override }) => {
				encode_tlv_record(w, NEXT_NODE_ID_TYPE, next_node_id)?;
				if let Some(pk) = next_blinding_override {
					encode_tlv_record(w, NEXT_BLINDING_OVERRIDE_TYPE, pk)?;
				}
			},
			ControlTlvs::Receive(ReceiveTlvs { path_id }) => {
				if let Some(id) = path_id {
					encode_tlv_record(w, PATH_ID_TYPE, id)?;
				}
			},
		}
		Ok(())
	}
}

const PADDING_TYPE: u64 = 1;
const NEXT_NODE_ID_TYPE: u64 = 4;
const PATH_ID_TYPE: u64 = 6;
const NEXT_BLINDING_OVERRIDE_TYPE: u64 = 8;

impl ControlTlvs {
	/// Parses decrypted route data. The shape is decided by which records are
	/// present: a forward payload names the next node, a receive payload does
	/// not.
	pub(crate) fn parse(plaintext: &[u8]) -> Result<Self, DecodeError> {
		let mut cursor = Cursor::new(plaintext);
		let mut reader = FixedLengthReader::new(&mut cursor, plaintext.len() as u64);
		let records = read_tlv_stream(&mut reader)?;

		let mut next_node_id: Option<PublicKey> = None;
		let mut path_id: Option<[u8; 32]> = None;
		let mut next_blinding_override: Option<PublicKey> = None;
		for record in records {
			match record.typ {
				PADDING_TYPE => {},
				NEXT_NODE_ID_TYPE => {
					next_node_id = Some(Readable::read(&mut Cursor::new(&record.value))?);
				},
				PATH_ID_TYPE => {
					path_id = Some(Readable::read(&mut Cursor::new(&record.value))?);
				},
				NEXT_BLINDING_OVERRIDE_TYPE => {
					next_blinding_override = Some(Readable::read(&mut Cursor::new(&record.value))?);
				},
				typ if typ % 2 == 0 => return Err(DecodeError::UnknownRequiredFeature),
				_ => {},
			}
		}

		let valid_fwd_fmt = next_node_id.is_some() && path_id.is_none();
		let valid_recv_fmt = next_node_id.is_none() && next_blinding_override.is_none();

		if valid_fwd_fmt {
			Ok(ControlTlvs::Forward(ForwardTlvs {
				next_node_id: next_node_id.unwrap(),
				next_blinding_override,
			}))
		} else if valid_recv_fmt {
			Ok(ControlTlvs::Receive(ReceiveTlvs { path_id }))
		} else {
			Err(DecodeError::InvalidValue)
		}
	}
}

/// Constructs blinded onion message hops for the given `unblinded_path`.
///
/// Every hop's route data names the following node; the final hop gets an
/// empty receive record. Each is sealed under a key only that hop can derive
/// from the blinding point.
pub(crate) fn blinded_hops<T: secp256k1::Signing + secp256k1::Verification>(
	secp_ctx: &Secp256k1<T>, unblinded_path: &[PublicKey], session_priv: &SecretKey,
) -> Result<Vec<BlindedHop>, secp256k1::Error> {
	let mut blinded_hops = Vec::with_capacity(unblinded_path.len());

	let mut blinding_priv = *session_priv;
	let mut blinding_pub = PublicKey::from_secret_key(secp_ctx, &blinding_priv);

	for (i, pk) in unblinded_path.iter().enumerate() {
		let encrypted_data_ss = SharedSecret::new(pk, &blinding_priv);

		let hop_pk_blinding_factor = {
			let mut hmac = HmacEngine::<Sha256>::new(b"blinded_node_id");
			hmac.input(&encrypted_data_ss.secret_bytes());
			Hmac::from_engine(hmac).to_byte_array()
		};
		let blinded_node_id =
			pk.mul_tweak(secp_ctx, &Scalar::from_be_bytes(hop_pk_blinding_factor).unwrap())?;

		let control_tlvs = if i == unblinded_path.len() - 1 {
			ControlTlvs::Receive(ReceiveTlvs { path_id: None })
		} else {
			ControlTlvs::Forward(ForwardTlvs {
				next_node_id: unblinded_path[i + 1],
				next_blinding_override: None,
			})
		};
		let rho = gen_rho_from_shared_secret(&encrypted_data_ss.secret_bytes());
		blinded_hops.push(BlindedHop {
			blinded_node_id,
			encrypted_payload: chachapoly_encrypt(rho, &control_tlvs.encode()),
		});

		let blinding_factor = {
			let mut sha = Sha256::engine();
			sha.input(&blinding_pub.serialize());
			sha.input(&encrypted_data_ss.secret_bytes());
			Sha256::from_engine(sha).to_byte_array()
		};
		blinding_priv = blinding_priv.mul_tweak(&Scalar::from_be_bytes(blinding_factor).unwrap())?;
		blinding_pub = PublicKey::from_secret_key(secp_ctx, &blinding_priv);
	}

	Ok(blinded_hops)
}
