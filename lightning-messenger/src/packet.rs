// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Construction and decoding of the onion message packet itself: per-hop
//! payload encoding, Sphinx key derivation, deterministic filler, and the
//! layer-peeling used by forwarders and recipients.

use std::io::{self, Cursor, Read};

use bitcoin_hashes::cmp::fixed_time_eq;
use bitcoin_hashes::hmac::{Hmac, HmacEngine};
use bitcoin_hashes::sha256::Hash as Sha256;
use bitcoin_hashes::{Hash, HashEngine};
use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use chacha20::{ChaCha20, Key, Nonce};
use secp256k1::ecdh::SharedSecret;
use secp256k1::{self, PublicKey, Scalar, Secp256k1, SecretKey};

use crate::blinded_path::{BlindedPath, ControlTlvs, ForwardTlvs, ReceiveTlvs};
use crate::crypto::{chachapoly_decrypt, ChaChaReader};
use crate::ser::{
	encode_tlv_record, read_tlv_stream, BigSize, DecodeError, FixedLengthReader,
	LengthCalculatingWriter, Readable, TlvRecord, WithoutLength, Writeable, Writer,
};
use crate::types::FinalHopTlv;

// A packet's `hop_data` field is padded to SMALL_PACKET_HOP_DATA_LEN if the
// payloads fit, else to BIG_PACKET_HOP_DATA_LEN if they fit, so that its
// length reveals nothing about the path.
pub(crate) const SMALL_PACKET_HOP_DATA_LEN: usize = 1300;
pub(crate) const BIG_PACKET_HOP_DATA_LEN: usize = 32768;

/// TLV type carrying a reply path in a final hop payload.
const REPLY_PATH_TYPE: u64 = 2;
/// TLV type carrying a hop's encrypted route data.
const ENCRYPTED_DATA_TYPE: u64 = 4;
/// Application record types start here; lower types are routing control.
pub(crate) const FINAL_HOP_TLV_MIN_TYPE: u64 = 64;

/// A Sphinx packet: ephemeral key, layered hop data, and the outermost HMAC.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Packet {
	pub version: u8,
	pub public_key: PublicKey,
	// Onion message packets can be larger than the fixed-size payment onions,
	// so the hop data is heap allocated.
	pub hop_data: Vec<u8>,
	pub hmac: [u8; 32],
}

impl Writeable for Packet {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		self.version.write(w)?;
		self.public_key.write(w)?;
		w.write_all(&self.hop_data)?;
		self.hmac.write(w)?;
		Ok(())
	}
}

impl Packet {
	/// Parses a packet from its serialized form. The hop data length is
	/// implied by the total length: 1 version byte plus 33 key bytes plus 32
	/// trailing HMAC bytes of framing.
	pub fn decode(blob: &[u8]) -> Result<Packet, DecodeError> {
		if blob.len() < 66 {
			return Err(DecodeError::ShortRead);
		}
		let version = blob[0];
		let public_key =
			PublicKey::from_slice(&blob[1..34]).map_err(|_| DecodeError::InvalidValue)?;
		let hop_data = blob[34..blob.len() - 32].to_vec();
		let mut hmac = [0u8; 32];
		hmac.copy_from_slice(&blob[blob.len() - 32..]);
		Ok(Packet { version, public_key, hop_data, hmac })
	}
}

/// The plaintext of one hop's slot in the onion, before layering.
pub(crate) enum Payload {
	/// An intermediate hop: only the encrypted route data naming the next
	/// node.
	Forward {
		encrypted_route_data: Vec<u8>,
	},
	/// The final hop: encrypted route data plus the application-facing
	/// records.
	Receive {
		encrypted_route_data: Vec<u8>,
		reply_path: Option<BlindedPath>,
		final_hop_tlvs: Vec<FinalHopTlv>,
	},
}

impl Payload {
	fn write_records<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		match self {
			Payload::Forward { encrypted_route_data } => {
				encode_tlv_record(w, ENCRYPTED_DATA_TYPE, &WithoutLength(encrypted_route_data))?;
			},
			Payload::Receive { encrypted_route_data, reply_path, final_hop_tlvs } => {
				if let Some(path) = reply_path {
					encode_tlv_record(w, REPLY_PATH_TYPE, path)?;
				}
				encode_tlv_record(w, ENCRYPTED_DATA_TYPE, &WithoutLength(encrypted_route_data))?;
				for tlv in final_hop_tlvs {
					encode_tlv_record(w, tlv.tlv_type, &WithoutLength(&tlv.value))?;
				}
			},
		}
		Ok(())
	}
}

impl Writeable for Payload {
	// Hop payloads are length-prefixed in the packet so a hop knows where its
	// slot ends and the per-hop HMAC begins.
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		let mut len_calc = LengthCalculatingWriter(0);
		self.write_records(&mut len_calc)?;
		BigSize(len_calc.0 as u64).write(w)?;
		self.write_records(w)
	}
}

/// The symmetric material a sender derives per hop of the onion.
pub(crate) struct OnionKeys {
	pub ephemeral_pubkey: PublicKey,
	pub rho: [u8; 32],
	pub mu: [u8; 32],
}

#[inline]
pub(crate) fn gen_rho_from_shared_secret(shared_secret: &[u8]) -> [u8; 32] {
	assert_eq!(shared_secret.len(), 32);
	let mut hmac = HmacEngine::<Sha256>::new(b"rho");
	hmac.input(shared_secret);
	Hmac::from_engine(hmac).to_byte_array()
}

#[inline]
pub(crate) fn gen_rho_mu_from_shared_secret(shared_secret: &[u8]) -> ([u8; 32], [u8; 32]) {
	assert_eq!(shared_secret.len(), 32);
	(gen_rho_from_shared_secret(shared_secret), {
		let mut hmac = HmacEngine::<Sha256>::new(b"mu");
		hmac.input(shared_secret);
		Hmac::from_engine(hmac).to_byte_array()
	})
}

/// Derives the ephemeral public key a downstream node expects after the given
/// node has processed its layer: `pk * SHA256(pk || shared_secret)`.
pub(crate) fn next_hop_pubkey<T: secp256k1::Verification>(
	secp_ctx: &Secp256k1<T>, pubkey: PublicKey, shared_secret: &[u8],
) -> Result<PublicKey, secp256k1::Error> {
	let blinding_factor = {
		let mut sha = Sha256::engine();
		sha.input(&pubkey.serialize());
		sha.input(shared_secret);
		Sha256::from_engine(sha).to_byte_array()
	};
	pubkey.mul_tweak(secp_ctx, &Scalar::from_be_bytes(blinding_factor).unwrap())
}

/// Derives the per-hop onion keys for the given hop public keys. Can only
/// fail if a hop public key or the session key is invalid.
pub(crate) fn construct_onion_keys<T: secp256k1::Signing>(
	secp_ctx: &Secp256k1<T>, hop_pubkeys: &[PublicKey], session_priv: &SecretKey,
) -> Result<Vec<OnionKeys>, secp256k1::Error> {
	let mut res = Vec::with_capacity(hop_pubkeys.len());

	let mut onion_priv = *session_priv;
	let mut onion_pub = PublicKey::from_secret_key(secp_ctx, &onion_priv);

	for pubkey in hop_pubkeys {
		let shared_secret = SharedSecret::new(pubkey, &onion_priv);
		let (rho, mu) = gen_rho_mu_from_shared_secret(&shared_secret.secret_bytes());
		res.push(OnionKeys { ephemeral_pubkey: onion_pub, rho, mu });

		let blinding_factor = {
			let mut sha = Sha256::engine();
			sha.input(&onion_pub.serialize());
			sha.input(&shared_secret.secret_bytes());
			Sha256::from_engine(sha).to_byte_array()
		};
		onion_priv = onion_priv.mul_tweak(&Scalar::from_be_bytes(blinding_factor).unwrap())?;
		onion_pub = PublicKey::from_secret_key(secp_ctx, &onion_priv);
	}

	Ok(res)
}

#[inline]
fn shift_slice_right(arr: &mut [u8], amt: usize) {
	for i in (amt..arr.len()).rev() {
		arr[i] = arr[i - amt];
	}
	for i in 0..amt {
		arr[i] = 0;
	}
}

fn keyed_chacha(key: &[u8; 32]) -> ChaCha20 {
	ChaCha20::new(Key::from_slice(key), Nonce::from_slice(&[0u8; 12]))
}

/// Builds the onion packet for the given payloads and hop keys.
///
/// The hop data is padded to the smaller fixed size that fits, with initial
/// noise drawn from `prng_seed` and filler regenerated deterministically from
/// each hop's `rho`, so identical inputs yield identical ciphertext. Errors
/// if the payloads exceed the largest supported packet.
pub(crate) fn construct_onion_message_packet(
	payloads: Vec<Payload>, onion_keys: Vec<OnionKeys>, prng_seed: [u8; 32],
) -> Result<Packet, ()> {
	debug_assert_eq!(payloads.len(), onion_keys.len());
	let payloads_ser_len: usize = payloads.iter().map(|p| p.serialized_length() + 32).sum();
	let hop_data_len = if payloads_ser_len <= SMALL_PACKET_HOP_DATA_LEN {
		SMALL_PACKET_HOP_DATA_LEN
	} else if payloads_ser_len <= BIG_PACKET_HOP_DATA_LEN {
		BIG_PACKET_HOP_DATA_LEN
	} else {
		return Err(());
	};
	let first_ephemeral_pubkey = match onion_keys.first() {
		Some(keys) => keys.ephemeral_pubkey,
		None => return Err(()),
	};

	let mut packet_data = vec![0u8; hop_data_len];
	keyed_chacha(&prng_seed).apply_keystream(&mut packet_data);

	// Generate the filler that, after all layers of encryption are applied,
	// occupies the region each hop's own slot vacated. Each hop's keystream
	// is picked up at the offset where that hop will find it.
	let filler = {
		let mut res = Vec::new();
		let mut pos = 0;
		for (i, (payload, keys)) in payloads.iter().zip(onion_keys.iter()).enumerate() {
			if i == payloads.len() - 1 {
				break;
			}
			let mut chacha = keyed_chacha(&keys.rho);
			chacha.seek((hop_data_len - pos) as u64);

			pos += payload.serialized_length() + 32;
			debug_assert!(pos <= hop_data_len);
			res.resize(pos, 0u8);
			chacha.apply_keystream(&mut res);
		}
		res
	};

	// Layer from the final hop inward: insert the payload and running HMAC,
	// encrypt, and authenticate.
	let mut hmac_res = [0u8; 32];
	for (i, (payload, keys)) in payloads.iter().zip(onion_keys.iter()).rev().enumerate() {
		let payload_ser = payload.encode();
		let amt = payload_ser.len() + 32;
		shift_slice_right(&mut packet_data, amt);
		packet_data[..payload_ser.len()].copy_from_slice(&payload_ser);
		packet_data[payload_ser.len()..amt].copy_from_slice(&hmac_res);

		keyed_chacha(&keys.rho).apply_keystream(&mut packet_data);

		if i == 0 {
			let filler_start = hop_data_len - filler.len();
			packet_data[filler_start..].copy_from_slice(&filler);
		}

		let mut hmac = HmacEngine::<Sha256>::new(&keys.mu);
		hmac.input(&packet_data);
		hmac_res = Hmac::from_engine(hmac).to_byte_array();
	}

	Ok(Packet { version: 0, public_key: first_ephemeral_pubkey, hop_data: packet_data, hmac: hmac_res })
}

/// One hop's decoded slot, produced by [`decode_next_message_hop`].
pub(crate) enum ParsedPayload {
	Forward(ForwardTlvs),
	Receive {
		tlvs: ReceiveTlvs,
		reply_path: Option<BlindedPath>,
		final_hop_tlvs: Vec<FinalHopTlv>,
	},
}

fn parse_payload_records(
	records: Vec<TlvRecord>, control_tlvs_rho: [u8; 32],
) -> Result<ParsedPayload, DecodeError> {
	let mut reply_path: Option<BlindedPath> = None;
	let mut encrypted_route_data: Option<Vec<u8>> = None;
	let mut final_hop_tlvs = Vec::new();

	for record in records {
		match record.typ {
			REPLY_PATH_TYPE => {
				reply_path = Some(Readable::read(&mut Cursor::new(&record.value))?);
			},
			ENCRYPTED_DATA_TYPE => encrypted_route_data = Some(record.value),
			typ if typ >= FINAL_HOP_TLV_MIN_TYPE => {
				final_hop_tlvs.push(FinalHopTlv { tlv_type: typ, value: record.value });
			},
			typ if typ % 2 == 0 => return Err(DecodeError::UnknownRequiredFeature),
			_ => {},
		}
	}

	let encrypted = encrypted_route_data.ok_or(DecodeError::InvalidValue)?;
	let plaintext = chachapoly_decrypt(control_tlvs_rho, &encrypted)?;
	match ControlTlvs::parse(&plaintext)? {
		ControlTlvs::Forward(tlvs) => {
			// Reply paths and application records are only meaningful at the
			// final hop.
			if reply_path.is_some() || !final_hop_tlvs.is_empty() {
				return Err(DecodeError::InvalidValue);
			}
			Ok(ParsedPayload::Forward(tlvs))
		},
		ControlTlvs::Receive(tlvs) => {
			Ok(ParsedPayload::Receive { tlvs, reply_path, final_hop_tlvs })
		},
	}
}

/// Verifies and strips one onion layer.
///
/// Returns the hop's payload plus, for non-final hops, the HMAC and
/// re-padded hop data of the packet to hand to the next node.
pub(crate) fn decode_next_message_hop(
	onion_shared_secret: [u8; 32], control_tlvs_rho: [u8; 32], hop_data: &[u8], hmac: [u8; 32],
) -> Result<(ParsedPayload, Option<([u8; 32], Vec<u8>)>), DecodeError> {
	let (rho, mu) = gen_rho_mu_from_shared_secret(&onion_shared_secret);

	let mut hmac_engine = HmacEngine::<Sha256>::new(&mu);
	hmac_engine.input(hop_data);
	if !fixed_time_eq(&Hmac::from_engine(hmac_engine).to_byte_array(), &hmac) {
		return Err(DecodeError::InvalidValue);
	}

	let mut chacha = keyed_chacha(&rho);
	let (payload, next_hmac, mut next_bytes, bytes_read) = {
		let mut chacha_stream =
			ChaChaReader { chacha: &mut chacha, read: Cursor::new(hop_data) };
		let payload_len: BigSize = Readable::read(&mut chacha_stream)?;
		if payload_len.0 > hop_data.len() as u64 {
			return Err(DecodeError::BadLengthDescriptor);
		}
		let records = {
			let mut fixed = FixedLengthReader::new(&mut chacha_stream, payload_len.0);
			let records = read_tlv_stream(&mut fixed)?;
			fixed.eat_remaining()?;
			records
		};
		let payload = parse_payload_records(records, control_tlvs_rho)?;
		let next_hmac: [u8; 32] = Readable::read(&mut chacha_stream)?;

		let mut next_bytes = Vec::with_capacity(hop_data.len());
		chacha_stream.read_to_end(&mut next_bytes)?;
		let bytes_read = next_bytes.len();
		(payload, next_hmac, next_bytes, bytes_read)
	};

	if next_hmac == [0u8; 32] {
		match payload {
			ParsedPayload::Receive { .. } => Ok((payload, None)),
			// A terminal HMAC on a forward payload means the sender encoded
			// a final hop as a forwarding hop.
			ParsedPayload::Forward(_) => Err(DecodeError::InvalidValue),
		}
	} else {
		match payload {
			ParsedPayload::Forward(_) => {
				// Re-pad the remaining hop data to the fixed length by
				// continuing this hop's keystream, exactly as the sender's
				// filler anticipated.
				next_bytes.resize(hop_data.len(), 0u8);
				chacha.apply_keystream(&mut next_bytes[bytes_read..]);
				Ok((payload, Some((next_hmac, next_bytes))))
			},
			ParsedPayload::Receive { .. } => Err(DecodeError::InvalidValue),
		}
	}
}
