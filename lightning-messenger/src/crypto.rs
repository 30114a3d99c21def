// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Entropy sourcing and the symmetric-crypto adapters used by onion
//! construction: a ChaCha20 decrypting reader for hop data and
//! ChaCha20-Poly1305 sealing for blinded route data.

use std::io::{self, Read};

use chacha20::cipher::StreamCipher;
use chacha20::ChaCha20;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::ser::DecodeError;

/// The length of the Poly1305 authentication tag appended to encrypted route
/// data.
pub(crate) const POLY1305_TAG_LEN: usize = 16;

/// A source of cryptographically secure randomness.
///
/// Session scalars and packet filler seeds are drawn through this trait so
/// that tests can inject a deterministic source and assert byte-identical
/// packets.
pub trait EntropySource {
	/// Gets 32 bytes of a uniformly random, cryptographically secure value.
	fn get_secure_random_bytes(&self) -> [u8; 32];
}

/// An [`EntropySource`] backed by the operating system's RNG.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsEntropySource;

impl EntropySource for OsEntropySource {
	fn get_secure_random_bytes(&self) -> [u8; 32] {
		let mut bytes = [0u8; 32];
		OsRng.fill_bytes(&mut bytes);
		bytes
	}
}

/// Decrypts a ChaCha20 stream while reading it, so hop data never exists in
/// ciphertext form past the reader.
pub(crate) struct ChaChaReader<'a, R: Read> {
	pub chacha: &'a mut ChaCha20,
	pub read: R,
}

impl<'a, R: Read> Read for ChaChaReader<'a, R> {
	fn read(&mut self, dest: &mut [u8]) -> Result<usize, io::Error> {
		let res = self.read.read(dest)?;
		if res > 0 {
			self.chacha.apply_keystream(&mut dest[0..res]);
		}
		Ok(res)
	}
}

/// Encrypts `plaintext` under `rho` with ChaCha20-Poly1305, returning the
/// ciphertext with the 16-byte tag appended. The nonce is all-zero: every
/// `rho` is a single-use key derived from a per-hop shared secret.
pub(crate) fn chachapoly_encrypt(rho: [u8; 32], plaintext: &[u8]) -> Vec<u8> {
	let cipher = ChaCha20Poly1305::new(Key::from_slice(&rho));
	cipher
		.encrypt(Nonce::from_slice(&[0u8; 12]), plaintext)
		.expect("in-memory aead encryption cannot fail")
}

/// Reverses [`chachapoly_encrypt`], failing if the tag does not verify.
pub(crate) fn chachapoly_decrypt(rho: [u8; 32], ciphertext: &[u8]) -> Result<Vec<u8>, DecodeError> {
	if ciphertext.len() < POLY1305_TAG_LEN {
		return Err(DecodeError::InvalidValue);
	}
	let cipher = ChaCha20Poly1305::new(Key::from_slice(&rho));
	cipher.decrypt(Nonce::from_slice(&[0u8; 12]), ciphertext).map_err(|_| DecodeError::InvalidValue)
}

#[cfg(test)]
mod tests {
	use super::*;
	use chacha20::cipher::KeyIvInit;
	use std::io::Cursor;

	#[test]
	fn chachapoly_roundtrip() {
		let rho = [42u8; 32];
		let plaintext = b"next hop control tlvs";
		let ciphertext = chachapoly_encrypt(rho, plaintext);
		assert_eq!(ciphertext.len(), plaintext.len() + POLY1305_TAG_LEN);
		assert_ne!(&ciphertext[..plaintext.len()], &plaintext[..]);
		assert_eq!(chachapoly_decrypt(rho, &ciphertext).unwrap(), plaintext);
	}

	#[test]
	fn chachapoly_rejects_tampering() {
		let rho = [42u8; 32];
		let mut ciphertext = chachapoly_encrypt(rho, b"payload");
		ciphertext[0] ^= 0xff;
		assert_eq!(chachapoly_decrypt(rho, &ciphertext), Err(DecodeError::InvalidValue));
	}

	#[test]
	fn chachapoly_rejects_wrong_key() {
		let ciphertext = chachapoly_encrypt([1u8; 32], b"payload");
		assert_eq!(chachapoly_decrypt([2u8; 32], &ciphertext), Err(DecodeError::InvalidValue));
	}

	#[test]
	fn chachapoly_rejects_truncated_ciphertext() {
		assert_eq!(chachapoly_decrypt([1u8; 32], &[0u8; 7]), Err(DecodeError::InvalidValue));
	}

	#[test]
	fn chacha_reader_decrypts_stream() {
		let key = [7u8; 32];
		let plaintext = vec![3u8; 100];

		let mut enc = ChaCha20::new(chacha20::Key::from_slice(&key), chacha20::Nonce::from_slice(&[0u8; 12]));
		let mut ciphertext = plaintext.clone();
		enc.apply_keystream(&mut ciphertext);

		let mut dec = ChaCha20::new(chacha20::Key::from_slice(&key), chacha20::Nonce::from_slice(&[0u8; 12]));
		let mut reader = ChaChaReader { chacha: &mut dec, read: Cursor::new(&ciphertext) };
		let mut out = Vec::new();
		reader.read_to_end(&mut out).unwrap();
		assert_eq!(out, plaintext);
	}

	#[test]
	fn os_entropy_is_not_constant() {
		let source = OsEntropySource;
		assert_ne!(source.get_secure_random_bytes(), source.get_secure_random_bytes());
	}
}
