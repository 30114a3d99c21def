// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! A very simple serialization framework which is used to serialize the wire
//! envelope, per-hop payloads, and blinded route data.

use std::cmp;
use std::fmt;
use std::io::{self, Read};

use secp256k1::PublicKey;

/// A trait that is similar to [`std::io::Write`] but restricted to the one
/// method serialization actually needs. An impl is provided for any type that
/// also impls [`std::io::Write`].
pub trait Writer {
	/// Writes the given buf out. See [`std::io::Write::write_all`] for more.
	fn write_all(&mut self, buf: &[u8]) -> Result<(), io::Error>;
}

impl<W: io::Write> Writer for W {
	#[inline]
	fn write_all(&mut self, buf: &[u8]) -> Result<(), io::Error> {
		<Self as io::Write>::write_all(self, buf)
	}
}

pub(crate) struct VecWriter(pub Vec<u8>);
impl Writer for VecWriter {
	fn write_all(&mut self, buf: &[u8]) -> Result<(), io::Error> {
		self.0.extend_from_slice(buf);
		Ok(())
	}
}

/// Writer that only tracks the amount of data written - useful if you need to
/// calculate the length of some data when serialized but don't yet need the
/// full data.
pub(crate) struct LengthCalculatingWriter(pub usize);
impl Writer for LengthCalculatingWriter {
	#[inline]
	fn write_all(&mut self, buf: &[u8]) -> Result<(), io::Error> {
		self.0 += buf.len();
		Ok(())
	}
}

/// Essentially [`std::io::Take`] but a bit simpler and with a method to walk
/// the underlying stream forward to ensure we always consume exactly the
/// fixed length specified.
pub(crate) struct FixedLengthReader<R: Read> {
	read: R,
	bytes_read: u64,
	total_bytes: u64,
}

impl<R: Read> FixedLengthReader<R> {
	pub fn new(read: R, total_bytes: u64) -> Self {
		Self { read, bytes_read: 0, total_bytes }
	}

	#[inline]
	pub fn bytes_remain(&self) -> bool {
		self.bytes_read != self.total_bytes
	}

	#[inline]
	pub fn remaining_bytes(&self) -> u64 {
		self.total_bytes.saturating_sub(self.bytes_read)
	}

	#[inline]
	pub fn eat_remaining(&mut self) -> Result<(), DecodeError> {
		io::copy(self, &mut io::sink()).map_err(|_| DecodeError::ShortRead)?;
		if self.bytes_read != self.total_bytes {
			Err(DecodeError::ShortRead)
		} else {
			Ok(())
		}
	}
}

impl<R: Read> Read for FixedLengthReader<R> {
	#[inline]
	fn read(&mut self, dest: &mut [u8]) -> Result<usize, io::Error> {
		if self.total_bytes == self.bytes_read {
			Ok(0)
		} else {
			let read_len = cmp::min(dest.len() as u64, self.total_bytes - self.bytes_read);
			match self.read.read(&mut dest[0..(read_len as usize)]) {
				Ok(v) => {
					self.bytes_read += v as u64;
					Ok(v)
				},
				Err(e) => Err(e),
			}
		}
	}
}

/// An error in decoding a message or struct.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodeError {
	/// Buffer too short
	ShortRead,
	/// A length descriptor in the packet didn't describe the later data
	/// correctly.
	BadLengthDescriptor,
	/// A value was invalid (e.g. a public key failed to parse or an HMAC
	/// didn't verify).
	InvalidValue,
	/// An even TLV type was not understood.
	UnknownRequiredFeature,
	/// Error from [`std::io`].
	Io(io::ErrorKind),
}

impl fmt::Display for DecodeError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			DecodeError::ShortRead => f.write_str("Packet extended beyond the provided bytes"),
			DecodeError::BadLengthDescriptor => {
				f.write_str("A length descriptor in the packet didn't describe the later data correctly")
			},
			DecodeError::InvalidValue => f.write_str("A value was invalid"),
			DecodeError::UnknownRequiredFeature => {
				f.write_str("Unknown required feature preventing decode")
			},
			DecodeError::Io(ref e) => fmt::Debug::fmt(e, f),
		}
	}
}

impl std::error::Error for DecodeError {}

impl From<io::Error> for DecodeError {
	fn from(e: io::Error) -> Self {
		if e.kind() == io::ErrorKind::UnexpectedEof {
			DecodeError::ShortRead
		} else {
			DecodeError::Io(e.kind())
		}
	}
}

/// A trait that various types implement allowing them to be written out to a
/// [`Writer`].
pub trait Writeable {
	/// Writes self out to the given [`Writer`].
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), io::Error>;

	/// Writes self out to a `Vec<u8>`.
	fn encode(&self) -> Vec<u8> {
		let mut msg = VecWriter(Vec::new());
		self.write(&mut msg).expect("in-memory writes cannot fail");
		msg.0
	}

	/// Gets the length of this object after it has been serialized.
	fn serialized_length(&self) -> usize {
		let mut len_calc = LengthCalculatingWriter(0);
		self.write(&mut len_calc).expect("in-memory writes cannot fail");
		len_calc.0
	}
}

/// A trait that various types implement allowing them to be read in from a
/// [`Read`].
pub trait Readable
where
	Self: Sized,
{
	/// Reads a `Self` in from the given [`Read`].
	fn read<R: Read>(reader: &mut R) -> Result<Self, DecodeError>;
}

macro_rules! impl_writeable_primitive {
	($val_type:ty, $len: expr) => {
		impl Writeable for $val_type {
			#[inline]
			fn write<W: Writer>(&self, writer: &mut W) -> Result<(), io::Error> {
				writer.write_all(&self.to_be_bytes())
			}
		}
		impl Readable for $val_type {
			#[inline]
			fn read<R: Read>(reader: &mut R) -> Result<$val_type, DecodeError> {
				let mut buf = [0; $len];
				reader.read_exact(&mut buf)?;
				Ok(<$val_type>::from_be_bytes(buf))
			}
		}
	};
}

impl_writeable_primitive!(u64, 8);
impl_writeable_primitive!(u32, 4);
impl_writeable_primitive!(u16, 2);

impl Writeable for u8 {
	#[inline]
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), io::Error> {
		writer.write_all(&[*self])
	}
}
impl Readable for u8 {
	#[inline]
	fn read<R: Read>(reader: &mut R) -> Result<u8, DecodeError> {
		let mut buf = [0; 1];
		reader.read_exact(&mut buf)?;
		Ok(buf[0])
	}
}

macro_rules! impl_array {
	($size:expr) => {
		impl Writeable for [u8; $size] {
			#[inline]
			fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
				w.write_all(self)
			}
		}

		impl Readable for [u8; $size] {
			#[inline]
			fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
				let mut buf = [0u8; $size];
				r.read_exact(&mut buf)?;
				Ok(buf)
			}
		}
	};
}

impl_array!(32); // for HMACs, keys, and path ids
impl_array!(33); // for compressed public keys

// Byte vectors carry a u16 length prefix on the wire.
impl Writeable for Vec<u8> {
	#[inline]
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		debug_assert!(self.len() <= u16::MAX as usize);
		(self.len() as u16).write(w)?;
		w.write_all(self)
	}
}

impl Readable for Vec<u8> {
	#[inline]
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		let len: u16 = Readable::read(r)?;
		let mut ret = vec![0u8; len as usize];
		r.read_exact(&mut ret)?;
		Ok(ret)
	}
}

impl Writeable for PublicKey {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		self.serialize().write(w)
	}
}

impl Readable for PublicKey {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		let buf: [u8; 33] = Readable::read(r)?;
		match PublicKey::from_slice(&buf) {
			Ok(key) => Ok(key),
			Err(_) => Err(DecodeError::InvalidValue),
		}
	}
}

/// Wrapper to write a slice of bytes without any length prefix, for use as a
/// TLV record value whose length is carried by the record itself.
pub(crate) struct WithoutLength<'a>(pub &'a [u8]);

impl<'a> Writeable for WithoutLength<'a> {
	#[inline]
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		w.write_all(self.0)
	}
}

/// Lightning TLV uses a custom variable-length integer called `BigSize`. It is
/// similar to Bitcoin's variable-length integers except that it is serialized
/// in big-endian instead of little-endian.
///
/// Like Bitcoin's variable-length integer, it exhibits ambiguity in that
/// certain values can be encoded in several different ways, which we must
/// check for at deserialization-time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BigSize(pub u64);

impl Writeable for BigSize {
	#[inline]
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), io::Error> {
		match self.0 {
			0..=0xFC => (self.0 as u8).write(writer),
			0xFD..=0xFFFF => {
				0xFDu8.write(writer)?;
				(self.0 as u16).write(writer)
			},
			0x10000..=0xFFFFFFFF => {
				0xFEu8.write(writer)?;
				(self.0 as u32).write(writer)
			},
			_ => {
				0xFFu8.write(writer)?;
				self.0.write(writer)
			},
		}
	}
}

impl Readable for BigSize {
	#[inline]
	fn read<R: Read>(reader: &mut R) -> Result<BigSize, DecodeError> {
		let n: u8 = Readable::read(reader)?;
		match n {
			0xFF => {
				let x: u64 = Readable::read(reader)?;
				if x < 0x100000000 {
					Err(DecodeError::InvalidValue)
				} else {
					Ok(BigSize(x))
				}
			},
			0xFE => {
				let x: u32 = Readable::read(reader)?;
				if x < 0x10000 {
					Err(DecodeError::InvalidValue)
				} else {
					Ok(BigSize(x as u64))
				}
			},
			0xFD => {
				let x: u16 = Readable::read(reader)?;
				if x < 0xFD {
					Err(DecodeError::InvalidValue)
				} else {
					Ok(BigSize(x as u64))
				}
			},
			n => Ok(BigSize(n as u64)),
		}
	}
}

/// Writes a single TLV record: a `BigSize` type, a `BigSize` length, and the
/// value's serialization.
pub(crate) fn encode_tlv_record<W: Writer, T: Writeable>(
	w: &mut W, typ: u64, value: &T,
) -> Result<(), io::Error> {
	BigSize(typ).write(w)?;
	BigSize(value.serialized_length() as u64).write(w)?;
	value.write(w)
}

/// A single raw TLV record read off a stream.
#[derive(Debug, PartialEq)]
pub(crate) struct TlvRecord {
	pub typ: u64,
	pub value: Vec<u8>,
}

/// Reads raw TLV records until the fixed-length stream is exhausted. Record
/// contents are left uninterpreted; callers dispatch on the type.
pub(crate) fn read_tlv_stream<R: Read>(
	r: &mut FixedLengthReader<R>,
) -> Result<Vec<TlvRecord>, DecodeError> {
	let mut records = Vec::new();
	while r.bytes_remain() {
		let typ: BigSize = Readable::read(r)?;
		let len: BigSize = Readable::read(r)?;
		if len.0 > r.remaining_bytes() {
			return Err(DecodeError::BadLengthDescriptor);
		}
		let mut value = vec![0u8; len.0 as usize];
		r.read_exact(&mut value)?;
		records.push(TlvRecord { typ: typ.0, value });
	}
	Ok(records)
}
