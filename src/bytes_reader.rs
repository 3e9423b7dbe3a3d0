use crate::{frame::Frame, packets::DeserializeError, PacketId};
use std::str::from_utf8;

type Result<T> = std::result::Result<T, DeserializeError>;

/// A bounds-checked reader over a borrowed byte slice.
///
/// Every `take_*` method returns [`DeserializeError::Incomplete`] instead of
/// reading past the end of the slice, leaving the position unchanged.
#[derive(Debug)]
pub struct Cursor<'a> {
	inner: &'a [u8],
	position: usize,
}

impl<'a> Cursor<'a> {
	#[inline]
	pub fn new(inner: &'a [u8]) -> Self {
		Self { inner, position: 0 }
	}

	/// Creates a cursor over the variable header and payload of `frame`.
	#[inline]
	pub fn from_frame(frame: &'a Frame) -> Self {
		Self::new(&frame.payload)
	}

	#[inline]
	pub fn position(&self) -> usize {
		self.position
	}

	#[inline]
	pub fn remaining(&self) -> usize {
		self.inner.len() - self.position
	}

	#[inline]
	pub fn has_remaining(&self) -> bool {
		self.remaining() > 0
	}

	pub fn require(&self, len: usize) -> Result<()> {
		if self.remaining() >= len {
			Ok(())
		} else {
			Err(DeserializeError::Incomplete)
		}
	}

	pub fn take_u8(&mut self) -> Result<u8> {
		self.require(1)?;
		let value = self.inner[self.position];
		self.position += 1;
		Ok(value)
	}

	pub fn take_u16(&mut self) -> Result<u16> {
		let [msb, lsb] = self.take_array()?;
		Ok(u16::from_be_bytes([msb, lsb]))
	}

	/// Reads a big-endian message identifier, rejecting 0.
	pub fn take_id(&mut self) -> Result<PacketId> {
		let id = self.take_u16()?;
		PacketId::new(id).ok_or(DeserializeError::ZeroPacketId)
	}

	pub fn take_slice(&mut self, len: usize) -> Result<&'a [u8]> {
		self.require(len)?;
		let slice = &self.inner[self.position..self.position + len];
		self.position += len;
		Ok(slice)
	}

	/// Reads a 2-byte length followed by that many bytes.
	pub fn take_prefixed(&mut self) -> Result<&'a [u8]> {
		let start = self.position;
		let len = self.take_u16()?;
		self.take_slice(len.into()).map_err(|error| {
			self.position = start;
			error
		})
	}

	/// Reads a length-prefixed UTF-8 string.
	pub fn take_str(&mut self) -> Result<&'a str> {
		let slice = self.take_prefixed()?;
		Ok(from_utf8(slice)?)
	}

	/// Reads a 1 to 4 byte remaining-length field.
	pub fn take_var(&mut self) -> Result<usize> {
		let start = self.position;
		let mut value = 0;
		for multiplier in [0x01, 0x80, 0x4000, 0x20_0000, usize::MAX] {
			// A fifth length byte is never valid.
			if multiplier == usize::MAX {
				return Err(DeserializeError::MalformedLength);
			}

			let encoded = match self.take_u8() {
				Ok(encoded) => encoded as usize,
				Err(error) => {
					self.position = start;
					return Err(error);
				}
			};
			value += (encoded & 0x7f) * multiplier;

			if encoded & 0x80 == 0 {
				break;
			}
		}

		Ok(value)
	}

	fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
		let slice = self.take_slice(N)?;
		let mut array = [0; N];
		array.copy_from_slice(slice);
		Ok(array)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn decodes_remaining_length() {
		let cases: &[(&[u8], usize)] = &[
			(&[0x00], 0),
			(&[0x7f], 127),
			(&[0x80, 0x01], 128),
			(&[0xc1, 0x02], 321),
			(&[0xff, 0x7f], 16_383),
			(&[0x80, 0x80, 0x01], 16_384),
			(&[0xff, 0xff, 0x7f], 2_097_151),
			(&[0x80, 0x80, 0x80, 0x01], 2_097_152),
			(&[0xff, 0xff, 0xff, 0x7f], 268_435_455),
		];

		for (bytes, expected) in cases {
			let mut cursor = Cursor::new(bytes);
			assert_eq!(cursor.take_var().unwrap(), *expected);
			assert!(!cursor.has_remaining());
		}
	}

	#[test]
	fn rejects_fifth_length_byte() {
		let mut cursor = Cursor::new(&[0xff, 0xff, 0xff, 0xff, 0x01]);
		assert_eq!(cursor.take_var(), Err(DeserializeError::MalformedLength));
	}

	#[test]
	fn truncated_length_is_incomplete() {
		let mut cursor = Cursor::new(&[0x80, 0x80]);
		assert_eq!(cursor.take_var(), Err(DeserializeError::Incomplete));
		assert_eq!(cursor.position(), 0);
	}

	#[test]
	fn overrun_leaves_position_unchanged() {
		let mut cursor = Cursor::new(&[0x00, 0x05, b'a', b'b']);
		assert_eq!(cursor.take_str(), Err(DeserializeError::Incomplete));
		assert_eq!(cursor.position(), 0);
		assert_eq!(cursor.take_u16().unwrap(), 5);
		assert_eq!(cursor.take_slice(2).unwrap(), b"ab");
		assert!(!cursor.has_remaining());
	}

	#[test]
	fn zero_id_is_rejected() {
		let mut cursor = Cursor::new(&[0x00, 0x00]);
		assert_eq!(cursor.take_id(), Err(DeserializeError::ZeroPacketId));
	}
}
