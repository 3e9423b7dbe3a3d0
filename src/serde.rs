//! Bounds-checked write primitives for MQTT wire encoding.

use bytes::BufMut;
use std::mem;

/// Largest value representable by the remaining-length field.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SerializeError {
	#[error("destination buffer is too small")]
	InsufficientBuffer,
	#[error("string of {0} bytes exceeds the 65535 byte limit")]
	StringTooLong(usize),
	#[error("remaining length {0} exceeds 268435455")]
	LengthTooLarge(usize),
}

pub fn require_mut(dst: &impl BufMut, len: usize) -> Result<(), SerializeError> {
	if dst.remaining_mut() < len {
		Err(SerializeError::InsufficientBuffer)
	} else {
		Ok(())
	}
}

pub fn put_u8(dst: &mut impl BufMut, val: u8) -> Result<(), SerializeError> {
	require_mut(dst, mem::size_of::<u8>())?;
	dst.put_u8(val);
	Ok(())
}

pub fn put_u16(dst: &mut impl BufMut, val: u16) -> Result<(), SerializeError> {
	require_mut(dst, mem::size_of::<u16>())?;
	dst.put_u16(val);
	Ok(())
}

pub fn put_slice(dst: &mut impl BufMut, slice: &[u8]) -> Result<(), SerializeError> {
	require_mut(dst, slice.len())?;
	dst.put_slice(slice);
	Ok(())
}

/// Writes a 2-byte big-endian length followed by the bytes of `s`.
pub fn put_str(dst: &mut impl BufMut, s: &str) -> Result<(), SerializeError> {
	put_prefixed(dst, s.as_bytes())
}

/// Writes a 2-byte big-endian length followed by `slice`.
pub fn put_prefixed(dst: &mut impl BufMut, slice: &[u8]) -> Result<(), SerializeError> {
	let Ok(len) = u16::try_from(slice.len()) else {
		return Err(SerializeError::StringTooLong(slice.len()));
	};
	put_u16(dst, len)?;
	put_slice(dst, slice)
}

/// Writes `value` as a 1 to 4 byte remaining-length field.
pub fn put_var(dst: &mut impl BufMut, mut value: usize) -> Result<(), SerializeError> {
	if value > MAX_REMAINING_LENGTH {
		return Err(SerializeError::LengthTooLarge(value));
	}

	loop {
		let mut encoded = value % 0x80;
		value /= 0x80;
		if value > 0 {
			encoded |= 0x80;
		}
		put_u8(dst, encoded as u8)?;
		if value == 0 {
			break Ok(());
		}
	}
}

/// Returns the number of bytes `put_var` would write for `value`.
#[inline]
pub fn var_len(value: usize) -> usize {
	match value {
		0..=0x7f => 1,
		0x80..=0x3fff => 2,
		0x4000..=0x1f_ffff => 3,
		_ => 4,
	}
}
